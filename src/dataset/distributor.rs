//! Work-unit distributor.
//!
//! Partitions an in-memory dataset into `ceil(n / batch_size)` batches and
//! hands them out epoch by epoch. A batch leaves the incomplete queue only
//! when it is explicitly completed, so a batch dispatched to a client that
//! never reports back comes around again later in the same epoch.

use crate::codec::Tensor;
use crate::config::DatasetConfig;
use crate::core::{Error, Result};
use std::collections::VecDeque;

/// One dispatched work unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub batch: usize,
    pub epoch: usize,
    pub x: Tensor,
    pub y: Tensor,
}

/// Hands out batches of `(x, y)` until the configured epochs are done.
#[derive(Debug)]
pub struct DistributedDataset {
    x: Tensor,
    y: Tensor,
    config: DatasetConfig,
    /// Current epoch; `None` before the first call to `next`.
    epoch: Option<usize>,
    num_batches: usize,
    /// Incomplete batch indices, cycled front to back.
    incomplete: VecDeque<usize>,
    exhausted: bool,
}

impl DistributedDataset {
    pub fn new(x: Tensor, y: Tensor, config: DatasetConfig) -> Result<Self> {
        if x.shape().is_empty() || y.shape().is_empty() {
            return Err(Error::ShapeMismatch(
                "dataset tensors need a leading example axis".to_string(),
            ));
        }
        if x.rows() != y.rows() {
            return Err(Error::ShapeMismatch(format!(
                "{} inputs but {} labels",
                x.rows(),
                y.rows()
            )));
        }
        if x.rows() == 0 {
            return Err(Error::InvalidConfig("dataset is empty".to_string()));
        }
        if config.batch_size == 0 || config.epochs == 0 {
            return Err(Error::InvalidConfig(
                "batch size and epochs must be positive".to_string(),
            ));
        }

        let num_batches = x.rows().div_ceil(config.batch_size);
        Ok(Self {
            x,
            y,
            config,
            epoch: None,
            num_batches,
            incomplete: VecDeque::new(),
            exhausted: false,
        })
    }

    /// Next batch to dispatch, or `None` once every epoch is complete.
    ///
    /// The returned batch stays incomplete until [`complete_batch`] is
    /// called with its index.
    ///
    /// [`complete_batch`]: DistributedDataset::complete_batch
    pub fn next(&mut self) -> Result<Option<Batch>> {
        if self.exhausted {
            return Ok(None);
        }

        if self.incomplete.is_empty() {
            let epoch = self.epoch.map_or(0, |e| e + 1);
            if epoch >= self.config.epochs {
                self.exhausted = true;
                return Ok(None);
            }
            self.epoch = Some(epoch);
            self.incomplete.extend(0..self.num_batches);
        }

        let Some(batch) = self.incomplete.pop_front() else {
            return Ok(None);
        };
        self.incomplete.push_back(batch);

        let (x, y) = self.rows(batch)?;
        Ok(Some(Batch {
            batch,
            epoch: self.epoch.unwrap_or(0),
            x,
            y,
        }))
    }

    /// Mark a batch as done. Returns `false` if it was not outstanding in
    /// the current epoch.
    pub fn complete_batch(&mut self, batch: usize) -> bool {
        match self.incomplete.iter().position(|&b| b == batch) {
            Some(pos) => {
                self.incomplete.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Move an outstanding batch to the front so that it is the next one
    /// handed out. Returns `false` if it was not outstanding.
    pub fn requeue_front(&mut self, batch: usize) -> bool {
        match self.incomplete.iter().position(|&b| b == batch) {
            Some(pos) => {
                self.incomplete.remove(pos);
                self.incomplete.push_front(batch);
                true
            }
            None => false,
        }
    }

    pub fn is_outstanding(&self, batch: usize) -> bool {
        self.incomplete.contains(&batch)
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn num_incomplete(&self) -> usize {
        self.incomplete.len()
    }

    pub fn epoch(&self) -> Option<usize> {
        self.epoch
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn len(&self) -> usize {
        self.x.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Materialize rows `[batch * bs, batch * bs + bs)`. Past the end the
    /// batch is either truncated or wraps around to the first rows.
    fn rows(&self, batch: usize) -> Result<(Tensor, Tensor)> {
        let n = self.x.rows();
        let start = batch * self.config.batch_size;
        let end = start + self.config.batch_size;

        if end <= n {
            return Ok((self.x.slice_rows(start, end)?, self.y.slice_rows(start, end)?));
        }
        if self.config.small_last_batch {
            return Ok((self.x.slice_rows(start, n)?, self.y.slice_rows(start, n)?));
        }

        let indices: Vec<usize> = (start..end).map(|r| r % n).collect();
        Ok((self.x.select_rows(&indices)?, self.y.select_rows(&indices)?))
    }
}
