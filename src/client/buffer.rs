//! Labeled examples waiting to be trained on.

use crate::codec::{DType, Tensor};
use crate::core::{Error, Result};

/// Client-local example accumulator.
///
/// An appended tensor whose shape equals the unit shape is one example;
/// anything else must be a batch whose trailing dims equal the unit shape.
#[derive(Clone, Debug)]
pub struct ExampleBuffer {
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    x: Tensor,
    y: Tensor,
}

impl ExampleBuffer {
    pub fn new(input_shape: &[usize], output_shape: &[usize]) -> Self {
        Self {
            input_shape: input_shape.to_vec(),
            output_shape: output_shape.to_vec(),
            x: Tensor::empty_rows(DType::Float32, input_shape),
            y: Tensor::empty_rows(DType::Float32, output_shape),
        }
    }

    pub fn add(&mut self, x: &Tensor, y: &Tensor) -> Result<()> {
        let x = as_rows(x, &self.input_shape)?;
        let y = as_rows(y, &self.output_shape)?;
        if x.rows() != y.rows() {
            return Err(Error::ShapeMismatch(format!(
                "{} inputs but {} labels",
                x.rows(),
                y.rows()
            )));
        }

        if self.is_empty() {
            self.x = x;
            self.y = y;
        } else {
            self.x = self.x.concat_rows(&x)?;
            self.y = self.y.concat_rows(&y)?;
        }
        Ok(())
    }

    /// Number of buffered examples.
    pub fn len(&self) -> usize {
        self.x.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of the first `n` examples.
    pub fn front(&self, n: usize) -> Result<(Tensor, Tensor)> {
        Ok((self.x.slice_rows(0, n)?, self.y.slice_rows(0, n)?))
    }

    /// Discard the first `n` examples.
    pub fn drop_front(&mut self, n: usize) -> Result<()> {
        let len = self.len();
        self.x = self.x.slice_rows(n.min(len), len)?;
        self.y = self.y.slice_rows(n.min(len), len)?;
        Ok(())
    }
}

fn as_rows(t: &Tensor, unit_shape: &[usize]) -> Result<Tensor> {
    if t.shape() == unit_shape {
        return Ok(t.expand_dims());
    }
    match t.shape().split_first() {
        Some((_, rest)) if rest == unit_shape => Ok(t.clone()),
        _ => Err(Error::ShapeMismatch(format!(
            "example of shape {:?} does not fit unit shape {:?}",
            t.shape(),
            unit_shape
        ))),
    }
}
