//! Dataset Module
//!
//! Epoch/batch work units for server-dispatched training.

pub mod distributor;

pub use crate::config::DatasetConfig;
pub use distributor::{Batch, DistributedDataset};
