//! Model Module
//!
//! Uniform model capabilities for the synchronization layer:
//! - `DistributedModel` trait with trainable and raw-parameter adapters
//! - A linear regression reference network
//! - Versioned snapshot stores and the server-side persistent model

pub mod adapter;
pub mod dynamic;
pub mod linear;
pub mod persistent;
pub mod store;
pub mod trainable;

pub use adapter::{replace_vars, sgd_step, DistributedModel, FitConfig};
pub use dynamic::{DynamicModel, GradientFn, LossFn, PredictFn};
pub use linear::LinearRegression;
pub use persistent::PersistentModel;
pub use store::{FlatFileStore, MemoryStore, SnapshotStore};
pub use trainable::{FitMode, Network, TrainableModel};
