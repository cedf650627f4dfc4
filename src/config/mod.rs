//! Configuration Module
//!
//! Hyperparameters and session settings:
//! - Client hyperparameters with override resolution
//! - Aggregator hyperparameters
//! - Dataset partitioning
//! - Server and client session configuration

pub mod hyperparams;
pub mod settings;

pub use hyperparams::{ClientHyperparams, DatasetConfig, ResolvedHyperparams, ServerHyperparams};
pub use settings::{ClientConfig, ReclaimPolicy, ServerConfig};
