//! # fedsync - Federated and asynchronous SGD coordination
//!
//! Keeps a population of training clients in sync with one aggregator:
//! - **Aggregator**: versioned model snapshots, update buffering and merging
//! - **Client session**: sync, local training, acknowledged uploads
//! - **Work-unit distributor**: epoch/batch dispatch for asynchronous SGD
//! - **Codec**: dtype/shape-tagged variables and per-client stacking
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedsync::client::ClientSession;
//! use fedsync::config::{ClientConfig, ServerConfig};
//! use fedsync::model::{LinearRegression, MemoryStore, PersistentModel, TrainableModel};
//! use fedsync::server::{Aggregator, ServerHandle};
//!
//! #[tokio::main]
//! async fn main() -> fedsync::Result<()> {
//!     let model = PersistentModel::new(
//!         Box::new(TrainableModel::new(LinearRegression::zeros(2, 1))),
//!         Box::new(MemoryStore::new()),
//!     );
//!     let server = ServerHandle::start(Aggregator::new(model, &ServerConfig::default())).await?;
//!
//!     let local = TrainableModel::new(LinearRegression::zeros(2, 1));
//!     let mut client = ClientSession::new(local, ClientConfig::default())?;
//!     client.setup(server.connect_local()?).await?;
//!     println!("training version {}", client.model_version());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod core;
pub mod dataset;
pub mod model;
pub mod monitoring;
pub mod protocol;
pub mod server;
pub mod transport;

pub use core::error::{Error, Result};
