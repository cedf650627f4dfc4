//! Server Module
//!
//! The aggregator side of distributed training:
//! - Aggregator state machine with threshold and per-batch policies
//! - Service task binding an aggregator to the transport
//! - Lifetime statistics and status snapshots

pub mod aggregator;
pub mod service;
pub mod stats;

pub use aggregator::{Aggregator, Dispatch, PayloadKind};
pub use service::{AggregatorService, Control, ServerHandle};
pub use stats::{AggregatorStats, ServerStatus};
