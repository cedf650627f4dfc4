//! Aggregator statistics.

use crate::core::ModelVersion;
use serde::{Deserialize, Serialize};

/// Counters kept by an aggregator over its lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    pub connections: u64,
    pub uploads_received: u64,
    pub uploads_accepted: u64,
    /// Uploads dropped for carrying an old version, arriving during a merge
    /// or naming a batch that is no longer outstanding.
    pub uploads_stale: u64,
    pub merges: u64,
    pub failed_merges: u64,
    pub batches_completed: u64,
    pub batches_reclaimed: u64,
}

/// Point-in-time view of a running aggregator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub version: ModelVersion,
    pub num_clients: usize,
    /// Updates waiting for the next merge.
    pub num_buffered: usize,
    /// Whether a dispatched dataset has run out of work; `None` when not
    /// dispatching.
    pub dataset_exhausted: Option<bool>,
    pub stats: AggregatorStats,
}
