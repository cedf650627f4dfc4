//! Monitoring Module
//!
//! Observability for fedsync:
//! - `tracing` subscriber installation honouring the verbose flag
//! - Timing of awaited operations
//! - The default version-change logger

pub mod logging;

pub use logging::{display_version, init_logging, timed, verbose_requested, version_logger};
