//! Core utilities and common types for fedsync.

pub mod error;
pub mod observer;
pub mod types;

pub use error::{Error, Result};
pub use observer::{UploadCallback, UploadObservers, VersionCallback, VersionObservers};
pub use types::*;
