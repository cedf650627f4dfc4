//! Observer lists owned by sessions.
//!
//! Callbacks run synchronously, in registration order, on the task that
//! triggered the event.

use crate::core::ModelVersion;
use crate::protocol::UploadMsg;
use std::sync::RwLock;

/// Called with `(old_version, new_version)`; `old_version` is `None` for the
/// first version a session sees.
pub type VersionCallback = Box<dyn Fn(Option<&ModelVersion>, &ModelVersion) + Send + Sync>;

/// Called with an upload message.
pub type UploadCallback = Box<dyn Fn(&UploadMsg) + Send + Sync>;

/// Registered version-change callbacks.
#[derive(Default)]
pub struct VersionObservers {
    callbacks: RwLock<Vec<VersionCallback>>,
}

impl VersionObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: VersionCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    pub fn notify(&self, old: Option<&ModelVersion>, new: &ModelVersion) {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        for callback in callbacks.iter() {
            callback(old, new);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registered upload callbacks.
#[derive(Default)]
pub struct UploadObservers {
    callbacks: RwLock<Vec<UploadCallback>>,
}

impl UploadObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: UploadCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    pub fn notify(&self, msg: &UploadMsg) {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        for callback in callbacks.iter() {
            callback(msg);
        }
    }
}
