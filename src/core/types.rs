//! Common types used across fedsync modules.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// A 256-bit hash value (SHA3-256).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Hash a byte buffer.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Identifies one published snapshot of the model weights.
///
/// Opaque to everything except [`VersionClock`], which mints them from
/// millisecond timestamps. Equality is the only comparison the protocol
/// relies on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVersion(String);

impl ModelVersion {
    /// Version reported by a client that has not received a download yet.
    pub const UNSYNCED: &'static str = "unsynced";

    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn unsynced() -> Self {
        Self(Self::UNSYNCED.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModelVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Mints strictly increasing, timestamp-derived versions.
#[derive(Debug, Default)]
pub struct VersionClock {
    last_millis: i64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next version; bumps by one millisecond when the wall clock has not
    /// advanced (or went backwards) since the previous call.
    pub fn tick(&mut self) -> ModelVersion {
        let millis = now().timestamp_millis().max(self.last_millis + 1);
        self.last_millis = millis;
        ModelVersion(millis.to_string())
    }

    /// Make sure the next tick sorts after an existing version.
    pub fn observe(&mut self, version: &ModelVersion) {
        if let Ok(millis) = version.as_str().parse::<i64>() {
            self.last_millis = self.last_millis.max(millis);
        }
    }
}
