//! Session configuration.

use crate::config::hyperparams::{check_keys, ClientHyperparams, ServerHyperparams};
use crate::core::Result;
use crate::model::FlatFileStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What happens to the work unit held by a client that disconnects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReclaimPolicy {
    /// The unit stays in the incomplete queue and comes around again when
    /// the queue cycles.
    #[default]
    Wraparound,
    /// The unit is moved to the front of the queue and goes to the next
    /// client that asks for work.
    OnDisconnect,
}

/// Aggregator configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Broadcast to clients; unset fields are filled from the defaults.
    pub client_hyperparams: ClientHyperparams,
    pub server_hyperparams: ServerHyperparams,
    /// Where snapshots are kept by the file store.
    pub model_dir: PathBuf,
    pub reclaim: ReclaimPolicy,
    pub verbose: bool,
}

impl ServerConfig {
    pub const KEYS: &'static [&'static str] = &[
        "clientHyperparams",
        "serverHyperparams",
        "modelDir",
        "reclaim",
        "verbose",
    ];

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        check_keys(&value, Self::KEYS)?;
        if let Some(hp) = value.get("clientHyperparams") {
            ClientHyperparams::from_value(hp.clone())?;
        }
        if let Some(hp) = value.get("serverHyperparams") {
            ServerHyperparams::from_value(hp.clone())?;
        }
        let config: Self = serde_json::from_value(value)?;
        Ok(config.normalized())
    }

    /// Client hyperparameters with defaults filled in, and the verbose flag
    /// also honoured from the `VERBOSE` environment variable.
    pub fn normalized(mut self) -> Self {
        self.client_hyperparams = self.client_hyperparams.with_defaults();
        self.verbose = self.verbose || std::env::var_os("VERBOSE").is_some();
        self
    }

    /// File store rooted at `model_dir`.
    pub fn snapshot_store(&self) -> FlatFileStore {
        FlatFileStore::new(&self.model_dir)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_hyperparams: ClientHyperparams::defaults(),
            server_hyperparams: ServerHyperparams::default(),
            model_dir: PathBuf::from("saved-models"),
            reclaim: ReclaimPolicy::default(),
            verbose: false,
        }
    }
}

/// Client session configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Local overrides; take precedence over the server's values.
    pub hyperparams: ClientHyperparams,
    pub client_id: Option<String>,
    /// File persisting a generated client id across runs.
    pub id_file: Option<PathBuf>,
    /// Evaluate on each training slice before fitting and upload the
    /// metrics.
    pub send_metrics: bool,
    #[serde(with = "millis", rename = "connectionTimeoutMs")]
    pub connection_timeout: Duration,
    #[serde(with = "millis", rename = "uploadTimeoutMs")]
    pub upload_timeout: Duration,
    pub verbose: bool,
}

impl ClientConfig {
    pub const KEYS: &'static [&'static str] = &[
        "hyperparams",
        "clientId",
        "idFile",
        "sendMetrics",
        "connectionTimeoutMs",
        "uploadTimeoutMs",
        "verbose",
    ];

    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        check_keys(&value, Self::KEYS)?;
        if let Some(hp) = value.get("hyperparams") {
            ClientHyperparams::from_value(hp.clone())?;
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn with_hyperparams(mut self, hyperparams: ClientHyperparams) -> Self {
        self.hyperparams = hyperparams;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hyperparams: ClientHyperparams::default(),
            client_id: None,
            id_file: None,
            send_metrics: false,
            connection_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(5),
            verbose: false,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
