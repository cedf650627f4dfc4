//! Training hyperparameters.
//!
//! Hyperparameter maps are validated key by key: an unknown key fails with
//! `Error::UnrecognizedOption` before anything else happens.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Reject any key of `value` not in `known`.
pub(crate) fn check_keys(value: &serde_json::Value, known: &[&str]) -> Result<()> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::InvalidConfig(format!("expected an object, got {value}")))?;
    for key in map.keys() {
        if !known.contains(&key.as_str()) {
            return Err(Error::UnrecognizedOption(key.clone()));
        }
    }
    Ok(())
}

/// Client-side training settings. Every field is optional so that the same
/// type serves as local overrides, as the server's broadcast values and,
/// once filled, as the defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHyperparams {
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f32>,
    pub epochs: Option<usize>,
    pub examples_per_update: Option<usize>,
    /// Standard deviation of the Gaussian noise added to uploaded weights;
    /// zero disables noise.
    pub weight_noise_stddev: Option<f32>,
}

impl ClientHyperparams {
    pub const KEYS: &'static [&'static str] = &[
        "batchSize",
        "learningRate",
        "epochs",
        "examplesPerUpdate",
        "weightNoiseStddev",
    ];

    /// The global defaults.
    pub fn defaults() -> Self {
        Self {
            batch_size: Some(32),
            learning_rate: Some(0.001),
            epochs: Some(5),
            examples_per_update: Some(5),
            weight_noise_stddev: Some(0.0),
        }
    }

    /// Parse from a JSON object, rejecting unknown keys.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        check_keys(&value, Self::KEYS)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fill every unset field from `fallback`.
    pub fn or(&self, fallback: &ClientHyperparams) -> Self {
        Self {
            batch_size: self.batch_size.or(fallback.batch_size),
            learning_rate: self.learning_rate.or(fallback.learning_rate),
            epochs: self.epochs.or(fallback.epochs),
            examples_per_update: self.examples_per_update.or(fallback.examples_per_update),
            weight_noise_stddev: self.weight_noise_stddev.or(fallback.weight_noise_stddev),
        }
    }

    /// Fill every unset field from the global defaults.
    pub fn with_defaults(&self) -> Self {
        self.or(&Self::defaults())
    }

    /// Resolve per key: local override, then server value, then default.
    pub fn resolve(local: &ClientHyperparams, server: &ClientHyperparams) -> ResolvedHyperparams {
        let merged = local.or(server).with_defaults();
        ResolvedHyperparams {
            batch_size: merged.batch_size.unwrap_or(32),
            learning_rate: merged.learning_rate.unwrap_or(0.001),
            epochs: merged.epochs.unwrap_or(5),
            examples_per_update: merged.examples_per_update.unwrap_or(5),
            weight_noise_stddev: merged.weight_noise_stddev.unwrap_or(0.0),
        }
    }
}

/// Concrete settings for one local update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedHyperparams {
    pub batch_size: usize,
    pub learning_rate: f32,
    pub epochs: usize,
    pub examples_per_update: usize,
    pub weight_noise_stddev: f32,
}

/// Aggregator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerHyperparams {
    /// Name of the reduction; only `"mean"` is implemented. Checked when a
    /// merge runs.
    pub aggregation: String,
    pub min_updates_per_version: usize,
}

impl ServerHyperparams {
    pub const KEYS: &'static [&'static str] = &["aggregation", "minUpdatesPerVersion"];

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        check_keys(&value, Self::KEYS)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Default for ServerHyperparams {
    fn default() -> Self {
        Self {
            aggregation: "mean".to_string(),
            min_updates_per_version: 20,
        }
    }
}

/// Partitioning of a dispatched dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatasetConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Allow a short final batch instead of wrapping around to the start.
    pub small_last_batch: bool,
}

impl DatasetConfig {
    pub const KEYS: &'static [&'static str] = &["epochs", "batchSize", "smallLastBatch"];

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        check_keys(&value, Self::KEYS)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 32,
            small_last_batch: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_defaults() {
        let hp = ClientHyperparams::defaults();
        assert_eq!(hp.batch_size, Some(32));
        assert_eq!(hp.learning_rate, Some(0.001));
        assert_eq!(hp.epochs, Some(5));
        assert_eq!(hp.examples_per_update, Some(5));
    }

    #[test]
    fn test_unrecognized_client_key() {
        let result = ClientHyperparams::from_value(json!({"batchSize": 8, "momentum": 0.9}));
        assert!(matches!(result, Err(Error::UnrecognizedOption(key)) if key == "momentum"));
    }

    #[test]
    fn test_partial_client_hyperparams() {
        let hp = ClientHyperparams::from_value(json!({"examplesPerUpdate": 1})).unwrap();
        assert_eq!(hp.examples_per_update, Some(1));
        assert_eq!(hp.batch_size, None);
        assert_eq!(hp.with_defaults().batch_size, Some(32));
    }

    #[test]
    fn test_resolution_order() {
        let local = ClientHyperparams {
            epochs: Some(1),
            ..Default::default()
        };
        let server = ClientHyperparams {
            epochs: Some(7),
            batch_size: Some(4),
            ..Default::default()
        };
        let resolved = ClientHyperparams::resolve(&local, &server);
        assert_eq!(resolved.epochs, 1);
        assert_eq!(resolved.batch_size, 4);
        assert_eq!(resolved.examples_per_update, 5);
        assert_eq!(resolved.weight_noise_stddev, 0.0);
    }

    #[test]
    fn test_server_hyperparams() {
        let hp = ServerHyperparams::from_value(json!({"minUpdatesPerVersion": 2})).unwrap();
        assert_eq!(hp.min_updates_per_version, 2);
        assert_eq!(hp.aggregation, "mean");

        let bad = ServerHyperparams::from_value(json!({"updatesPerVersion": 2}));
        assert!(matches!(bad, Err(Error::UnrecognizedOption(_))));
    }

    #[test]
    fn test_dataset_config() {
        let cfg = DatasetConfig::from_value(json!({"batchSize": 3, "epochs": 2})).unwrap();
        assert_eq!(cfg.batch_size, 3);
        assert!(!cfg.small_last_batch);
    }
}
