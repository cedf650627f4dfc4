//! Wire messages exchanged between aggregator and clients.

use crate::codec::{deserialize, serialize, SerializedVariable, Tensor};
use crate::config::ClientHyperparams;
use crate::core::{ModelVersion, Result};
use crate::dataset::Batch;
use serde::{Deserialize, Serialize};

/// A versioned list of serialized variables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMsg {
    pub version: ModelVersion,
    pub vars: Vec<SerializedVariable>,
}

/// A work unit as sent to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataMsg {
    pub batch: usize,
    pub epoch: usize,
    pub x: SerializedVariable,
    pub y: SerializedVariable,
}

impl DataMsg {
    pub fn from_batch(batch: &Batch) -> Self {
        Self {
            batch: batch.batch,
            epoch: batch.epoch,
            x: serialize(&batch.x),
            y: serialize(&batch.y),
        }
    }

    pub fn tensors(&self) -> Result<(Tensor, Tensor)> {
        Ok((deserialize(&self.x)?, deserialize(&self.y)?))
    }
}

/// Server to client: the current model, hyperparameters and, in dispatched
/// mode, the next work unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadMsg {
    pub model: ModelMsg,
    pub hyperparams: ClientHyperparams,
    pub data: Option<DataMsg>,
}

impl DownloadMsg {
    pub fn version(&self) -> &ModelVersion {
        &self.model.version
    }

    pub fn with_data(&self, data: Option<DataMsg>) -> Self {
        Self {
            model: self.model.clone(),
            hyperparams: self.hyperparams.clone(),
            data,
        }
    }
}

/// Client to server: new weights or gradients computed against a version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMsg {
    pub client_id: String,
    pub model: Option<ModelMsg>,
    pub gradients: Option<ModelMsg>,
    pub batch: Option<usize>,
    pub metrics: Option<Vec<f32>>,
}

impl UploadMsg {
    pub fn weights(
        client_id: impl Into<String>,
        version: ModelVersion,
        vars: Vec<SerializedVariable>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            model: Some(ModelMsg { version, vars }),
            gradients: None,
            batch: None,
            metrics: None,
        }
    }

    pub fn gradients(
        client_id: impl Into<String>,
        version: ModelVersion,
        vars: Vec<SerializedVariable>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            model: None,
            gradients: Some(ModelMsg { version, vars }),
            batch: None,
            metrics: None,
        }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Vec<f32>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Weights take precedence when both payloads are present.
    pub fn payload(&self) -> Option<&ModelMsg> {
        self.model.as_ref().or(self.gradients.as_ref())
    }

    /// Version the payload was computed against.
    pub fn version(&self) -> Option<&ModelVersion> {
        self.payload().map(|m| &m.version)
    }
}
