//! Server-side model with versioned snapshots.

use crate::codec::{deserialize_many, serialize_many, SerializedVariable, Tensor};
use crate::core::{ModelVersion, Result, VersionClock};
use crate::model::adapter::DistributedModel;
use crate::model::store::SnapshotStore;

/// A model whose every published state is saved under a fresh version.
pub struct PersistentModel {
    model: Box<dyn DistributedModel>,
    store: Box<dyn SnapshotStore>,
    version: ModelVersion,
    clock: VersionClock,
}

impl PersistentModel {
    pub fn new(model: Box<dyn DistributedModel>, store: Box<dyn SnapshotStore>) -> Self {
        Self {
            model,
            store,
            version: ModelVersion::unsynced(),
            clock: VersionClock::new(),
        }
    }

    /// Resume from the newest snapshot, or save the current weights as the
    /// first one.
    pub async fn setup(&mut self) -> Result<()> {
        self.model.setup()?;
        match self.store.last().await? {
            Some(version) => {
                self.load(&version).await?;
                tracing::info!(version = %version, "resumed from snapshot");
            }
            None => {
                let version = self.save().await?;
                tracing::info!(version = %version, "saved initial snapshot");
            }
        }
        Ok(())
    }

    /// Persist the current weights under a new version and return it.
    pub async fn save(&mut self) -> Result<ModelVersion> {
        let version = self.clock.tick();
        self.store.save(&version, &self.serialized_vars()).await?;
        self.version = version.clone();
        Ok(version)
    }

    /// Run `step` against the weights and save the result as a new version.
    ///
    /// If the step or the save fails, the weights are put back to the ones
    /// the current version names.
    pub async fn commit<F>(&mut self, step: F) -> Result<ModelVersion>
    where
        F: FnOnce(&mut dyn DistributedModel) -> Result<()>,
    {
        let previous = self.model.get_vars();
        let result = match step(self.model.as_mut()) {
            Ok(()) => self.save().await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            if let Err(e) = self.model.set_vars(&previous) {
                tracing::error!(version = %self.version, error = %e, "could not restore weights");
            }
        }
        result
    }

    /// Replace the weights with a stored snapshot.
    pub async fn load(&mut self, version: &ModelVersion) -> Result<()> {
        let vars = self.store.load(version).await?;
        self.model.set_vars(&deserialize_many(&vars)?)?;
        self.clock.observe(version);
        self.version = version.clone();
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ModelVersion>> {
        self.store.list().await
    }

    pub async fn last(&self) -> Result<Option<ModelVersion>> {
        self.store.last().await
    }

    pub fn version(&self) -> &ModelVersion {
        &self.version
    }

    pub fn model(&self) -> &dyn DistributedModel {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn DistributedModel {
        self.model.as_mut()
    }

    pub fn set_vars(&mut self, vars: &[Tensor]) -> Result<()> {
        self.model.set_vars(vars)
    }

    pub fn update(&mut self, gradients: &[Tensor]) -> Result<()> {
        self.model.update(gradients)
    }

    pub fn serialized_vars(&self) -> Vec<SerializedVariable> {
        serialize_many(&self.model.get_vars())
    }
}
