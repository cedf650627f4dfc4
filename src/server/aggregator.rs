//! The aggregator state machine.
//!
//! Owns the canonical model and its version, decides which uploads are
//! accepted, and merges them into new versions. It never touches a socket:
//! every handler returns the [`Dispatch`]es the caller must deliver.

use crate::codec::{aggregate, deserialize_many, Aggregation, SerializedVariable};
use crate::config::{ClientHyperparams, ReclaimPolicy, ServerConfig, ServerHyperparams};
use crate::core::{
    Error, ModelVersion, Result, UploadCallback, UploadObservers, VersionCallback,
    VersionObservers,
};
use crate::dataset::DistributedDataset;
use crate::model::PersistentModel;
use crate::monitoring::{init_logging, timed, verbose_requested, version_logger};
use crate::protocol::{DataMsg, DownloadMsg, ModelMsg, UploadMsg};
use crate::server::stats::{AggregatorStats, ServerStatus};
use crate::transport::ConnId;
use std::collections::HashMap;
use std::sync::Arc;

/// What threshold-policy uploads carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadKind {
    /// New weights; their mean becomes the next version (federated
    /// averaging).
    #[default]
    Weights,
    /// Gradients; their mean is applied as one step.
    Gradients,
}

enum Policy {
    /// Buffer uploads at the current version until enough have arrived.
    Threshold { kind: PayloadKind },
    /// Merge every upload at once and hand its sender the next work unit.
    PerBatch {
        dataset: DistributedDataset,
        reclaim: ReclaimPolicy,
        /// Batch most recently handed to each connection.
        assignments: HashMap<ConnId, usize>,
    },
}

/// A download message to deliver.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatch {
    /// To every connected client.
    Broadcast(DownloadMsg),
    /// To one connection.
    Direct(ConnId, DownloadMsg),
}

/// Server session.
pub struct Aggregator {
    model: PersistentModel,
    client_hyperparams: ClientHyperparams,
    server_hyperparams: ServerHyperparams,
    policy: Policy,
    download: DownloadMsg,
    updates: Vec<Vec<SerializedVariable>>,
    num_clients: usize,
    /// Set only while a merge is in progress.
    updating: bool,
    version_observers: Arc<VersionObservers>,
    upload_observers: Arc<UploadObservers>,
    stats: AggregatorStats,
}

impl Aggregator {
    /// Threshold policy over uploaded weights.
    pub fn new(model: PersistentModel, config: &ServerConfig) -> Self {
        Self::with_policy(
            model,
            config,
            Policy::Threshold {
                kind: PayloadKind::Weights,
            },
        )
    }

    /// Per-batch policy: every upload is one gradient step on a work unit
    /// from `dataset`.
    pub fn dispatched(
        model: PersistentModel,
        config: &ServerConfig,
        dataset: DistributedDataset,
    ) -> Self {
        Self::with_policy(
            model,
            config,
            Policy::PerBatch {
                dataset,
                reclaim: config.reclaim,
                assignments: HashMap::new(),
            },
        )
    }

    fn with_policy(model: PersistentModel, config: &ServerConfig, policy: Policy) -> Self {
        if verbose_requested(config.verbose) {
            init_logging(true);
        }

        let version_observers = Arc::new(VersionObservers::new());
        version_observers.register(version_logger("server"));

        let client_hyperparams = config.client_hyperparams.with_defaults();
        let download = DownloadMsg {
            model: ModelMsg {
                version: model.version().clone(),
                vars: Vec::new(),
            },
            hyperparams: client_hyperparams.clone(),
            data: None,
        };

        Self {
            model,
            client_hyperparams,
            server_hyperparams: config.server_hyperparams.clone(),
            policy,
            download,
            updates: Vec::new(),
            num_clients: 0,
            updating: false,
            version_observers,
            upload_observers: Arc::new(UploadObservers::new()),
            stats: AggregatorStats::default(),
        }
    }

    /// Threshold uploads carry gradients instead of weights.
    pub fn with_gradient_uploads(mut self) -> Self {
        if let Policy::Threshold { kind } = &mut self.policy {
            *kind = PayloadKind::Gradients;
        }
        self
    }

    pub fn on_new_version(&self, callback: VersionCallback) {
        self.version_observers.register(callback);
    }

    pub fn on_upload(&self, callback: UploadCallback) {
        self.upload_observers.register(callback);
    }

    pub(crate) fn observers(&self) -> (Arc<VersionObservers>, Arc<UploadObservers>) {
        (
            Arc::clone(&self.version_observers),
            Arc::clone(&self.upload_observers),
        )
    }

    /// Load or initialize the model and publish the first download message.
    pub async fn setup(&mut self) -> Result<()> {
        timed("setting up model", self.model.setup()).await?;
        self.download = self.compute_download();
        self.version_observers.notify(None, self.model.version());
        Ok(())
    }

    /// A client connected: send it the current download message, with a
    /// work unit when dispatching.
    pub fn connect(&mut self, conn: ConnId) -> Result<Vec<Dispatch>> {
        self.num_clients += 1;
        self.stats.connections += 1;
        tracing::info!(conn, clients = self.num_clients, "connection");

        let data = self.next_work(conn)?;
        Ok(vec![Dispatch::Direct(conn, self.download.with_data(data))])
    }

    pub fn disconnect(&mut self, conn: ConnId) {
        self.num_clients = self.num_clients.saturating_sub(1);
        tracing::info!(conn, clients = self.num_clients, "disconnection");

        if let Policy::PerBatch {
            dataset,
            reclaim,
            assignments,
        } = &mut self.policy
        {
            if let Some(batch) = assignments.remove(&conn) {
                if *reclaim == ReclaimPolicy::OnDisconnect && dataset.requeue_front(batch) {
                    self.stats.batches_reclaimed += 1;
                    tracing::debug!(conn, batch, "reclaimed batch");
                }
            }
        }
    }

    /// Handle an upload. The transport acknowledges it before calling this.
    ///
    /// Stale uploads are not an error. An error means a threshold merge was
    /// attempted and failed; the buffered updates are discarded and both the
    /// version and the weights are unchanged. A failed per-batch step leaves
    /// its batch outstanding and the sender is handed fresh work.
    pub async fn upload(&mut self, conn: ConnId, msg: UploadMsg) -> Result<Vec<Dispatch>> {
        self.stats.uploads_received += 1;
        match self.policy {
            Policy::Threshold { kind } => self.threshold_upload(kind, msg).await,
            Policy::PerBatch { .. } => self.batch_upload(conn, msg).await,
        }
    }

    async fn threshold_upload(&mut self, kind: PayloadKind, msg: UploadMsg) -> Result<Vec<Dispatch>> {
        let payload = match kind {
            PayloadKind::Weights => msg.model.as_ref(),
            PayloadKind::Gradients => msg.gradients.as_ref(),
        }
        .ok_or_else(|| {
            Error::Protocol(format!(
                "upload from {} carries no {kind:?} payload",
                msg.client_id
            ))
        })?;

        if &payload.version != self.model.version() || self.updating {
            self.stats.uploads_stale += 1;
            tracing::debug!(client_id = %msg.client_id, version = %payload.version, "dropping stale update");
            return Ok(Vec::new());
        }

        tracing::info!(client_id = %msg.client_id, "new update");
        self.updates.push(payload.vars.clone());
        self.stats.uploads_accepted += 1;
        self.upload_observers.notify(&msg);

        if self.updates.len() < self.server_hyperparams.min_updates_per_version {
            return Ok(Vec::new());
        }

        self.merge(kind).await?;
        Ok(vec![Dispatch::Broadcast(self.download.clone())])
    }

    async fn merge(&mut self, kind: PayloadKind) -> Result<()> {
        self.updating = true;
        let old = self.model.version().clone();
        let result = timed("computing new weights", self.apply_buffered(kind)).await;
        self.updates.clear();
        self.updating = false;

        match result {
            Ok(()) => {
                self.stats.merges += 1;
                self.version_observers.notify(Some(&old), self.model.version());
                Ok(())
            }
            Err(e) => {
                self.stats.failed_merges += 1;
                tracing::warn!(version = %old, error = %e, "merge failed, buffered updates discarded");
                Err(e)
            }
        }
    }

    async fn apply_buffered(&mut self, kind: PayloadKind) -> Result<()> {
        let aggregation = Aggregation::parse(&self.server_hyperparams.aggregation)?;
        let merged = aggregate(&self.updates, aggregation)?;
        self.model
            .commit(|model| match kind {
                PayloadKind::Weights => model.set_vars(&merged),
                PayloadKind::Gradients => model.update(&merged),
            })
            .await?;
        self.download = self.compute_download();
        Ok(())
    }

    async fn batch_upload(&mut self, conn: ConnId, msg: UploadMsg) -> Result<Vec<Dispatch>> {
        let batch = msg.batch.ok_or_else(|| {
            Error::Protocol(format!("upload from {} names no batch", msg.client_id))
        })?;
        let payload = msg.payload().ok_or_else(|| {
            Error::Protocol(format!("upload from {} carries no payload", msg.client_id))
        })?;

        let outstanding = match &self.policy {
            Policy::PerBatch { dataset, .. } => dataset.is_outstanding(batch),
            Policy::Threshold { .. } => false,
        };
        if &payload.version != self.model.version() || self.updating || !outstanding {
            self.stats.uploads_stale += 1;
            tracing::debug!(
                client_id = %msg.client_id,
                version = %payload.version,
                batch,
                "dropping stale batch update"
            );
            return self.redispatch(conn);
        }

        self.stats.uploads_accepted += 1;
        self.upload_observers.notify(&msg);

        self.updating = true;
        let old = self.model.version().clone();
        let is_gradients = msg.gradients.is_some();
        let result = timed(
            "applying batch update",
            self.apply_single(&payload.vars, is_gradients),
        )
        .await;
        self.updating = false;

        if let Err(e) = result {
            // the batch stays outstanding and comes round again
            self.stats.failed_merges += 1;
            tracing::warn!(version = %old, batch, error = %e, "batch update failed");
            return self.redispatch(conn);
        }

        if let Policy::PerBatch { dataset, .. } = &mut self.policy {
            dataset.complete_batch(batch);
        }
        self.stats.batches_completed += 1;
        self.stats.merges += 1;
        self.version_observers.notify(Some(&old), self.model.version());

        self.redispatch(conn)
    }

    async fn apply_single(&mut self, vars: &[SerializedVariable], gradients: bool) -> Result<()> {
        let tensors = deserialize_many(vars)?;
        self.model
            .commit(|model| {
                if gradients {
                    model.update(&tensors)
                } else {
                    model.set_vars(&tensors)
                }
            })
            .await?;
        self.download = self.compute_download();
        Ok(())
    }

    /// The next work unit for `conn`, or nothing once the dataset is done.
    fn redispatch(&mut self, conn: ConnId) -> Result<Vec<Dispatch>> {
        Ok(self
            .next_work(conn)?
            .map(|data| Dispatch::Direct(conn, self.download.with_data(Some(data))))
            .into_iter()
            .collect())
    }

    fn next_work(&mut self, conn: ConnId) -> Result<Option<DataMsg>> {
        let Policy::PerBatch {
            dataset,
            assignments,
            ..
        } = &mut self.policy
        else {
            return Ok(None);
        };

        match dataset.next()? {
            Some(batch) => {
                assignments.insert(conn, batch.batch);
                tracing::debug!(conn, batch = batch.batch, epoch = batch.epoch, "dispatching batch");
                Ok(Some(DataMsg::from_batch(&batch)))
            }
            None => {
                assignments.remove(&conn);
                tracing::info!(conn, "dataset exhausted");
                Ok(None)
            }
        }
    }

    fn compute_download(&self) -> DownloadMsg {
        DownloadMsg {
            model: ModelMsg {
                version: self.model.version().clone(),
                vars: self.model.serialized_vars(),
            },
            hyperparams: self.client_hyperparams.clone(),
            data: None,
        }
    }

    pub fn version(&self) -> &ModelVersion {
        self.model.version()
    }

    pub fn num_clients(&self) -> usize {
        self.num_clients
    }

    /// Updates buffered towards the next merge.
    pub fn num_updates(&self) -> usize {
        self.updates.len()
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    pub fn download_msg(&self) -> &DownloadMsg {
        &self.download
    }

    pub fn model(&self) -> &PersistentModel {
        &self.model
    }

    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            version: self.model.version().clone(),
            num_clients: self.num_clients,
            num_buffered: self.updates.len(),
            dataset_exhausted: match &self.policy {
                Policy::PerBatch { dataset, .. } => Some(dataset.is_exhausted()),
                Policy::Threshold { .. } => None,
            },
            stats: self.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{serialize_many, Tensor};
    use crate::config::DatasetConfig;
    use crate::model::{DynamicModel, MemoryStore, SnapshotStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves its seed but refuses every save.
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl SnapshotStore for ReadOnlyStore {
        async fn save(&self, _: &ModelVersion, _: &[SerializedVariable]) -> Result<()> {
            Err(Error::Snapshot("disk full".into()))
        }

        async fn load(&self, version: &ModelVersion) -> Result<Vec<SerializedVariable>> {
            self.0.load(version).await
        }

        async fn list(&self) -> Result<Vec<ModelVersion>> {
            self.0.list().await
        }

        async fn last(&self) -> Result<Option<ModelVersion>> {
            self.0.last().await
        }
    }

    fn read_only(vars: Vec<Tensor>) -> PersistentModel {
        let store = MemoryStore::seeded("initial", serialize_many(&vars));
        PersistentModel::new(Box::new(raw_model(vars)), Box::new(ReadOnlyStore(store)))
    }

    fn raw_model(vars: Vec<Tensor>) -> DynamicModel {
        DynamicModel::new(
            vars,
            vec![1],
            vec![1],
            Box::new(|_: &[Tensor], x: &Tensor| Ok(x.clone())),
            Box::new(|_: &[Tensor], _: &Tensor, _: &Tensor| Ok(0.0)),
            Box::new(|vars: &[Tensor], _: &Tensor, _: &Tensor| Ok(vars.to_vec())),
        )
        .with_learning_rate(1.0)
    }

    fn initial_vars() -> Vec<Tensor> {
        vec![
            Tensor::zeros(crate::codec::DType::Float32, &[2, 2]),
            Tensor::zeros(crate::codec::DType::Float32, &[1, 4]),
        ]
    }

    fn persistent(vars: Vec<Tensor>) -> PersistentModel {
        let store = MemoryStore::seeded("initial", serialize_many(&vars));
        PersistentModel::new(Box::new(raw_model(vars)), Box::new(store))
    }

    fn config(aggregation: &str, min_updates: usize) -> ServerConfig {
        ServerConfig {
            server_hyperparams: ServerHyperparams {
                aggregation: aggregation.to_string(),
                min_updates_per_version: min_updates,
            },
            ..Default::default()
        }
    }

    fn weights(version: &str, a: [f32; 4], b: [f32; 4]) -> UploadMsg {
        let vars = vec![
            Tensor::from_f32(&[2, 2], a.to_vec()).unwrap(),
            Tensor::from_f32(&[1, 4], b.to_vec()).unwrap(),
        ];
        UploadMsg::weights("client", ModelVersion::from(version), serialize_many(&vars))
    }

    async fn threshold(aggregation: &str, min_updates: usize) -> Aggregator {
        let mut agg = Aggregator::new(persistent(initial_vars()), &config(aggregation, min_updates));
        agg.setup().await.unwrap();
        agg
    }

    #[tokio::test]
    async fn test_threshold_merges_mean() {
        let mut agg = threshold("mean", 2).await;
        assert_eq!(agg.version().as_str(), "initial");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        agg.on_new_version(Box::new(move |old: Option<&ModelVersion>, new: &ModelVersion| {
            s.lock()
                .unwrap()
                .push((old.map(|v| v.to_string()), new.to_string()));
        }));

        let first = agg
            .upload(1, weights("initial", [2.0; 4], [1.0, 2.0, 3.0, 4.0]))
            .await
            .unwrap();
        assert!(first.is_empty());
        assert_eq!(agg.version().as_str(), "initial");
        assert_eq!(agg.num_updates(), 1);

        let second = agg
            .upload(2, weights("initial", [1.0; 4], [5.0, 4.0, 3.0, 1.0]))
            .await
            .unwrap();
        let [Dispatch::Broadcast(download)] = second.as_slice() else {
            panic!("expected one broadcast, got {second:?}");
        };
        assert_ne!(agg.version().as_str(), "initial");
        assert_eq!(download.version(), agg.version());
        assert_eq!(agg.num_updates(), 0);

        let merged = deserialize_many(&download.model.vars).unwrap();
        assert_eq!(merged[0].to_f32_vec(), vec![1.5; 4]);
        assert_eq!(merged[1].to_f32_vec(), vec![3.0, 3.0, 3.0, 2.5]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("initial"));
        assert_eq!(seen[0].1, agg.version().to_string());
    }

    #[tokio::test]
    async fn test_stale_upload_is_dropped() {
        let mut agg = threshold("mean", 2).await;
        let dispatches = agg
            .upload(1, weights("some-old-version", [1.0; 4], [1.0; 4]))
            .await
            .unwrap();
        assert!(dispatches.is_empty());
        assert_eq!(agg.num_updates(), 0);
        assert_eq!(agg.stats().uploads_stale, 1);
        assert_eq!(agg.version().as_str(), "initial");
    }

    #[tokio::test]
    async fn test_unsupported_aggregation_clears_buffer() {
        let mut agg = threshold("median", 1).await;
        let result = agg.upload(1, weights("initial", [1.0; 4], [1.0; 4])).await;

        assert!(matches!(result, Err(Error::UnsupportedAggregation(name)) if name == "median"));
        assert_eq!(agg.num_updates(), 0);
        assert!(!agg.is_updating());
        assert_eq!(agg.version().as_str(), "initial");
        assert_eq!(agg.stats().failed_merges, 1);

        // later uploads are still considered
        let result = agg.upload(1, weights("initial", [1.0; 4], [1.0; 4])).await;
        assert!(result.is_err());
        assert_eq!(agg.stats().uploads_accepted, 2);
    }

    #[tokio::test]
    async fn test_shape_mismatch_aborts_merge() {
        let mut agg = threshold("mean", 2).await;
        agg.upload(1, weights("initial", [1.0; 4], [1.0; 4])).await.unwrap();

        let short = UploadMsg::weights(
            "client",
            ModelVersion::from("initial"),
            serialize_many(&[Tensor::from_f32(&[2, 2], vec![1.0; 4]).unwrap()]),
        );
        let result = agg.upload(2, short).await;
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
        assert_eq!(agg.num_updates(), 0);
        assert_eq!(agg.version().as_str(), "initial");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_published_weights() {
        let mut agg = Aggregator::new(read_only(initial_vars()), &config("mean", 1));
        agg.setup().await.unwrap();

        let result = agg.upload(1, weights("initial", [5.0; 4], [5.0; 4])).await;
        assert!(matches!(result, Err(Error::Snapshot(_))));
        assert_eq!(agg.version().as_str(), "initial");
        assert_eq!(agg.stats().failed_merges, 1);

        let held = agg.model().model().get_vars();
        assert_eq!(held[0].to_f32_vec(), vec![0.0; 4]);
        assert_eq!(held[1].to_f32_vec(), vec![0.0; 4]);
        assert_eq!(agg.model().serialized_vars(), agg.download_msg().model.vars);
    }

    #[tokio::test]
    async fn test_missing_payload_is_protocol_error() {
        let mut agg = threshold("mean", 2).await;
        let msg = UploadMsg::gradients("client", ModelVersion::from("initial"), Vec::new());
        assert!(matches!(agg.upload(1, msg).await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_gradient_uploads_step() {
        let mut agg = Aggregator::new(persistent(initial_vars()), &config("mean", 2))
            .with_gradient_uploads();
        agg.setup().await.unwrap();

        for g in [1.0, 3.0] {
            let grads = vec![
                Tensor::from_f32(&[2, 2], vec![g; 4]).unwrap(),
                Tensor::from_f32(&[1, 4], vec![g; 4]).unwrap(),
            ];
            let msg = UploadMsg::gradients("c", ModelVersion::from("initial"), serialize_many(&grads));
            agg.upload(1, msg).await.unwrap();
        }

        let vars = deserialize_many(&agg.download_msg().model.vars).unwrap();
        assert_eq!(vars[0].to_f32_vec(), vec![-2.0; 4]);
    }

    fn dataset(rows: usize, batch_size: usize) -> DistributedDataset {
        let x = Tensor::from_f32(&[rows, 1], (0..rows).map(|i| i as f32).collect()).unwrap();
        let y = Tensor::from_f32(&[rows, 1], vec![0.0; rows]).unwrap();
        DistributedDataset::new(
            x,
            y,
            DatasetConfig {
                epochs: 1,
                batch_size,
                small_last_batch: false,
            },
        )
        .unwrap()
    }

    async fn dispatched(rows: usize, reclaim: ReclaimPolicy) -> Aggregator {
        let vars = vec![Tensor::from_f32(&[1], vec![0.0]).unwrap()];
        let config = ServerConfig {
            reclaim,
            ..Default::default()
        };
        let mut agg = Aggregator::dispatched(persistent(vars), &config, dataset(rows, 2));
        agg.setup().await.unwrap();
        agg
    }

    fn batch_of(dispatches: &[Dispatch]) -> Option<usize> {
        match dispatches {
            [Dispatch::Direct(_, msg)] => msg.data.as_ref().map(|d| d.batch),
            _ => None,
        }
    }

    fn gradient_upload(version: &ModelVersion, batch: usize) -> UploadMsg {
        let grads = vec![Tensor::from_f32(&[1], vec![1.0]).unwrap()];
        UploadMsg::gradients("c", version.clone(), serialize_many(&grads)).with_batch(batch)
    }

    #[tokio::test]
    async fn test_per_batch_steps_and_redispatches() {
        let mut agg = dispatched(4, ReclaimPolicy::Wraparound).await;
        let first = agg.connect(1).unwrap();
        assert_eq!(batch_of(&first), Some(0));

        let v0 = agg.version().clone();
        let next = agg.upload(1, gradient_upload(&v0, 0)).await.unwrap();
        assert_eq!(batch_of(&next), Some(1));
        assert_ne!(agg.version(), &v0);
        let vars = deserialize_many(&agg.download_msg().model.vars).unwrap();
        assert_eq!(vars[0].to_f32_vec(), vec![-1.0]);

        let v1 = agg.version().clone();
        let last = agg.upload(1, gradient_upload(&v1, 1)).await.unwrap();
        assert!(last.is_empty());
        assert_eq!(agg.status().dataset_exhausted, Some(true));
        assert_eq!(agg.stats().batches_completed, 2);
    }

    #[tokio::test]
    async fn test_per_batch_stale_gets_fresh_work() {
        let mut agg = dispatched(4, ReclaimPolicy::Wraparound).await;
        agg.connect(1).unwrap();

        let stale = agg
            .upload(1, gradient_upload(&ModelVersion::from("old"), 0))
            .await
            .unwrap();
        assert_eq!(batch_of(&stale), Some(1));
        assert_eq!(agg.version().as_str(), "initial");
        assert_eq!(agg.stats().uploads_stale, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_step_still_redispatches() {
        let vars = vec![Tensor::from_f32(&[1], vec![0.0]).unwrap()];
        let mut agg = Aggregator::dispatched(read_only(vars), &ServerConfig::default(), dataset(4, 2));
        agg.setup().await.unwrap();
        assert_eq!(batch_of(&agg.connect(1).unwrap()), Some(0));

        let next = agg
            .upload(1, gradient_upload(&ModelVersion::from("initial"), 0))
            .await
            .unwrap();
        assert_eq!(batch_of(&next), Some(1));
        assert_eq!(agg.version().as_str(), "initial");
        assert_eq!(agg.stats().failed_merges, 1);
        assert_eq!(agg.stats().batches_completed, 0);
        assert_eq!(agg.model().model().get_vars()[0].to_f32_vec(), vec![0.0]);

        // the failed batch is still outstanding and comes back
        let again = agg
            .upload(1, gradient_upload(&ModelVersion::from("initial"), 1))
            .await
            .unwrap();
        assert_eq!(batch_of(&again), Some(0));
    }

    #[tokio::test]
    async fn test_reclaim_on_disconnect() {
        let mut agg = dispatched(6, ReclaimPolicy::OnDisconnect).await;
        assert_eq!(batch_of(&agg.connect(1).unwrap()), Some(0));
        assert_eq!(batch_of(&agg.connect(2).unwrap()), Some(1));

        agg.disconnect(1);
        assert_eq!(agg.num_clients(), 1);
        assert_eq!(batch_of(&agg.connect(3).unwrap()), Some(0));
        assert_eq!(agg.stats().batches_reclaimed, 1);
    }

    #[tokio::test]
    async fn test_wraparound_keeps_queue_order() {
        let mut agg = dispatched(6, ReclaimPolicy::Wraparound).await;
        agg.connect(1).unwrap();
        agg.connect(2).unwrap();
        agg.disconnect(1);
        assert_eq!(batch_of(&agg.connect(3).unwrap()), Some(2));
    }
}
