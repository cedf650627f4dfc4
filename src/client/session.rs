//! The client session state machine.
//!
//! A session connects once, adopts the server's weights, and from then on
//! trains locally and uploads. A background listener applies every later
//! download as soon as it arrives, so a broadcast may land while an update
//! is being computed; that update is still uploaded against the version it
//! started from and the aggregator decides whether it is stale.

use crate::client::buffer::ExampleBuffer;
use crate::client::identity::resolve_client_id;
use crate::codec::{deserialize_many, serialize_many, Tensor};
use crate::config::{ClientConfig, ClientHyperparams, ResolvedHyperparams};
use crate::core::{
    Error, ModelVersion, Result, UploadCallback, UploadObservers, VersionCallback,
    VersionObservers,
};
use crate::model::{DistributedModel, FitConfig};
use crate::monitoring::{init_logging, timed, verbose_requested, version_logger};
use crate::protocol::{ClientFrame, DataMsg, DownloadMsg, ServerFrame, UploadMsg};
use crate::transport::Link;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<bool>>>>;

struct SessionState<M> {
    model: M,
    download: Option<DownloadMsg>,
    /// Weights of the last download; local training always starts here.
    synced_vars: Vec<Tensor>,
    version_updates: HashMap<ModelVersion, usize>,
    /// Work unit handed down with the last download, not yet trained on.
    pending_data: Option<DataMsg>,
}

impl<M: DistributedModel> SessionState<M> {
    fn version(&self) -> ModelVersion {
        self.download
            .as_ref()
            .map_or_else(ModelVersion::unsynced, |d| d.version().clone())
    }

    /// Adopt a download. Returns `(old, new)` versions.
    fn apply(&mut self, msg: DownloadMsg) -> Result<(Option<ModelVersion>, ModelVersion)> {
        let vars = deserialize_many(&msg.model.vars)?;
        self.model.set_vars(&vars)?;
        self.synced_vars = vars;

        let old = self.download.as_ref().map(|d| d.version().clone());
        let new = msg.version().clone();
        self.version_updates.insert(new.clone(), 0);
        self.pending_data = msg.data.clone();
        self.download = Some(msg);
        Ok((old, new))
    }

    fn revert(&mut self) -> Result<()> {
        self.model.set_vars(&self.synced_vars)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A client of one aggregator.
pub struct ClientSession<M: DistributedModel + 'static> {
    config: ClientConfig,
    client_id: String,
    state: Arc<Mutex<SessionState<M>>>,
    acks: PendingAcks,
    downloads: Arc<Notify>,
    outbound: Option<UnboundedSender<ClientFrame>>,
    seq: AtomicU64,
    version_observers: Arc<VersionObservers>,
    upload_observers: UploadObservers,
    listener: Option<JoinHandle<()>>,
    buffer: ExampleBuffer,
}

impl<M: DistributedModel + 'static> ClientSession<M> {
    pub fn new(model: M, config: ClientConfig) -> Result<Self> {
        if verbose_requested(config.verbose) {
            init_logging(true);
        }
        let client_id = resolve_client_id(&config)?;
        let buffer = ExampleBuffer::new(model.input_shape(), model.output_shape());

        let version_observers = Arc::new(VersionObservers::new());
        version_observers.register(version_logger("client"));

        Ok(Self {
            config,
            client_id,
            state: Arc::new(Mutex::new(SessionState {
                model,
                download: None,
                synced_vars: Vec::new(),
                version_updates: HashMap::new(),
                pending_data: None,
            })),
            acks: Arc::new(Mutex::new(HashMap::new())),
            downloads: Arc::new(Notify::new()),
            outbound: None,
            seq: AtomicU64::new(0),
            version_observers,
            upload_observers: UploadObservers::new(),
            listener: None,
            buffer,
        })
    }

    /// Initialize the model, connect over `link` and adopt the first
    /// download.
    pub async fn setup(&mut self, link: Link) -> Result<()> {
        lock(&self.state).model.setup()?;

        let (tx, mut rx) = link.into_parts();
        let wait = self.config.connection_timeout;
        let first = timed(
            "download weights from server",
            timeout(wait, first_download(&mut rx)),
        )
        .await
        .map_err(|_| Error::ConnectionTimeout(wait))??;

        let (old, new) = lock(&self.state).apply(first)?;
        self.version_observers.notify(old.as_ref(), &new);

        self.outbound = Some(tx);
        self.listener = Some(tokio::spawn(listen(
            rx,
            Arc::clone(&self.state),
            Arc::clone(&self.acks),
            Arc::clone(&self.downloads),
            Arc::clone(&self.version_observers),
        )));
        tracing::info!(client_id = %self.client_id, version = %new, "client ready");
        Ok(())
    }

    /// Buffer `(x, y)` and, for every full slice of `examplesPerUpdate`
    /// examples, train from the synced weights and upload the result.
    /// Returns the number of uploads made.
    pub async fn distributed_update(&mut self, x: &Tensor, y: &Tensor) -> Result<usize> {
        self.buffer.add(x, y)?;

        let mut uploads = 0;
        loop {
            let hyper = self.hyperparams();
            let n = hyper.examples_per_update;
            if n == 0 {
                return Err(Error::InvalidConfig(
                    "examplesPerUpdate must be at least 1".to_string(),
                ));
            }
            if self.buffer.len() < n {
                break;
            }

            let (x_train, y_train) = self.buffer.front(n)?;
            let (version, vars, metrics) = {
                let mut guard = lock(&self.state);
                let state = &mut *guard;
                let version = state.version();
                let metrics = if self.config.send_metrics {
                    Some(state.model.evaluate(&x_train, &y_train)?)
                } else {
                    None
                };

                if let Err(e) = train_in_place(&mut state.model, &x_train, &y_train, &hyper) {
                    tracing::error!(client_id = %self.client_id, error = %e, "local training failed");
                    state.revert()?;
                    return Err(e);
                }

                let mut trained = state.model.get_vars();
                if hyper.weight_noise_stddev > 0.0 {
                    add_weight_noise(&mut trained, hyper.weight_noise_stddev)?;
                }
                state.revert()?;
                (version, serialize_many(&trained), metrics)
            };

            let msg = UploadMsg::weights(self.client_id.clone(), version.clone(), vars)
                .with_metrics(metrics);
            timed("upload weights to server", self.upload(&msg)).await?;
            self.upload_observers.notify(&msg);
            *lock(&self.state).version_updates.entry(version).or_insert(0) += 1;

            self.buffer.drop_front(n)?;
            uploads += 1;
        }
        Ok(uploads)
    }

    /// Train on the work unit handed down with the last download and
    /// upload the gradients. Returns `false` when no work unit is pending.
    pub async fn train_dispatched(&mut self) -> Result<bool> {
        let (data, version) = {
            let mut state = lock(&self.state);
            (state.pending_data.take(), state.version())
        };
        let Some(data) = data else {
            return Ok(false);
        };
        let (x, y) = data.tensors()?;
        let hyper = self.hyperparams();

        let (gradients, metrics) = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let metrics = if self.config.send_metrics {
                Some(state.model.evaluate(&x, &y)?)
            } else {
                None
            };

            match state.model.fit(&x, &y, &fit_config(&hyper)) {
                Ok(Some(gradients)) => (gradients, metrics),
                Ok(None) => {
                    state.revert()?;
                    return Err(Error::Training(
                        "dispatched batches need a model whose fit returns gradients".to_string(),
                    ));
                }
                Err(e) => {
                    tracing::error!(client_id = %self.client_id, batch = data.batch, error = %e, "local training failed");
                    return Err(e);
                }
            }
        };

        let msg = UploadMsg::gradients(self.client_id.clone(), version.clone(), serialize_many(&gradients))
            .with_batch(data.batch)
            .with_metrics(metrics);
        timed("upload gradients to server", self.upload(&msg)).await?;
        self.upload_observers.notify(&msg);
        *lock(&self.state).version_updates.entry(version).or_insert(0) += 1;
        Ok(true)
    }

    /// Keep training dispatched work units until none arrives for `idle`.
    /// Returns the number of units trained.
    pub async fn run_dispatched(&mut self, idle: Duration) -> Result<usize> {
        let mut steps = 0;
        loop {
            if self.train_dispatched().await? {
                steps += 1;
                continue;
            }
            if timeout(idle, self.downloads.notified()).await.is_err() {
                tracing::debug!(client_id = %self.client_id, steps, "no more work");
                return Ok(steps);
            }
        }
    }

    async fn upload(&self, msg: &UploadMsg) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(Error::ChannelClosed)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (ack_tx, ack_rx) = oneshot::channel();
        lock(&self.acks).insert(seq, ack_tx);

        let frame = ClientFrame::Upload {
            seq,
            msg: msg.clone(),
        };
        if outbound.send(frame).is_err() {
            lock(&self.acks).remove(&seq);
            return Err(Error::ChannelClosed);
        }

        let wait = self.config.upload_timeout;
        match timeout(wait, ack_rx).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(Error::Protocol(format!("upload {seq} was refused"))),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                lock(&self.acks).remove(&seq);
                Err(Error::UploadTimeout(wait))
            }
        }
    }

    /// Per key: local override, then the last download, then the default.
    pub fn hyperparams(&self) -> ResolvedHyperparams {
        let state = lock(&self.state);
        let server = state
            .download
            .as_ref()
            .map(|d| d.hyperparams.clone())
            .unwrap_or_default();
        ClientHyperparams::resolve(&self.config.hyperparams, &server)
    }

    pub fn on_new_version(&self, callback: VersionCallback) {
        self.version_observers.register(callback);
    }

    pub fn on_upload(&self, callback: UploadCallback) {
        self.upload_observers.register(callback);
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Version of the weights currently being trained, `unsynced` before
    /// setup.
    pub fn model_version(&self) -> ModelVersion {
        lock(&self.state).version()
    }

    /// Uploads made, over all versions.
    pub fn num_updates(&self) -> usize {
        lock(&self.state).version_updates.values().sum()
    }

    pub fn num_versions(&self) -> usize {
        lock(&self.state).version_updates.len()
    }

    /// Buffered examples not yet uploaded.
    pub fn num_examples(&self) -> usize {
        self.buffer.len()
    }

    pub fn num_examples_per_update(&self) -> usize {
        self.hyperparams().examples_per_update
    }

    pub fn num_examples_remaining(&self) -> usize {
        self.num_examples_per_update()
            .saturating_sub(self.num_examples())
    }

    pub fn evaluate(&self, x: &Tensor, y: &Tensor) -> Result<Vec<f32>> {
        lock(&self.state).model.evaluate(x, y)
    }

    pub fn predict(&self, x: &Tensor) -> Result<Tensor> {
        lock(&self.state).model.predict(x)
    }

    pub fn vars(&self) -> Vec<Tensor> {
        lock(&self.state).model.get_vars()
    }

    pub fn input_shape(&self) -> Vec<usize> {
        lock(&self.state).model.input_shape().to_vec()
    }

    pub fn output_shape(&self) -> Vec<usize> {
        lock(&self.state).model.output_shape().to_vec()
    }

    /// Disconnect from the server.
    pub fn dispose(&mut self) {
        self.outbound = None;
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        tracing::info!(client_id = %self.client_id, "disconnected");
    }
}

impl<M: DistributedModel + 'static> Drop for ClientSession<M> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn first_download(rx: &mut UnboundedReceiver<ServerFrame>) -> Result<DownloadMsg> {
    while let Some(frame) = rx.recv().await {
        if let ServerFrame::Download(msg) = frame {
            return Ok(msg);
        }
    }
    Err(Error::ChannelClosed)
}

async fn listen<M: DistributedModel>(
    mut rx: UnboundedReceiver<ServerFrame>,
    state: Arc<Mutex<SessionState<M>>>,
    acks: PendingAcks,
    downloads: Arc<Notify>,
    observers: Arc<VersionObservers>,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            ServerFrame::Download(msg) => {
                let applied = lock(&state).apply(msg);
                match applied {
                    Ok((old, new)) => {
                        if old.as_ref() != Some(&new) {
                            observers.notify(old.as_ref(), &new);
                        }
                        downloads.notify_one();
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring unusable download"),
                }
            }
            ServerFrame::Ack { seq, ok } => {
                if let Some(waiter) = lock(&acks).remove(&seq) {
                    let _ = waiter.send(ok);
                }
            }
        }
    }
    tracing::debug!("server connection closed");
    // waiters see the channel close
    lock(&acks).clear();
}

fn fit_config(hyper: &ResolvedHyperparams) -> FitConfig {
    FitConfig {
        epochs: hyper.epochs,
        batch_size: hyper.batch_size,
        learning_rate: hyper.learning_rate,
    }
}

/// Fit and, for models that return gradients, apply them locally.
fn train_in_place<M: DistributedModel>(
    model: &mut M,
    x: &Tensor,
    y: &Tensor,
    hyper: &ResolvedHyperparams,
) -> Result<()> {
    let config = fit_config(hyper);
    for _ in 0..hyper.epochs.max(1) {
        match model.fit(x, y, &config)? {
            Some(gradients) => model.update(&gradients)?,
            None => return Ok(()),
        }
    }
    Ok(())
}

fn add_weight_noise(vars: &mut [Tensor], stddev: f32) -> Result<()> {
    let normal = Normal::new(0.0, stddev)
        .map_err(|e| Error::InvalidConfig(format!("weight noise stddev {stddev}: {e}")))?;
    let mut rng = rand::thread_rng();
    for var in vars {
        if let Tensor::Float32(a) = var {
            a.mapv_inplace(|v| v + normal.sample(&mut rng));
        }
    }
    Ok(())
}
