//! Runs an [`Aggregator`] behind the transport.
//!
//! A single task owns the aggregator and consumes transport events in
//! arrival order, so no two uploads are ever handled concurrently.

use crate::core::{Error, Result, UploadCallback, UploadObservers, VersionCallback, VersionObservers};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::server::aggregator::{Aggregator, Dispatch};
use crate::server::stats::ServerStatus;
use crate::transport::{tcp, Acceptor, ConnId, Link, TransportEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Requests from a [`ServerHandle`] to its service task.
#[derive(Debug)]
pub enum Control {
    Status(oneshot::Sender<ServerStatus>),
    Shutdown,
}

/// The event loop around an aggregator.
pub struct AggregatorService {
    aggregator: Aggregator,
    events: UnboundedReceiver<TransportEvent>,
    control: UnboundedReceiver<Control>,
    clients: HashMap<ConnId, UnboundedSender<ServerFrame>>,
}

impl AggregatorService {
    pub fn new(
        aggregator: Aggregator,
        events: UnboundedReceiver<TransportEvent>,
        control: UnboundedReceiver<Control>,
    ) -> Self {
        Self {
            aggregator,
            events,
            control,
            clients: HashMap::new(),
        }
    }

    /// Run until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.handle(event).await,
                command = self.control.recv() => match command {
                    Some(Control::Status(reply)) => {
                        let _ = reply.send(self.aggregator.status());
                    }
                    Some(Control::Shutdown) | None => break,
                },
            }
        }
        tracing::info!(version = %self.aggregator.version(), "aggregator stopped");
    }

    async fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { conn, outbound } => {
                self.clients.insert(conn, outbound);
                let dispatches = self.aggregator.connect(conn);
                self.route(dispatches);
            }
            TransportEvent::Frame {
                conn,
                frame: ClientFrame::Upload { seq, msg },
            } => {
                // receipt only; acceptance is decided afterwards
                self.send(conn, ServerFrame::Ack { seq, ok: true });
                let dispatches = self.aggregator.upload(conn, msg).await;
                self.route(dispatches);
            }
            TransportEvent::Disconnected { conn } => {
                self.clients.remove(&conn);
                self.aggregator.disconnect(conn);
            }
        }
    }

    fn route(&self, dispatches: Result<Vec<Dispatch>>) {
        let dispatches = match dispatches {
            Ok(dispatches) => dispatches,
            Err(e) => {
                tracing::error!(error = %e, "failed to handle event");
                return;
            }
        };

        for dispatch in dispatches {
            match dispatch {
                Dispatch::Broadcast(msg) => {
                    tracing::debug!(version = %msg.version(), clients = self.clients.len(), "broadcasting download");
                    for &conn in self.clients.keys() {
                        self.send(conn, ServerFrame::Download(msg.clone()));
                    }
                }
                Dispatch::Direct(conn, msg) => self.send(conn, ServerFrame::Download(msg)),
            }
        }
    }

    fn send(&self, conn: ConnId, frame: ServerFrame) {
        if let Some(outbound) = self.clients.get(&conn) {
            if outbound.send(frame).is_err() {
                tracing::debug!(conn, "client went away before delivery");
            }
        }
    }
}

/// A running aggregator. Dropping the handle stops it.
pub struct ServerHandle {
    acceptor: Acceptor,
    control: UnboundedSender<Control>,
    version_observers: Arc<VersionObservers>,
    upload_observers: Arc<UploadObservers>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Set up the aggregator's model and start serving.
    pub async fn start(mut aggregator: Aggregator) -> Result<Self> {
        aggregator.setup().await?;
        tracing::info!(version = %aggregator.version(), "aggregator started");

        let (events_tx, events) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        let (version_observers, upload_observers) = aggregator.observers();

        let service = AggregatorService::new(aggregator, events, control_rx);
        let task = tokio::spawn(service.run());

        Ok(Self {
            acceptor: Acceptor::new(events_tx),
            control,
            version_observers,
            upload_observers,
            task,
        })
    }

    pub fn acceptor(&self) -> Acceptor {
        self.acceptor.clone()
    }

    /// Open an in-process client connection.
    pub fn connect_local(&self) -> Result<Link> {
        self.acceptor.connect_local()
    }

    /// Accept TCP clients on `listener` in the background.
    pub fn serve_tcp(&self, listener: TcpListener) -> JoinHandle<Result<()>> {
        tokio::spawn(tcp::serve(listener, self.acceptor()))
    }

    pub fn on_new_version(&self, callback: VersionCallback) {
        self.version_observers.register(callback);
    }

    pub fn on_upload(&self, callback: UploadCallback) {
        self.upload_observers.register(callback);
    }

    pub async fn status(&self) -> Result<ServerStatus> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(Control::Status(reply))
            .map_err(|_| Error::ChannelClosed)?;
        response.await.map_err(|_| Error::ChannelClosed)
    }

    /// Stop the service task and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.control.send(Control::Shutdown);
        self.task
            .await
            .map_err(|e| Error::Protocol(format!("aggregator task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{serialize_many, Tensor};
    use crate::config::{ServerConfig, ServerHyperparams};
    use crate::core::ModelVersion;
    use crate::model::{DynamicModel, MemoryStore, PersistentModel};
    use crate::protocol::UploadMsg;

    async fn server(min_updates: usize) -> ServerHandle {
        let vars = vec![Tensor::from_f32(&[2], vec![0.0, 0.0]).unwrap()];
        let store = MemoryStore::seeded("initial", serialize_many(&vars));
        let model = DynamicModel::new(
            vars,
            vec![1],
            vec![1],
            Box::new(|_: &[Tensor], x: &Tensor| Ok(x.clone())),
            Box::new(|_: &[Tensor], _: &Tensor, _: &Tensor| Ok(0.0)),
            Box::new(|vars: &[Tensor], _: &Tensor, _: &Tensor| Ok(vars.to_vec())),
        );
        let config = ServerConfig {
            server_hyperparams: ServerHyperparams {
                aggregation: "mean".to_string(),
                min_updates_per_version: min_updates,
            },
            ..Default::default()
        };
        let model = PersistentModel::new(Box::new(model), Box::new(store));
        ServerHandle::start(Aggregator::new(model, &config)).await.unwrap()
    }

    fn upload(seq: u64, version: &str, value: f32) -> ClientFrame {
        let vars = vec![Tensor::from_f32(&[2], vec![value, value]).unwrap()];
        ClientFrame::Upload {
            seq,
            msg: UploadMsg::weights("c", ModelVersion::from(version), serialize_many(&vars)),
        }
    }

    #[tokio::test]
    async fn test_connect_receives_download() {
        let handle = server(1).await;
        let (_tx, mut rx) = handle.connect_local().unwrap().into_parts();

        match rx.recv().await {
            Some(ServerFrame::Download(msg)) => {
                assert_eq!(msg.version().as_str(), "initial");
                assert!(msg.data.is_none());
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(handle.status().await.unwrap().num_clients, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_precedes_broadcast() {
        let handle = server(1).await;
        let (tx, mut rx) = handle.connect_local().unwrap().into_parts();
        let (_other_tx, mut other_rx) = handle.connect_local().unwrap().into_parts();
        assert!(matches!(rx.recv().await, Some(ServerFrame::Download(_))));
        assert!(matches!(other_rx.recv().await, Some(ServerFrame::Download(_))));

        tx.send(upload(7, "initial", 3.0)).unwrap();
        assert_eq!(rx.recv().await, Some(ServerFrame::Ack { seq: 7, ok: true }));

        let Some(ServerFrame::Download(mine)) = rx.recv().await else {
            panic!("expected a broadcast download");
        };
        let Some(ServerFrame::Download(theirs)) = other_rx.recv().await else {
            panic!("expected a broadcast download");
        };
        assert_eq!(mine, theirs);
        assert_ne!(mine.version().as_str(), "initial");

        let status = handle.status().await.unwrap();
        assert_eq!(&status.version, mine.version());
        assert_eq!(status.stats.merges, 1);
    }

    #[tokio::test]
    async fn test_stale_upload_is_still_acked() {
        let handle = server(1).await;
        let (tx, mut rx) = handle.connect_local().unwrap().into_parts();
        rx.recv().await.unwrap();

        tx.send(upload(1, "nope", 3.0)).unwrap();
        assert_eq!(rx.recv().await, Some(ServerFrame::Ack { seq: 1, ok: true }));

        let status = handle.status().await.unwrap();
        assert_eq!(status.version.as_str(), "initial");
        assert_eq!(status.stats.uploads_stale, 1);
    }

    #[tokio::test]
    async fn test_disconnect_updates_count() {
        let handle = server(1).await;
        let (tx, mut rx) = handle.connect_local().unwrap().into_parts();
        rx.recv().await.unwrap();
        drop(tx);

        // the pump reports the disconnect asynchronously
        for _ in 0..100 {
            if handle.status().await.unwrap().num_clients == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("disconnect never observed");
    }
}
