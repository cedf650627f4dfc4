//! Transport Module
//!
//! The persistent bidirectional event channel between a server and its
//! clients. The server side sees a stream of [`TransportEvent`]s; a client
//! holds a [`Link`].
//!
//! - In-process links over tokio channels
//! - TCP links carrying length-prefixed frames

pub mod memory;
pub mod tcp;

use crate::protocol::{ClientFrame, ServerFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Identifies one connection on the server side.
pub type ConnId = u64;

/// The client end of a connection.
pub struct Link {
    pub tx: UnboundedSender<ClientFrame>,
    pub rx: UnboundedReceiver<ServerFrame>,
}

impl Link {
    pub fn new(tx: UnboundedSender<ClientFrame>, rx: UnboundedReceiver<ServerFrame>) -> Self {
        Self { tx, rx }
    }

    pub fn into_parts(self) -> (UnboundedSender<ClientFrame>, UnboundedReceiver<ServerFrame>) {
        (self.tx, self.rx)
    }
}

/// What the server sees of its connections.
#[derive(Debug)]
pub enum TransportEvent {
    Connected {
        conn: ConnId,
        outbound: UnboundedSender<ServerFrame>,
    },
    Frame {
        conn: ConnId,
        frame: ClientFrame,
    },
    Disconnected {
        conn: ConnId,
    },
}

/// Registers new connections with a server's event stream.
#[derive(Clone, Debug)]
pub struct Acceptor {
    events: UnboundedSender<TransportEvent>,
    next_conn: Arc<AtomicU64>,
}

impl Acceptor {
    pub fn new(events: UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn next_conn(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Forward an event; `false` once the server has stopped.
    pub(crate) fn send(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
