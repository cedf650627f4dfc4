//! In-process links.

use crate::core::{Error, Result};
use crate::transport::{Acceptor, Link, TransportEvent};
use tokio::sync::mpsc;

impl Acceptor {
    /// Open an in-process connection. Dropping the returned link's sender
    /// disconnects it.
    pub fn connect_local(&self) -> Result<Link> {
        let conn = self.next_conn();
        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        if !self.send(TransportEvent::Connected {
            conn,
            outbound: server_tx,
        }) {
            return Err(Error::ChannelClosed);
        }

        let acceptor = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = client_rx.recv().await {
                if !acceptor.send(TransportEvent::Frame { conn, frame }) {
                    return;
                }
            }
            acceptor.send(TransportEvent::Disconnected { conn });
        });

        Ok(Link::new(client_tx, server_rx))
    }
}
