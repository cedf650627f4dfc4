//! TCP links carrying length-prefixed frames.

use crate::core::Result;
use crate::protocol::{read_frame, write_frame, ClientFrame, ServerFrame};
use crate::transport::{Acceptor, Link, TransportEvent};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

/// Accept connections until the server stops.
pub async fn serve(listener: TcpListener, acceptor: Acceptor) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        if acceptor.is_closed() {
            return Ok(());
        }
        stream.set_nodelay(true)?;

        let conn = acceptor.next_conn();
        let (mut reader, mut writer) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ServerFrame>();

        if !acceptor.send(TransportEvent::Connected { conn, outbound }) {
            return Ok(());
        }
        tracing::debug!(conn, %peer, "accepted connection");

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    tracing::debug!(conn, error = %e, "write failed");
                    return;
                }
            }
        });

        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            loop {
                match read_frame::<_, ClientFrame>(&mut reader).await {
                    Ok(Some(frame)) => {
                        if !acceptor.send(TransportEvent::Frame { conn, frame }) {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(conn, error = %e, "dropping connection");
                        break;
                    }
                }
            }
            acceptor.send(TransportEvent::Disconnected { conn });
        });
    }
}

/// Connect to a server started with [`serve`].
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Link> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientFrame>();
    let (server_tx, server_rx) = mpsc::unbounded_channel::<ServerFrame>();

    tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                tracing::debug!(error = %e, "write failed");
                return;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match read_frame::<_, ServerFrame>(&mut reader).await {
                Ok(Some(frame)) => {
                    if server_tx.send(frame).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "server connection failed");
                    return;
                }
            }
        }
    });

    Ok(Link::new(client_tx, server_rx))
}
