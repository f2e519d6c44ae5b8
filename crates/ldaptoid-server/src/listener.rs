//! TCP accept loop and per-connection tasks.
//!
//! Each connection owns a growing read buffer and a session state machine.
//! Responses for one request are written before the next request is
//! decoded, which preserves arrival order for pipelining clients, and each
//! PDU write awaits the socket so a slow reader backpressures the
//! traversal instead of ballooning memory.

use bytes::{Buf, BytesMut};
use metrics::counter;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ldaptoid_proto::codec;

use crate::session::{protocol_error, Disposition, Session, SessionConfig, SnapshotProvider};
use crate::tree::DirectoryTree;

/// Everything a connection needs, shared across all of them.
pub struct ServerContext {
    pub config: Arc<SessionConfig>,
    pub tree: Arc<DirectoryTree>,
    pub snapshots: Arc<dyn SnapshotProvider>,
}

/// Accepts connections until `shutdown` fires. Spawns one task per
/// connection; a connection failure never touches its siblings.
pub async fn serve(
    listener: TcpListener,
    context: Arc<ServerContext>,
    shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "LDAP listener ready");
    }
    let mut accept_shutdown = shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        counter!("ldaptoid_connections_total").increment(1);
                        debug!(%peer, "connection accepted");
                        let context = Arc::clone(&context);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, context, shutdown).await {
                                debug!(%peer, %err, "connection ended with error");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(%err, "accept failed");
                    }
                }
            }
            _ = accept_shutdown.changed() => {
                info!("LDAP listener stopping");
                return;
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    context: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let mut session = Session::new(
        Arc::clone(&context.config),
        Arc::clone(&context.tree),
        Arc::clone(&context.snapshots),
    );
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    loop {
        // Drain every complete PDU already buffered before reading again.
        loop {
            match codec::decode(&buffer) {
                Ok(Some((message, consumed))) => {
                    buffer.advance(consumed);
                    let (responses, disposition) = session.handle(message);
                    for response in &responses {
                        stream.write_all(&codec::encode(response)).await?;
                    }
                    if disposition == Disposition::Close {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(failure) => {
                    // Answer on the offending id when we know it, then drop
                    // the connection; resync is not attempted.
                    warn!(%failure, "closing connection on decode error");
                    if let Some(message_id) = failure.message_id {
                        let response = protocol_error(message_id, "malformed request");
                        let _ = stream.write_all(&codec::encode(&response)).await;
                    }
                    return Ok(());
                }
            }
        }

        tokio::select! {
            read = stream.read_buf(&mut buffer) => {
                if read? == 0 {
                    debug!("peer closed connection");
                    return Ok(());
                }
            }
            _ = shutdown.changed() => {
                debug!("connection closing for shutdown");
                return Ok(());
            }
        }
    }
}
