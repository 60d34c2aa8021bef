//! Line-delimited TCP channel used to ship `key_ID` strings between the two
//! peer instances. Carries no secret material, only opaque identifiers.

use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DaemonError;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);
const SEND_DEADLINE: Duration = Duration::from_millis(100);

/// Sends a single `key_ID` line to the remote peer. Errors are the caller's
/// to ignore or act on; the rotation engine always proceeds regardless.
pub async fn send(addr: &str, payload: &str) -> Result<(), DaemonError> {
    if addr.is_empty() {
        return Err(DaemonError::ArgEmpty("addr"));
    }
    if payload.is_empty() {
        return Err(DaemonError::ArgEmpty("payload"));
    }

    let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr));
    let mut stream = connect
        .await
        .map_err(|_| DaemonError::PeerSendError(format!("connect to {addr} timed out")))?
        .map_err(|e| DaemonError::PeerSendError(format!("connect to {addr}: {e}")))?;

    let line = format!("{payload}\n");
    tokio::time::timeout(SEND_DEADLINE, stream.write_all(line.as_bytes()))
        .await
        .map_err(|_| DaemonError::PeerSendError(format!("write to {addr} timed out")))?
        .map_err(|e| DaemonError::PeerSendError(format!("write to {addr}: {e}")))?;

    Ok(())
}

/// Accepts connections on `listen_addr` until `shutdown` is triggered,
/// delivering every received `key_ID` line on `key_ids`.
pub async fn serve(
    listen_addr: String,
    key_ids: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("peer channel listening on {listen_addr}");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("peer channel shutting down, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("accept error: {e}");
                        continue;
                    }
                };
                debug!("accepted connection from {peer_addr}");
                let tx = key_ids.clone();
                let task = tokio::spawn(handle_connection(stream, tx));
                tokio::spawn(async move {
                    if let Err(join_err) = task.await {
                        if join_err.is_panic() {
                            warn!("connection handler panicked: {join_err}");
                        }
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, key_ids: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let id = line.trim().to_string();
                if id.is_empty() {
                    continue;
                }
                debug!("received key_id {id}");
                if key_ids.send(id).await.is_err() {
                    warn!("rotation engine channel closed; dropping connection");
                    return;
                }
                if let Err(e) = lines.get_mut().write_all(b"ACK\n").await {
                    warn!("failed to write ACK: {e}");
                    return;
                }
            }
            Ok(None) => {
                debug!("connection closed by remote host");
                return;
            }
            Err(e) => {
                warn!("read error on peer connection: {e}");
                return;
            }
        }
    }
}
