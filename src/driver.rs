//! Per-connection read/dispatch/write loop.
//!
//! Each accepted socket gets a session, a writer task draining the session's
//! outbound queue, and this read loop. Direct responses and room broadcasts
//! share the same queue, so the writer is the only code touching the socket's
//! write half.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crate::frame::{read_frame, Frame, ProtocolError};
use crate::router::{failure_payload, RequestContext, Router};
use crate::state::RelayState;

/// How long a closing connection may spend flushing queued frames
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Why a connection ended
#[derive(Debug)]
pub enum CloseReason {
    PeerClosed,
    IdleTimeout,
    Shutdown,
    /// The client stopped reading and its outbound queue overflowed
    Evicted,
    WriterGone,
    Protocol(ProtocolError),
}

async fn next_frame<R>(
    reader: &mut R,
    max_payload: u32,
    idle_timeout: Option<Duration>,
) -> Result<Option<Frame>, CloseReason>
where
    R: AsyncRead + Unpin,
{
    let read = read_frame(reader, max_payload);
    let result = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| CloseReason::IdleTimeout)?,
        None => read.await,
    };
    result.map_err(CloseReason::Protocol)
}

/// Drive one client connection until it closes, then tear its session down.
pub async fn run_connection<R, W>(
    mut reader: R,
    mut writer: W,
    peer: SocketAddr,
    state: Arc<RelayState>,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(state.config.outbound_queue.max(1));
    let session = state.sessions.create(peer, tx).await;
    let session_id = session.id().to_string();
    tracing::info!("Session {} connected from {}", session_id, peer);

    let mut writer_task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                tracing::debug!("Write to {} failed: {}", peer, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let max_payload = state.config.max_payload;
    let idle_timeout = state.config.idle_timeout;

    let reason = loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break CloseReason::Shutdown,
            _ = session.evicted() => break CloseReason::Evicted,
            next = next_frame(&mut reader, max_payload, idle_timeout) => next,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => break CloseReason::PeerClosed,
            Err(reason) => break reason,
        };

        tracing::debug!(
            "Session {} sent route {} ({} bytes)",
            session_id,
            frame.route,
            frame.payload.len()
        );

        let mut ctx = RequestContext::new(state.clone(), session.clone(), frame.route);
        let response = router.dispatch(&mut ctx, frame).await;
        let bytes = match response.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(
                    "Response on route {} for session {} cannot be framed: {}",
                    response.route,
                    session_id,
                    e
                );
                match Frame::new(response.route, failure_payload("internal error")).encode() {
                    Ok(bytes) => bytes,
                    Err(e) => break CloseReason::Protocol(e),
                }
            }
        };

        // A client that stops reading fills its queue; stay responsive to shutdown
        tokio::select! {
            _ = shutdown.changed() => break CloseReason::Shutdown,
            _ = session.evicted() => break CloseReason::Evicted,
            sent = session.send(bytes) => {
                if sent.is_err() {
                    break CloseReason::WriterGone;
                }
            }
        }
        ctx.flush_deferred().await;
    };

    match &reason {
        CloseReason::Protocol(e) => {
            tracing::warn!("Closing session {}: {}", session_id, e)
        }
        CloseReason::IdleTimeout => {
            tracing::info!("Closing idle session {}", session_id)
        }
        CloseReason::Evicted => {
            tracing::warn!("Closing session {}: outbound queue overflowed", session_id)
        }
        other => tracing::info!("Session {} closed: {:?}", session_id, other),
    }

    // Dropping the last handle on the session closes the outbound queue
    state.sessions.remove(&session_id).await;
    drop(session);

    if matches!(reason, CloseReason::Evicted) {
        writer_task.abort();
    } else if tokio::time::timeout(WRITER_DRAIN, &mut writer_task).await.is_err() {
        tracing::warn!("Writer for session {} did not drain in time", session_id);
        writer_task.abort();
    }

    reason
}
