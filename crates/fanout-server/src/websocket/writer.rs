//! Per-socket writer task: drains the outbound queue, pings, closes.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use fanout_core::RelayError;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, trace, warn};

use super::connection::{SocketHandle, SocketOptions};

/// Run until the handle is closed, the queue's senders are gone, a write
/// fails or times out, or the peer stops answering pings.
///
/// Frames already queued when close is requested are still flushed, so a
/// final `disconnectNotice` reaches the peer before the close frame.
#[instrument(skip_all, fields(conn_id = %handle.id()))]
pub async fn run_writer<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Utf8Bytes>,
    handle: Arc<SocketHandle>,
    options: SocketOptions,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = tokio::time::interval(options.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // consume the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => {
                let Some(text) = frame else { break };
                if send_frame(&mut sink, Message::Text(text), options.send_timeout).await.is_err() {
                    break;
                }
            }
            () = handle.closed() => break,
            _ = ping.tick() => {
                let idle = handle.idle_for();
                if idle > options.ping_interval * 2 {
                    warn!(idle_ms = idle.as_millis(), "peer unresponsive, closing");
                    break;
                }
                let ping_frame = Message::Ping(Bytes::new());
                if send_frame(&mut sink, ping_frame, options.send_timeout).await.is_err() {
                    break;
                }
                trace!("sent ping");
            }
        }
    }

    handle.close();
    // flush whatever slipped in between the last recv and close
    while let Ok(text) = rx.try_recv() {
        if send_frame(&mut sink, Message::Text(text), options.send_timeout).await.is_err() {
            break;
        }
    }
    let _ = send_frame(&mut sink, Message::Close(None), options.send_timeout).await;
    let _ = tokio::time::timeout(options.send_timeout, sink.close()).await;
    debug!(dropped = handle.drop_count(), "writer finished");
}

async fn send_frame<S>(sink: &mut S, message: Message, limit: Duration) -> Result<(), RelayError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "socket write failed");
            Err(RelayError::TransportClosed)
        }
        Err(_) => {
            warn!(timeout_ms = limit.as_millis(), "socket write timed out");
            Err(RelayError::TransportClosed)
        }
    }
}
