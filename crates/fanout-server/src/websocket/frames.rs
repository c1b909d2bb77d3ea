//! Inbound frame stream.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::debug;

use super::connection::SocketHandle;

/// Text frames received from a peer. Ends when the peer closes or errors.
pub type Frames = BoxStream<'static, Utf8Bytes>;

/// Adapt the read half of a socket into a stream of text frames.
///
/// Control frames only refresh the handle's liveness. Binary frames are
/// passed through when they hold valid UTF-8 and dropped otherwise.
pub fn inbound_frames<S, E>(stream: S, handle: Arc<SocketHandle>) -> Frames
where
    S: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    futures::stream::unfold((stream, handle), |(mut stream, handle)| async move {
        loop {
            match stream.next().await? {
                Ok(Message::Text(text)) => {
                    handle.mark_alive();
                    return Some((text, (stream, handle)));
                }
                Ok(Message::Binary(bytes)) => {
                    handle.mark_alive();
                    match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            let text = Utf8Bytes::from(text.to_owned());
                            return Some((text, (stream, handle)));
                        }
                        Err(_) => {
                            debug!(
                                conn_id = %handle.id(),
                                len = bytes.len(),
                                "dropping non-UTF-8 binary frame"
                            );
                        }
                    }
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => handle.mark_alive(),
                Ok(Message::Close(_)) => return None,
                Err(e) => {
                    debug!(conn_id = %handle.id(), error = %e, "socket read failed");
                    return None;
                }
            }
        }
    })
    .boxed()
}
