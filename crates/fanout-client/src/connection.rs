//! Client connection to one relay channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use fanout_core::Envelope;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::dispatcher::spawn_dispatcher;
use crate::error::{ClientError, HandlerError};
use crate::event::{ClientEvent, CloseReason};
use crate::handlers::{EventHandler, HandlerSet, Subscription};

/// Upper bound on the closing handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A subscriber connection to a relay channel.
///
/// There is no automatic reconnect: once [`ClientEvent::Closed`] has been
/// raised the connection is finished.
pub struct ClientConnection {
    url: String,
    socket: Mutex<Option<Socket>>,
    handlers: Arc<HandlerSet>,
    failures: Arc<AtomicU64>,
    started: AtomicBool,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl ClientConnection {
    /// Open a socket to `url` (e.g. `ws://host:8080/subscribe/room1`).
    ///
    /// A refused handshake (unknown channel) is returned as
    /// [`ClientError::Connect`]; see [`ClientError::http_status`].
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (socket, _response) = connect_async(url).await.map_err(ClientError::Connect)?;
        info!(%url, "connected");
        Ok(Self {
            url: url.to_owned(),
            socket: Mutex::new(Some(socket)),
            handlers: Arc::new(HandlerSet::default()),
            failures: Arc::new(AtomicU64::new(0)),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        })
    }

    /// Attach a closure handler.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ClientEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handlers.insert(Arc::new(handler))
    }

    /// Attach any [`EventHandler`].
    pub fn subscribe_handler(&self, handler: impl EventHandler) -> Subscription {
        self.handlers.insert(Arc::new(handler))
    }

    /// Start the receive loop and the dispatcher.
    pub fn start(&self) -> Result<(), ClientError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted);
        }
        if self.cancel.is_cancelled() {
            return Err(ClientError::Closed);
        }
        let Some(socket) = self.socket.lock().take() else {
            return Err(ClientError::Closed);
        };

        let (events, _dispatcher) = spawn_dispatcher(
            Arc::clone(&self.handlers),
            Arc::clone(&self.failures),
            self.finished.clone(),
        );
        drop(tokio::spawn(receive_loop(
            socket,
            events,
            self.cancel.clone(),
            self.url.clone(),
        )));
        Ok(())
    }

    /// End the connection. The `Closed` event carries
    /// [`CloseReason::ClosedByClient`] unless it already ended otherwise.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the `Closed` event has been delivered and every
    /// handler detached.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Whether the connection has fully ended.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Handler errors and panics caught so far.
    pub fn handler_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("url", &self.url)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

#[instrument(skip_all, fields(url = %url))]
async fn receive_loop(
    mut socket: Socket,
    events: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
    url: String,
) {
    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break CloseReason::ClosedByClient,
            message = socket.next() => match message {
                Some(Ok(Message::Text(text))) => match Envelope::decode(text.as_str()) {
                    Ok(Envelope::PayloadDelivery { identifier, payload }) => {
                        let _ = events.send(ClientEvent::Payload { identifier, payload });
                    }
                    Ok(Envelope::DisconnectNotice) => break CloseReason::ChannelDisconnected,
                    Ok(other) => debug!(kind = other.kind(), "ignoring envelope"),
                    Err(e) => warn!(error = %e, "ignoring undecodable frame"),
                },
                Some(Ok(Message::Close(_))) | None => break CloseReason::TransportClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "socket read failed");
                    break CloseReason::TransportClosed;
                }
            }
        }
    };

    if tokio::time::timeout(CLOSE_TIMEOUT, socket.close(None)).await.is_err() {
        debug!("close handshake timed out");
    }
    info!(%reason, "connection closed");
    let _ = events.send(ClientEvent::Closed { reason });
}
