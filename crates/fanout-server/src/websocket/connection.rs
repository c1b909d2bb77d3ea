//! Server-side state of one accepted socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use fanout_core::{ConnectionId, Envelope, RelayError};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Queueing, timeout and keepalive knobs applied to every socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketOptions {
    /// Outbound frames buffered before new frames are dropped.
    pub queue_capacity: usize,
    /// Upper bound on a single socket write.
    pub send_timeout: Duration,
    /// Interval between pings. A peer silent for twice this long is closed.
    pub ping_interval: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            send_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Handle to one open socket (publisher or subscriber).
///
/// Sending never blocks: frames go into a bounded queue drained by the
/// socket's writer task. Closing is signalled through a cancellation token
/// that the writer and the owning receive loop both observe.
pub struct SocketHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Utf8Bytes>,
    close: CancellationToken,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped_frames: AtomicU64,
}

impl SocketHandle {
    /// Create a handle around the writer's queue.
    pub fn new(tx: mpsc::Sender<Utf8Bytes>, close: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            tx,
            close,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Unique id of this socket.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a text frame for the writer.
    ///
    /// A full queue drops the frame and returns [`RelayError::QueueFull`];
    /// a closed socket returns [`RelayError::TransportClosed`]. Both bump the
    /// drop counter.
    pub fn send(&self, frame: Utf8Bytes) -> Result<(), RelayError> {
        if self.close.is_cancelled() {
            self.record_drop();
            return Err(RelayError::TransportClosed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.record_drop();
                Err(RelayError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.record_drop();
                Err(RelayError::TransportClosed)
            }
        }
    }

    /// Encode an envelope and queue it.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), RelayError> {
        let text = envelope.encode()?;
        self.send(Utf8Bytes::from(text))
    }

    /// Ask the writer to flush what is queued and close the socket.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether close has been requested (locally, by the peer, or by shutdown).
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once the socket is closing.
    pub async fn closed(&self) {
        self.close.cancelled().await;
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the peer last sent anything.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Socket age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Total frames dropped for this socket.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dropped_frames", &self.drop_count())
            .finish_non_exhaustive()
    }
}
