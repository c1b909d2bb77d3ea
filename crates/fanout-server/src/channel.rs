//! A named channel: one publisher slot, many subscribers.
//!
//! Lock order is registry, then publisher slot, then subscriber set. Neither
//! lock is held across socket I/O; fan-out works on a snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Utf8Bytes;
use fanout_core::{ConnectionId, Envelope, RelayError};
use futures::StreamExt;
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::metrics::{
    DELIVERY_FAILURES_TOTAL, ENVELOPES_REJECTED_TOTAL, ENVELOPES_RELAYED_TOTAL, SUBSCRIBERS_ACTIVE,
};
use crate::websocket::connection::SocketHandle;
use crate::websocket::frames::Frames;

/// Whether a channel currently has a live publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// A publisher socket is bound.
    Connected,
    /// The publisher went away; the channel awaits a reconnect or eviction.
    Disconnected,
}

/// Outcome of delivering one frame to a subscriber snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Subscribers whose queue accepted the frame.
    pub delivered: usize,
    /// Subscribers whose queue was full or closed.
    pub failed: usize,
}

struct PublisherSlot {
    publisher: Option<Arc<SocketHandle>>,
    last_message_at: Instant,
    disconnected_since: Option<Instant>,
}

/// One publisher and its subscribers, keyed by name in the registry.
///
/// `disconnected_since` is set exactly when the publisher slot is empty.
pub struct Channel {
    name: String,
    slot: Mutex<PublisherSlot>,
    subscribers: RwLock<HashMap<ConnectionId, Arc<SocketHandle>>>,
}

impl Channel {
    /// Create a connected channel.
    pub fn new(name: impl Into<String>, publisher: Arc<SocketHandle>, now: Instant) -> Self {
        Self {
            name: name.into(),
            slot: Mutex::new(PublisherSlot {
                publisher: Some(publisher),
                last_message_at: now,
                disconnected_since: None,
            }),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current publisher state.
    pub fn state(&self) -> ChannelState {
        if self.slot.lock().publisher.is_some() {
            ChannelState::Connected
        } else {
            ChannelState::Disconnected
        }
    }

    /// The bound publisher, if any.
    pub fn publisher(&self) -> Option<Arc<SocketHandle>> {
        self.slot.lock().publisher.clone()
    }

    /// When the publisher last sent a valid envelope (or connected).
    pub fn last_message_at(&self) -> Instant {
        self.slot.lock().last_message_at
    }

    /// When the publisher went away, if it has.
    pub fn disconnected_since(&self) -> Option<Instant> {
        self.slot.lock().disconnected_since
    }

    /// Bind a (new) publisher socket and clear the disconnect timestamp.
    ///
    /// Returns the previously bound publisher when one is superseded; the
    /// caller closes it outside any lock. A reconnect counts as activity.
    pub fn bind_publisher(
        &self,
        publisher: Arc<SocketHandle>,
        now: Instant,
    ) -> Option<Arc<SocketHandle>> {
        let mut slot = self.slot.lock();
        slot.disconnected_since = None;
        slot.last_message_at = now;
        slot.publisher
            .replace(publisher)
            .filter(|prev| !prev.is_closed())
    }

    /// Mark the channel disconnected if `id` is still its publisher.
    ///
    /// A superseded publisher loop ending late never clobbers a newer one.
    pub fn release_publisher(&self, id: &ConnectionId, now: Instant) -> bool {
        let mut slot = self.slot.lock();
        let is_current = slot.publisher.as_ref().is_some_and(|p| p.id() == id);
        if is_current {
            slot.publisher = None;
            slot.disconnected_since = Some(now);
        }
        is_current
    }

    /// Record publisher activity.
    pub fn touch(&self, now: Instant) {
        self.slot.lock().last_message_at = now;
    }

    /// Attach a subscriber socket.
    pub fn add_subscriber(&self, handle: Arc<SocketHandle>) {
        let id = handle.id().clone();
        if self.subscribers.write().insert(id, handle).is_none() {
            gauge!(SUBSCRIBERS_ACTIVE).increment(1.0);
        }
    }

    /// Detach a subscriber socket. Returns whether it was attached.
    pub fn remove_subscriber(&self, id: &ConnectionId) -> bool {
        let removed = self.subscribers.write().remove(id).is_some();
        if removed {
            gauge!(SUBSCRIBERS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Point-in-time copy of the subscriber set.
    pub fn subscribers(&self) -> Vec<Arc<SocketHandle>> {
        self.subscribers.read().values().cloned().collect()
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Queue `frame` to every subscriber attached right now.
    ///
    /// A failing subscriber is counted and skipped; it stays attached until
    /// its own session notices the socket is gone.
    pub fn fan_out(&self, frame: &Utf8Bytes) -> FanOut {
        let mut result = FanOut::default();
        for subscriber in self.subscribers() {
            match subscriber.send(frame.clone()) {
                Ok(()) => result.delivered += 1,
                Err(e) => {
                    result.failed += 1;
                    counter!(DELIVERY_FAILURES_TOTAL, "code" => e.code()).increment(1);
                    debug!(
                        channel = %self.name,
                        conn_id = %subscriber.id(),
                        error = %e,
                        "delivery failed"
                    );
                }
            }
        }
        result
    }

    /// Handle one frame from the publisher.
    ///
    /// Any well-formed envelope (including unknown kinds) refreshes activity
    /// and is forwarded verbatim. Malformed frames are rejected untouched.
    pub fn relay(&self, frame: &Utf8Bytes, now: Instant) -> Result<FanOut, RelayError> {
        let envelope = Envelope::decode(frame.as_str())?;
        self.touch(now);
        let result = self.fan_out(frame);
        counter!(ENVELOPES_RELAYED_TOTAL).increment(1);
        debug!(
            channel = %self.name,
            kind = envelope.kind(),
            delivered = result.delivered,
            failed = result.failed,
            "relayed envelope"
        );
        Ok(result)
    }

    /// Send a relay-generated envelope to every subscriber.
    pub fn notify_subscribers(&self, envelope: &Envelope) -> FanOut {
        match envelope.encode() {
            Ok(text) => self.fan_out(&Utf8Bytes::from(text)),
            Err(e) => {
                warn!(channel = %self.name, error = %e, "failed to encode notice");
                FanOut::default()
            }
        }
    }

    /// Close the publisher (if any) and every subscriber socket.
    pub fn close_all(&self) {
        if let Some(publisher) = self.publisher() {
            publisher.close();
        }
        for subscriber in self.subscribers() {
            subscriber.close();
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Publisher receive loop: relay every frame until the socket closes or the
/// handle is closed (eviction, supersession, shutdown).
///
/// On exit the channel is marked disconnected if this socket is still its
/// publisher. Subscribers are left alone.
#[instrument(skip_all, fields(channel = %channel.name(), conn_id = %publisher.id()))]
pub async fn run_publisher(
    channel: Arc<Channel>,
    publisher: Arc<SocketHandle>,
    mut frames: Frames,
) {
    info!("publisher connected");
    loop {
        tokio::select! {
            () = publisher.closed() => break,
            frame = frames.next() => {
                let Some(frame) = frame else { break };
                if let Err(e) = channel.relay(&frame, Instant::now()) {
                    counter!(ENVELOPES_REJECTED_TOTAL).increment(1);
                    warn!(error = %e, len = frame.as_str().len(), "dropping malformed frame");
                }
            }
        }
    }

    publisher.close();
    if channel.release_publisher(publisher.id(), Instant::now()) {
        info!(subscribers = channel.subscriber_count(), "publisher disconnected");
    } else {
        debug!("superseded publisher finished");
    }
}
