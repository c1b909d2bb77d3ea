//! Subscriber session: an idle receive loop that exists to notice closure.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{info, instrument, trace};

use crate::channel::Channel;
use crate::websocket::connection::SocketHandle;
use crate::websocket::frames::Frames;

/// A subscriber socket attached to one channel.
///
/// Only [`crate::ChannelRegistry::try_attach_subscriber`] creates sessions,
/// so the socket is already in the channel's subscriber set.
pub struct SubscriberSession {
    channel: Arc<Channel>,
    handle: Arc<SocketHandle>,
}

impl SubscriberSession {
    pub(crate) fn new(channel: Arc<Channel>, handle: Arc<SocketHandle>) -> Self {
        Self { channel, handle }
    }

    /// The channel this session is attached to.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// The subscriber's socket.
    pub fn handle(&self) -> &Arc<SocketHandle> {
        &self.handle
    }

    /// Discard inbound frames until the socket closes or the handle is
    /// closed, then detach from the channel.
    #[instrument(skip_all, fields(channel = %self.channel.name(), conn_id = %self.handle.id()))]
    pub async fn run(self, mut frames: Frames) {
        info!("subscriber attached");
        loop {
            tokio::select! {
                () = self.handle.closed() => break,
                frame = frames.next() => {
                    let Some(frame) = frame else { break };
                    trace!(len = frame.as_str().len(), "ignoring subscriber frame");
                }
            }
        }

        self.handle.close();
        let _ = self.channel.remove_subscriber(self.handle.id());
        info!(
            remaining = self.channel.subscriber_count(),
            age_secs = self.handle.age().as_secs(),
            "subscriber detached"
        );
    }
}

impl std::fmt::Debug for SubscriberSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSession")
            .field("channel", &self.channel.name())
            .field("conn_id", self.handle.id())
            .finish()
    }
}
