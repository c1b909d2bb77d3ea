//! Name-keyed channel registry.
//!
//! One coarse `parking_lot::Mutex` guards the map. It is held for map access
//! only (never across I/O or `.await`), and always taken before any
//! per-channel lock.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use fanout_core::{RelayError, Result, generate_channel_name};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelState};
use crate::metrics::{CHANNELS_ACTIVE, CHANNELS_CREATED_TOTAL, PUBLISHER_RECONNECTS_TOTAL};
use crate::subscriber::SubscriberSession;
use crate::websocket::connection::SocketHandle;

/// Live counts for `/health`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    /// Registered channels.
    pub channels: usize,
    /// Channels with a bound publisher.
    pub publishers: usize,
    /// Attached subscribers across all channels.
    pub subscribers: usize,
}

/// All registered channels.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under `name`.
    ///
    /// Fails with [`RelayError::DuplicateName`] when the name is taken; the
    /// existing channel is left untouched.
    pub fn create_channel(&self, name: &str, publisher: Arc<SocketHandle>) -> Result<Arc<Channel>> {
        let mut channels = self.channels.lock();
        match channels.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(RelayError::DuplicateName {
                name: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                let channel = Arc::new(Channel::new(name, publisher, Instant::now()));
                let _ = slot.insert(Arc::clone(&channel));
                record_active(channels.len());
                counter!(CHANNELS_CREATED_TOTAL, "naming" => "client").increment(1);
                info!(channel = %name, "channel created");
                Ok(channel)
            }
        }
    }

    /// Register a channel under a freshly generated name.
    pub fn create_named_channel(&self, publisher: Arc<SocketHandle>) -> Arc<Channel> {
        let mut channels = self.channels.lock();
        let name = loop {
            let candidate = generate_channel_name();
            if !channels.contains_key(&candidate) {
                break candidate;
            }
        };
        let channel = Arc::new(Channel::new(name.as_str(), publisher, Instant::now()));
        let _ = channels.insert(name.clone(), Arc::clone(&channel));
        record_active(channels.len());
        counter!(CHANNELS_CREATED_TOTAL, "naming" => "server").increment(1);
        info!(channel = %name, "channel created with generated name");
        channel
    }

    /// Rebind the publisher of an existing channel.
    ///
    /// A still-open previous publisher is closed and superseded. Subscribers
    /// are kept. Fails with [`RelayError::NameNotFound`] if absent.
    pub fn reconnect_channel(
        &self,
        name: &str,
        publisher: Arc<SocketHandle>,
    ) -> Result<Arc<Channel>> {
        let (channel, superseded) = {
            let channels = self.channels.lock();
            let channel = channels
                .get(name)
                .cloned()
                .ok_or_else(|| RelayError::NameNotFound {
                    name: name.to_owned(),
                })?;
            let superseded = channel.bind_publisher(publisher, Instant::now());
            (channel, superseded)
        };

        if let Some(previous) = superseded {
            debug!(channel = %name, conn_id = %previous.id(), "closing superseded publisher");
            previous.close();
        }
        counter!(PUBLISHER_RECONNECTS_TOTAL).increment(1);
        info!(
            channel = %name,
            subscribers = channel.subscriber_count(),
            "publisher reconnected"
        );
        Ok(channel)
    }

    /// Attach a subscriber to an existing channel.
    ///
    /// Fails with [`RelayError::NameNotFound`] without touching the registry.
    pub fn try_attach_subscriber(
        &self,
        name: &str,
        subscriber: Arc<SocketHandle>,
    ) -> Result<SubscriberSession> {
        let channels = self.channels.lock();
        let channel = channels
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::NameNotFound {
                name: name.to_owned(),
            })?;
        channel.add_subscriber(Arc::clone(&subscriber));
        Ok(SubscriberSession::new(channel, subscriber))
    }

    /// Remove `channel` if it is still the one registered under its name.
    ///
    /// Sockets are not closed.
    pub fn remove_channel(&self, channel: &Arc<Channel>) -> bool {
        self.remove_if(channel, |_| true)
    }

    /// Remove `channel` if it is still registered and `predicate` holds,
    /// both checked under the registry lock.
    pub fn remove_if(
        &self,
        channel: &Arc<Channel>,
        predicate: impl FnOnce(&Channel) -> bool,
    ) -> bool {
        let mut channels = self.channels.lock();
        let registered = channels
            .get(channel.name())
            .is_some_and(|current| Arc::ptr_eq(current, channel));
        if !registered || !predicate(channel) {
            return false;
        }
        let _ = channels.remove(channel.name());
        record_active(channels.len());
        true
    }

    /// Point-in-time copy of every registered channel.
    pub fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels.lock().values().cloned().collect()
    }

    /// Look up a channel by name.
    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.lock().get(name).cloned()
    }

    /// Whether a channel is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.channels.lock().contains_key(name)
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    /// Whether no channels are registered.
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Channel, publisher and subscriber counts.
    pub fn counts(&self) -> RegistryCounts {
        self.snapshot()
            .iter()
            .fold(RegistryCounts::default(), |mut acc, channel| {
                acc.channels += 1;
                if channel.state() == ChannelState::Connected {
                    acc.publishers += 1;
                }
                acc.subscribers += channel.subscriber_count();
                acc
            })
    }

    /// Close every socket of every channel.
    pub fn close_all(&self) {
        for channel in self.snapshot() {
            channel.close_all();
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(len: usize) {
    gauge!(CHANNELS_ACTIVE).set(len as f64);
}
