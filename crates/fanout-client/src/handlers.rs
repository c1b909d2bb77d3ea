//! Handler registration with guard-scoped lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::HandlerError;
use crate::event::ClientEvent;

/// Receives [`ClientEvent`]s on the connection's dispatcher task.
///
/// Handlers never run concurrently with each other for the same connection.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    fn handle(&self, event: &ClientEvent) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&ClientEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, event: &ClientEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Registered handlers of one connection.
#[derive(Default)]
pub(crate) struct HandlerSet {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Arc<dyn EventHandler>)>>,
}

impl HandlerSet {
    pub(crate) fn insert(self: &Arc<Self>, handler: Arc<dyn EventHandler>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, handler));
        Subscription {
            id,
            set: Arc::downgrade(self),
        }
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Copy of the current handlers, taken so none run under the lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn EventHandler>> {
        self.handlers.lock().iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub(crate) fn clear(&self) {
        self.handlers.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.handlers.lock().len()
    }
}

/// Keeps a handler attached. Dropping it (or calling
/// [`Subscription::unsubscribe`]) detaches the handler.
#[must_use = "dropping a Subscription detaches its handler"]
pub struct Subscription {
    id: u64,
    set: Weak<HandlerSet>,
}

impl Subscription {
    /// Detach the handler now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the handler attached until the connection ends.
    pub fn persist(mut self) {
        self.set = Weak::new();
    }

    /// Whether the handler is still attached.
    pub fn is_active(&self) -> bool {
        self.set
            .upgrade()
            .is_some_and(|set| set.handlers.lock().iter().any(|(id, _)| *id == self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            let _ = set.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn EventHandler> {
        Arc::new(|_: &ClientEvent| -> Result<(), HandlerError> { Ok(()) })
    }

    #[test]
    fn drop_detaches() {
        let set = Arc::new(HandlerSet::default());
        let sub = set.insert(noop());
        assert_eq!(set.len(), 1);
        assert!(sub.is_active());
        drop(sub);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn unsubscribe_detaches_only_its_handler() {
        let set = Arc::new(HandlerSet::default());
        let a = set.insert(noop());
        let b = set.insert(noop());
        a.unsubscribe();
        assert_eq!(set.len(), 1);
        assert!(b.is_active());
    }

    #[test]
    fn persist_survives_guard() {
        let set = Arc::new(HandlerSet::default());
        set.insert(noop()).persist();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn guard_outliving_set_is_harmless() {
        let set = Arc::new(HandlerSet::default());
        let sub = set.insert(noop());
        drop(set);
        assert!(!sub.is_active());
        drop(sub);
    }

    #[test]
    fn clear_deactivates_guards() {
        let set = Arc::new(HandlerSet::default());
        let sub = set.insert(noop());
        set.clear();
        assert!(!sub.is_active());
        assert!(set.snapshot().is_empty());
    }
}
