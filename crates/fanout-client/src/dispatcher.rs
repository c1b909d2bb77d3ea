//! Serialized event delivery.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::ClientEvent;
use crate::handlers::HandlerSet;

/// Spawn the single task that runs handlers.
///
/// Events are delivered in order, one handler at a time. When the sender
/// side is dropped the remaining events are drained, every handler is
/// detached and `done` is cancelled.
pub(crate) fn spawn_dispatcher(
    handlers: Arc<HandlerSet>,
    failures: Arc<AtomicU64>,
    done: CancellationToken,
) -> (mpsc::UnboundedSender<ClientEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientEvent>();
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            deliver(&handlers, &failures, &event);
        }
        handlers.clear();
        debug!("dispatcher finished");
        done.cancel();
    });
    (tx, task)
}

fn deliver(handlers: &HandlerSet, failures: &AtomicU64, event: &ClientEvent) {
    for handler in handlers.snapshot() {
        match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "event handler failed");
            }
            Err(_) => {
                let _ = failures.fetch_add(1, Ordering::Relaxed);
                warn!("event handler panicked");
            }
        }
    }
}
