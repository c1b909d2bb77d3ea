//! Staleness sweeper: periodically evicts inactive and abandoned channels.
//!
//! Two rules, evaluated per channel on a registry snapshot:
//!
//! - **Inactive**: no publisher envelope for longer than
//!   `inactivity_timeout`, in any state. Subscribers get a
//!   `disconnectNotice`, then every socket is closed.
//! - **Abandoned**: disconnected for longer than `abandoned_timeout`.
//!   Subscribers get a `disconnectNotice` but are not force-closed.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fanout_core::Envelope;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::channel::{Channel, ChannelState};
use crate::metrics::{CHANNELS_EVICTED_TOTAL, SWEEP_CYCLES_TOTAL, SWEEP_PANICS_TOTAL};
use crate::registry::ChannelRegistry;

/// Eviction timing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Time between cycles.
    pub interval: Duration,
    /// Maximum silence from a publisher before eviction.
    pub inactivity_timeout: Duration,
    /// Maximum time a channel may stay disconnected.
    pub abandoned_timeout: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            inactivity_timeout: Duration::from_secs(90),
            abandoned_timeout: Duration::from_secs(120),
        }
    }
}

/// Channels evicted by one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Evicted by the inactivity rule.
    pub inactive: Vec<String>,
    /// Evicted by the abandoned-reconnect rule.
    pub abandoned: Vec<String>,
}

impl SweepReport {
    /// Total channels evicted.
    pub fn evicted(&self) -> usize {
        self.inactive.len() + self.abandoned.len()
    }
}

/// Source of "now" for a sweep cycle.
pub trait Clock: Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> Instant;
}

impl<F> Clock for F
where
    F: Fn() -> Instant + Send + Sync + 'static,
{
    fn now(&self) -> Instant {
        self()
    }
}

/// Wall-clock [`Clock`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Periodic eviction pass over a [`ChannelRegistry`].
pub struct Sweeper {
    registry: Arc<ChannelRegistry>,
    policy: SweepPolicy,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    /// Create a sweeper using the system clock.
    pub fn new(registry: Arc<ChannelRegistry>, policy: SweepPolicy) -> Self {
        Self {
            registry,
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used by [`Sweeper::run_cycle`].
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The active policy.
    pub fn policy(&self) -> &SweepPolicy {
        &self.policy
    }

    /// Evaluate one cycle as of `now`.
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        for channel in self.registry.snapshot() {
            if self.evict_inactive(&channel, now) {
                report.inactive.push(channel.name().to_owned());
            } else if self.evict_abandoned(&channel, now) {
                report.abandoned.push(channel.name().to_owned());
            }
        }
        report
    }

    /// Both rules are re-checked under the registry lock, so a reconnect
    /// that lands after the snapshot wins.
    fn evict_inactive(&self, channel: &Arc<Channel>, now: Instant) -> bool {
        if !self.registry.remove_if(channel, |c| self.is_inactive(c, now)) {
            return false;
        }
        let notified = channel.notify_subscribers(&Envelope::DisconnectNotice);
        channel.close_all();
        counter!(CHANNELS_EVICTED_TOTAL, "reason" => "inactive").increment(1);
        info!(
            channel = %channel.name(),
            subscribers = notified.delivered + notified.failed,
            "evicted inactive channel"
        );
        true
    }

    fn evict_abandoned(&self, channel: &Arc<Channel>, now: Instant) -> bool {
        if !self.registry.remove_if(channel, |c| self.is_abandoned(c, now)) {
            return false;
        }
        let notified = channel.notify_subscribers(&Envelope::DisconnectNotice);
        counter!(CHANNELS_EVICTED_TOTAL, "reason" => "abandoned").increment(1);
        info!(
            channel = %channel.name(),
            subscribers = notified.delivered + notified.failed,
            "evicted abandoned channel"
        );
        true
    }

    /// Run one cycle against the configured clock, containing any panic.
    ///
    /// Returns `None` if the cycle panicked.
    pub fn run_cycle(&self) -> Option<SweepReport> {
        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.sweep_at(self.clock.now())));
        counter!(SWEEP_CYCLES_TOTAL).increment(1);
        match outcome {
            Ok(report) => {
                debug!(evicted = report.evicted(), "sweep cycle finished");
                Some(report)
            }
            Err(panic) => {
                counter!(SWEEP_PANICS_TOTAL).increment(1);
                error!(reason = panic_message(panic.as_ref()), "sweep cycle panicked");
                None
            }
        }
    }

    /// Run cycles every `interval` until `cancel` fires.
    ///
    /// The first cycle runs one interval after spawning.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.policy.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let _ = ticker.tick().await;
            info!(interval_secs = self.policy.interval.as_secs(), "sweeper started");

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = self.run_cycle();
                    }
                }
            }
            debug!("sweeper stopped");
        })
    }

    fn is_inactive(&self, channel: &Channel, now: Instant) -> bool {
        now.saturating_duration_since(channel.last_message_at()) > self.policy.inactivity_timeout
    }

    fn is_abandoned(&self, channel: &Channel, now: Instant) -> bool {
        channel.state() == ChannelState::Disconnected
            && channel.disconnected_since().is_some_and(|since| {
                now.saturating_duration_since(since) > self.policy.abandoned_timeout
            })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
