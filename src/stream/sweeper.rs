//! Background maintenance of a stream.
//!
//! One task per stream wakes every sweep interval and applies age limits,
//! retires exhausted entries, removes idle ephemeral consumers and prunes
//! the duplicate window. Sweeps never surface errors to callers.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::core::StreamCore;
use super::retention;
use super::StreamShared;

/// What a sweep changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SweepReport {
    pub removed: usize,
    pub exhausted: usize,
    pub consumers_removed: usize,
}

impl SweepReport {
    pub fn changed(&self) -> bool {
        self.removed > 0 || self.exhausted > 0 || self.consumers_removed > 0
    }
}

/// Retire exhausted entries of one consumer and release them.
pub(crate) fn retire_exhausted(core: &mut StreamCore, consumer: &str, seqs: &[u64]) -> usize {
    for seq in seqs {
        warn!(
            stream = %core.config.name,
            consumer = %consumer,
            seq,
            "Entry reached max deliveries"
        );
    }
    retention::release(core, seqs)
}

pub(crate) fn sweep(core: &mut StreamCore, now: Instant) -> SweepReport {
    let mut report = SweepReport {
        removed: retention::enforce_limits(core, now),
        ..Default::default()
    };

    let expired: Vec<(String, Vec<u64>)> = core
        .consumers
        .iter_mut()
        .map(|(name, consumer)| (name.clone(), consumer.expire(now)))
        .filter(|(_, seqs)| !seqs.is_empty())
        .collect();
    for (consumer, seqs) in expired {
        report.exhausted += seqs.len();
        report.removed += retire_exhausted(core, &consumer, &seqs);
    }

    let idle: Vec<String> = core
        .consumers
        .iter()
        .filter(|(_, c)| c.is_inactive(now))
        .map(|(name, _)| name.clone())
        .collect();
    for name in &idle {
        core.consumers.remove(name);
        info!(stream = %core.config.name, consumer = %name, "Removed inactive ephemeral consumer");
    }
    if !idle.is_empty() {
        report.consumers_removed = idle.len();
        report.removed += retention::rescan(core);
    }

    core.prune_dedupe(now);
    report
}

/// Spawn the sweeper for `shared`. The task ends when the stream is closed
/// or dropped.
pub(crate) fn spawn(shared: Weak<StreamShared>, mut shutdown: watch::Receiver<bool>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            let Some(shared) = shared.upgrade() else {
                break;
            };
            if shared.is_closed() {
                break;
            }
            shared.sweep().await;
        }
        debug!("Stream sweeper stopped");
    });
}
