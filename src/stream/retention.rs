//! Eviction rules.
//!
//! - Limits: oldest entries go first once a count, byte, per-subject or age
//!   limit is exceeded.
//! - Interest: an entry goes once every consumer whose filter matches its
//!   subject has resolved it. Entries nobody is interested in are dropped on
//!   append.
//! - WorkQueue: consumer filters are disjoint, so an entry goes on the first
//!   resolution by its single owning consumer.
//!
//! Limits apply under every policy. All functions run under the stream lock
//! and return the number of removed entries.

use tokio::time::Instant;

use super::config::RetentionPolicy;
use super::core::StreamCore;
use super::request::PurgeRequest;
use crate::storage::EntryRef;
use crate::subject::subject_matches;

fn remove_first(core: &mut StreamCore) -> bool {
    let first = core.store.first_seq();
    core.remove_entry(first)
}

/// Count, byte and age limits.
pub(crate) fn enforce_limits(core: &mut StreamCore, now: Instant) -> usize {
    let mut removed = 0;

    if let Some(max_age) = core.config.max_age {
        loop {
            let first = core.store.first_seq();
            match core.store.load(first) {
                Some(entry) if now.saturating_duration_since(entry.stored_at) >= max_age => {
                    core.remove_entry(first);
                    removed += 1;
                }
                _ => break,
            }
        }
    }
    if let Some(max) = core.config.max_msgs {
        while core.store.state().messages > max && remove_first(core) {
            removed += 1;
        }
    }
    if let Some(max) = core.config.max_bytes {
        while core.store.state().bytes > max && remove_first(core) {
            removed += 1;
        }
    }
    removed
}

fn enforce_subject_limit(core: &mut StreamCore, subject: &str) -> usize {
    let Some(max) = core.config.max_msgs_per_subject else {
        return 0;
    };
    let mut removed = 0;
    while let Some(state) = core.store.subject_state(subject) {
        if state.messages <= max || !core.remove_entry(state.first_seq) {
            break;
        }
        removed += 1;
    }
    removed
}

/// Remove every entry on `subject` older than `keep_seq`.
pub(crate) fn rollup(core: &mut StreamCore, subject: &str, keep_seq: u64) -> usize {
    let mut removed = 0;
    while let Some(state) = core.store.subject_state(subject) {
        if state.first_seq >= keep_seq || !core.remove_entry(state.first_seq) {
            break;
        }
        removed += 1;
    }
    removed
}

/// Apply retention after `entry` was stored.
pub(crate) fn on_append(core: &mut StreamCore, entry: &EntryRef, now: Instant) -> usize {
    if core.config.retention == RetentionPolicy::Interest
        && !core
            .consumers
            .values()
            .any(|c| c.is_interested(&entry.subject))
    {
        core.remove_entry(entry.seq);
        return 1;
    }
    enforce_subject_limit(core, &entry.subject) + enforce_limits(core, now)
}

fn fully_resolved(core: &StreamCore, seq: u64) -> bool {
    let Some(entry) = core.store.load(seq) else {
        return false;
    };
    core.consumers
        .values()
        .filter(|c| c.is_interested(&entry.subject))
        .all(|c| c.has_resolved(seq))
}

/// Evict `seqs` that every interested consumer has resolved.
pub(crate) fn release(core: &mut StreamCore, seqs: &[u64]) -> usize {
    if core.config.retention == RetentionPolicy::Limits {
        return 0;
    }
    let mut removed = 0;
    for &seq in seqs {
        if fully_resolved(core, seq) && core.remove_entry(seq) {
            removed += 1;
        }
    }
    removed
}

/// Re-evaluate every entry after the consumer set shrank.
///
/// WorkQueue entries stay until a consumer takes them.
pub(crate) fn rescan(core: &mut StreamCore) -> usize {
    if core.config.retention != RetentionPolicy::Interest {
        return 0;
    }
    let seqs: Vec<u64> = core
        .store
        .range_from(core.store.first_seq())
        .map(|e| e.seq)
        .collect();
    release(core, &seqs)
}

/// Remove entries selected by `request`.
pub(crate) fn purge(core: &mut StreamCore, request: &PurgeRequest) -> u64 {
    let mut selected: Vec<u64> = core
        .store
        .range_from(core.store.first_seq())
        .filter(|e| match &request.filter {
            Some(filter) => subject_matches(&e.subject, filter),
            None => true,
        })
        .filter(|e| request.up_to_seq.map_or(true, |up_to| e.seq < up_to))
        .map(|e| e.seq)
        .collect();
    if let Some(keep) = request.keep {
        let keep = (keep as usize).min(selected.len());
        selected.truncate(selected.len() - keep);
    }
    let mut removed = 0;
    for seq in selected {
        if core.remove_entry(seq) {
            removed += 1;
        }
    }
    removed
}

/// Re-apply every limit, used after the limits changed.
pub(crate) fn enforce_all(core: &mut StreamCore, now: Instant) -> usize {
    let subjects: Vec<String> = core.store.subject_counts(">").into_keys().collect();
    let per_subject: usize = subjects
        .iter()
        .map(|subject| enforce_subject_limit(core, subject))
        .sum();
    per_subject + enforce_limits(core, now)
}
