//! Per-consumer delivery and acknowledgment state.
//!
//! A `ConsumerState` is owned by its stream and only mutated under the
//! stream's state lock. Pull fetches and push loops both go through
//! [`ConsumerState::select`], so the pending/ack state machine exists once.
//!
//! Entry lifecycle per consumer:
//!
//! ```text
//! undelivered -> PENDING -> ACKED | TERMINATED
//!                   |  ^
//!     nak/ack_wait  v  |  redelivered (delivery_count + 1)
//!                REDELIVER -> EXHAUSTED (max_deliver reached)
//! ```
//!
//! A `REDELIVER` entry is a pending entry whose deadline has passed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::config::{AckPolicy, ConsumerConfig, DeliverPolicy};
use super::info::{ConsumerInfo, SequenceInfo};
use crate::storage::{EntryRef, MessageStore};
use crate::subject::{subject_matches, FULL_WILDCARD};
use crate::utils::duration::deadline_after;

/// Bookkeeping for a delivered, unresolved entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingEntry {
    pub consumer_seq: u64,
    pub delivery_count: u64,
    pub delivered_at: Instant,
    pub deadline: Instant,
}

/// One dispatched entry.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub entry: EntryRef,
    pub consumer_seq: u64,
    pub delivery_count: u64,
    pub num_pending: u64,
}

/// Result of a selection pass.
#[derive(Debug, Default)]
pub(crate) struct Selection {
    pub deliveries: Vec<Delivery>,
    /// Seqs that hit `max_deliver` during this pass.
    pub exhausted: Vec<u64>,
    /// Seqs resolved on dispatch (ack policy none).
    pub resolved: Vec<u64>,
}

/// Terminal or redelivery outcome requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckKind {
    Ack,
    Nak(Duration),
    Term,
    Progress,
}

#[derive(Debug)]
pub(crate) struct ConsumerState {
    pub name: String,
    pub stream: String,
    pub config: ConsumerConfig,
    pub created: DateTime<Utc>,
    delivered_stream_seq: u64,
    delivered_consumer_seq: u64,
    pending: BTreeMap<u64, PendingEntry>,
    /// Entries at or below the cursor still owed to the consumer
    /// (`Last` and `LastPerSubject` start positions).
    backlog: BTreeSet<u64>,
    last_active: Instant,
    pub(crate) waiting: Arc<AtomicUsize>,
    pub(crate) push_sessions: Arc<AtomicUsize>,
}

impl ConsumerState {
    pub fn new(
        name: String,
        stream: String,
        config: ConsumerConfig,
        store: &dyn MessageStore,
        now: Instant,
    ) -> Self {
        let filter = config
            .filter_subject
            .clone()
            .unwrap_or_else(|| FULL_WILDCARD.to_string());
        let last_seq = store.last_seq();
        let first_seq = store.first_seq();

        let (cursor, backlog) = match config.deliver_policy {
            DeliverPolicy::All => (first_seq.saturating_sub(1), BTreeSet::new()),
            DeliverPolicy::New => (last_seq, BTreeSet::new()),
            DeliverPolicy::ByStartSequence(start) => {
                (start.max(first_seq).saturating_sub(1), BTreeSet::new())
            }
            DeliverPolicy::Last => (
                last_seq,
                store.last_per_subject(&filter).last().copied().into_iter().collect(),
            ),
            DeliverPolicy::LastPerSubject => {
                (last_seq, store.last_per_subject(&filter).into_iter().collect())
            }
        };

        Self {
            name,
            stream,
            config,
            created: Utc::now(),
            delivered_stream_seq: cursor,
            delivered_consumer_seq: 0,
            pending: BTreeMap::new(),
            backlog,
            last_active: now,
            waiting: Arc::new(AtomicUsize::new(0)),
            push_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn filter(&self) -> &str {
        self.config.filter_subject.as_deref().unwrap_or(FULL_WILDCARD)
    }

    /// True when entries on `subject` are delivered to this consumer.
    pub fn is_interested(&self, subject: &str) -> bool {
        match &self.config.filter_subject {
            Some(filter) => subject_matches(subject, filter),
            None => true,
        }
    }

    /// True when this consumer will never need `seq` again.
    pub fn has_resolved(&self, seq: u64) -> bool {
        seq <= self.delivered_stream_seq
            && !self.pending.contains_key(&seq)
            && !self.backlog.contains(&seq)
    }

    pub fn delivered_stream_seq(&self) -> u64 {
        self.delivered_stream_seq
    }

    pub fn num_ack_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_entry(&self, seq: u64) -> Option<&PendingEntry> {
        self.pending.get(&seq)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_active = now;
    }

    /// Matching entries not yet delivered.
    pub fn num_pending(&self, store: &dyn MessageStore) -> u64 {
        let fresh = store
            .range_from(self.delivered_stream_seq + 1)
            .filter(|e| self.is_interested(&e.subject))
            .count();
        (fresh + self.backlog.len()) as u64
    }

    /// Highest seq among entries this consumer still owes from existing data.
    pub fn replay_target(&self, store: &dyn MessageStore) -> Option<u64> {
        let newest = store.last_per_subject(self.filter()).last().copied();
        match newest {
            Some(seq) if seq > self.delivered_stream_seq => Some(seq),
            _ => self.backlog.last().copied(),
        }
    }

    fn is_exhausted(&self, entry: &PendingEntry) -> bool {
        matches!(self.config.max_deliver, Some(max) if entry.delivery_count >= max)
    }

    /// Drop due entries that used up their delivery budget.
    pub fn expire(&mut self, now: Instant) -> Vec<u64> {
        let exhausted: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now && self.is_exhausted(p))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &exhausted {
            self.pending.remove(seq);
        }
        exhausted
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    fn has_headroom(&self) -> bool {
        self.config.ack_policy == AckPolicy::None
            || self.pending.len() < self.config.max_ack_pending
    }

    fn next_fresh(&self, store: &dyn MessageStore) -> Option<EntryRef> {
        store
            .range_from(self.delivered_stream_seq + 1)
            .find(|e| self.is_interested(&e.subject))
            .cloned()
    }

    fn record(&mut self, entry: EntryRef, delivery_count: u64, now: Instant) -> Delivery {
        self.delivered_consumer_seq += 1;
        let consumer_seq = self.delivered_consumer_seq;
        if self.config.ack_policy != AckPolicy::None {
            self.pending.insert(
                entry.seq,
                PendingEntry {
                    consumer_seq,
                    delivery_count,
                    delivered_at: now,
                    deadline: deadline_after(now, self.config.ack_wait),
                },
            );
        }
        Delivery {
            entry,
            consumer_seq,
            delivery_count,
            num_pending: 0,
        }
    }

    /// Pick up to `batch` entries: due redeliveries first, then owed
    /// backlog entries, then undelivered entries past the cursor.
    pub fn select(&mut self, store: &dyn MessageStore, now: Instant, batch: usize) -> Selection {
        let mut selection = Selection {
            exhausted: self.expire(now),
            ..Default::default()
        };

        let due: Vec<(u64, u64)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(seq, p)| (*seq, p.delivery_count))
            .take(batch)
            .collect();
        for (seq, count) in due {
            match store.load(seq) {
                Some(entry) => {
                    let delivery = self.record(entry, count + 1, now);
                    selection.deliveries.push(delivery);
                }
                None => {
                    self.pending.remove(&seq);
                }
            }
        }

        let mut fresh = 0usize;
        while selection.deliveries.len() < batch && self.has_headroom() {
            let entry = match self.backlog.pop_first() {
                Some(seq) => match store.load(seq) {
                    Some(entry) => entry,
                    None => continue,
                },
                None => match self.next_fresh(store) {
                    Some(entry) => {
                        self.delivered_stream_seq = entry.seq;
                        entry
                    }
                    None => break,
                },
            };
            if self.config.ack_policy == AckPolicy::None {
                selection.resolved.push(entry.seq);
            }
            let delivery = self.record(entry, 1, now);
            selection.deliveries.push(delivery);
            fresh += 1;
        }

        if !selection.deliveries.is_empty() {
            let remaining = self.num_pending(store);
            let total = selection.deliveries.len();
            for (i, delivery) in selection.deliveries.iter_mut().enumerate() {
                let later_fresh = fresh.min(total - i - 1) as u64;
                delivery.num_pending = remaining + later_fresh;
            }
            self.last_active = now;
        }
        selection
    }

    /// Apply a client outcome. Returns the seqs that became resolved.
    ///
    /// Unknown or already resolved seqs are a no-op.
    pub fn apply(&mut self, seq: u64, kind: AckKind, now: Instant) -> Vec<u64> {
        self.last_active = now;
        match kind {
            AckKind::Ack => match self.config.ack_policy {
                AckPolicy::None => Vec::new(),
                AckPolicy::Explicit => self.pending.remove(&seq).map(|_| seq).into_iter().collect(),
                AckPolicy::All => {
                    let acked: Vec<u64> = self.pending.range(..=seq).map(|(s, _)| *s).collect();
                    for s in &acked {
                        self.pending.remove(s);
                    }
                    acked
                }
            },
            AckKind::Term => self.pending.remove(&seq).map(|_| seq).into_iter().collect(),
            AckKind::Nak(delay) => {
                if let Some(pending) = self.pending.get_mut(&seq) {
                    pending.deadline = deadline_after(now, delay);
                }
                Vec::new()
            }
            AckKind::Progress => {
                if let Some(pending) = self.pending.get_mut(&seq) {
                    pending.deadline = deadline_after(now, self.config.ack_wait);
                }
                Vec::new()
            }
        }
    }

    /// Forget an entry the stream removed.
    pub fn on_removed(&mut self, seq: u64) {
        self.pending.remove(&seq);
        self.backlog.remove(&seq);
    }

    /// Ephemeral, idle and with nothing outstanding.
    pub fn is_inactive(&self, now: Instant) -> bool {
        !self.config.is_durable()
            && self.pending.is_empty()
            && self.waiting.load(Ordering::SeqCst) == 0
            && self.push_sessions.load(Ordering::SeqCst) == 0
            && now.saturating_duration_since(self.last_active) > self.config.inactive_threshold
    }

    pub fn update_config(&mut self, config: ConsumerConfig) {
        self.config = config;
    }

    pub fn info(&self, store: &dyn MessageStore) -> ConsumerInfo {
        let ack_floor = match self.pending.iter().next() {
            Some((seq, p)) => SequenceInfo {
                stream_seq: seq - 1,
                consumer_seq: p.consumer_seq.saturating_sub(1),
            },
            None => SequenceInfo {
                stream_seq: self.delivered_stream_seq,
                consumer_seq: self.delivered_consumer_seq,
            },
        };
        ConsumerInfo {
            stream_name: self.stream.clone(),
            name: self.name.clone(),
            config: self.config.clone(),
            created: self.created,
            delivered: SequenceInfo {
                stream_seq: self.delivered_stream_seq,
                consumer_seq: self.delivered_consumer_seq,
            },
            ack_floor,
            num_ack_pending: self.pending.len(),
            num_redelivered: self
                .pending
                .values()
                .filter(|p| p.delivery_count > 1)
                .count(),
            num_waiting: self.waiting.load(Ordering::SeqCst),
            num_pending: self.num_pending(store),
            push_bound: self.push_sessions.load(Ordering::SeqCst) > 0,
        }
    }
}
