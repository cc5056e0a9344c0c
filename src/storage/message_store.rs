//! MessageStore trait definition.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{EntryRef, StreamEntry};
use crate::error::Result;

/// Summary of a store's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreState {
    pub messages: u64,
    pub bytes: u64,
    /// Lowest retained seq, or `last_seq + 1` when empty.
    pub first_seq: u64,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_seq: u64,
    pub last_ts: Option<DateTime<Utc>>,
    pub num_subjects: u64,
    /// Gaps between `first_seq` and `last_seq` left by interior removals.
    pub num_deleted: u64,
}

/// Per-subject index entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubjectState {
    pub messages: u64,
    pub first_seq: u64,
    pub last_seq: u64,
}

/// Interface for stream entry persistence.
///
/// The owning stream serializes all mutations, so implementations need no
/// internal locking. Sequence numbers are assigned by the caller and must be
/// strictly increasing.
///
/// Implementations:
/// - `MemoryStore`: in-process storage
pub trait MessageStore: Send + Sync {
    /// Store an entry. `entry.seq` must exceed `last_seq()`.
    fn store(&mut self, entry: StreamEntry) -> Result<EntryRef>;

    /// Load the entry at `seq`, if retained.
    fn load(&self, seq: u64) -> Option<EntryRef>;

    /// Remove the entry at `seq`, returning it if it was retained.
    fn remove(&mut self, seq: u64) -> Option<EntryRef>;

    /// Lowest retained seq, or `last_seq() + 1` when empty.
    fn first_seq(&self) -> u64;

    /// Highest seq ever stored. Not lowered by removals.
    fn last_seq(&self) -> u64;

    /// Current counters.
    fn state(&self) -> StoreState;

    /// Retained entries with `seq >= from`, ascending.
    fn range_from(&self, from: u64) -> Box<dyn Iterator<Item = &EntryRef> + '_>;

    /// Index entry for a literal subject.
    fn subject_state(&self, subject: &str) -> Option<SubjectState>;

    /// Message counts of all subjects matching `filter`.
    fn subject_counts(&self, filter: &str) -> BTreeMap<String, u64>;

    /// Seqs of the last entry of every subject matching `filter`, ascending.
    fn last_per_subject(&self, filter: &str) -> Vec<u64>;
}
