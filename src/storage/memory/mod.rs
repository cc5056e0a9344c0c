//! In-memory message store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{EntryRef, MessageStore, StoreState, StreamEntry, SubjectState};
use crate::error::{EngineError, Result};
use crate::subject::subject_matches;

/// Message store that keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<u64, EntryRef>,
    subjects: HashMap<String, SubjectState>,
    bytes: u64,
    last_seq: u64,
    last_ts: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-point the subject index after removing `seq` from `subject`.
    fn unindex(&mut self, subject: &str, seq: u64) {
        let Some(state) = self.subjects.get(subject).copied() else {
            return;
        };
        if state.messages <= 1 {
            self.subjects.remove(subject);
            return;
        }
        let mut updated = SubjectState {
            messages: state.messages - 1,
            ..state
        };
        if seq == state.first_seq {
            updated.first_seq = self
                .entries
                .range(seq + 1..=state.last_seq)
                .find(|(_, e)| e.subject == subject)
                .map(|(s, _)| *s)
                .unwrap_or(state.last_seq);
        }
        if seq == state.last_seq {
            updated.last_seq = self
                .entries
                .range(state.first_seq..seq)
                .rev()
                .find(|(_, e)| e.subject == subject)
                .map(|(s, _)| *s)
                .unwrap_or(updated.first_seq);
        }
        self.subjects.insert(subject.to_string(), updated);
    }
}

impl MessageStore for MemoryStore {
    fn store(&mut self, entry: StreamEntry) -> Result<EntryRef> {
        if entry.seq <= self.last_seq {
            return Err(EngineError::Store(format!(
                "sequence {} does not follow last sequence {}",
                entry.seq, self.last_seq
            )));
        }
        let entry = Arc::new(entry);
        let index = self
            .subjects
            .entry(entry.subject.clone())
            .or_insert(SubjectState {
                messages: 0,
                first_seq: entry.seq,
                last_seq: entry.seq,
            });
        index.messages += 1;
        index.last_seq = entry.seq;

        self.bytes += entry.size();
        self.last_seq = entry.seq;
        self.last_ts = Some(entry.timestamp);
        self.entries.insert(entry.seq, entry.clone());
        Ok(entry)
    }

    fn load(&self, seq: u64) -> Option<EntryRef> {
        self.entries.get(&seq).cloned()
    }

    fn remove(&mut self, seq: u64) -> Option<EntryRef> {
        let entry = self.entries.remove(&seq)?;
        self.bytes = self.bytes.saturating_sub(entry.size());
        self.unindex(&entry.subject, seq);
        Some(entry)
    }

    fn first_seq(&self) -> u64 {
        self.entries
            .keys()
            .next()
            .copied()
            .unwrap_or(self.last_seq + 1)
    }

    fn last_seq(&self) -> u64 {
        self.last_seq
    }

    fn state(&self) -> StoreState {
        let messages = self.entries.len() as u64;
        let first_seq = self.first_seq();
        let num_deleted = if messages == 0 {
            0
        } else {
            (self.last_seq - first_seq + 1) - messages
        };
        StoreState {
            messages,
            bytes: self.bytes,
            first_seq,
            first_ts: self.entries.values().next().map(|e| e.timestamp),
            last_seq: self.last_seq,
            last_ts: self.last_ts,
            num_subjects: self.subjects.len() as u64,
            num_deleted,
        }
    }

    fn range_from(&self, from: u64) -> Box<dyn Iterator<Item = &EntryRef> + '_> {
        Box::new(self.entries.range(from..).map(|(_, e)| e))
    }

    fn subject_state(&self, subject: &str) -> Option<SubjectState> {
        self.subjects.get(subject).copied()
    }

    fn subject_counts(&self, filter: &str) -> BTreeMap<String, u64> {
        self.subjects
            .iter()
            .filter(|(subject, _)| subject_matches(subject, filter))
            .map(|(subject, state)| (subject.clone(), state.messages))
            .collect()
    }

    fn last_per_subject(&self, filter: &str) -> Vec<u64> {
        let mut seqs: Vec<u64> = self
            .subjects
            .iter()
            .filter(|(subject, _)| subject_matches(subject, filter))
            .map(|(_, state)| state.last_seq)
            .collect();
        seqs.sort_unstable();
        seqs
    }
}
