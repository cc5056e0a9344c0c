//! Lock-protected state of a single stream.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, error};

use super::config::{DiscardPolicy, StreamConfig};
use super::info::{PubAck, StreamInfo, StreamState};
use super::request::PublishOptions;
use super::retention;
use crate::consumer::state::ConsumerState;
use crate::error::{EngineError, Result};
use crate::headers::{self, Headers};
use crate::storage::{EntryRef, MessageStore, StreamEntry};
use crate::subject::{matches_any, validate_subject};

pub(crate) struct StreamCore {
    pub config: StreamConfig,
    pub created: DateTime<Utc>,
    pub store: Box<dyn MessageStore>,
    pub consumers: BTreeMap<String, ConsumerState>,
    /// Engine-wide payload ceiling.
    max_payload: usize,
    dedupe: HashMap<String, (u64, Instant)>,
    failure: Option<String>,
}

impl StreamCore {
    pub fn new(config: StreamConfig, store: Box<dyn MessageStore>, max_payload: usize) -> Self {
        Self {
            config,
            created: Utc::now(),
            store,
            consumers: BTreeMap::new(),
            max_payload,
            dedupe: HashMap::new(),
            failure: None,
        }
    }

    /// Fails once an append could not be persisted.
    pub fn ensure_usable(&self) -> Result<()> {
        match &self.failure {
            Some(reason) => Err(EngineError::StreamUnusable {
                stream: self.config.name.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Remove an entry and forget it in every consumer.
    pub fn remove_entry(&mut self, seq: u64) -> bool {
        if self.store.remove(seq).is_none() {
            return false;
        }
        for consumer in self.consumers.values_mut() {
            consumer.on_removed(seq);
        }
        true
    }

    fn check_size(&self, size: usize) -> Result<()> {
        let max = match self.config.max_msg_size {
            Some(limit) => limit.min(self.max_payload),
            None => self.max_payload,
        };
        if size > max {
            return Err(EngineError::MaxPayloadExceeded { size, max });
        }
        Ok(())
    }

    fn check_discard_new(&self, size: u64) -> Result<()> {
        if self.config.discard != DiscardPolicy::New {
            return Ok(());
        }
        let state = self.store.state();
        if matches!(self.config.max_msgs, Some(max) if state.messages >= max) {
            return Err(EngineError::MaxMessagesExceeded(self.config.name.clone()));
        }
        if matches!(self.config.max_bytes, Some(max) if state.bytes + size > max) {
            return Err(EngineError::MaxBytesExceeded(self.config.name.clone()));
        }
        Ok(())
    }

    fn duplicate_of(&self, msg_id: &str, now: Instant) -> Option<u64> {
        self.dedupe
            .get(msg_id)
            .filter(|(_, seen)| now.saturating_duration_since(*seen) < self.config.duplicate_window)
            .map(|(seq, _)| *seq)
    }

    /// Drop message ids older than the duplicate window.
    pub fn prune_dedupe(&mut self, now: Instant) {
        let window = self.config.duplicate_window;
        self.dedupe
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) < window);
    }

    /// Conditional append. Every check and the write happen under one lock
    /// acquisition, so concurrent writers see a strict order.
    pub fn append(
        &mut self,
        subject: &str,
        mut headers: Headers,
        payload: Bytes,
        options: &PublishOptions,
        now: Instant,
    ) -> Result<(PubAck, Option<EntryRef>)> {
        self.ensure_usable()?;
        validate_subject(subject)?;
        if !matches_any(subject, &self.config.effective_subjects()) {
            return Err(EngineError::NoStreamForSubject(subject.to_string()));
        }

        if let Some(id) = &options.msg_id {
            headers.insert(headers::MSG_ID, id.clone());
        }
        if options.rollup {
            headers.insert(headers::ROLLUP, headers::ROLLUP_SUBJECT);
        }
        let msg_id = headers.get(headers::MSG_ID).map(str::to_string);
        let rollup = headers.get(headers::ROLLUP) == Some(headers::ROLLUP_SUBJECT);

        self.check_size(headers.byte_len() + payload.len())?;

        if let Some(seq) = msg_id.as_deref().and_then(|id| self.duplicate_of(id, now)) {
            debug!(stream = %self.config.name, seq, "Duplicate message id, append skipped");
            return Ok((
                PubAck {
                    stream: self.config.name.clone(),
                    seq,
                    duplicate: true,
                },
                None,
            ));
        }

        if let Some(expected) = options.expected_last_seq {
            let actual = self.store.last_seq();
            if actual != expected {
                return Err(EngineError::WrongLastStreamSequence { expected, actual });
            }
        }
        if let Some(expected) = options.expected_last_subject_seq {
            let actual = self
                .store
                .subject_state(subject)
                .map(|s| s.last_seq)
                .unwrap_or(0);
            if actual != expected {
                return Err(EngineError::WrongLastSequence {
                    subject: subject.to_string(),
                    expected,
                    actual,
                });
            }
        }

        let seq = self.store.last_seq() + 1;
        let entry = StreamEntry::new(seq, subject, payload, headers);
        self.check_discard_new(entry.size())?;

        let entry = match self.store.store(entry) {
            Ok(entry) => entry,
            Err(e) => {
                error!(stream = %self.config.name, seq, error = %e, "Append failed, stream marked unusable");
                self.failure = Some(e.to_string());
                return Err(EngineError::StreamUnusable {
                    stream: self.config.name.clone(),
                    reason: e.to_string(),
                });
            }
        };

        if rollup {
            retention::rollup(self, subject, seq);
        }
        retention::on_append(self, &entry, now);

        if let Some(id) = msg_id {
            self.dedupe.insert(id, (seq, now));
        }

        Ok((
            PubAck {
                stream: self.config.name.clone(),
                seq,
                duplicate: false,
            },
            Some(entry),
        ))
    }

    /// Every retained entry on `subject`, oldest first.
    pub fn subject_entries(&self, subject: &str) -> Vec<EntryRef> {
        match self.store.subject_state(subject) {
            Some(state) => self
                .store
                .range_from(state.first_seq)
                .take_while(|e| e.seq <= state.last_seq)
                .filter(|e| e.subject == subject)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Newest entry of every subject matching `filter`, in seq order.
    pub fn last_entries(&self, filter: &str) -> Vec<EntryRef> {
        self.store
            .last_per_subject(filter)
            .into_iter()
            .filter_map(|seq| self.store.load(seq))
            .collect()
    }

    pub fn info(&self, subjects_filter: Option<&str>) -> StreamInfo {
        let state = self.store.state();
        StreamInfo {
            config: self.config.clone(),
            created: self.created,
            state: StreamState {
                msg_count: state.messages,
                byte_count: state.bytes,
                first_seq: state.first_seq,
                first_ts: state.first_ts,
                last_seq: state.last_seq,
                last_ts: state.last_ts,
                num_subjects: state.num_subjects,
                num_deleted: state.num_deleted,
                consumer_count: self.consumers.len(),
                subjects: subjects_filter.map(|filter| self.store.subject_counts(filter)),
            },
        }
    }
}
