//! Log storage.
//!
//! This module contains:
//! - `StreamEntry`: a stored message
//! - `MessageStore` trait: append-only, subject-indexed entry storage
//! - `MemoryStore`: in-process implementation

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::headers::Headers;

pub mod memory;
pub mod message_store;

pub use memory::MemoryStore;
pub use message_store::{MessageStore, StoreState, SubjectState};

/// A message stored in a stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// Stream sequence, assigned on append.
    pub seq: u64,
    pub subject: String,
    pub payload: Bytes,
    pub headers: Headers,
    /// Wall-clock time of the append.
    pub timestamp: DateTime<Utc>,
    /// Monotonic time of the append, used for age limits.
    pub stored_at: Instant,
}

impl StreamEntry {
    pub fn new(seq: u64, subject: impl Into<String>, payload: Bytes, headers: Headers) -> Self {
        Self {
            seq,
            subject: subject.into(),
            payload,
            headers,
            timestamp: Utc::now(),
            stored_at: Instant::now(),
        }
    }

    /// Size accounted against byte limits: subject, headers and payload.
    pub fn size(&self) -> u64 {
        (self.subject.len() + self.headers.byte_len() + self.payload.len()) as u64
    }
}

/// Shared handle to a stored entry.
pub type EntryRef = Arc<StreamEntry>;
