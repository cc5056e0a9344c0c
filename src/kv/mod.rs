//! Revisioned key-value buckets on top of streams.
//!
//! A bucket `B` is the stream `KV_B` bound to subjects `$KV.B.>`. Each key is
//! one subject and each revision is the stream seq of its entry. Deletes and
//! purges append tombstones marked with the `KV-Operation` header; a purge
//! also rolls up every older revision of the key.
//!
//! Conditional writes (`create`, `update`) are single conditional appends on
//! the last subject sequence, so concurrent writers of one key serialize at
//! the stream.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::headers::{self, Headers};
use crate::storage::StreamEntry;
use crate::stream::{DiscardPolicy, PublishOptions, Stream, StreamConfig};
use crate::subject::validate_filter;

pub mod watch;

pub use watch::{WatchEvent, WatchOptions, Watcher};

/// Prefix of the backing stream name.
pub const KV_STREAM_PREFIX: &str = "KV_";
/// First token of every bucket subject.
pub const KV_SUBJECT_PREFIX: &str = "$KV";
/// Largest supported history depth.
pub const MAX_HISTORY: u64 = 64;

const OP_DELETE: &str = "DEL";
const OP_PURGE: &str = "PURGE";

/// Bucket configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub bucket: String,
    pub description: Option<String>,
    /// Revisions kept per key, 1 to 64.
    pub history: u64,
    pub max_bytes: Option<u64>,
    /// Age after which revisions expire.
    #[serde(with = "crate::utils::duration::opt_millis")]
    pub ttl: Option<Duration>,
    pub max_value_size: Option<usize>,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            description: None,
            history: 1,
            max_bytes: None,
            ttl: None,
            max_value_size: None,
        }
    }
}

impl KvConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: u64) -> Self {
        self.history = history;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_bucket(&self.bucket)?;
        if !(1..=MAX_HISTORY).contains(&self.history) {
            return Err(EngineError::InvalidConfig(format!(
                "history must be between 1 and {MAX_HISTORY}"
            )));
        }
        Ok(())
    }

    /// Config of the backing stream.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            name: stream_name(&self.bucket),
            description: self.description.clone(),
            subjects: vec![format!("{KV_SUBJECT_PREFIX}.{}.>", self.bucket)],
            discard: DiscardPolicy::New,
            max_bytes: self.max_bytes,
            max_age: self.ttl,
            max_msgs_per_subject: Some(self.history),
            max_msg_size: self.max_value_size,
            ..Default::default()
        }
    }
}

/// Name of the stream backing `bucket`.
pub fn stream_name(bucket: &str) -> String {
    format!("{KV_STREAM_PREFIX}{bucket}")
}

fn validate_bucket(bucket: &str) -> Result<()> {
    if bucket.is_empty()
        || !bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(EngineError::InvalidConfig(format!(
            "invalid bucket name: {bucket:?}"
        )));
    }
    Ok(())
}

/// Keys are dot-separated tokens of `[A-Za-z0-9_=/.-]`, without leading or
/// trailing dots.
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && !key.ends_with('.')
        && !key.contains("..")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '/' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidKey(key.to_string()))
    }
}

/// Kind of revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Put,
    Delete,
    Purge,
}

impl Operation {
    fn of(headers: &Headers) -> Self {
        match headers.get(headers::KV_OPERATION) {
            Some(OP_DELETE) => Operation::Delete,
            Some(OP_PURGE) => Operation::Purge,
            _ => Operation::Put,
        }
    }
}

/// One revision of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KvEntry {
    pub bucket: String,
    pub key: String,
    pub value: Bytes,
    pub revision: u64,
    pub created: DateTime<Utc>,
    /// Entries still to come when delivered by a watcher; 0 otherwise.
    pub delta: u64,
    pub operation: Operation,
}

impl KvEntry {
    pub(crate) fn from_entry(bucket: &str, entry: &StreamEntry, delta: u64) -> Self {
        let prefix_len = KV_SUBJECT_PREFIX.len() + bucket.len() + 2;
        Self {
            bucket: bucket.to_string(),
            key: entry.subject.get(prefix_len..).unwrap_or_default().to_string(),
            value: entry.payload.clone(),
            revision: entry.seq,
            created: entry.timestamp,
            delta,
            operation: Operation::of(&entry.headers),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.operation != Operation::Put
    }
}

/// Bucket counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KvStatus {
    pub bucket: String,
    /// Revisions stored, tombstones included.
    pub values: u64,
    pub bytes: u64,
    pub history: u64,
    pub ttl: Option<Duration>,
}

/// Handle to a bucket.
#[derive(Debug, Clone)]
pub struct KeyValue {
    bucket: String,
    stream: Stream,
    watch_buffer: usize,
}

impl KeyValue {
    pub(crate) fn new(bucket: String, stream: Stream, watch_buffer: usize) -> Self {
        Self {
            bucket,
            stream,
            watch_buffer,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Backing stream.
    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    fn subject(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(format!("{KV_SUBJECT_PREFIX}.{}.{key}", self.bucket))
    }

    fn key_not_found(&self, key: &str) -> EngineError {
        EngineError::KeyNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }

    async fn append(
        &self,
        key: &str,
        headers: Headers,
        value: Bytes,
        options: PublishOptions,
    ) -> Result<u64> {
        let subject = self.subject(key)?;
        let ack = self
            .stream
            .publish_with(&subject, headers, value, options)
            .await
            .map_err(|e| match e {
                EngineError::WrongLastSequence {
                    expected, actual, ..
                } => EngineError::Conflict {
                    key: key.to_string(),
                    expected,
                    current: actual,
                },
                other => other,
            })?;
        Ok(ack.seq)
    }

    /// Write a new revision. Returns the revision.
    pub async fn put(&self, key: &str, value: impl Into<Bytes>) -> Result<u64> {
        self.append(key, Headers::new(), value.into(), PublishOptions::default())
            .await
    }

    /// Write only if the key has no live value.
    pub async fn create(&self, key: &str, value: impl Into<Bytes>) -> Result<u64> {
        let value = value.into();
        match self.update(key, value.clone(), 0).await {
            Err(EngineError::Conflict { current, .. }) => match self.entry(key).await? {
                Some(entry) if entry.is_tombstone() && entry.revision == current => {
                    self.update(key, value, current).await
                }
                _ => Err(EngineError::Conflict {
                    key: key.to_string(),
                    expected: 0,
                    current,
                }),
            },
            result => result,
        }
    }

    /// Write only if the latest revision of the key is `revision`
    /// (0 = the key was never written). Fails with [`EngineError::Conflict`].
    pub async fn update(&self, key: &str, value: impl Into<Bytes>, revision: u64) -> Result<u64> {
        self.append(
            key,
            Headers::new(),
            value.into(),
            PublishOptions::new().expected_last_subject_seq(revision),
        )
        .await
    }

    /// Latest revision of the key, tombstones included.
    pub async fn entry(&self, key: &str) -> Result<Option<KvEntry>> {
        let subject = self.subject(key)?;
        match self.stream.get_last_msg_for_subject(&subject).await {
            Ok(entry) => Ok(Some(KvEntry::from_entry(&self.bucket, &entry, 0))),
            Err(EngineError::NoMessageForSubject { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Live value of the key.
    pub async fn get(&self, key: &str) -> Result<KvEntry> {
        match self.entry(key).await? {
            Some(entry) if !entry.is_tombstone() => Ok(entry),
            _ => Err(self.key_not_found(key)),
        }
    }

    /// A specific revision of the key.
    pub async fn get_revision(&self, key: &str, revision: u64) -> Result<KvEntry> {
        let subject = self.subject(key)?;
        match self.stream.get_msg(revision).await {
            Ok(entry) if entry.subject == subject => {
                let entry = KvEntry::from_entry(&self.bucket, &entry, 0);
                if entry.is_tombstone() {
                    Err(self.key_not_found(key))
                } else {
                    Ok(entry)
                }
            }
            Ok(_) | Err(EngineError::MessageNotFound { .. }) => Err(self.key_not_found(key)),
            Err(e) => Err(e),
        }
    }

    /// Append a delete tombstone. History is kept.
    pub async fn delete(&self, key: &str) -> Result<u64> {
        self.tombstone(key, OP_DELETE, PublishOptions::default()).await
    }

    /// Delete only if the latest revision is `revision`.
    pub async fn delete_expect_revision(&self, key: &str, revision: u64) -> Result<u64> {
        self.tombstone(
            key,
            OP_DELETE,
            PublishOptions::new().expected_last_subject_seq(revision),
        )
        .await
    }

    /// Append a purge tombstone and drop every older revision.
    pub async fn purge(&self, key: &str) -> Result<u64> {
        self.tombstone(key, OP_PURGE, PublishOptions::new().rollup())
            .await
    }

    async fn tombstone(&self, key: &str, operation: &str, options: PublishOptions) -> Result<u64> {
        let mut headers = Headers::new();
        headers.insert(headers::KV_OPERATION, operation);
        self.append(key, headers, Bytes::new(), options).await
    }

    /// Keys with a live value, in revision order.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let filter = format!("{KV_SUBJECT_PREFIX}.{}.>", self.bucket);
        Ok(self
            .stream
            .last_messages(&filter)
            .await?
            .iter()
            .map(|entry| KvEntry::from_entry(&self.bucket, entry, 0))
            .filter(|entry| !entry.is_tombstone())
            .map(|entry| entry.key)
            .collect())
    }

    /// Every retained revision of the key, oldest first.
    pub async fn history(&self, key: &str) -> Result<Vec<KvEntry>> {
        let subject = self.subject(key)?;
        let entries = self.stream.messages_for_subject(&subject).await?;
        if entries.is_empty() {
            return Err(self.key_not_found(key));
        }
        Ok(entries
            .iter()
            .map(|entry| KvEntry::from_entry(&self.bucket, entry, 0))
            .collect())
    }

    pub async fn status(&self) -> Result<KvStatus> {
        let info = self.stream.info().await?;
        Ok(KvStatus {
            bucket: self.bucket.clone(),
            values: info.state.msg_count,
            bytes: info.state.byte_count,
            history: info.config.max_msgs_per_subject.unwrap_or(1),
            ttl: info.config.max_age,
        })
    }

    /// Watch keys matching `pattern` (`*` and `>` wildcards allowed).
    pub async fn watch(&self, pattern: &str) -> Result<Watcher> {
        self.watch_with(pattern, WatchOptions::default()).await
    }

    pub async fn watch_all(&self) -> Result<Watcher> {
        self.watch(">").await
    }

    pub async fn watch_with(&self, pattern: &str, options: WatchOptions) -> Result<Watcher> {
        validate_filter(pattern).map_err(|_| EngineError::InvalidKey(pattern.to_string()))?;
        let filter = format!("{KV_SUBJECT_PREFIX}.{}.{pattern}", self.bucket);
        watch::start(self, filter, options).await
    }
}

#[cfg(test)]
mod tests;
