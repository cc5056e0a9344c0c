use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::config::StreamConfig;

/// Outcome of a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PubAck {
    pub stream: String,
    pub seq: u64,
    /// The message id was seen inside the duplicate window; nothing was stored.
    pub duplicate: bool,
}

/// Point-in-time counters of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamState {
    pub msg_count: u64,
    pub byte_count: u64,
    pub first_seq: u64,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_seq: u64,
    pub last_ts: Option<DateTime<Utc>>,
    pub num_subjects: u64,
    pub num_deleted: u64,
    pub consumer_count: usize,
    /// Per-subject counts, only when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjects: Option<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub config: StreamConfig,
    pub created: DateTime<Utc>,
    pub state: StreamState,
}
