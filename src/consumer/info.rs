use chrono::{DateTime, Utc};
use serde::Serialize;

use super::config::ConsumerConfig;

/// A position expressed in both sequence spaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SequenceInfo {
    pub consumer_seq: u64,
    pub stream_seq: u64,
}

/// Point-in-time view of a consumer.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerInfo {
    pub stream_name: String,
    pub name: String,
    pub config: ConsumerConfig,
    pub created: DateTime<Utc>,
    /// Last dispatched position.
    pub delivered: SequenceInfo,
    /// Everything at or below this position is resolved.
    pub ack_floor: SequenceInfo,
    /// Delivered but unresolved entries.
    pub num_ack_pending: usize,
    /// Pending entries delivered more than once.
    pub num_redelivered: usize,
    /// Pull requests currently blocked waiting for entries.
    pub num_waiting: usize,
    /// Matching entries not yet delivered.
    pub num_pending: u64,
    pub push_bound: bool,
}
