use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::state::Delivery;
use super::Consumer;
use crate::error::Result;
use crate::headers::Headers;
use crate::storage::EntryRef;

/// Delivery metadata of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub stream: String,
    pub consumer: String,
    pub stream_seq: u64,
    pub consumer_seq: u64,
    /// 1 on first delivery.
    pub num_delivered: u64,
    /// Matching entries still to deliver after this one.
    pub num_pending: u64,
    pub timestamp: DateTime<Utc>,
}

/// A delivered entry with handles to resolve it.
#[derive(Clone)]
pub struct Message {
    pub entry: EntryRef,
    pub info: DeliveryInfo,
    consumer: Consumer,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.entry.subject)
            .field("info", &self.info)
            .finish()
    }
}

impl Message {
    pub(crate) fn new(delivery: Delivery, consumer: Consumer) -> Self {
        let info = DeliveryInfo {
            stream: consumer.stream_name().to_string(),
            consumer: consumer.name().to_string(),
            stream_seq: delivery.entry.seq,
            consumer_seq: delivery.consumer_seq,
            num_delivered: delivery.delivery_count,
            num_pending: delivery.num_pending,
            timestamp: delivery.entry.timestamp,
        };
        Self {
            entry: delivery.entry,
            info,
            consumer,
        }
    }

    pub fn subject(&self) -> &str {
        &self.entry.subject
    }

    pub fn payload(&self) -> &Bytes {
        &self.entry.payload
    }

    pub fn headers(&self) -> &Headers {
        &self.entry.headers
    }

    pub fn seq(&self) -> u64 {
        self.entry.seq
    }

    pub async fn ack(&self) -> Result<()> {
        self.consumer.ack(self.seq()).await
    }

    /// Ack and wait for confirmation. See [`Consumer::ack_sync`].
    pub async fn ack_sync(&self, timeout: Duration) -> Result<()> {
        self.consumer.ack_sync(self.seq(), timeout).await
    }

    pub async fn nak(&self) -> Result<()> {
        self.consumer.nak(self.seq()).await
    }

    pub async fn nak_with_delay(&self, delay: Duration) -> Result<()> {
        self.consumer.nak_with_delay(self.seq(), delay).await
    }

    pub async fn term(&self) -> Result<()> {
        self.consumer.term(self.seq()).await
    }

    pub async fn in_progress(&self) -> Result<()> {
        self.consumer.in_progress(self.seq()).await
    }
}
