//! Consumer configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::stream::config::validate_name;
use crate::subject::validate_filter;

/// Default time a delivered entry may stay unacknowledged.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);
/// Default bound on delivered-but-unresolved entries.
pub const DEFAULT_MAX_ACK_PENDING: usize = 1000;
/// Default bound on concurrently waiting pull requests.
pub const DEFAULT_MAX_WAITING: usize = 512;
/// Default idle time after which an ephemeral consumer is removed.
pub const DEFAULT_INACTIVE_THRESHOLD: Duration = Duration::from_secs(5);

/// How deliveries must be acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// Deliveries are resolved on dispatch.
    None,
    /// Every delivery is acknowledged individually.
    #[default]
    Explicit,
    /// Acknowledging a seq resolves every pending seq at or below it.
    All,
}

/// Where a new consumer starts in the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    /// From the first retained entry.
    #[default]
    All,
    /// From the last matching entry.
    Last,
    /// Only entries appended after creation.
    New,
    /// From the given stream sequence.
    ByStartSequence(u64),
    /// The last entry of every matching subject, then new entries.
    LastPerSubject,
}

/// Consumer-initiated or engine-initiated delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Pull,
    Push { deliver_subject: String },
}

/// Consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Durable name. `None` creates an ephemeral consumer with a generated name.
    pub durable_name: Option<String>,
    pub description: Option<String>,
    pub filter_subject: Option<String>,
    pub ack_policy: AckPolicy,
    pub deliver_policy: DeliverPolicy,
    pub delivery: DeliveryMode,
    #[serde(with = "crate::utils::duration::millis")]
    pub ack_wait: Duration,
    /// Maximum deliveries per entry. `None` is unlimited.
    pub max_deliver: Option<u64>,
    pub max_ack_pending: usize,
    pub max_waiting: usize,
    /// Largest batch a single fetch may request.
    pub max_batch: Option<usize>,
    /// Longest max wait a single fetch may request.
    #[serde(with = "crate::utils::duration::opt_millis")]
    pub max_expires: Option<Duration>,
    #[serde(with = "crate::utils::duration::millis")]
    pub inactive_threshold: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            durable_name: None,
            description: None,
            filter_subject: None,
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::All,
            delivery: DeliveryMode::Pull,
            ack_wait: DEFAULT_ACK_WAIT,
            max_deliver: None,
            max_ack_pending: DEFAULT_MAX_ACK_PENDING,
            max_waiting: DEFAULT_MAX_WAITING,
            max_batch: None,
            max_expires: None,
            inactive_threshold: DEFAULT_INACTIVE_THRESHOLD,
        }
    }
}

impl ConsumerConfig {
    /// Config for a durable consumer.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            durable_name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Config for an ephemeral consumer.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_subject = Some(filter.into());
        self
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    pub fn with_deliver_policy(mut self, policy: DeliverPolicy) -> Self {
        self.deliver_policy = policy;
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_deliver(mut self, max: u64) -> Self {
        self.max_deliver = Some(max);
        self
    }

    pub fn with_max_ack_pending(mut self, max: usize) -> Self {
        self.max_ack_pending = max;
        self
    }

    pub fn with_inactive_threshold(mut self, threshold: Duration) -> Self {
        self.inactive_threshold = threshold;
        self
    }

    /// Switch to push delivery towards `deliver_subject`.
    pub fn push(mut self, deliver_subject: impl Into<String>) -> Self {
        self.delivery = DeliveryMode::Push {
            deliver_subject: deliver_subject.into(),
        };
        self
    }

    pub fn is_durable(&self) -> bool {
        self.durable_name.is_some()
    }

    pub fn is_pull(&self) -> bool {
        matches!(self.delivery, DeliveryMode::Pull)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.durable_name {
            validate_name(name)?;
        }
        if let Some(filter) = &self.filter_subject {
            validate_filter(filter)?;
        }
        if let DeliveryMode::Push { deliver_subject } = &self.delivery {
            validate_filter(deliver_subject)?;
        }
        if self.ack_wait.is_zero() {
            return Err(EngineError::InvalidConfig("ack_wait must be positive".into()));
        }
        if self.max_deliver == Some(0) {
            return Err(EngineError::InvalidConfig(
                "max_deliver must be positive when set".into(),
            ));
        }
        if self.max_ack_pending == 0 {
            return Err(EngineError::InvalidConfig(
                "max_ack_pending must be positive".into(),
            ));
        }
        if self.max_waiting == 0 || self.max_batch == Some(0) {
            return Err(EngineError::InvalidConfig(
                "max_waiting and max_batch must be positive".into(),
            ));
        }
        if let DeliverPolicy::ByStartSequence(0) = self.deliver_policy {
            return Err(EngineError::InvalidConfig("start sequence must be positive".into()));
        }
        Ok(())
    }

    /// Reject changes to fields that are fixed at creation.
    pub fn check_update(&self, update: &ConsumerConfig) -> Result<()> {
        let immutable = [
            ("durable_name", self.durable_name != update.durable_name),
            ("filter_subject", self.filter_subject != update.filter_subject),
            ("ack_policy", self.ack_policy != update.ack_policy),
            ("deliver_policy", self.deliver_policy != update.deliver_policy),
            ("delivery", self.delivery != update.delivery),
            ("max_waiting", self.max_waiting != update.max_waiting),
        ];
        match immutable.iter().find(|(_, changed)| *changed) {
            Some((field, _)) => Err(EngineError::InvalidConfig(format!(
                "consumer field '{field}' can not be updated"
            ))),
            None => Ok(()),
        }
    }
}
