//! Stream configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::subject::validate_filter;

/// Default duplicate detection window for `Nats-Msg-Id`.
pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// Rule governing when entries may be removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Entries are removed only by limits.
    #[default]
    Limits,
    /// Entries are removed once every interested consumer resolved them.
    Interest,
    /// Entries are removed on the first ack from their owning consumer.
    WorkQueue,
}

/// What to do when a limit would be exceeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    /// Evict the oldest entries.
    #[default]
    Old,
    /// Reject the new entry.
    New,
}

/// Stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    pub description: Option<String>,
    /// Subject filters bound to this stream. Empty means `[name]`.
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    pub discard: DiscardPolicy,
    pub max_msgs: Option<u64>,
    pub max_bytes: Option<u64>,
    #[serde(with = "crate::utils::duration::opt_millis")]
    pub max_age: Option<Duration>,
    pub max_msgs_per_subject: Option<u64>,
    pub max_msg_size: Option<usize>,
    #[serde(with = "crate::utils::duration::millis")]
    pub duplicate_window: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            subjects: Vec::new(),
            retention: RetentionPolicy::Limits,
            discard: DiscardPolicy::Old,
            max_msgs: None,
            max_bytes: None,
            max_age: None,
            max_msgs_per_subject: None,
            max_msg_size: None,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }
}

impl StreamConfig {
    /// Create a config for `name` bound to `subjects`.
    pub fn new<S: Into<String>>(name: impl Into<String>, subjects: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_discard(mut self, discard: DiscardPolicy) -> Self {
        self.discard = discard;
        self
    }

    pub fn with_max_msgs(mut self, max: u64) -> Self {
        self.max_msgs = Some(max);
        self
    }

    pub fn with_max_bytes(mut self, max: u64) -> Self {
        self.max_bytes = Some(max);
        self
    }

    pub fn with_max_age(mut self, max: Duration) -> Self {
        self.max_age = Some(max);
        self
    }

    pub fn with_max_msgs_per_subject(mut self, max: u64) -> Self {
        self.max_msgs_per_subject = Some(max);
        self
    }

    /// Subjects this stream captures, defaulting to its name.
    pub fn effective_subjects(&self) -> Vec<String> {
        if self.subjects.is_empty() {
            vec![self.name.clone()]
        } else {
            self.subjects.clone()
        }
    }

    /// Validate names, subjects and limits.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        for subject in self.effective_subjects() {
            validate_filter(&subject)?;
        }
        if self.max_msgs == Some(0) || self.max_bytes == Some(0) {
            return Err(EngineError::InvalidConfig(
                "max_msgs and max_bytes must be positive when set".to_string(),
            ));
        }
        if self.max_msgs_per_subject == Some(0) {
            return Err(EngineError::InvalidConfig(
                "max_msgs_per_subject must be positive when set".to_string(),
            ));
        }
        if self.max_age == Some(Duration::ZERO) {
            return Err(EngineError::InvalidConfig(
                "max_age must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate a stream or consumer name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>' | '/' | '\\'))
    {
        return Err(EngineError::InvalidConfig(format!("invalid name: {name:?}")));
    }
    Ok(())
}
