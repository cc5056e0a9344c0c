//! Append and purge request options.

/// Conditions and markers attached to a single append.
///
/// `msg_id` and `rollup` may also be carried as headers
/// ([`crate::headers::MSG_ID`], [`crate::headers::ROLLUP`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Deduplication id, honored within the stream's duplicate window.
    pub msg_id: Option<String>,
    /// Append only if the stream's last seq equals this value.
    pub expected_last_seq: Option<u64>,
    /// Append only if the last seq on this subject equals this value (0 = none).
    pub expected_last_subject_seq: Option<u64>,
    /// Replace every prior entry on the subject.
    pub rollup: bool,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn msg_id(mut self, id: impl Into<String>) -> Self {
        self.msg_id = Some(id.into());
        self
    }

    pub fn expected_last_seq(mut self, seq: u64) -> Self {
        self.expected_last_seq = Some(seq);
        self
    }

    pub fn expected_last_subject_seq(mut self, seq: u64) -> Self {
        self.expected_last_subject_seq = Some(seq);
        self
    }

    pub fn rollup(mut self) -> Self {
        self.rollup = true;
        self
    }
}

/// Selects entries to purge. The default purges everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeRequest {
    /// Only entries whose subject matches this filter.
    pub filter: Option<String>,
    /// Only entries with a seq strictly below this one.
    pub up_to_seq: Option<u64>,
    /// Keep the newest `keep` selected entries.
    pub keep: Option<u64>,
}

impl PurgeRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn up_to_seq(mut self, seq: u64) -> Self {
        self.up_to_seq = Some(seq);
        self
    }

    pub fn keep(mut self, keep: u64) -> Self {
        self.keep = Some(keep);
        self
    }
}
