//! Engine error types.
//!
//! Every fallible engine operation returns [`EngineError`]. Callers that only
//! care about the broad failure class use [`EngineError::kind`].

use std::time::Duration;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Broad failure classes shared by all operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Stream, consumer, message or key is absent.
    NotFound,
    /// Stale revision, overlapping filters, duplicate name.
    Conflict,
    /// A wait bound (fetch max wait, ack confirmation) was exceeded.
    Timeout,
    /// Target was removed while the operation was in flight.
    Deleted,
    /// Redelivery budget of an entry is used up.
    Exhausted,
    /// Rejected configuration or argument.
    Invalid,
    /// Stream can no longer accept writes.
    Unavailable,
}

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Consumer not found: stream={stream}, consumer={consumer}")]
    ConsumerNotFound { stream: String, consumer: String },

    #[error("Message not found: stream={stream}, seq={seq}")]
    MessageNotFound { stream: String, seq: u64 },

    #[error("No message found: stream={stream}, subject={subject}")]
    NoMessageForSubject { stream: String, subject: String },

    #[error("Key not found: bucket={bucket}, key={key}")]
    KeyNotFound { bucket: String, key: String },

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("No stream matches subject: {0}")]
    NoStreamForSubject(String),

    #[error("Wrong last sequence for subject {subject}: expected {expected}, actual {actual}")]
    WrongLastSequence {
        subject: String,
        expected: u64,
        actual: u64,
    },

    #[error("Wrong last stream sequence: expected {expected}, actual {actual}")]
    WrongLastStreamSequence { expected: u64, actual: u64 },

    #[error("Revision conflict on key {key}: expected {expected}, current {current}")]
    Conflict {
        key: String,
        expected: u64,
        current: u64,
    },

    #[error("{kind} '{name}' already exists with a different configuration")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Filter subject '{filter}' overlaps consumer '{existing}'")]
    OverlappingFilterSubjects { filter: String, existing: String },

    #[error("Subjects of stream '{stream}' overlap stream '{existing}'")]
    OverlappingStreamSubjects { stream: String, existing: String },

    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    #[error("Ack for seq {seq} not confirmed within {timeout:?}; it may still apply")]
    AckTimeout { seq: u64, timeout: Duration },

    #[error("Consumer deleted: stream={stream}, consumer={consumer}")]
    ConsumerDeleted { stream: String, consumer: String },

    #[error("Stream deleted: {0}")]
    StreamDeleted(String),

    #[error("Max deliveries reached: consumer={consumer}, seq={seq}")]
    Exhausted { consumer: String, seq: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid subject: {0:?}")]
    InvalidSubject(String),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Payload of {size} bytes exceeds maximum of {max}")]
    MaxPayloadExceeded { size: usize, max: usize },

    #[error("Stream '{0}' is full: maximum messages exceeded")]
    MaxMessagesExceeded(String),

    #[error("Stream '{0}' is full: maximum bytes exceeded")]
    MaxBytesExceeded(String),

    #[error("Consumer '{0}' has too many waiting pull requests")]
    MaxWaitingExceeded(String),

    #[error("Batch of {requested} exceeds consumer maximum of {max}")]
    MaxBatchExceeded { requested: usize, max: usize },

    #[error("Max wait {requested:?} exceeds consumer maximum of {max:?}")]
    MaxExpiresExceeded { requested: Duration, max: Duration },

    #[error("Stream '{stream}' is unusable: {reason}")]
    StreamUnusable { stream: String, reason: String },

    #[error("Store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::StreamNotFound(_)
            | EngineError::ConsumerNotFound { .. }
            | EngineError::MessageNotFound { .. }
            | EngineError::NoMessageForSubject { .. }
            | EngineError::KeyNotFound { .. }
            | EngineError::BucketNotFound(_)
            | EngineError::NoStreamForSubject(_) => ErrorKind::NotFound,
            EngineError::WrongLastSequence { .. }
            | EngineError::WrongLastStreamSequence { .. }
            | EngineError::Conflict { .. }
            | EngineError::DuplicateName { .. }
            | EngineError::OverlappingFilterSubjects { .. }
            | EngineError::OverlappingStreamSubjects { .. } => ErrorKind::Conflict,
            EngineError::FetchTimeout(_) | EngineError::AckTimeout { .. } => ErrorKind::Timeout,
            EngineError::ConsumerDeleted { .. } | EngineError::StreamDeleted(_) => {
                ErrorKind::Deleted
            }
            EngineError::Exhausted { .. } => ErrorKind::Exhausted,
            EngineError::InvalidConfig(_)
            | EngineError::InvalidSubject(_)
            | EngineError::InvalidKey(_)
            | EngineError::MaxPayloadExceeded { .. }
            | EngineError::MaxMessagesExceeded(_)
            | EngineError::MaxBytesExceeded(_)
            | EngineError::MaxWaitingExceeded(_)
            | EngineError::MaxBatchExceeded { .. }
            | EngineError::MaxExpiresExceeded { .. } => ErrorKind::Invalid,
            EngineError::StreamUnusable { .. } | EngineError::Store(_) => ErrorKind::Unavailable,
        }
    }

    /// True for the ambiguous ack confirmation timeout.
    pub fn is_ack_timeout(&self) -> bool {
        matches!(self, EngineError::AckTimeout { .. })
    }
}
