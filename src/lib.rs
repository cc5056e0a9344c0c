//! jetlog - embedded message streams
//!
//! Persistent, subject-indexed logs with configurable retention, durable and
//! ephemeral consumers with at-least-once delivery, and a revisioned
//! key-value layer with change watchers, all in-process.
//!
//! ```text
//! Engine ── Stream ── MessageStore (log + subject index)
//!              │
//!              ├── retention (limits / interest / work queue) + sweeper
//!              ├── Consumer (pull fetch | push consume) ── ack state
//!              └── KeyValue bucket ── Watcher
//! ```

pub mod config;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod headers;
pub mod kv;
pub mod storage;
pub mod stream;
pub mod subject;
pub mod utils;

pub use consumer::{
    AckPolicy, ConsumeContext, Consumer, ConsumerConfig, ConsumerInfo, DeliverPolicy,
    DeliveryMode, Message, MessageHandler,
};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, Result};
pub use headers::Headers;
pub use kv::{KeyValue, KvConfig, KvEntry, Operation, WatchEvent, WatchOptions, Watcher};
pub use stream::{
    DiscardPolicy, PubAck, PublishOptions, PurgeRequest, RetentionPolicy, Stream, StreamConfig,
    StreamInfo,
};
