//! Engine: registry of streams and key-value buckets.
//!
//! Publishing through the engine routes a subject to the single stream whose
//! subject filters match it. Stream subjects never overlap, so routing is
//! unambiguous.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{Config, EngineConfig};
use crate::error::{EngineError, Result};
use crate::headers::Headers;
use crate::kv::{self, KeyValue, KvConfig};
use crate::storage::MessageStore;
use crate::stream::{PubAck, PublishOptions, Stream, StreamConfig, StreamInfo};
use crate::subject::{filters_overlap, matches_any};

pub struct Engine {
    config: EngineConfig,
    streams: RwLock<HashMap<String, Stream>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Build an engine and declare the configured streams and buckets.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let engine = Self::new(config.engine.clone());
        for stream in &config.streams {
            engine.create_stream(stream.clone()).await?;
        }
        for bucket in &config.key_value {
            engine.create_key_value(bucket.clone()).await?;
        }
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a stream backed by an in-memory store.
    ///
    /// Creating an existing stream with an identical config returns it.
    pub async fn create_stream(&self, config: StreamConfig) -> Result<Stream> {
        self.add_stream(config, None).await
    }

    /// Create a stream over a caller-provided store.
    pub async fn create_stream_with_store(
        &self,
        config: StreamConfig,
        store: Box<dyn MessageStore>,
    ) -> Result<Stream> {
        self.add_stream(config, Some(store)).await
    }

    async fn add_stream(
        &self,
        config: StreamConfig,
        store: Option<Box<dyn MessageStore>>,
    ) -> Result<Stream> {
        config.validate()?;
        let mut streams = self.streams.write().await;

        if let Some(existing) = streams.get(&config.name) {
            if existing.config().await == config {
                return Ok(existing.clone());
            }
            return Err(EngineError::DuplicateName {
                kind: "stream",
                name: config.name,
            });
        }
        self.check_subjects(&streams, &config).await?;

        let stream = match store {
            Some(store) => Stream::open(
                config.clone(),
                store,
                self.config.max_payload_bytes,
                self.config.sweep_interval,
            ),
            None => Stream::open_in_memory(
                config.clone(),
                self.config.max_payload_bytes,
                self.config.sweep_interval,
            ),
        };
        streams.insert(config.name.clone(), stream.clone());
        info!(
            stream = %config.name,
            subjects = ?config.effective_subjects(),
            retention = ?config.retention,
            "Stream created"
        );
        Ok(stream)
    }

    async fn check_subjects(
        &self,
        streams: &HashMap<String, Stream>,
        config: &StreamConfig,
    ) -> Result<()> {
        let subjects = config.effective_subjects();
        for (name, other) in streams {
            if *name == config.name {
                continue;
            }
            let other_subjects = other.config().await.effective_subjects();
            let overlaps = subjects
                .iter()
                .any(|s| other_subjects.iter().any(|o| filters_overlap(s, o)));
            if overlaps {
                return Err(EngineError::OverlappingStreamSubjects {
                    stream: config.name.clone(),
                    existing: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Replace the config of an existing stream. Retention is fixed; new
    /// limits apply immediately.
    pub async fn update_stream(&self, config: StreamConfig) -> Result<StreamInfo> {
        config.validate()?;
        let streams = self.streams.read().await;
        let stream = streams
            .get(&config.name)
            .ok_or_else(|| EngineError::StreamNotFound(config.name.clone()))?;
        self.check_subjects(&streams, &config).await?;
        stream.update(config).await
    }

    /// Delete a stream with all its entries and consumers.
    pub async fn delete_stream(&self, name: &str) -> Result<()> {
        let stream = self
            .streams
            .write()
            .await
            .remove(name)
            .ok_or_else(|| EngineError::StreamNotFound(name.to_string()))?;
        stream.shared().close().await;
        info!(stream = %name, "Stream deleted");
        Ok(())
    }

    pub async fn stream(&self, name: &str) -> Result<Stream> {
        self.streams
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::StreamNotFound(name.to_string()))
    }

    pub async fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stream whose subjects match `subject`.
    pub async fn stream_for_subject(&self, subject: &str) -> Result<Stream> {
        let streams = self.streams.read().await;
        for stream in streams.values() {
            if matches_any(subject, &stream.config().await.effective_subjects()) {
                return Ok(stream.clone());
            }
        }
        Err(EngineError::NoStreamForSubject(subject.to_string()))
    }

    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<PubAck> {
        self.publish_with(subject, Headers::new(), payload, PublishOptions::default())
            .await
    }

    pub async fn publish_with(
        &self,
        subject: &str,
        headers: Headers,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<PubAck> {
        self.stream_for_subject(subject)
            .await?
            .publish_with(subject, headers, payload, options)
            .await
    }

    /// Create a bucket, or return it when it exists with the same config.
    pub async fn create_key_value(&self, config: KvConfig) -> Result<KeyValue> {
        config.validate()?;
        let stream = self.create_stream(config.stream_config()).await?;
        info!(bucket = %config.bucket, history = config.history, "Bucket ready");
        Ok(KeyValue::new(config.bucket, stream, self.config.watch_buffer))
    }

    pub async fn key_value(&self, bucket: &str) -> Result<KeyValue> {
        match self.stream(&kv::stream_name(bucket)).await {
            Ok(stream) => Ok(KeyValue::new(
                bucket.to_string(),
                stream,
                self.config.watch_buffer,
            )),
            Err(EngineError::StreamNotFound(_)) => {
                Err(EngineError::BucketNotFound(bucket.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete_key_value(&self, bucket: &str) -> Result<()> {
        match self.delete_stream(&kv::stream_name(bucket)).await {
            Err(EngineError::StreamNotFound(_)) => {
                Err(EngineError::BucketNotFound(bucket.to_string()))
            }
            result => result,
        }
    }
}
