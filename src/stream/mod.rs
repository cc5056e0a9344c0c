//! Streams: ordered, subject-indexed logs with retention and consumers.
//!
//! A [`Stream`] is a cheap handle to shared state. All mutations of one
//! stream go through a single write lock, which serializes appends and gives
//! every entry a strictly increasing sequence number. Readers take the read
//! lock and see a consistent snapshot.
//!
//! Every mutation bumps a generation counter on a `watch` channel; blocked
//! fetches and push loops wait on it instead of polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::consumer::config::{AckPolicy, ConsumerConfig, DeliverPolicy};
use crate::consumer::info::ConsumerInfo;
use crate::consumer::state::{AckKind, ConsumerState, Delivery};
use crate::consumer::Consumer;
use crate::error::{EngineError, Result};
use crate::headers::Headers;
use crate::storage::{EntryRef, MemoryStore, MessageStore};
use crate::subject::{filters_overlap, validate_filter, FULL_WILDCARD};

pub mod config;
pub(crate) mod core;
pub mod info;
pub mod request;
pub(crate) mod retention;
pub(crate) mod sweeper;

pub use config::{DiscardPolicy, RetentionPolicy, StreamConfig};
pub use info::{PubAck, StreamInfo, StreamState};
pub use request::{PublishOptions, PurgeRequest};

use self::core::StreamCore;

/// State shared by every handle of one stream.
pub(crate) struct StreamShared {
    pub(crate) name: String,
    pub(crate) core: RwLock<StreamCore>,
    changes: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl StreamShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::StreamDeleted(self.name.clone()));
        }
        Ok(())
    }

    /// Wake everything waiting for this stream to change.
    pub(crate) fn notify(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn consumer_missing(&self, consumer: &str) -> EngineError {
        EngineError::ConsumerNotFound {
            stream: self.name.clone(),
            consumer: consumer.to_string(),
        }
    }

    pub(crate) async fn sweep(&self) {
        let report = {
            let mut core = self.core.write().await;
            sweeper::sweep(&mut core, Instant::now())
        };
        if report.changed() {
            debug!(
                stream = %self.name,
                removed = report.removed,
                exhausted = report.exhausted,
                consumers_removed = report.consumers_removed,
                "Sweep applied"
            );
            self.notify();
        }
    }

    /// Stop the sweeper and detach every consumer.
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.core.write().await.consumers.clear();
        self.shutdown.send_replace(true);
        self.notify();
    }

    /// Select up to `batch` entries for `consumer`.
    pub(crate) async fn deliver(&self, consumer: &str, batch: usize) -> Result<Vec<Delivery>> {
        self.check_open()?;
        let now = Instant::now();
        let mut guard = self.core.write().await;
        self.check_open()?;
        let core = &mut *guard;
        let state = core
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| self.consumer_missing(consumer))?;
        let selection = state.select(core.store.as_ref(), now, batch);

        let changed = !selection.exhausted.is_empty() || !selection.resolved.is_empty();
        if !selection.exhausted.is_empty() {
            sweeper::retire_exhausted(core, consumer, &selection.exhausted);
        }
        if !selection.resolved.is_empty() {
            retention::release(core, &selection.resolved);
        }
        drop(guard);

        if changed {
            self.notify();
        }
        Ok(selection.deliveries)
    }

    /// Apply an ack outcome for `seq`.
    pub(crate) async fn resolve(&self, consumer: &str, seq: u64, kind: AckKind) -> Result<()> {
        self.check_open()?;
        let now = Instant::now();
        let mut guard = self.core.write().await;
        let core = &mut *guard;
        let state = core
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| self.consumer_missing(consumer))?;
        let resolved = state.apply(seq, kind, now);
        if !resolved.is_empty() {
            retention::release(core, &resolved);
        }
        drop(guard);

        self.notify();
        Ok(())
    }

    /// Earliest pending deadline of `consumer`.
    pub(crate) async fn next_deadline(&self, consumer: &str) -> Result<Option<Instant>> {
        self.check_open()?;
        let core = self.core.read().await;
        core.consumers
            .get(consumer)
            .map(|c| c.next_deadline())
            .ok_or_else(|| self.consumer_missing(consumer))
    }

    /// Run `f` against a consumer's state under the write lock.
    pub(crate) async fn with_consumer<R>(
        &self,
        consumer: &str,
        f: impl FnOnce(&mut ConsumerState, &dyn MessageStore) -> R,
    ) -> Result<R> {
        self.check_open()?;
        let mut guard = self.core.write().await;
        let core = &mut *guard;
        let state = core
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| self.consumer_missing(consumer))?;
        Ok(f(state, core.store.as_ref()))
    }
}

fn ephemeral_name() -> String {
    let mut name = Uuid::new_v4().simple().to_string();
    name.truncate(10);
    name
}

/// Handle to a stream.
#[derive(Clone)]
pub struct Stream {
    shared: Arc<StreamShared>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("name", &self.shared.name).finish()
    }
}

impl Stream {
    /// Open a stream over `store` and start its sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn open(
        config: StreamConfig,
        store: Box<dyn MessageStore>,
        max_payload: usize,
        sweep_interval: Duration,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(StreamShared {
            name: config.name.clone(),
            core: RwLock::new(StreamCore::new(config, store, max_payload)),
            changes,
            shutdown,
            closed: AtomicBool::new(false),
        });
        sweeper::spawn(Arc::downgrade(&shared), shutdown_rx, sweep_interval);
        Self { shared }
    }

    /// Open a stream backed by a fresh [`MemoryStore`].
    pub(crate) fn open_in_memory(
        config: StreamConfig,
        max_payload: usize,
        sweep_interval: Duration,
    ) -> Self {
        Self::open(config, Box::new(MemoryStore::new()), max_payload, sweep_interval)
    }

    pub(crate) fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_deleted(&self) -> bool {
        self.shared.is_closed()
    }

    pub async fn config(&self) -> StreamConfig {
        self.shared.core.read().await.config.clone()
    }

    pub async fn info(&self) -> Result<StreamInfo> {
        self.shared.check_open()?;
        Ok(self.shared.core.read().await.info(None))
    }

    /// Info including per-subject counts for subjects matching `filter`.
    pub async fn info_with_subjects(&self, filter: &str) -> Result<StreamInfo> {
        validate_filter(filter)?;
        self.shared.check_open()?;
        Ok(self.shared.core.read().await.info(Some(filter)))
    }

    pub(crate) async fn update(&self, config: StreamConfig) -> Result<StreamInfo> {
        config.validate()?;
        self.shared.check_open()?;
        let info = {
            let mut core = self.shared.core.write().await;
            if config.name != core.config.name {
                return Err(EngineError::InvalidConfig(
                    "stream name can not be changed".into(),
                ));
            }
            if config.retention != core.config.retention {
                return Err(EngineError::InvalidConfig(
                    "stream retention can not be changed".into(),
                ));
            }
            core.config = config;
            let removed = retention::enforce_all(&mut core, Instant::now());
            info!(stream = %self.shared.name, removed, "Stream updated");
            core.info(None)
        };
        self.shared.notify();
        Ok(info)
    }

    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<PubAck> {
        self.publish_with(subject, Headers::new(), payload, PublishOptions::default())
            .await
    }

    /// Append with headers and conditions.
    #[tracing::instrument(name = "stream.publish", skip_all, fields(stream = %self.shared.name, %subject))]
    pub async fn publish_with(
        &self,
        subject: &str,
        headers: Headers,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<PubAck> {
        self.shared.check_open()?;
        let (ack, stored) = {
            let mut core = self.shared.core.write().await;
            core.append(subject, headers, payload.into(), &options, Instant::now())?
        };
        if stored.is_some() {
            debug!(seq = ack.seq, "Appended");
            self.shared.notify();
        }
        Ok(ack)
    }

    pub async fn get_msg(&self, seq: u64) -> Result<EntryRef> {
        self.shared.check_open()?;
        self.shared
            .core
            .read()
            .await
            .store
            .load(seq)
            .ok_or_else(|| EngineError::MessageNotFound {
                stream: self.shared.name.clone(),
                seq,
            })
    }

    pub async fn get_last_msg_for_subject(&self, subject: &str) -> Result<EntryRef> {
        self.shared.check_open()?;
        let core = self.shared.core.read().await;
        core.store
            .subject_state(subject)
            .and_then(|state| core.store.load(state.last_seq))
            .ok_or_else(|| EngineError::NoMessageForSubject {
                stream: self.shared.name.clone(),
                subject: subject.to_string(),
            })
    }

    /// Every retained entry on a literal subject, oldest first.
    pub async fn messages_for_subject(&self, subject: &str) -> Result<Vec<EntryRef>> {
        self.shared.check_open()?;
        Ok(self.shared.core.read().await.subject_entries(subject))
    }

    /// Newest entry of every subject matching `filter`.
    pub async fn last_messages(&self, filter: &str) -> Result<Vec<EntryRef>> {
        validate_filter(filter)?;
        self.shared.check_open()?;
        Ok(self.shared.core.read().await.last_entries(filter))
    }

    pub async fn delete_msg(&self, seq: u64) -> Result<()> {
        self.shared.check_open()?;
        let removed = self.shared.core.write().await.remove_entry(seq);
        if !removed {
            return Err(EngineError::MessageNotFound {
                stream: self.shared.name.clone(),
                seq,
            });
        }
        self.shared.notify();
        Ok(())
    }

    /// Remove the entries selected by `request`. Returns the number removed.
    pub async fn purge(&self, request: PurgeRequest) -> Result<u64> {
        if let Some(filter) = &request.filter {
            validate_filter(filter)?;
        }
        self.shared.check_open()?;
        let purged = {
            let mut core = self.shared.core.write().await;
            core.ensure_usable()?;
            retention::purge(&mut core, &request)
        };
        info!(stream = %self.shared.name, purged, "Stream purged");
        self.shared.notify();
        Ok(purged)
    }

    /// Create a consumer. Creating an existing consumer with an identical
    /// config returns the existing one.
    pub async fn create_consumer(&self, config: ConsumerConfig) -> Result<Consumer> {
        self.add_consumer(config, false).await.map(|(consumer, _)| consumer)
    }

    /// Create a consumer, or update a compatible existing one.
    pub async fn create_or_update_consumer(&self, config: ConsumerConfig) -> Result<Consumer> {
        self.add_consumer(config, true).await.map(|(consumer, _)| consumer)
    }

    /// Update the mutable fields of an existing durable consumer.
    pub async fn update_consumer(&self, config: ConsumerConfig) -> Result<ConsumerInfo> {
        config.validate()?;
        let name = config.durable_name.clone().ok_or_else(|| {
            EngineError::InvalidConfig("only durable consumers can be updated".into())
        })?;
        let info = self
            .shared
            .with_consumer(&name, |state, store| {
                state.config.check_update(&config)?;
                state.update_config(config);
                Ok::<_, EngineError>(state.info(store))
            })
            .await??;
        info!(stream = %self.shared.name, consumer = %name, "Consumer updated");
        self.shared.notify();
        Ok(info)
    }

    /// Create or update a consumer. Returns the handle and the highest seq
    /// among entries the consumer owes from existing data.
    pub(crate) async fn add_consumer(
        &self,
        config: ConsumerConfig,
        allow_update: bool,
    ) -> Result<(Consumer, Option<u64>)> {
        config.validate()?;
        self.shared.check_open()?;
        let mut guard = self.shared.core.write().await;
        let core = &mut *guard;

        if let Some(filter) = &config.filter_subject {
            if !core
                .config
                .effective_subjects()
                .iter()
                .any(|subject| filters_overlap(subject, filter))
            {
                return Err(EngineError::InvalidConfig(format!(
                    "filter subject '{filter}' matches no subject of stream '{}'",
                    self.shared.name
                )));
            }
        }
        if core.config.retention == RetentionPolicy::WorkQueue
            && config.ack_policy == AckPolicy::None
        {
            return Err(EngineError::InvalidConfig(
                "work queue consumers must acknowledge deliveries".into(),
            ));
        }
        if core.config.retention == RetentionPolicy::WorkQueue
            && config.deliver_policy != DeliverPolicy::All
        {
            return Err(EngineError::InvalidConfig(
                "work queue consumers must deliver all entries".into(),
            ));
        }

        let name = config.durable_name.clone().unwrap_or_else(ephemeral_name);

        if let Some(existing) = core.consumers.get_mut(&name) {
            if existing.config != config {
                if !allow_update {
                    return Err(EngineError::DuplicateName {
                        kind: "consumer",
                        name,
                    });
                }
                existing.config.check_update(&config)?;
                existing.update_config(config);
                info!(stream = %self.shared.name, consumer = %name, "Consumer updated");
            }
            let target = existing.replay_target(core.store.as_ref());
            return Ok((Consumer::new(self.shared.clone(), name), target));
        }

        if core.config.retention == RetentionPolicy::WorkQueue {
            let filter = config.filter_subject.as_deref().unwrap_or(FULL_WILDCARD);
            if let Some((other, _)) = core.consumers.iter().find(|(_, c)| {
                filters_overlap(
                    filter,
                    c.config.filter_subject.as_deref().unwrap_or(FULL_WILDCARD),
                )
            }) {
                return Err(EngineError::OverlappingFilterSubjects {
                    filter: filter.to_string(),
                    existing: other.clone(),
                });
            }
        }

        let state = ConsumerState::new(
            name.clone(),
            self.shared.name.clone(),
            config,
            core.store.as_ref(),
            Instant::now(),
        );
        let target = state.replay_target(core.store.as_ref());
        info!(
            stream = %self.shared.name,
            consumer = %name,
            durable = state.config.is_durable(),
            "Consumer created"
        );
        core.consumers.insert(name.clone(), state);
        drop(guard);

        self.shared.notify();
        Ok((Consumer::new(self.shared.clone(), name), target))
    }

    /// Handle to an existing consumer.
    pub async fn consumer(&self, name: &str) -> Result<Consumer> {
        self.shared.check_open()?;
        if !self.shared.core.read().await.consumers.contains_key(name) {
            return Err(self.shared.consumer_missing(name));
        }
        Ok(Consumer::new(self.shared.clone(), name.to_string()))
    }

    pub async fn consumer_info(&self, name: &str) -> Result<ConsumerInfo> {
        self.shared.with_consumer(name, |state, store| state.info(store)).await
    }

    pub async fn consumer_names(&self) -> Result<Vec<String>> {
        self.shared.check_open()?;
        Ok(self.shared.core.read().await.consumers.keys().cloned().collect())
    }

    /// Delete a consumer. Blocked fetches on it fail with
    /// [`EngineError::ConsumerDeleted`].
    pub async fn delete_consumer(&self, name: &str) -> Result<()> {
        self.shared.check_open()?;
        let released = {
            let mut core = self.shared.core.write().await;
            if core.consumers.remove(name).is_none() {
                return Err(self.shared.consumer_missing(name));
            }
            retention::rescan(&mut core)
        };
        info!(stream = %self.shared.name, consumer = %name, released, "Consumer deleted");
        self.shared.notify();
        Ok(())
    }
}
