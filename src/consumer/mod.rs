//! Consumers: durable or ephemeral cursors over a stream with ack tracking.
//!
//! Two delivery modes share one state machine ([`state::ConsumerState`]):
//! - pull: the client calls [`Consumer::fetch`], [`Consumer::next`] or
//!   [`Consumer::messages`]
//! - push: the engine drives a [`MessageHandler`] via [`Consumer::consume`]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::time::{sleep_until, Instant};

use crate::error::{EngineError, Result};
use crate::stream::StreamShared;
use crate::utils::duration::deadline_after;

pub mod config;
pub mod info;
pub mod message;
pub mod push;
pub(crate) mod state;

pub use config::{AckPolicy, ConsumerConfig, DeliverPolicy, DeliveryMode};
pub use info::{ConsumerInfo, SequenceInfo};
pub use message::{DeliveryInfo, Message};
pub use push::{ConsumeContext, HandlerError, MessageHandler};

use state::AckKind;

/// Max wait of each pull issued by [`Consumer::messages`].
const MESSAGES_PULL_WAIT: Duration = Duration::from_secs(30);

/// Decrements a counter when dropped.
struct CountGuard(Arc<AtomicUsize>);

impl CountGuard {
    fn acquire(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a consumer.
#[derive(Clone)]
pub struct Consumer {
    pub(crate) stream: Arc<StreamShared>,
    name: String,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("stream", &self.stream.name)
            .field("name", &self.name)
            .finish()
    }
}

impl Consumer {
    pub(crate) fn new(stream: Arc<StreamShared>, name: String) -> Self {
        Self { stream, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream_name(&self) -> &str {
        &self.stream.name
    }

    pub async fn info(&self) -> Result<ConsumerInfo> {
        self.stream
            .with_consumer(&self.name, |state, store| state.info(store))
            .await
    }

    fn deleted(&self, error: EngineError) -> EngineError {
        match error {
            EngineError::ConsumerNotFound { stream, consumer } => {
                EngineError::ConsumerDeleted { stream, consumer }
            }
            other => other,
        }
    }

    /// Register a blocking pull after checking the request against the
    /// consumer's limits.
    async fn begin_pull(&self, batch: usize, max_wait: Duration) -> Result<CountGuard> {
        let name = self.name.clone();
        let waiting = self
            .stream
            .with_consumer(&self.name, |state, _| {
                let config = &state.config;
                if !config.is_pull() {
                    return Err(EngineError::InvalidConfig(format!(
                        "consumer '{name}' is a push consumer"
                    )));
                }
                if let Some(max) = config.max_batch {
                    if batch > max {
                        return Err(EngineError::MaxBatchExceeded {
                            requested: batch,
                            max,
                        });
                    }
                }
                if let Some(max) = config.max_expires {
                    if max_wait > max {
                        return Err(EngineError::MaxExpiresExceeded {
                            requested: max_wait,
                            max,
                        });
                    }
                }
                if state.waiting.load(Ordering::SeqCst) >= config.max_waiting {
                    return Err(EngineError::MaxWaitingExceeded(name));
                }
                Ok(state.waiting.clone())
            })
            .await??;
        Ok(CountGuard::acquire(waiting))
    }

    fn wrap(&self, deliveries: Vec<state::Delivery>) -> Vec<Message> {
        deliveries
            .into_iter()
            .map(|delivery| Message::new(delivery, self.clone()))
            .collect()
    }

    /// Pull up to `batch` messages, waiting at most `max_wait` for the first.
    ///
    /// Returns as soon as at least one message is available, and an empty
    /// batch when `max_wait` elapses. Nothing stays reserved on timeout.
    #[tracing::instrument(name = "consumer.fetch", skip_all, fields(stream = %self.stream.name, consumer = %self.name, batch = batch))]
    pub async fn fetch(&self, batch: usize, max_wait: Duration) -> Result<Vec<Message>> {
        if batch == 0 {
            return Ok(Vec::new());
        }
        let _waiting = self
            .begin_pull(batch, max_wait)
            .await
            .map_err(|e| self.deleted(e))?;
        let deadline = deadline_after(Instant::now(), max_wait);
        let mut changes = self.stream.subscribe();

        loop {
            changes.borrow_and_update();
            let deliveries = self
                .stream
                .deliver(&self.name, batch)
                .await
                .map_err(|e| self.deleted(e))?;
            if !deliveries.is_empty() {
                return Ok(self.wrap(deliveries));
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake = self
                .stream
                .next_deadline(&self.name)
                .await
                .map_err(|e| self.deleted(e))?
                .map_or(deadline, |next| next.min(deadline));
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Ok(Vec::new());
                    }
                }
                _ = sleep_until(wake) => {}
            }
        }
    }

    /// Pull whatever is available right now, up to `batch`.
    pub async fn fetch_no_wait(&self, batch: usize) -> Result<Vec<Message>> {
        if batch == 0 {
            return Ok(Vec::new());
        }
        self.begin_pull(batch, Duration::ZERO)
            .await
            .map_err(|e| self.deleted(e))?;
        let deliveries = self
            .stream
            .deliver(&self.name, batch)
            .await
            .map_err(|e| self.deleted(e))?;
        Ok(self.wrap(deliveries))
    }

    /// Pull a single message or fail with [`EngineError::FetchTimeout`].
    pub async fn next(&self, timeout: Duration) -> Result<Message> {
        self.fetch(1, timeout)
            .await?
            .pop()
            .ok_or(EngineError::FetchTimeout(timeout))
    }

    /// Endless stream of messages, pulled one at a time.
    ///
    /// Ends after yielding the first error (for example when the consumer is
    /// deleted).
    pub fn messages(&self) -> impl Stream<Item = Result<Message>> + Send + 'static {
        futures::stream::unfold(Some(self.clone()), |consumer| async move {
            let consumer = consumer?;
            loop {
                match consumer.fetch(1, MESSAGES_PULL_WAIT).await {
                    Ok(mut batch) => {
                        if let Some(message) = batch.pop() {
                            return Some((Ok(message), Some(consumer)));
                        }
                    }
                    Err(e) => return Some((Err(e), None)),
                }
            }
        })
    }

    /// Start engine-driven delivery to `handler`.
    pub async fn consume<H>(&self, handler: H) -> Result<ConsumeContext>
    where
        H: MessageHandler + 'static,
    {
        let name = self.name.clone();
        let sessions = self
            .stream
            .with_consumer(&self.name, |state, _| {
                if state.config.is_pull() {
                    return Err(EngineError::InvalidConfig(format!(
                        "consumer '{name}' is a pull consumer"
                    )));
                }
                state.push_sessions.fetch_add(1, Ordering::SeqCst);
                Ok(state.push_sessions.clone())
            })
            .await??;
        Ok(push::start(self.clone(), Arc::new(handler), sessions))
    }

    /// Acknowledge `seq`. Unknown or already resolved seqs are a no-op.
    pub async fn ack(&self, seq: u64) -> Result<()> {
        self.stream.resolve(&self.name, seq, AckKind::Ack).await
    }

    /// Acknowledge `seq` and wait for the engine to confirm it.
    ///
    /// On [`EngineError::AckTimeout`] the ack may still have been applied.
    pub async fn ack_sync(&self, seq: u64, timeout: Duration) -> Result<()> {
        let consumer = self.clone();
        let task = tokio::spawn(async move { consumer.ack(seq).await });
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EngineError::Store(format!("ack task failed: {e}"))),
            Err(_) => Err(EngineError::AckTimeout { seq, timeout }),
        }
    }

    /// Request immediate redelivery of `seq`.
    pub async fn nak(&self, seq: u64) -> Result<()> {
        self.nak_with_delay(seq, Duration::ZERO).await
    }

    pub async fn nak_with_delay(&self, seq: u64, delay: Duration) -> Result<()> {
        self.stream.resolve(&self.name, seq, AckKind::Nak(delay)).await
    }

    /// Stop redelivering `seq` without processing it.
    pub async fn term(&self, seq: u64) -> Result<()> {
        self.stream.resolve(&self.name, seq, AckKind::Term).await
    }

    /// Reset the ack deadline of `seq`.
    pub async fn in_progress(&self, seq: u64) -> Result<()> {
        self.stream.resolve(&self.name, seq, AckKind::Progress).await
    }
}
