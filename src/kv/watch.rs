//! Key watchers.
//!
//! A watcher is an ephemeral push consumer with ack policy none, filtered on
//! the watched keys. It replays current values first, then emits
//! [`WatchEvent::CaughtUp`] exactly once, then streams live changes.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use super::{KeyValue, KvEntry};
use crate::consumer::{
    AckPolicy, ConsumeContext, Consumer, ConsumerConfig, DeliverPolicy, DeliveryMode,
    HandlerError, Message, MessageHandler,
};
use crate::error::Result;
use crate::stream::Stream as LogStream;

/// What a watcher replays and emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Replay every retained revision instead of only the latest per key.
    pub include_history: bool,
    /// Skip the replay; only changes after the watch started.
    pub updates_only: bool,
    /// Do not emit delete and purge tombstones.
    pub ignore_deletes: bool,
}

impl WatchOptions {
    pub fn include_history(mut self) -> Self {
        self.include_history = true;
        self
    }

    pub fn updates_only(mut self) -> Self {
        self.updates_only = true;
        self
    }

    pub fn ignore_deletes(mut self) -> Self {
        self.ignore_deletes = true;
        self
    }
}

/// Item yielded by a [`Watcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Entry(KvEntry),
    /// The replay of values present at watch start is complete.
    CaughtUp,
}

struct WatchState {
    bucket: String,
    tx: mpsc::Sender<WatchEvent>,
    /// Last seq of the replay, `None` when there is nothing to replay.
    target: Option<u64>,
    caught_up: AtomicBool,
    ignore_deletes: bool,
}

struct WatchHandler(Arc<WatchState>);

impl MessageHandler for WatchHandler {
    fn handle(&self, message: Message) -> BoxFuture<'static, std::result::Result<(), HandlerError>> {
        let this = Arc::clone(&self.0);
        Box::pin(async move {
            let entry = KvEntry::from_entry(&this.bucket, &message.entry, message.info.num_pending);
            if !(this.ignore_deletes && entry.is_tombstone()) {
                this.tx.send(WatchEvent::Entry(entry)).await?;
            }
            let reached = this.target.map_or(true, |t| message.seq() >= t)
                || message.info.num_pending == 0;
            if reached && !this.caught_up.swap(true, Ordering::SeqCst) {
                this.tx.send(WatchEvent::CaughtUp).await?;
            }
            Ok(())
        })
    }
}

/// Stream of [`WatchEvent`]s. Dropping the watcher stops it; its consumer
/// is then removed by the inactivity sweep. [`Watcher::stop`] removes it
/// right away.
pub struct Watcher {
    events: ReceiverStream<WatchEvent>,
    context: ConsumeContext,
    consumer: Consumer,
    stream: LogStream,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("consumer", &self.consumer)
            .finish()
    }
}

impl Watcher {
    /// Next event, `None` once the watcher ended.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.next().await
    }

    /// Stop delivery and delete the underlying consumer.
    pub async fn stop(self) -> Result<()> {
        let Watcher {
            context,
            consumer,
            stream,
            ..
        } = self;
        context.stopped().await;
        stream.delete_consumer(consumer.name()).await
    }
}

impl Stream for Watcher {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

pub(crate) async fn start(kv: &KeyValue, filter: String, options: WatchOptions) -> Result<Watcher> {
    let deliver_policy = if options.updates_only {
        DeliverPolicy::New
    } else if options.include_history {
        DeliverPolicy::All
    } else {
        DeliverPolicy::LastPerSubject
    };
    let config = ConsumerConfig {
        filter_subject: Some(filter.clone()),
        ack_policy: AckPolicy::None,
        deliver_policy,
        delivery: DeliveryMode::Push {
            deliver_subject: format!("_WATCH.{}", kv.bucket),
        },
        ..ConsumerConfig::ephemeral()
    };

    let (consumer, target) = kv.stream.add_consumer(config, false).await?;
    let (tx, rx) = mpsc::channel(kv.watch_buffer);

    let mut caught_up = options.updates_only;
    if !caught_up && target.is_none() {
        // Empty replay. The channel is fresh, so this never blocks.
        let _ = tx.try_send(WatchEvent::CaughtUp);
        caught_up = true;
    }

    let handler = WatchHandler(Arc::new(WatchState {
        bucket: kv.bucket.clone(),
        tx,
        target,
        caught_up: AtomicBool::new(caught_up),
        ignore_deletes: options.ignore_deletes,
    }));
    let context = consumer.consume(handler).await?;
    debug!(bucket = %kv.bucket, filter = %filter, consumer = %consumer.name(), "Watch started");

    Ok(Watcher {
        events: ReceiverStream::new(rx),
        context,
        consumer,
        stream: kv.stream.clone(),
    })
}
