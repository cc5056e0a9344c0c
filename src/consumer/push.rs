//! Engine-driven delivery to a handler.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::message::Message;
use super::Consumer;

/// Error returned by a [`MessageHandler`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives messages of a push consumer, one at a time.
///
/// A failed handler only logs; the message stays pending and is redelivered
/// after `ack_wait` unless it was resolved.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Message) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle(&self, message: Message) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(self(message))
    }
}

/// Running push delivery. Dropping the context stops it.
pub struct ConsumeContext {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConsumeContext {
    /// Halt new dispatch. A handler call in flight runs to completion.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow() || self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop and wait for the delivery loop to exit.
    pub async fn stopped(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConsumeContext {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

impl std::fmt::Debug for ConsumeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumeContext")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Spawn the delivery loop. `sessions` is the consumer's push session
/// counter, already incremented for this session.
pub(crate) fn start(
    consumer: Consumer,
    handler: Arc<dyn MessageHandler>,
    sessions: Arc<AtomicUsize>,
) -> ConsumeContext {
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        info!(stream = %consumer.stream_name(), consumer = %consumer.name(), "Push consumer started");
        run(&consumer, handler, stop_rx).await;
        sessions.fetch_sub(1, Ordering::SeqCst);
        info!(stream = %consumer.stream_name(), consumer = %consumer.name(), "Push consumer stopped");
    });
    ConsumeContext {
        stop,
        task: Some(task),
    }
}

async fn run(consumer: &Consumer, handler: Arc<dyn MessageHandler>, mut stop: watch::Receiver<bool>) {
    let mut changes = consumer.stream.subscribe();
    loop {
        if *stop.borrow() {
            break;
        }
        changes.borrow_and_update();

        match consumer.stream.deliver(consumer.name(), 1).await {
            Ok(deliveries) if !deliveries.is_empty() => {
                for delivery in deliveries {
                    let message = Message::new(delivery, consumer.clone());
                    let seq = message.seq();
                    if let Err(e) = handler.handle(message).await {
                        warn!(consumer = %consumer.name(), seq, error = %e, "Handler failed");
                    }
                }
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(consumer = %consumer.name(), error = %e, "Push delivery ended");
                break;
            }
        }

        let wake = consumer.stream.next_deadline(consumer.name()).await.ok().flatten();
        tokio::select! {
            _ = stop.changed() => {}
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep_until_opt(wake) => {}
        }
    }
}
