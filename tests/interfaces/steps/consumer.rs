//! Consumer interface step definitions.

use std::collections::HashMap;
use std::time::Duration;

use cucumber::{given, then, when, World};
use jetlog::consumer::HandlerError;
use jetlog::{ConsumeContext, Consumer, ConsumerConfig, Engine, EngineError, Message, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::{assert_kind, parse_seqs, test_engine};

/// Test context for consumer scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct ConsumerWorld {
    engine: Engine,
    stream: Option<Stream>,
    consumers: HashMap<String, Consumer>,
    fetched: Vec<Message>,
    contexts: Vec<ConsumeContext>,
    handled: Option<mpsc::Receiver<u64>>,
    last_error: Option<EngineError>,
}

impl std::fmt::Debug for ConsumerWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerWorld")
            .field("stream", &self.stream)
            .field("consumers", &self.consumers.keys().collect::<Vec<_>>())
            .field("fetched", &format!("[{} messages]", self.fetched.len()))
            .field("contexts", &self.contexts.len())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl ConsumerWorld {
    fn new() -> Self {
        Self {
            engine: test_engine(),
            stream: None,
            consumers: HashMap::new(),
            fetched: Vec::new(),
            contexts: Vec::new(),
            handled: None,
            last_error: None,
        }
    }

    fn stream(&self) -> &Stream {
        self.stream.as_ref().expect("Stream not initialized")
    }

    fn consumer(&self, name: &str) -> &Consumer {
        self.consumers.get(name).expect("Consumer not found")
    }

    async fn add_consumer(&mut self, config: ConsumerConfig) {
        let name = config.durable_name.clone().expect("durable name");
        let consumer = self
            .stream()
            .create_consumer(config)
            .await
            .expect("Failed to create consumer");
        self.consumers.insert(name, consumer);
    }

    async fn publish(&self, count: usize, subject: &str) {
        for i in 0..count {
            self.stream()
                .publish(subject, format!("msg-{i}"))
                .await
                .expect("Failed to publish");
        }
    }

    async fn fetch(&mut self, name: &str, batch: usize, wait: Duration) {
        let result = self.consumer(name).fetch(batch, wait).await;
        match result {
            Ok(messages) => {
                self.fetched = messages;
                self.last_error = None;
            }
            Err(e) => {
                self.fetched.clear();
                self.last_error = Some(e);
            }
        }
    }
}

// --- Background ---

#[given(expr = "a stream {string} on subjects {string}")]
async fn given_stream(world: &mut ConsumerWorld, name: String, subjects: String) {
    let stream = world
        .engine
        .create_stream(StreamConfig::new(name, subjects.split(',').map(str::trim)))
        .await
        .expect("Failed to create stream");
    world.stream = Some(stream);
}

// --- Given steps ---

#[given(expr = "{int} messages published to {string}")]
async fn given_published(world: &mut ConsumerWorld, count: usize, subject: String) {
    world.publish(count, &subject).await;
}

#[given(expr = "a pull consumer {string}")]
async fn given_pull_consumer(world: &mut ConsumerWorld, name: String) {
    world.add_consumer(ConsumerConfig::durable(name)).await;
}

#[given(expr = "a pull consumer {string} with ack wait of {int} milliseconds")]
async fn given_pull_consumer_with_ack_wait(world: &mut ConsumerWorld, name: String, millis: u64) {
    world
        .add_consumer(ConsumerConfig::durable(name).with_ack_wait(Duration::from_millis(millis)))
        .await;
}

#[given(expr = "a pull consumer {string} filtered on {string}")]
async fn given_filtered_consumer(world: &mut ConsumerWorld, name: String, filter: String) {
    world
        .add_consumer(ConsumerConfig::durable(name).with_filter(filter))
        .await;
}

#[given(expr = "a push consumer {string} delivering to {string}")]
async fn given_push_consumer(world: &mut ConsumerWorld, name: String, target: String) {
    world
        .add_consumer(ConsumerConfig::durable(name).push(target))
        .await;
}

// --- When steps ---

#[when(expr = "I publish {int} messages to {string}")]
async fn when_publish(world: &mut ConsumerWorld, count: usize, subject: String) {
    world.publish(count, &subject).await;
}

#[when(expr = "consumer {string} fetches up to {int} messages")]
async fn when_fetch(world: &mut ConsumerWorld, name: String, batch: usize) {
    world.fetch(&name, batch, Duration::from_millis(200)).await;
}

#[when(expr = "consumer {string} fetches up to {int} messages waiting {int} milliseconds")]
async fn when_fetch_waiting(world: &mut ConsumerWorld, name: String, batch: usize, millis: u64) {
    world.fetch(&name, batch, Duration::from_millis(millis)).await;
}

#[when("all fetched messages are acknowledged")]
async fn when_ack_all(world: &mut ConsumerWorld) {
    for message in &world.fetched {
        message.ack().await.expect("Ack failed");
    }
}

#[when(expr = "{int} milliseconds pass")]
async fn when_time_passes(_world: &mut ConsumerWorld, millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

#[when(expr = "consumer {string} waits for a message while it is deleted")]
async fn when_deleted_mid_fetch(world: &mut ConsumerWorld, name: String) {
    let consumer = world.consumer(&name).clone();
    let waiter = tokio::spawn(async move { consumer.fetch(1, Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    world
        .stream()
        .delete_consumer(&name)
        .await
        .expect("Failed to delete consumer");
    world.last_error = waiter.await.expect("fetch task panicked").err();
}

#[when(expr = "consumer {string} starts consuming")]
async fn when_start_consuming(world: &mut ConsumerWorld, name: String) {
    let (tx, rx) = mpsc::channel(64);
    let context = world
        .consumer(&name)
        .consume(move |message: Message| {
            let tx = tx.clone();
            async move {
                message.ack().await?;
                tx.send(message.seq()).await?;
                Ok::<(), HandlerError>(())
            }
        })
        .await
        .expect("Failed to start consuming");
    world.contexts.push(context);
    world.handled = Some(rx);
}

// --- Then steps ---

#[then(expr = "the fetched sequences are {string}")]
async fn then_fetched(world: &mut ConsumerWorld, seqs: String) {
    let fetched: Vec<u64> = world.fetched.iter().map(|m| m.seq()).collect();
    assert_eq!(fetched, parse_seqs(&seqs));
}

#[then("no messages were fetched")]
async fn then_nothing_fetched(world: &mut ConsumerWorld) {
    assert!(world.last_error.is_none(), "fetch failed: {:?}", world.last_error);
    assert!(world.fetched.is_empty());
}

#[then(expr = "the last fetched message was delivered {int} times")]
async fn then_delivery_count(world: &mut ConsumerWorld, count: u64) {
    let message = world.fetched.last().expect("No message fetched");
    assert_eq!(message.info.num_delivered, count);
}

#[then(expr = "consumer {string} has {int} acknowledgements pending")]
async fn then_ack_pending(world: &mut ConsumerWorld, name: String, count: usize) {
    let info = world.consumer(&name).info().await.expect("Info failed");
    assert_eq!(info.num_ack_pending, count);
}

#[then(expr = "the last operation failed with {string}")]
async fn then_operation_failed(world: &mut ConsumerWorld, kind: String) {
    assert_kind(world.last_error.as_ref(), &kind);
}

#[then(expr = "the handler received sequences {string}")]
async fn then_handler_received(world: &mut ConsumerWorld, seqs: String) {
    let expected = parse_seqs(&seqs);
    let rx = world.handled.as_mut().expect("Not consuming");
    let mut received = Vec::new();
    while received.len() < expected.len() {
        let seq = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Timed out waiting for the handler")
            .expect("Handler channel closed");
        received.push(seq);
    }
    assert_eq!(received, expected);
}
