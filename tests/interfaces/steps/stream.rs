//! Stream interface step definitions.

use std::collections::HashMap;
use std::time::Duration;

use cucumber::{given, then, when, World};
use jetlog::{
    Consumer, ConsumerConfig, DiscardPolicy, Engine, EngineError, Headers, PubAck,
    PublishOptions, RetentionPolicy, StreamConfig,
};

use super::{assert_kind, test_engine};

/// Test context for stream scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct StreamWorld {
    engine: Engine,
    consumers: HashMap<String, Consumer>,
    last_ack: Option<PubAck>,
    last_error: Option<EngineError>,
}

impl StreamWorld {
    fn new() -> Self {
        Self {
            engine: test_engine(),
            consumers: HashMap::new(),
            last_ack: None,
            last_error: None,
        }
    }

    fn record(&mut self, result: Result<PubAck, EngineError>) {
        match result {
            Ok(ack) => {
                self.last_ack = Some(ack);
                self.last_error = None;
            }
            Err(e) => self.last_error = Some(e),
        }
    }

    async fn create(&mut self, config: StreamConfig) {
        self.engine
            .create_stream(config)
            .await
            .expect("Failed to create stream");
    }
}

fn config(name: &str, subjects: &str) -> StreamConfig {
    StreamConfig::new(name, subjects.split(',').map(str::trim))
}

// --- Background ---

#[given("an engine")]
async fn given_engine(world: &mut StreamWorld) {
    world.engine = test_engine();
}

// --- Given steps ---

#[given(expr = "a stream {string} on subjects {string}")]
async fn given_stream(world: &mut StreamWorld, name: String, subjects: String) {
    world.create(config(&name, &subjects)).await;
}

#[given(expr = "a stream {string} on subjects {string} keeping at most {int} messages")]
async fn given_stream_with_max_msgs(
    world: &mut StreamWorld,
    name: String,
    subjects: String,
    max: u64,
) {
    world.create(config(&name, &subjects).with_max_msgs(max)).await;
}

#[given(
    expr = "a stream {string} on subjects {string} keeping at most {int} messages and discarding new"
)]
async fn given_stream_discarding_new(
    world: &mut StreamWorld,
    name: String,
    subjects: String,
    max: u64,
) {
    world
        .create(
            config(&name, &subjects)
                .with_max_msgs(max)
                .with_discard(DiscardPolicy::New),
        )
        .await;
}

#[given(expr = "an interest stream {string} on subjects {string}")]
async fn given_interest_stream(world: &mut StreamWorld, name: String, subjects: String) {
    world
        .create(config(&name, &subjects).with_retention(RetentionPolicy::Interest))
        .await;
}

#[given(expr = "a work queue stream {string} on subjects {string}")]
async fn given_work_queue_stream(world: &mut StreamWorld, name: String, subjects: String) {
    world
        .create(config(&name, &subjects).with_retention(RetentionPolicy::WorkQueue))
        .await;
}

#[given(expr = "a pull consumer {string} on stream {string}")]
async fn given_pull_consumer(world: &mut StreamWorld, consumer: String, stream: String) {
    let handle = world
        .engine
        .stream(&stream)
        .await
        .expect("Stream not found")
        .create_consumer(ConsumerConfig::durable(&consumer))
        .await
        .expect("Failed to create consumer");
    world.consumers.insert(consumer, handle);
}

// --- When steps ---

#[when(expr = "I publish {int} messages to {string}")]
async fn when_publish_n(world: &mut StreamWorld, count: usize, subject: String) {
    for i in 0..count {
        let result = world.engine.publish(&subject, format!("msg-{i}")).await;
        world.record(result);
    }
}

#[when(expr = "I publish {string} to {string} with message id {string}")]
async fn when_publish_with_id(
    world: &mut StreamWorld,
    payload: String,
    subject: String,
    msg_id: String,
) {
    let result = world
        .engine
        .publish_with(
            &subject,
            Headers::new(),
            payload,
            PublishOptions::new().msg_id(msg_id),
        )
        .await;
    world.record(result);
}

#[when(expr = "I publish to {string} expecting last subject sequence {int}")]
async fn when_publish_expecting(world: &mut StreamWorld, subject: String, expected: u64) {
    let result = world
        .engine
        .publish_with(
            &subject,
            Headers::new(),
            "conditional",
            PublishOptions::new().expected_last_subject_seq(expected),
        )
        .await;
    world.record(result);
}

#[when(expr = "I create a stream {string} on subjects {string}")]
async fn when_create_stream(world: &mut StreamWorld, name: String, subjects: String) {
    world.last_error = world
        .engine
        .create_stream(config(&name, &subjects))
        .await
        .err();
}

#[when(expr = "consumer {string} fetches and acknowledges {int} messages")]
async fn when_fetch_and_ack(world: &mut StreamWorld, consumer: String, count: usize) {
    let consumer = world.consumers.get(&consumer).expect("Consumer not found");
    let batch = consumer
        .fetch(count, Duration::from_secs(1))
        .await
        .expect("Fetch failed");
    assert_eq!(batch.len(), count);
    for message in batch {
        message.ack().await.expect("Ack failed");
    }
}

// --- Then steps ---

#[then(expr = "the last publish returned sequence {int}")]
async fn then_last_seq(world: &mut StreamWorld, seq: u64) {
    assert!(world.last_error.is_none(), "publish failed: {:?}", world.last_error);
    assert_eq!(world.last_ack.as_ref().expect("No publish").seq, seq);
}

#[then(expr = "the last publish was a duplicate of sequence {int}")]
async fn then_duplicate(world: &mut StreamWorld, seq: u64) {
    let ack = world.last_ack.as_ref().expect("No publish");
    assert!(ack.duplicate);
    assert_eq!(ack.seq, seq);
}

#[then(expr = "the last publish failed with {string}")]
async fn then_publish_failed(world: &mut StreamWorld, kind: String) {
    assert_kind(world.last_error.as_ref(), &kind);
}

#[then(expr = "the last operation failed with {string}")]
async fn then_operation_failed(world: &mut StreamWorld, kind: String) {
    assert_kind(world.last_error.as_ref(), &kind);
}

#[then(expr = "stream {string} holds {int} messages from sequence {int} to {int}")]
async fn then_stream_window(
    world: &mut StreamWorld,
    name: String,
    count: u64,
    first: u64,
    last: u64,
) {
    let state = world
        .engine
        .stream(&name)
        .await
        .expect("Stream not found")
        .info()
        .await
        .expect("Info failed")
        .state;
    assert_eq!(state.msg_count, count);
    assert_eq!(state.first_seq, first);
    assert_eq!(state.last_seq, last);
}

#[then(expr = "stream {string} holds {int} messages")]
async fn then_stream_count(world: &mut StreamWorld, name: String, count: u64) {
    let state = world
        .engine
        .stream(&name)
        .await
        .expect("Stream not found")
        .info()
        .await
        .expect("Info failed")
        .state;
    assert_eq!(state.msg_count, count);
}
