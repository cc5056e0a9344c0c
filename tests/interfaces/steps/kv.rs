//! Key-value interface step definitions.

use std::time::Duration;

use cucumber::{given, then, when, World};
use jetlog::{Engine, EngineError, KeyValue, KvConfig, WatchEvent, Watcher};

use super::{assert_kind, test_engine};

/// Test context for key-value scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct KvWorld {
    engine: Engine,
    bucket: Option<KeyValue>,
    watcher: Option<Watcher>,
    last_error: Option<EngineError>,
}

impl KvWorld {
    fn new() -> Self {
        Self {
            engine: test_engine(),
            bucket: None,
            watcher: None,
            last_error: None,
        }
    }

    fn kv(&self) -> &KeyValue {
        self.bucket.as_ref().expect("Bucket not initialized")
    }

    fn record<T>(&mut self, result: Result<T, EngineError>) {
        self.last_error = result.err();
    }

    async fn next_event(&mut self) -> WatchEvent {
        let watcher = self.watcher.as_mut().expect("Not watching");
        tokio::time::timeout(Duration::from_secs(1), watcher.next())
            .await
            .expect("Timed out waiting for a watch event")
            .expect("Watcher ended")
    }

    async fn next_key(&mut self) -> String {
        match self.next_event().await {
            WatchEvent::Entry(entry) => entry.key,
            WatchEvent::CaughtUp => panic!("expected an entry, got CaughtUp"),
        }
    }
}

// --- Background ---

#[given(expr = "a bucket {string} keeping {int} revisions")]
async fn given_bucket(world: &mut KvWorld, bucket: String, history: u64) {
    let kv = world
        .engine
        .create_key_value(KvConfig::new(bucket).with_history(history))
        .await
        .expect("Failed to create bucket");
    world.bucket = Some(kv);
}

// --- When steps ---

#[when(expr = "I put {string} at {string}")]
async fn when_put(world: &mut KvWorld, value: String, key: String) {
    let result = world.kv().put(&key, value).await;
    world.record(result);
}

#[when(expr = "I update {string} to {string} from revision {int}")]
async fn when_update(world: &mut KvWorld, key: String, value: String, revision: u64) {
    let result = world.kv().update(&key, value, revision).await;
    world.record(result);
}

#[when(expr = "I create {string} with {string}")]
async fn when_create(world: &mut KvWorld, key: String, value: String) {
    let result = world.kv().create(&key, value).await;
    world.record(result);
}

#[when(expr = "I delete {string}")]
async fn when_delete(world: &mut KvWorld, key: String) {
    let result = world.kv().delete(&key).await;
    world.record(result);
}

#[when(expr = "I purge {string}")]
async fn when_purge(world: &mut KvWorld, key: String) {
    let result = world.kv().purge(&key).await;
    world.record(result);
}

#[when("I watch all keys")]
async fn when_watch_all(world: &mut KvWorld) {
    let watcher = world.kv().watch_all().await.expect("Failed to watch");
    world.watcher = Some(watcher);
}

// --- Then steps ---

#[then(expr = "{string} is {string} at revision {int}")]
async fn then_value(world: &mut KvWorld, key: String, value: String, revision: u64) {
    let entry = world.kv().get(&key).await.expect("Key not found");
    assert_eq!(entry.value.as_ref(), value.as_bytes());
    assert_eq!(entry.revision, revision);
}

#[then(expr = "{string} is not found")]
async fn then_not_found(world: &mut KvWorld, key: String) {
    let err = world.kv().get(&key).await.unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound { .. }));
}

#[then(expr = "{string} has {int} revisions in its history")]
async fn then_history(world: &mut KvWorld, key: String, count: usize) {
    let history = world.kv().history(&key).await.expect("No history");
    assert_eq!(history.len(), count);
}

#[then(expr = "the bucket keys are {string}")]
async fn then_keys(world: &mut KvWorld, keys: String) {
    let expected: Vec<String> = keys.split(',').map(|k| k.trim().to_string()).collect();
    assert_eq!(world.kv().keys().await.expect("Keys failed"), expected);
}

#[then(expr = "the last operation failed with {string}")]
async fn then_operation_failed(world: &mut KvWorld, kind: String) {
    assert_kind(world.last_error.as_ref(), &kind);
}

#[then(expr = "the watcher yields {string} and catches up")]
async fn then_watch_replay(world: &mut KvWorld, keys: String) {
    for key in keys.split(',') {
        assert_eq!(world.next_key().await, key.trim());
    }
    assert_eq!(world.next_event().await, WatchEvent::CaughtUp);
}

#[then(expr = "the watcher yields {string}")]
async fn then_watch_live(world: &mut KvWorld, keys: String) {
    for key in keys.split(',') {
        assert_eq!(world.next_key().await, key.trim());
    }
}
