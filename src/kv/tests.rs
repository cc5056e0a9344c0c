use std::time::Duration;

use super::*;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::ErrorKind;

async fn bucket(config: KvConfig) -> KeyValue {
    Engine::new(EngineConfig::for_test())
        .create_key_value(config)
        .await
        .unwrap()
}

async fn next_event(watcher: &mut Watcher) -> WatchEvent {
    tokio::time::timeout(Duration::from_secs(1), watcher.next())
        .await
        .expect("watch event")
        .expect("watcher open")
}

fn entry(event: WatchEvent) -> KvEntry {
    match event {
        WatchEvent::Entry(entry) => entry,
        WatchEvent::CaughtUp => panic!("expected an entry, got CaughtUp"),
    }
}

#[tokio::test]
async fn test_put_and_get() {
    let kv = bucket(KvConfig::new("profiles")).await;
    assert_eq!(kv.put("sue.color", "blue").await.unwrap(), 1);
    assert_eq!(kv.put("sue.color", "green").await.unwrap(), 2);

    let current = kv.get("sue.color").await.unwrap();
    assert_eq!(current.value.as_ref(), b"green");
    assert_eq!(current.revision, 2);
    assert_eq!(current.key, "sue.color");
    assert_eq!(current.operation, Operation::Put);

    let err = kv.get("bob.color").await.unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_update_requires_latest_revision() {
    let kv = bucket(KvConfig::new("profiles")).await;
    let first = kv.put("k", "v1").await.unwrap();
    let second = kv.put("k", "v2").await.unwrap();

    let err = kv.update("k", "v3", first).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict {
            expected: 1,
            current: 2,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let third = kv.update("k", "v3", second).await.unwrap();
    assert_eq!(kv.get("k").await.unwrap().revision, third);
}

#[tokio::test]
async fn test_create_only_when_absent() {
    let kv = bucket(KvConfig::new("locks")).await;
    kv.create("job-1", "worker-a").await.unwrap();
    let err = kv.create("job-1", "worker-b").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));

    kv.delete("job-1").await.unwrap();
    let revision = kv.create("job-1", "worker-b").await.unwrap();
    let current = kv.get("job-1").await.unwrap();
    assert_eq!(current.revision, revision);
    assert_eq!(current.value.as_ref(), b"worker-b");
}

#[tokio::test]
async fn test_delete_keeps_history() {
    let kv = bucket(KvConfig::new("profiles").with_history(5)).await;
    kv.put("k", "v1").await.unwrap();
    kv.delete("k").await.unwrap();

    assert!(matches!(
        kv.get("k").await.unwrap_err(),
        EngineError::KeyNotFound { .. }
    ));
    let tombstone = kv.entry("k").await.unwrap().unwrap();
    assert_eq!(tombstone.operation, Operation::Delete);
    assert!(tombstone.value.is_empty());

    let history = kv.history("k").await.unwrap();
    let operations: Vec<Operation> = history.iter().map(|e| e.operation).collect();
    assert_eq!(operations, vec![Operation::Put, Operation::Delete]);
    assert!(kv.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_expect_revision() {
    let kv = bucket(KvConfig::new("profiles")).await;
    let revision = kv.put("k", "v1").await.unwrap();
    kv.put("k", "v2").await.unwrap();

    assert!(matches!(
        kv.delete_expect_revision("k", revision).await.unwrap_err(),
        EngineError::Conflict { .. }
    ));
    kv.delete_expect_revision("k", revision + 1).await.unwrap();
    assert!(kv.get("k").await.is_err());
}

#[tokio::test]
async fn test_purge_drops_older_revisions() {
    let kv = bucket(KvConfig::new("profiles").with_history(5)).await;
    for value in ["a", "b", "c"] {
        kv.put("k", value).await.unwrap();
    }
    kv.put("other", "x").await.unwrap();
    kv.purge("k").await.unwrap();

    let history = kv.history("k").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation, Operation::Purge);
    assert_eq!(kv.status().await.unwrap().values, 2);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let kv = bucket(KvConfig::new("profiles").with_history(2)).await;
    for value in ["a", "b", "c"] {
        kv.put("k", value).await.unwrap();
    }
    let revisions: Vec<u64> = kv
        .history("k")
        .await
        .unwrap()
        .iter()
        .map(|e| e.revision)
        .collect();
    assert_eq!(revisions, vec![2, 3]);

    assert_eq!(kv.get_revision("k", 2).await.unwrap().value.as_ref(), b"b");
    assert!(matches!(
        kv.get_revision("k", 1).await.unwrap_err(),
        EngineError::KeyNotFound { .. }
    ));
}

#[tokio::test]
async fn test_get_revision_checks_key() {
    let kv = bucket(KvConfig::new("profiles")).await;
    let revision = kv.put("a", "1").await.unwrap();
    kv.put("b", "2").await.unwrap();
    assert!(kv.get_revision("b", revision).await.is_err());
    assert!(kv.get_revision("a", 99).await.is_err());
}

#[tokio::test]
async fn test_keys_lists_live_keys() {
    let kv = bucket(KvConfig::new("profiles")).await;
    kv.put("a", "1").await.unwrap();
    kv.put("b", "2").await.unwrap();
    kv.put("c", "3").await.unwrap();
    kv.delete("b").await.unwrap();
    kv.put("a", "4").await.unwrap();

    assert_eq!(kv.keys().await.unwrap(), vec!["c".to_string(), "a".to_string()]);
}

#[tokio::test]
async fn test_invalid_keys_rejected() {
    let kv = bucket(KvConfig::new("profiles")).await;
    for key in ["", ".a", "a.", "a..b", "a b", "a*"] {
        let err = kv.put(key, "v").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidKey(_)), "key {key:?}");
    }
}

#[tokio::test]
async fn test_invalid_bucket_config() {
    assert!(KvConfig::new("bad name").validate().is_err());
    assert!(KvConfig::new("ok").with_history(0).validate().is_err());
    assert!(KvConfig::new("ok")
        .with_history(MAX_HISTORY + 1)
        .validate()
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expires_values() {
    let kv = bucket(KvConfig::new("sessions").with_ttl(Duration::from_secs(1))).await;
    kv.put("s1", "token").await.unwrap();
    assert!(kv.get("s1").await.is_ok());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(kv.get("s1").await.is_err());
    let status = kv.status().await.unwrap();
    assert_eq!(status.values, 0);
    assert_eq!(status.ttl, Some(Duration::from_secs(1)));
}

#[tokio::test]
async fn test_watch_replays_then_streams() {
    let kv = bucket(KvConfig::new("profiles")).await;
    kv.put("a", "1").await.unwrap();
    kv.put("b", "2").await.unwrap();
    kv.put("a", "3").await.unwrap();

    let mut watcher = kv.watch_all().await.unwrap();
    let first = entry(next_event(&mut watcher).await);
    assert_eq!((first.key.as_str(), first.revision), ("b", 2));
    assert_eq!(first.delta, 1);
    let second = entry(next_event(&mut watcher).await);
    assert_eq!((second.key.as_str(), second.revision), ("a", 3));
    assert_eq!(second.delta, 0);
    assert_eq!(next_event(&mut watcher).await, WatchEvent::CaughtUp);

    kv.put("c", "4").await.unwrap();
    let live = entry(next_event(&mut watcher).await);
    assert_eq!(live.key, "c");
    assert_eq!(live.value.as_ref(), b"4");
}

#[tokio::test]
async fn test_watch_empty_bucket_is_caught_up() {
    let kv = bucket(KvConfig::new("profiles")).await;
    let mut watcher = kv.watch_all().await.unwrap();
    assert_eq!(next_event(&mut watcher).await, WatchEvent::CaughtUp);

    kv.put("a", "1").await.unwrap();
    assert_eq!(entry(next_event(&mut watcher).await).key, "a");
}

#[tokio::test]
async fn test_watch_updates_only() {
    let kv = bucket(KvConfig::new("profiles")).await;
    kv.put("a", "1").await.unwrap();

    let mut watcher = kv
        .watch_with(">", WatchOptions::default().updates_only())
        .await
        .unwrap();
    kv.put("b", "2").await.unwrap();
    assert_eq!(entry(next_event(&mut watcher).await).key, "b");
}

#[tokio::test]
async fn test_watch_ignore_deletes() {
    let kv = bucket(KvConfig::new("profiles")).await;
    kv.put("a", "1").await.unwrap();
    kv.delete("a").await.unwrap();
    kv.put("b", "2").await.unwrap();

    let mut watcher = kv
        .watch_with(">", WatchOptions::default().ignore_deletes())
        .await
        .unwrap();
    assert_eq!(entry(next_event(&mut watcher).await).key, "b");
    assert_eq!(next_event(&mut watcher).await, WatchEvent::CaughtUp);

    kv.delete("b").await.unwrap();
    kv.put("c", "3").await.unwrap();
    assert_eq!(entry(next_event(&mut watcher).await).key, "c");
}

#[tokio::test]
async fn test_watch_emits_tombstones() {
    let kv = bucket(KvConfig::new("profiles")).await;
    let mut watcher = kv.watch("a").await.unwrap();
    assert_eq!(next_event(&mut watcher).await, WatchEvent::CaughtUp);

    kv.put("a", "1").await.unwrap();
    assert_eq!(entry(next_event(&mut watcher).await).operation, Operation::Put);
    kv.delete("a").await.unwrap();
    assert_eq!(
        entry(next_event(&mut watcher).await).operation,
        Operation::Delete
    );
}

#[tokio::test]
async fn test_watch_include_history() {
    let kv = bucket(KvConfig::new("profiles").with_history(3)).await;
    for value in ["1", "2", "3"] {
        kv.put("a", value).await.unwrap();
    }

    let mut watcher = kv
        .watch_with("a", WatchOptions::default().include_history())
        .await
        .unwrap();
    let mut revisions = Vec::new();
    for _ in 0..3 {
        revisions.push(entry(next_event(&mut watcher).await).revision);
    }
    assert_eq!(revisions, vec![1, 2, 3]);
    assert_eq!(next_event(&mut watcher).await, WatchEvent::CaughtUp);
}

#[tokio::test]
async fn test_watch_pattern_filters_keys() {
    let kv = bucket(KvConfig::new("profiles")).await;
    let mut watcher = kv.watch("user.*").await.unwrap();
    assert_eq!(next_event(&mut watcher).await, WatchEvent::CaughtUp);

    kv.put("group.admins", "x").await.unwrap();
    kv.put("user.sue", "y").await.unwrap();
    assert_eq!(entry(next_event(&mut watcher).await).key, "user.sue");
}

#[tokio::test]
async fn test_watcher_stop_removes_consumer() {
    let kv = bucket(KvConfig::new("profiles")).await;
    let watcher = kv.watch_all().await.unwrap();
    assert_eq!(kv.stream().consumer_names().await.unwrap().len(), 1);

    watcher.stop().await.unwrap();
    assert!(kv.stream().consumer_names().await.unwrap().is_empty());
}
