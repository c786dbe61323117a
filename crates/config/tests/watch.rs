//! Change propagation from watchers to cached values and observers

mod common;

use common::{ScriptedSource, eventually, json_kv};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use stratum_config::{Config, ConfigError, KeyValue, ValueKind, WatchBackoff};

async fn running(source: &Arc<ScriptedSource>) -> Config {
    let config = Config::builder()
        .with_shared_source(source.clone())
        .with_backoff(WatchBackoff::fixed(Duration::from_millis(10)))
        .build();
    config.load().await.unwrap();
    config
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&str, &stratum_config::Value) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let observer = {
        let count = Arc::clone(&count);
        move |_: &str, _: &stratum_config::Value| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    };
    (count, observer)
}

#[tokio::test]
async fn test_cached_value_updates_in_place_with_one_notification() {
    let source = Arc::new(ScriptedSource::new("s", vec![KeyValue::raw("mode", "blue")]));
    let config = running(&source).await;

    let handle = config.value("mode");
    let (count, observer) = counter();
    config.watch("mode", observer).unwrap();

    source.watcher().push(vec![KeyValue::raw("mode", "green")]);
    assert!(eventually(|| count.load(Ordering::SeqCst) == 1).await);

    assert_eq!(handle.string().unwrap(), "green");
    assert!(config.value("mode").ptr_eq(&handle));

    // an identical batch is not a change
    source.watcher().push(vec![KeyValue::raw("mode", "green")]);
    source.watcher().push(vec![KeyValue::raw("other", "x")]);
    assert!(eventually(|| config.value("other").string().is_ok_and(|v| v == "x")).await);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_uncached_keys_are_not_notified() {
    let source = Arc::new(ScriptedSource::new(
        "s",
        vec![json_kv("s.json", json!({"a": 1, "b": 1}))],
    ));
    let config = running(&source).await;
    assert_eq!(config.cached_keys(), Vec::<String>::new());

    let (count, observer) = counter();
    config.watch("a", observer).unwrap();
    config.unwatch("a");
    assert!(!config.unwatch("a"));

    source.watcher().push(vec![json_kv("s.json", json!({"a": 2, "b": 2}))]);
    assert!(eventually(|| config.value("b").int().is_ok_and(|v| v == 2)).await);
    assert_eq!(config.value("a").int().unwrap(), 2);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_kind_change_is_not_applied() {
    let source = Arc::new(ScriptedSource::new(
        "s",
        vec![json_kv("s.json", json!({"port": 5432, "name": "a"}))],
    ));
    let config = running(&source).await;

    let port = config.value("port");
    let name = config.value("name");
    let (count, observer) = counter();
    config.watch("port", observer).unwrap();

    source
        .watcher()
        .push(vec![json_kv("s.json", json!({"port": "not a number", "name": "b"}))]);
    assert!(eventually(|| name.string().is_ok_and(|v| v == "b")).await);

    assert_eq!(port.kind().unwrap(), ValueKind::Number);
    assert_eq!(port.int().unwrap(), 5432);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_lookup_miss() {
    let source = Arc::new(ScriptedSource::new(
        "s",
        vec![json_kv("s.json", json!({"present": 1, "empty": null}))],
    ));
    let config = running(&source).await;

    let missing = config.value("absent.key");
    assert!(missing.is_missing());
    assert_eq!(missing.load().unwrap_err(), ConfigError::not_found("absent.key"));
    assert_eq!(missing.int().unwrap_err(), ConfigError::not_found("absent.key"));
    assert!(config.cached_keys().is_empty());

    let (_, observer) = counter();
    assert_eq!(
        config.watch("absent.key", observer).unwrap_err(),
        ConfigError::not_found("absent.key")
    );
    let (_, observer) = counter();
    assert!(config.watch("empty", observer).unwrap_err().is_not_found());

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_last_registered_observer_wins() {
    let source = Arc::new(ScriptedSource::new("s", vec![KeyValue::raw("k", "1")]));
    let config = running(&source).await;

    let (first, observer) = counter();
    config.watch("k", observer).unwrap();
    let (second, observer) = counter();
    config.watch("k", observer).unwrap();

    source.watcher().push(vec![KeyValue::raw("k", "2")]);
    assert!(eventually(|| second.load(Ordering::SeqCst) == 1).await);
    assert_eq!(first.load(Ordering::SeqCst), 0);

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let source = Arc::new(ScriptedSource::new("s", vec![KeyValue::raw("k", "1")]));
    let config = running(&source).await;
    let handle = config.value("k");

    let watcher = source.watcher();
    watcher.fail(ConfigError::source_error("flaky", "s"));
    watcher.fail(ConfigError::source_error("flaky again", "s"));
    watcher.push(vec![KeyValue::raw("k", "2")]);

    assert!(eventually(|| handle.string().is_ok_and(|v| v == "2")).await);
    assert!(watcher.next_count() >= 3);

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_batch_is_dropped_whole() {
    let source = Arc::new(ScriptedSource::new("s", vec![KeyValue::raw("k", "1")]));
    let config = running(&source).await;
    let handle = config.value("k");

    let watcher = source.watcher();
    watcher.push(vec![KeyValue::raw("k", "2"), KeyValue::new("bad.json", "{", "json")]);
    watcher.push(vec![KeyValue::raw("done", "yes")]);

    assert!(eventually(|| !config.value("done").is_missing()).await);
    assert_eq!(handle.string().unwrap(), "1");

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_unresolvable_batch_is_dropped_whole() {
    let source = Arc::new(ScriptedSource::new("s", vec![KeyValue::raw("k", "1")]));
    let config = running(&source).await;
    let handle = config.value("k");
    let (count, observer) = counter();
    config.watch("k", observer).unwrap();

    let watcher = source.watcher();
    watcher.push(vec![KeyValue::raw("k", "${missing}")]);
    assert!(eventually(|| watcher.next_count() >= 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.string().unwrap(), "1");
    assert_eq!(count.load(Ordering::SeqCst), 0);

    // later batches apply on top of the last good tree
    watcher.push(vec![KeyValue::raw("other", "x")]);
    assert!(eventually(|| config.value("other").string().is_ok_and(|v| v == "x")).await);
    assert_eq!(handle.string().unwrap(), "1");

    watcher.push(vec![KeyValue::raw("k", "3")]);
    assert!(eventually(|| count.load(Ordering::SeqCst) == 1).await);
    assert_eq!(handle.string().unwrap(), "3");

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_unresolvable_batch_does_not_block_other_sources() {
    let a = Arc::new(ScriptedSource::new("a", vec![KeyValue::raw("x", "1")]));
    let b = Arc::new(ScriptedSource::new("b", vec![KeyValue::raw("db.host", "a")]));
    let config = Config::builder()
        .with_shared_source(a.clone())
        .with_shared_source(b.clone())
        .with_backoff(WatchBackoff::fixed(Duration::from_millis(10)))
        .build();
    config.load().await.unwrap();
    let host = config.value("db.host");

    a.watcher().push(vec![KeyValue::raw("bad", "${nope}")]);
    assert!(eventually(|| a.watcher().next_count() >= 2).await);

    b.watcher().push(vec![KeyValue::raw("db.host", "b")]);
    assert!(eventually(|| host.string().is_ok_and(|v| v == "b")).await);
    assert!(config.value("bad").is_missing());
    assert_eq!(config.value("x").string().unwrap(), "1");

    config.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sources_leave_cache_at_latest_tree() {
    const ROUNDS: usize = 200;

    let a = Arc::new(ScriptedSource::new("a", vec![KeyValue::raw("n", "a-init")]));
    let b = Arc::new(ScriptedSource::new("b", vec![]));
    let config = Config::builder()
        .with_shared_source(a.clone())
        .with_shared_source(b.clone())
        .build();
    config.load().await.unwrap();
    let handle = config.value("n");

    for i in 0..ROUNDS {
        a.watcher().push(vec![KeyValue::raw("n", format!("a-{i}"))]);
        b.watcher().push(vec![KeyValue::raw("n", format!("b-{i}"))]);
    }
    assert!(
        eventually(|| a.watcher().next_count() > ROUNDS && b.watcher().next_count() > ROUNDS)
            .await
    );

    let tree: serde_json::Value = config.scan().unwrap();
    assert_eq!(json!(handle.string().unwrap()), tree["n"]);
    assert!(config.value("n").ptr_eq(&handle));

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_error_ends_watch_task() {
    let source = Arc::new(ScriptedSource::new("s", vec![KeyValue::raw("k", "1")]));
    let config = running(&source).await;
    let handle = config.value("k");

    let watcher = source.watcher();
    watcher.fail(ConfigError::Cancelled);
    assert!(eventually(|| watcher.next_count() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    watcher.push(vec![KeyValue::raw("k", "2")]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(watcher.next_count(), 1);
    assert_eq!(handle.string().unwrap(), "1");

    config.close().await.unwrap();
}

#[tokio::test]
async fn test_observer_may_call_back_into_config() {
    let source = Arc::new(ScriptedSource::new(
        "s",
        vec![json_kv("s.json", json!({"a": 1, "b": 10}))],
    ));
    let config = Arc::new(running(&source).await);
    config.value("b");

    let seen = Arc::new(AtomicUsize::new(0));
    {
        let weak: Weak<Config> = Arc::downgrade(&config);
        let seen = Arc::clone(&seen);
        config
            .watch("a", move |_, value| {
                if let Some(config) = weak.upgrade() {
                    let b = config.value("b").int().unwrap_or_default();
                    let a = value.int().unwrap_or_default();
                    seen.store(usize::try_from(a + b).unwrap_or_default(), Ordering::SeqCst);
                    config.unwatch("b");
                }
            })
            .unwrap();
    }

    source.watcher().push(vec![json_kv("s.json", json!({"a": 2, "b": 20}))]);
    assert!(eventually(|| seen.load(Ordering::SeqCst) != 0).await);
    assert!([12, 22].contains(&seen.load(Ordering::SeqCst)));

    config.close().await.unwrap();
}

#[derive(Debug, Deserialize, PartialEq)]
struct Database {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Settings {
    db: Database,
    url: String,
}

#[tokio::test]
async fn test_scan_whole_tree_and_subtree() {
    let source = Arc::new(ScriptedSource::new(
        "s",
        vec![
            json_kv("s.json", json!({"db": {"host": "db.local", "port": 5432}})),
            KeyValue::raw("url", "pg://${db.host}:${db.port}"),
        ],
    ));
    let config = running(&source).await;

    let settings: Settings = config.scan().unwrap();
    assert_eq!(
        settings,
        Settings {
            db: Database {
                host: "db.local".to_string(),
                port: 5432,
            },
            url: "pg://db.local:5432".to_string(),
        }
    );

    let db: Database = config.value("db").scan().unwrap();
    assert_eq!(db.port, 5432);

    let err = config.scan::<Vec<u8>>().unwrap_err();
    assert!(matches!(err, ConfigError::Serialization { .. }));

    config.close().await.unwrap();
}
