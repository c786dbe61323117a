//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stratum_config::{ConfigError, ConfigResult, KeyValue, Source, Watcher};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;

/// JSON document key/value
pub fn json_kv(key: &str, body: serde_json::Value) -> KeyValue {
    KeyValue::new(key, body.to_string(), "json")
}

/// Poll `condition` until it holds or a few seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Source whose snapshot, failures and watcher batches are scripted by the test
pub struct ScriptedSource {
    name: String,
    snapshot: Vec<KeyValue>,
    load_error: Option<ConfigError>,
    watch_error: Option<ConfigError>,
    gate: Option<Arc<Notify>>,
    loads: AtomicUsize,
    watches: AtomicUsize,
    watcher: Arc<ScriptedWatcher>,
}

impl ScriptedSource {
    pub fn new(name: &str, snapshot: Vec<KeyValue>) -> Self {
        Self {
            name: name.to_string(),
            snapshot,
            load_error: None,
            watch_error: None,
            gate: None,
            loads: AtomicUsize::new(0),
            watches: AtomicUsize::new(0),
            watcher: Arc::new(ScriptedWatcher::new(None, true)),
        }
    }

    pub fn failing_load(mut self, error: ConfigError) -> Self {
        self.load_error = Some(error);
        self
    }

    pub fn failing_watch(mut self, error: ConfigError) -> Self {
        self.watch_error = Some(error);
        self
    }

    pub fn failing_stop(mut self, error: ConfigError) -> Self {
        self.watcher = Arc::new(ScriptedWatcher::new(Some(error), true));
        self
    }

    /// Watcher whose `next` ignores `stop`
    pub fn stubborn(mut self) -> Self {
        self.watcher = Arc::new(ScriptedWatcher::new(None, false));
        self
    }

    /// Block `load` until the gate is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn watcher(&self) -> Arc<ScriptedWatcher> {
        Arc::clone(&self.watcher)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> ConfigResult<Vec<KeyValue>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.load_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.snapshot.clone()),
        }
    }

    async fn watch(&self) -> ConfigResult<Arc<dyn Watcher>> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        match &self.watch_error {
            Some(error) => Err(error.clone()),
            None => Ok(Arc::clone(&self.watcher) as Arc<dyn Watcher>),
        }
    }
}

/// Watcher fed from the test through [`push`](Self::push) and [`fail`](Self::fail)
pub struct ScriptedWatcher {
    tx: mpsc::UnboundedSender<ConfigResult<Vec<KeyValue>>>,
    rx: Mutex<mpsc::UnboundedReceiver<ConfigResult<Vec<KeyValue>>>>,
    cancel: CancellationToken,
    stop_error: Option<ConfigError>,
    honours_stop: bool,
    nexts: AtomicUsize,
    stops: AtomicUsize,
}

impl ScriptedWatcher {
    fn new(stop_error: Option<ConfigError>, honours_stop: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            cancel: CancellationToken::new(),
            stop_error,
            honours_stop,
            nexts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, kvs: Vec<KeyValue>) {
        self.tx.send(Ok(kvs)).unwrap();
    }

    pub fn fail(&self, error: ConfigError) {
        self.tx.send(Err(error)).unwrap();
    }

    pub fn next_count(&self) -> usize {
        self.nexts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Watcher for ScriptedWatcher {
    async fn next(&self) -> ConfigResult<Vec<KeyValue>> {
        self.nexts.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.rx.lock().await;
        if !self.honours_stop {
            return rx.recv().await.unwrap_or(Err(ConfigError::Cancelled));
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ConfigError::Cancelled),
            batch = rx.recv() => batch.unwrap_or(Err(ConfigError::Cancelled)),
        }
    }

    async fn stop(&self) -> ConfigResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        match &self.stop_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
