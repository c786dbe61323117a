//! Configuration orchestrator: load, watch, and notify

use super::{
    ConfigError, ConfigResult, ConfigResultAggregator, ConfigResultExt, KeyValue, Reader,
    Source, Value, ValueKind, WatchBackoff, Watcher,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Dispatch;
use tracing::instrument::WithSubscriber;

/// Callback invoked with the key and its updated value.
///
/// Observers run on the watch task that detected the change and must not
/// block it.
pub type Observer = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Lifecycle of a [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built, `load` not called yet
    Unloaded,
    /// Initial snapshots are being loaded
    Loading,
    /// Loaded; watch tasks are running
    Running,
    /// Closed; watchers stopped
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Closed => "closed",
        })
    }
}

/// State shared between the orchestrator and its watch tasks
struct Shared {
    reader: Arc<dyn Reader>,
    cached: DashMap<String, Value>,
    observers: DashMap<String, Observer>,
    backoff: WatchBackoff,
    /// Serializes stores into cached values so an older tree never
    /// overwrites a newer one
    diff: Mutex<()>,
}

struct ActiveWatcher {
    source: String,
    watcher: Arc<dyn Watcher>,
}

/// Multi-source configuration with live updates.
///
/// Built with [`ConfigBuilder`](super::ConfigBuilder). The lifecycle is
/// single-use: `load` once, read and watch while running, `close` once.
///
/// # Known limitation
///
/// A watched update that changes the kind of a cached value (for example a
/// number becoming a string) is not applied to the cached [`Value`] and
/// does not notify its observer. The cached value keeps its last value of
/// the original kind.
pub struct Config {
    shared: Arc<Shared>,
    sources: Vec<Arc<dyn Source>>,
    state: Mutex<LifecycleState>,
    watchers: Mutex<Vec<ActiveWatcher>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel_token: CancellationToken,
    dispatch: Dispatch,
}

impl Config {
    /// Create new config (internal use only, use ConfigBuilder)
    pub(crate) fn new(
        reader: Arc<dyn Reader>,
        sources: Vec<Arc<dyn Source>>,
        backoff: WatchBackoff,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                reader,
                cached: DashMap::new(),
                observers: DashMap::new(),
                backoff,
                diff: Mutex::new(()),
            }),
            sources,
            state: Mutex::new(LifecycleState::Unloaded),
            watchers: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            cancel_token: CancellationToken::new(),
            dispatch,
        }
    }

    /// Start building a config
    pub fn builder() -> super::ConfigBuilder {
        super::ConfigBuilder::new()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Number of configured sources
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Keys that currently have a cached value
    pub fn cached_keys(&self) -> Vec<String> {
        self.shared
            .cached
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Load every source, resolve, and start one watch task per source.
    ///
    /// Fails fast: the first source that cannot be loaded, merged or watched
    /// aborts the load, no watch task is started and the state returns to
    /// [`LifecycleState::Unloaded`]. Only valid from `Unloaded`.
    pub async fn load(&self) -> ConfigResult<()> {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Unloaded {
                return Err(ConfigError::invalid_state(
                    LifecycleState::Unloaded.to_string(),
                    state.to_string(),
                ));
            }
            *state = LifecycleState::Loading;
        }

        let result = self
            .load_sources()
            .with_subscriber(self.dispatch.clone())
            .await;

        if result.is_err() {
            let mut state = self.state.lock();
            if *state == LifecycleState::Loading {
                *state = LifecycleState::Unloaded;
            }
        }
        result
    }

    async fn load_sources(&self) -> ConfigResult<()> {
        for source in &self.sources {
            let kvs = source.load().await.inspect_err(|e| {
                tracing::error!(source = source.name(), error = %e, "failed to load config source");
            })?;
            for kv in &kvs {
                tracing::debug!(
                    source = source.name(),
                    key = kv.key(),
                    format = kv.format(),
                    "config loaded"
                );
            }
            self.shared.reader.merge(&kvs).inspect_err(|e| {
                tracing::error!(source = source.name(), error = %e, "failed to merge config source");
            })?;
        }

        self.shared.reader.resolve().inspect_err(|e| {
            tracing::error!(error = %e, "failed to resolve config");
        })?;

        let mut watchers = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match source.watch().await {
                Ok(watcher) => watchers.push(ActiveWatcher {
                    source: source.name().to_string(),
                    watcher,
                }),
                Err(e) => {
                    tracing::error!(
                        source = source.name(),
                        error = %e,
                        category = ?e.category(),
                        "failed to watch config source"
                    );
                    // the watch error is what the caller needs
                    stop_all(&watchers).await.log_error();
                    return Err(e);
                }
            }
        }

        let rejected = {
            let mut state = self.state.lock();
            if *state == LifecycleState::Loading {
                let mut tasks = self.tasks.lock();
                for active in &watchers {
                    let task = watch_loop(
                        Arc::clone(&self.shared),
                        active.source.clone(),
                        Arc::clone(&active.watcher),
                        self.cancel_token.child_token(),
                    );
                    tasks.push(tokio::spawn(task.with_subscriber(self.dispatch.clone())));
                }
                *self.watchers.lock() = watchers;
                *state = LifecycleState::Running;
                None
            } else {
                Some((state.to_string(), watchers))
            }
        };

        // closed while loading
        if let Some((actual, watchers)) = rejected {
            stop_all(&watchers).await.log_error();
            return Err(ConfigError::invalid_state(
                LifecycleState::Loading.to_string(),
                actual,
            ));
        }

        tracing::info!(sources = self.sources.len(), "configuration loaded");
        Ok(())
    }

    /// Value at `key`.
    ///
    /// Served from the cache when possible; otherwise looked up in the
    /// resolved tree and cached. A key that is absent yields a value whose
    /// reads fail with [`ConfigError::NotFound`].
    pub fn value(&self, key: &str) -> Value {
        if let Some(cached) = self.shared.cached.get(key) {
            return cached.clone();
        }

        let Some(found) = self.shared.reader.value(key) else {
            return Value::missing(key, ConfigError::not_found(key));
        };

        match self.shared.cached.entry(key.to_string()) {
            Entry::Occupied(existing) => return existing.get().clone(),
            Entry::Vacant(slot) => {
                slot.insert(found.clone());
            }
        }

        // a watch task may have published a newer tree since the lookup
        let _diff = self.shared.diff.lock();
        if let Some(latest) = self.shared.reader.value(key) {
            refresh(&found, &latest);
        }
        found
    }

    /// Deserialize the whole resolved tree into `T`
    pub fn scan<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        let data = self.shared.reader.source()?;
        serde_json::from_slice(&data).map_err(|e| {
            ConfigError::serialization(format!(
                "failed to scan into {}: {e}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Register `observer` for `key`, replacing any previous registration.
    ///
    /// The key must currently resolve to a non-null value. The observer is
    /// not called for the current value.
    pub fn watch<F>(&self, key: &str, observer: F) -> ConfigResult<()>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let current = self.value(key).load()?;
        if current.is_null() {
            return Err(ConfigError::not_found(key));
        }

        let replaced = self
            .shared
            .observers
            .insert(key.to_string(), Arc::new(observer))
            .is_some();
        tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::debug!(key, replaced, "observer registered");
        });
        Ok(())
    }

    /// Remove the observer for `key`, returning whether one was registered
    pub fn unwatch(&self, key: &str) -> bool {
        self.shared.observers.remove(key).is_some()
    }

    /// Stop every watcher and end the watch tasks.
    ///
    /// Every watcher is asked to stop, in source order, even if an earlier
    /// one fails; the first failure is returned. Closing twice is a no-op.
    pub async fn close(&self) -> ConfigResult<()> {
        let (watchers, tasks) = {
            let mut state = self.state.lock();
            if *state == LifecycleState::Closed {
                return Ok(());
            }
            *state = LifecycleState::Closed;
            (
                std::mem::take(&mut *self.watchers.lock()),
                std::mem::take(&mut *self.tasks.lock()),
            )
        };

        let result = stop_all(&watchers)
            .with_subscriber(self.dispatch.clone())
            .await;

        // releases tasks whose watcher does not honour stop
        self.cancel_token.cancel();
        for task in tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::dispatcher::with_default(&self.dispatch, || {
                    tracing::error!(error = %e, "watch task panicked");
                });
            }
        }

        tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::info!(watchers = watchers.len(), "configuration closed");
        });
        result
    }
}

/// Ask every watcher to stop, returning the first failure
async fn stop_all(watchers: &[ActiveWatcher]) -> ConfigResult<()> {
    let mut errors = ConfigResultAggregator::new();
    for active in watchers {
        let result = active.watcher.stop().await;
        if let Err(e) = &result {
            tracing::warn!(source = %active.source, error = %e, "failed to stop watcher");
        }
        errors.check(result);
    }
    errors.finish()
}

/// Store `latest` into `cached` if it has the same kind and differs.
///
/// Returns whether a store happened.
fn refresh(cached: &Value, latest: &Value) -> bool {
    let (Ok(current), Ok(fresh)) = (cached.load(), latest.load()) else {
        return false;
    };
    if ValueKind::of(&current) != ValueKind::of(&fresh) || current == fresh {
        return false;
    }
    cached.store((*fresh).clone());
    true
}

async fn watch_loop(
    shared: Arc<Shared>,
    source: String,
    watcher: Arc<dyn Watcher>,
    cancel: CancellationToken,
) {
    tracing::info!(source = %source, "watch loop started");
    let mut failures: u32 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = watcher.next() => next,
        };

        match next {
            Ok(kvs) => {
                failures = 0;
                shared.apply(&source, &kvs);
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(source = %source, "watcher cancelled");
                return;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = shared.backoff.delay(failures);
                tracing::error!(
                    source = %source,
                    error = %e,
                    category = ?e.category(),
                    retry_in = ?delay,
                    "failed to watch next config"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    tracing::debug!(source = %source, "watch loop cancelled");
}

impl Shared {
    /// Merge and resolve a change batch, then notify changed cached values.
    ///
    /// A batch that fails to merge or resolve is dropped whole.
    fn apply(&self, source: &str, kvs: &[KeyValue]) {
        if let Err(e) = self.reader.apply(kvs) {
            tracing::error!(
                source,
                error = %e,
                category = ?e.category(),
                "failed to apply next config"
            );
            return;
        }
        self.notify_changes();
    }

    /// Diff every cached value against the resolved tree.
    ///
    /// Changed values of the same kind are stored, then their observer is
    /// called. Values whose kind changed, or whose key disappeared, are left
    /// as they are.
    fn notify_changes(&self) {
        // snapshot first so observers may call back into the cache
        let cached: Vec<(String, Value)> = self
            .cached
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut changed = Vec::new();
        {
            // each pass reads the tree current at the time it stores
            let _diff = self.diff.lock();
            for (key, value) in cached {
                let Some(latest) = self.reader.value(&key) else {
                    continue;
                };
                if refresh(&value, &latest) {
                    changed.push((key, value));
                } else if let (Ok(current), Ok(fresh)) = (value.load(), latest.load())
                    && ValueKind::of(&current) != ValueKind::of(&fresh)
                {
                    tracing::warn!(
                        key = %key,
                        cached = %ValueKind::of(&current),
                        latest = %ValueKind::of(&fresh),
                        "value changed kind; update not applied"
                    );
                }
            }
        }

        // observers run unlocked so they may read or watch freely
        for (key, value) in changed {
            let observer = self.observers.get(&key).map(|o| Arc::clone(o.value()));
            tracing::debug!(key = %key, observed = observer.is_some(), "config value changed");
            if let Some(observer) = observer {
                observer(&key, &value);
            }
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("sources", &self.sources.len())
            .field("state", &self.state())
            .field("cached", &self.shared.cached.len())
            .field("observers", &self.shared.observers.len())
            .field("backoff", &self.shared.backoff)
            .finish()
    }
}

// Cleanup on drop
impl Drop for Config {
    fn drop(&mut self) {
        self.cancel_token.cancel();

        if *self.state.get_mut() == LifecycleState::Running {
            tracing::dispatcher::with_default(&self.dispatch, || {
                tracing::debug!("Config dropped without close; watch tasks cancelled");
            });
        }
    }
}
