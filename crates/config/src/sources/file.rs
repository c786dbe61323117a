//! File and directory source with change watching

use crate::core::{
    ConfigError, ConfigResult, ConfigResultExt, KeyValue, Source, Watcher, format_from_extension,
};
use async_trait::async_trait;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Filesystem events buffered before the watcher falls back to a rescan
const EVENT_CAPACITY: usize = 128;

/// Source reading a single file or every file of a directory.
///
/// Each file becomes one key/value keyed by its file name, with the format
/// taken from its extension. Files without an extension are raw leaves.
/// Directories are read non-recursively and hidden files are skipped.
///
/// The watcher follows the containing directory, so files replaced by
/// editors or atomic renames are picked up. Removing a file does not remove
/// its keys from the configuration.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
    format: Option<String>,
    allow_missing: bool,
    debounce: Duration,
}

impl FileSource {
    /// Create a source for a file or directory
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            path,
            format: None,
            allow_missing: false,
            debounce: Duration::from_millis(50),
        }
    }

    /// Use `format` for every file instead of inferring it from extensions
    #[must_use = "builder methods must be chained or built"]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set whether a missing path loads as an empty snapshot
    #[must_use = "builder methods must be chained or built"]
    pub fn allow_missing(mut self, allow: bool) -> Self {
        self.allow_missing = allow;
        self
    }

    /// Set how long the watcher waits for a burst of events to settle
    #[must_use = "builder methods must be chained or built"]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Watched path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, path: &Path, e: &io::Error) -> ConfigError {
        ConfigError::source_error(
            format!("failed to read {}: {e}", path.display()),
            self.name.clone(),
        )
    }

    /// Read one file; `None` if it no longer exists
    async fn read_entry(&self, path: &Path) -> ConfigResult<Option<KeyValue>> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(path, &e)),
        };

        let key = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ConfigError::source_error(
                    format!("{} has no UTF-8 file name", path.display()),
                    self.name.clone(),
                )
            })?;
        let format = self
            .format
            .clone()
            .or_else(|| format_from_extension(path))
            .unwrap_or_default();

        Ok(Some(KeyValue::new(key, data, format)))
    }

    async fn read_dir(&self) -> ConfigResult<Vec<KeyValue>> {
        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| self.io_error(&self.path, &e))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.io_error(&self.path, &e))?
        {
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| self.io_error(&path, &e))?;
            if file_type.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut kvs = Vec::with_capacity(paths.len());
        for path in &paths {
            if let Some(kv) = self.read_entry(path).await? {
                kvs.push(kv);
            }
        }
        Ok(kvs)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

#[async_trait]
impl Source for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> ConfigResult<Vec<KeyValue>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.allow_missing => {
                tracing::debug!(source = %self.name, "config path missing, loading nothing");
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.io_error(&self.path, &e)),
        };

        if metadata.is_dir() {
            self.read_dir().await
        } else {
            Ok(self.read_entry(&self.path).await?.into_iter().collect())
        }
    }

    async fn watch(&self) -> ConfigResult<Arc<dyn Watcher>> {
        let is_dir = tokio::fs::metadata(&self.path)
            .await
            .is_ok_and(|metadata| metadata.is_dir());

        let (dir, file) = if is_dir {
            (self.path.clone(), None)
        } else {
            let parent = self
                .path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file = self.path.file_name().map(OsString::from).ok_or_else(|| {
                ConfigError::source_error(
                    format!("{} does not name a file", self.path.display()),
                    self.name.clone(),
                )
            })?;
            (parent.to_path_buf(), Some(file))
        };
        // event paths are reported under the canonical directory
        let dir = tokio::fs::canonicalize(&dir)
            .await
            .map_err(|e| self.io_error(&dir, &e))?;

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let overflow = Arc::new(AtomicBool::new(false));
        let on_full = Arc::clone(&overflow);
        let mut handle = notify::recommended_watcher(move |event: notify::Result<Event>| {
            if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
                on_full.store(true, Ordering::Release);
                // wakes a receiver that drained the queue before the flag was set
                let _ = tx.try_send(event);
            }
        })
        .map_err(ConfigError::from)
        .with_context(|| format!("failed to watch {}", dir.display()))?;
        handle
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(ConfigError::from)
            .with_context(|| format!("failed to watch {}", dir.display()))?;
        tracing::info!(source = %self.name, dir = %dir.display(), "watching config files");

        Ok(Arc::new(FileWatcher {
            source: self.clone(),
            dir,
            file,
            events: AsyncMutex::new(rx),
            overflow,
            handle: Mutex::new(Some(handle)),
            cancel: CancellationToken::new(),
        }))
    }
}

struct FileWatcher {
    source: FileSource,
    dir: PathBuf,
    file: Option<OsString>,
    events: AsyncMutex<mpsc::Receiver<notify::Result<Event>>>,
    /// Set when an event was dropped on a full queue
    overflow: Arc<AtomicBool>,
    handle: Mutex<Option<RecommendedWatcher>>,
    cancel: CancellationToken,
}

/// What a settled burst of events asks the watcher to re-read
#[derive(Debug, PartialEq, Eq)]
enum Changed {
    Paths(BTreeSet<PathBuf>),
    /// Events were lost; every watched file must be re-read
    All,
}

impl FileWatcher {
    fn is_relevant(&self, path: &Path) -> bool {
        if path.parent() != Some(self.dir.as_path()) {
            return false;
        }
        match &self.file {
            Some(file) => path.file_name() == Some(file.as_os_str()),
            None => !is_hidden(path),
        }
    }

    fn collect(&self, event: &Event, changed: &mut BTreeSet<PathBuf>) {
        if !(event.kind.is_create() || event.kind.is_modify()) {
            return;
        }
        changed.extend(
            event
                .paths
                .iter()
                .filter(|path| self.is_relevant(path))
                .cloned(),
        );
    }

    /// Wait for a settled burst of relevant events
    async fn changed_paths(&self) -> ConfigResult<Changed> {
        let mut events = self.events.lock().await;
        loop {
            let mut changed = BTreeSet::new();
            match events.recv().await {
                None => return Err(ConfigError::Cancelled),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(event)) => self.collect(&event, &mut changed),
            }
            if changed.is_empty() && !self.overflow.load(Ordering::Acquire) {
                continue;
            }

            tokio::time::sleep(self.source.debounce).await;
            while let Ok(pending) = events.try_recv() {
                if let Ok(event) = pending {
                    self.collect(&event, &mut changed);
                }
            }
            // cleared after the drain so later drops raise it again
            if self.overflow.swap(false, Ordering::AcqRel) {
                return Ok(Changed::All);
            }
            return Ok(Changed::Paths(changed));
        }
    }

    /// Re-read every watched file
    async fn rescan(&self) -> ConfigResult<Vec<KeyValue>> {
        tracing::warn!(source = %self.source.name, "file events dropped; rescanning");
        if self.file.is_some() {
            Ok(self
                .source
                .read_entry(&self.source.path)
                .await?
                .into_iter()
                .collect())
        } else {
            self.source.read_dir().await
        }
    }
}

#[async_trait]
impl Watcher for FileWatcher {
    async fn next(&self) -> ConfigResult<Vec<KeyValue>> {
        loop {
            let changed = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ConfigError::Cancelled),
                changed = self.changed_paths() => changed?,
            };

            let kvs = match changed {
                Changed::All => self.rescan().await?,
                Changed::Paths(paths) => {
                    let mut kvs = Vec::with_capacity(paths.len());
                    for path in &paths {
                        if let Some(kv) = self.source.read_entry(path).await? {
                            kvs.push(kv);
                        }
                    }
                    kvs
                }
            };
            if !kvs.is_empty() {
                tracing::debug!(source = %self.source.name, files = kvs.len(), "config files changed");
                return Ok(kvs);
            }
        }
    }

    async fn stop(&self) -> ConfigResult<()> {
        self.cancel.cancel();
        // dropping the handle ends the notify thread and closes the channel
        drop(self.handle.lock().take());
        Ok(())
    }
}

impl fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWatcher")
            .field("source", &self.source.name)
            .field("dir", &self.dir)
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}
