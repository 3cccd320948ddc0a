use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

/// Quiet time after the last write before the document counts as finished.
const DEFAULT_SETTLE_MS: u64 = 250;

/// Collapses a burst of change notifications into one "finished" signal once
/// no new notification arrived for the settle period.
#[derive(Debug)]
pub struct Debouncer {
    settle: Duration,
    last_change: Option<Instant>,
}

impl Debouncer {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            last_change: None,
        }
    }

    pub fn note_change(&mut self, now: Instant) {
        self.last_change = Some(now);
    }

    pub fn is_pending(&self) -> bool {
        self.last_change.is_some()
    }

    /// True exactly once per burst, when the burst has settled.
    pub fn take_ready(&mut self, now: Instant) -> bool {
        match self.last_change {
            Some(last) if now.duration_since(last) >= self.settle => {
                self.last_change = None;
                true
            }
            _ => false,
        }
    }
}

/// Watches the directory holding the previewed document. Compilers often
/// replace the file instead of rewriting it, so watching the file itself
/// would lose track of it after the first build.
pub struct DocumentWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
    file_name: OsString,
    debouncer: Debouncer,
}

impl DocumentWatcher {
    pub fn new(document: &Path) -> Result<Self> {
        Self::with_settle(document, Duration::from_millis(DEFAULT_SETTLE_MS))
    }

    pub fn with_settle(document: &Path, settle: Duration) -> Result<Self> {
        let file_name = document
            .file_name()
            .ok_or_else(|| anyhow!("{:?} does not name a file", document))?
            .to_os_string();
        let directory = match document.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {:?}", directory))?;
        debug!(directory = %directory.display(), "watching for document changes");

        Ok(Self {
            _watcher: watcher,
            rx,
            file_name,
            debouncer: Debouncer::new(settle),
        })
    }

    /// Drains raw notifications and reports whether a settled change of the
    /// document is ready to be loaded.
    pub fn poll(&mut self) -> bool {
        let now = Instant::now();
        while let Ok(result) = self.rx.try_recv() {
            match result {
                Ok(event) if self.concerns_document(&event) => self.debouncer.note_change(now),
                Ok(_) => {}
                Err(err) => warn!("watch error: {err}"),
            }
        }
        self.debouncer.take_ready(now)
    }

    /// A change was seen but has not settled yet.
    pub fn is_writing(&self) -> bool {
        self.debouncer.is_pending()
    }

    fn concerns_document(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(self.file_name.as_os_str()))
    }
}
