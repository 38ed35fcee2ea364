//! Polling file watcher.
//!
//! Exposes an interface shaped like a kernel file-notification service but
//! implemented by periodic snapshot diffing, so behaviour is identical across
//! operating systems and over in-memory file systems.
//!
//! Each tick re-walks the watched roots, diffs the result against the
//! previous snapshot and emits `Create`/`Write`/`Remove`/`Rename` events.
//! Renames are inferred by matching file identity across the diff: a path
//! that disappeared and a new path with the same identity become one
//! `Rename`, never a `Remove` + `Create` pair. Every scan cycle ends with a
//! rendezvous on the `scan_complete` channel, which lets the consumer apply
//! buffered renames as one batch.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::paths;
use crate::vfs::{FileId, FileMeta, FileSystem};

/// Minimum scan period; shorter requests are floored to this.
pub const MIN_INTERVAL: Duration = Duration::from_millis(20);

const EVENT_CHANNEL_CAPACITY: usize = 256;
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// File operation that triggered an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Write,
    Remove,
    Rename,
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Op::Create => "CREATE",
            Op::Write => "WRITE",
            Op::Remove => "REMOVE",
            Op::Rename => "RENAME",
        };
        f.write_str(s)
    }
}

/// A single file system notification. `name` is the pre-event root-relative
/// path; `new_path` is set only for renames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub op: Op,
    pub name: String,
    pub new_path: Option<String>,
}

/// What the watcher remembers about a path between scans.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub mtime: SystemTime,
    pub is_dir: bool,
    pub id: FileId,
}

impl From<&FileMeta> for FileSnapshot {
    fn from(meta: &FileMeta) -> Self {
        Self {
            mtime: meta.mtime,
            is_dir: meta.is_dir,
            id: meta.id.clone(),
        }
    }
}

/// Receiving ends of the watcher's channels, handed out once at construction.
pub struct WatcherChannels {
    pub events: mpsc::Receiver<Event>,
    pub errors: mpsc::Receiver<Error>,
    pub scan_complete: mpsc::Receiver<()>,
}

type SkipHook = Box<dyn Fn(&FileMeta) -> bool + Send + Sync>;

#[derive(Default)]
struct PollerState {
    /// Watched roots, in insertion order.
    watches: Vec<String>,
    /// Current snapshot of every path reachable through a watched root.
    files: HashMap<String, FileSnapshot>,
    skip: Option<SkipHook>,
    running: bool,
    closed: bool,
}

/// Polling implementation of a file watcher.
pub struct FsPoller {
    fs: Arc<dyn FileSystem>,
    state: Mutex<PollerState>,
    events_tx: mpsc::Sender<Event>,
    errors_tx: mpsc::Sender<Error>,
    scan_tx: mpsc::Sender<()>,
    done: CancellationToken,
}

impl FsPoller {
    pub fn new(fs: Arc<dyn FileSystem>) -> (Self, WatcherChannels) {
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (errors_tx, errors) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let (scan_tx, scan_complete) = mpsc::channel(1);
        (
            Self {
                fs,
                state: Mutex::new(PollerState::default()),
                events_tx,
                errors_tx,
                scan_tx,
                done: CancellationToken::new(),
            },
            WatcherChannels {
                events,
                errors,
                scan_complete,
            },
        )
    }

    /// Installs a predicate deciding per entry whether it is skipped.
    /// Skipped directories are not descended into.
    pub fn add_skip_hook(&self, hook: impl Fn(&FileMeta) -> bool + Send + Sync + 'static) {
        let mut state = self.state.lock().unwrap();
        state.skip = Some(Box::new(hook));
    }

    /// Adds `name` to the watched paths and records a snapshot of everything
    /// reachable through it. Returns the recorded entries.
    pub fn add(&self, name: &str) -> Result<HashMap<String, FileSnapshot>, Error> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::Closed);
        }

        let name = if name == "." {
            ".".to_string()
        } else {
            paths::normalize(name)
        };

        let mut added = HashMap::new();
        let mut walk_errors = Vec::new();
        self.walk(state.skip.as_ref(), &name, &mut added, &mut walk_errors)
            .map_err(|e| Error::from_io(name.clone(), e))?;
        for err in walk_errors {
            tracing::warn!("{err}");
        }

        for (path, snapshot) in &added {
            state.files.insert(path.clone(), snapshot.clone());
        }
        if !state.watches.iter().any(|w| w == &name) {
            state.watches.push(name);
        }

        Ok(added)
    }

    fn walk(
        &self,
        skip: Option<&SkipHook>,
        name: &str,
        out: &mut HashMap<String, FileSnapshot>,
        errors: &mut Vec<Error>,
    ) -> io::Result<()> {
        let meta = self.fs.metadata(name)?;
        if skip.is_some_and(|hook| hook(&meta)) {
            return Ok(());
        }
        out.insert(meta.path.clone(), FileSnapshot::from(&meta));
        if meta.is_dir {
            self.walk_dir(skip, &meta.path, out, errors);
        }
        Ok(())
    }

    fn walk_dir(
        &self,
        skip: Option<&SkipHook>,
        dir: &str,
        out: &mut HashMap<String, FileSnapshot>,
        errors: &mut Vec<Error>,
    ) {
        let entries = match self.fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(source) => {
                // transient walk errors abort this directory only
                errors.push(Error::Walk {
                    path: dir.to_string(),
                    source,
                });
                return;
            }
        };
        for entry in entries {
            if skip.is_some_and(|hook| hook(&entry)) {
                continue;
            }
            out.insert(entry.path.clone(), FileSnapshot::from(&entry));
            if entry.is_dir {
                self.walk_dir(skip, &entry.path, out, errors);
            }
        }
    }

    /// Runs one scan cycle: walk, diff, emit events, rendezvous on
    /// `scan_complete`.
    pub async fn scan(&self) -> Result<(), Error> {
        let (events, walk_errors) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(Error::Closed);
            }

            let mut new_files: HashMap<String, FileSnapshot> = HashMap::new();
            let mut walk_errors = Vec::new();
            let mut dead_watches = Vec::new();
            let watches = state.watches.clone();
            for name in &watches {
                match self.walk(state.skip.as_ref(), name, &mut new_files, &mut walk_errors) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        // the diff below reports the path and its children
                        dead_watches.push(name.clone());
                    }
                    Err(source) => walk_errors.push(Error::Walk {
                        path: name.clone(),
                        source,
                    }),
                }
            }
            if !dead_watches.is_empty() {
                state.watches.retain(|w| !dead_watches.contains(w));
            }

            let mut events = Vec::new();
            let mut consumed: HashSet<String> = HashSet::new();

            for (path, old) in &state.files {
                match new_files.get(path) {
                    Some(new) => {
                        if new.mtime != old.mtime {
                            events.push(Event {
                                op: Op::Write,
                                name: path.clone(),
                                new_path: None,
                            });
                        }
                    }
                    None => {
                        // vanished: a new entry with the same identity means
                        // the path was renamed, and each match is used once
                        let matched = new_files
                            .iter()
                            .find(|(candidate, snapshot)| {
                                !state.files.contains_key(*candidate)
                                    && !consumed.contains(*candidate)
                                    && snapshot.id == old.id
                            })
                            .map(|(candidate, _)| candidate.clone());
                        match matched {
                            Some(new_path) => {
                                consumed.insert(new_path.clone());
                                events.push(Event {
                                    op: Op::Rename,
                                    name: path.clone(),
                                    new_path: Some(new_path),
                                });
                            }
                            None => events.push(Event {
                                op: Op::Remove,
                                name: path.clone(),
                                new_path: None,
                            }),
                        }
                    }
                }
            }

            for path in new_files.keys() {
                if !state.files.contains_key(path) && !consumed.contains(path) {
                    events.push(Event {
                        op: Op::Create,
                        name: path.clone(),
                        new_path: None,
                    });
                }
            }

            // a removed or renamed path is no longer a valid watch root
            for event in &events {
                if matches!(event.op, Op::Remove | Op::Rename) {
                    state.watches.retain(|w| w != &event.name);
                }
            }

            state.files = new_files;
            (events, walk_errors)
        };

        for err in walk_errors {
            self.send_error(err).await?;
        }
        for event in events {
            self.send_event(event).await?;
        }
        self.send_scan_complete().await
    }

    /// Scans on a ticker until the watcher is closed.
    pub async fn start(&self, interval: Duration) -> Result<(), Error> {
        let interval = interval.max(MIN_INTERVAL);
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(Error::Closed);
            }
            if state.running {
                return Err(Error::AlreadyRunning);
            }
            state.running = true;
        }

        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.done.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if self.scan().await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Shuts the watcher down. Idempotent; in-flight sends unwind with
    /// `Closed`.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        if state.closed {
            return;
        }
        state.closed = true;
        self.done.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Snapshot of the currently watched paths.
    pub fn watched_list(&self) -> HashMap<String, FileSnapshot> {
        self.state.lock().unwrap().files.clone()
    }

    async fn send_event(&self, event: Event) -> Result<(), Error> {
        tokio::select! {
            _ = self.done.cancelled() => Err(Error::Closed),
            sent = self.events_tx.send(event) => sent.map_err(|_| Error::Closed),
        }
    }

    async fn send_error(&self, error: Error) -> Result<(), Error> {
        tokio::select! {
            _ = self.done.cancelled() => Err(Error::Closed),
            sent = self.errors_tx.send(error) => sent.map_err(|_| Error::Closed),
        }
    }

    async fn send_scan_complete(&self) -> Result<(), Error> {
        tokio::select! {
            _ = self.done.cancelled() => Err(Error::Closed),
            sent = self.scan_tx.send(()) => sent.map_err(|_| Error::Closed),
        }
    }
}
