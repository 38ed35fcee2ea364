//! The synchronization engine.
//!
//! [`LinkSyncer`] owns the reference graph: `sources` maps every parsable
//! note to its links in occurrence order, `linked` maps every referenced
//! asset to the set of notes referencing it. The event loop consumes watcher
//! events, mutating the graph immediately for creates, writes and removes,
//! and buffering renames until the scan cycle completes. The buffered batch
//! is then applied by [`LinkSyncer::sync`], which rewrites note bodies on
//! disk: moved notes get their own links re-pointed, and bystander notes
//! referencing a moved asset are fixed up afterwards. Processing renames as
//! one batch is what keeps a simultaneous move of a note and its asset
//! consistent.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::error::Error;
use crate::links::{self, LinkExtractor, LinkInfo, MarkupExtractor, MovedLink};
use crate::vfs::{FileMeta, FileSystem};
use crate::watcher::{Event, FsPoller, Op, WatcherChannels};

#[derive(Default)]
struct Graph {
    /// note -> its links, in textual order
    sources: HashMap<String, Vec<LinkInfo>>,
    /// asset -> notes referencing it; entries are never stored empty
    linked: HashMap<String, HashSet<String>>,
}

pub struct LinkSyncer {
    fs: Arc<dyn FileSystem>,
    extractor: Arc<dyn LinkExtractor>,
    watcher: Arc<FsPoller>,
    channels: Mutex<Option<WatcherChannels>>,
    graph: Mutex<Graph>,
    stop: CancellationToken,
}

fn should_skip(meta: &FileMeta, max_file_size: u64, excluded_dirs: &HashSet<String>) -> bool {
    if meta.is_dir {
        if meta.name == "." {
            // never skip the root itself
            return false;
        }
        return meta.name.starts_with('.') || excluded_dirs.contains(&meta.name);
    }
    if links::is_parsable(&meta.name) {
        return meta.len > max_file_size;
    }
    !links::is_image(&meta.name)
}

impl LinkSyncer {
    pub fn new(fs: Arc<dyn FileSystem>, config: &SyncConfig) -> Self {
        let (watcher, channels) = FsPoller::new(fs.clone());
        let max_file_size = config.max_file_size;
        let excluded_dirs: HashSet<String> = config.excluded_dirs.iter().cloned().collect();
        watcher.add_skip_hook(move |meta| should_skip(meta, max_file_size, &excluded_dirs));

        Self {
            fs,
            extractor: Arc::new(MarkupExtractor),
            watcher: Arc::new(watcher),
            channels: Mutex::new(Some(channels)),
            graph: Mutex::new(Graph::default()),
            stop: CancellationToken::new(),
        }
    }

    /// Replaces the parser capability, for tests and embedders.
    pub fn with_extractor(mut self, extractor: Arc<dyn LinkExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Walks the file tree, registers it with the watcher and parses every
    /// valid file. Returns the elapsed time.
    pub fn process_files(&self) -> Duration {
        let started = Instant::now();
        self.process_dirs(&["."]);
        started.elapsed()
    }

    fn process_dirs(&self, dirs: &[&str]) {
        for dir in dirs {
            let paths = match self.watcher.add(dir) {
                Ok(paths) => paths,
                Err(err) => {
                    error!("Couldn't add folder {dir} to watcher: {err}");
                    continue;
                }
            };
            let mut graph = self.graph.lock().unwrap();
            for (path, snapshot) in &paths {
                if !snapshot.is_dir && links::is_parsable(path) {
                    self.add_file_locked(&mut graph, path);
                }
            }
        }
    }

    /// Reads, parses and records a file and its links.
    pub fn add_file(&self, path: &str) {
        let mut graph = self.graph.lock().unwrap();
        self.add_file_locked(&mut graph, path);
    }

    fn add_file_locked(&self, graph: &mut Graph, path: &str) {
        graph.sources.insert(path.to_string(), Vec::new());
        let data = match self.read_file(path) {
            Ok(data) => data,
            Err(err) => {
                error!("Couldn't read file. {err}");
                return;
            }
        };
        let content = String::from_utf8_lossy(&data);
        let (links, images) = self.extractor.extract(path, &content);
        save_links(graph, path, [links, images]);
    }

    fn add_path_locked(&self, graph: &mut Graph, path: &str) {
        let meta = match self.fs.metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                error!("Couldn't stat {path}. {err}");
                return;
            }
        };
        if !meta.is_dir && links::is_parsable(path) {
            self.add_file_locked(graph, path);
            info!("Added file: {path}");
        }
    }

    /// Re-parses a known file after a write, or adds a new one.
    pub fn update_file(&self, path: &str) {
        let mut graph = self.graph.lock().unwrap();
        self.update_file_locked(&mut graph, path);
    }

    fn update_file_locked(&self, graph: &mut Graph, path: &str) {
        if let Some(old_links) = graph.sources.get(path).cloned() {
            for link in &old_links {
                clear_link_references(graph, path, &link.root_path);
            }
            self.add_file_locked(graph, path);
            info!("File updated: {path}");
            return;
        }
        self.add_path_locked(graph, path);
    }

    /// Removes a file and its references from the graph.
    pub fn remove_file(&self, path: &str) {
        let mut graph = self.graph.lock().unwrap();
        Self::remove_file_locked(&mut graph, path);
    }

    fn remove_file_locked(graph: &mut Graph, path: &str) {
        if let Some(links) = graph.sources.remove(path) {
            for link in &links {
                clear_link_references(graph, path, &link.root_path);
            }
        }
    }

    /// Transfers a note from `old_path` to `new_path` in the graph and
    /// rewrites the links in its content. `moves` holds every move of the
    /// current batch, so a note moved together with its assets resolves them
    /// to their new locations.
    pub fn move_file(&self, old_path: &str, new_path: &str, moves: &HashMap<String, String>) {
        let mut graph = self.graph.lock().unwrap();
        self.move_file_locked(&mut graph, old_path, new_path, moves);
    }

    fn move_file_locked(
        &self,
        graph: &mut Graph,
        old_path: &str,
        new_path: &str,
        moves: &HashMap<String, String>,
    ) {
        let Some(links) = graph.sources.remove(old_path) else {
            return;
        };
        graph.sources.insert(new_path.to_string(), links.clone());
        if links.is_empty() {
            return;
        }

        let mut moved_links = Vec::with_capacity(links.len());
        for link in links {
            let to = moves
                .get(&link.root_path)
                .cloned()
                .unwrap_or_else(|| link.root_path.clone());
            clear_link_references(graph, old_path, &link.root_path);
            moved_links.push(MovedLink { to, link });
        }
        info!("File moved: {old_path} -> {new_path}");
        if let Err(err) = self.update_links_in_file_locked(graph, new_path, &moved_links) {
            error!("Couldn't update links in {new_path}. Error: {err}");
        }
    }

    /// Rewrites the given links in a file on disk and refreshes its graph
    /// entry from the updated content.
    pub fn update_links_in_file(&self, path: &str, moved_links: &[MovedLink]) -> Result<(), Error> {
        let mut graph = self.graph.lock().unwrap();
        self.update_links_in_file_locked(&mut graph, path, moved_links)
    }

    fn update_links_in_file_locked(
        &self,
        graph: &mut Graph,
        path: &str,
        moved_links: &[MovedLink],
    ) -> Result<(), Error> {
        let data = self.read_file(path)?;
        let content = String::from_utf8_lossy(&data);
        let updated = links::replace_links(path, &content, moved_links);

        self.fs
            .write_all(path, updated.as_bytes())
            .map_err(|e| Error::from_io(path, e))?;

        let (links, images) = self.extractor.extract(path, &updated);
        for moved in moved_links {
            clear_link_references(graph, path, &moved.link.root_path);
        }
        save_links(graph, path, [links, images]);
        info!("Links updated: {path}");

        Ok(())
    }

    /// Applies a batch of moves (`from -> to`): relocates moved notes,
    /// rewrites their links, then fixes up every note referencing a moved
    /// asset.
    pub fn sync(&self, moves: &HashMap<String, String>) {
        let mut graph = self.graph.lock().unwrap();

        let mut moved_assets: HashMap<String, String> = HashMap::new();
        for (from, to) in moves {
            if graph.sources.contains_key(from) {
                self.move_file_locked(&mut graph, from, to, moves);
            }
            if graph.linked.contains_key(from) {
                moved_assets.insert(from.clone(), to.clone());
                info!("Linked file moved: {from} -> {to}");
            }
        }

        for (source, moved_links) in files_to_sync(&graph, &moved_assets) {
            if let Err(err) = self.update_links_in_file_locked(&mut graph, &source, &moved_links) {
                error!("Couldn't update links in {source}. Error: {err}");
            }
        }
    }

    fn process_event(&self, event: Event, moves: &mut HashMap<String, String>) {
        let mut graph = self.graph.lock().unwrap();
        match event.op {
            Op::Create => self.add_path_locked(&mut graph, &event.name),
            Op::Remove => Self::remove_file_locked(&mut graph, &event.name),
            Op::Write => self.update_file_locked(&mut graph, &event.name),
            Op::Rename => {
                if let Some(new_path) = event.new_path {
                    moves.insert(event.name, new_path);
                }
            }
        }
    }

    /// Consumes watcher events until shutdown. Renames are buffered and
    /// applied as one batch at each scan boundary.
    pub async fn run(&self) {
        let taken = self.channels.lock().unwrap().take();
        let Some(mut channels) = taken else {
            return;
        };
        let mut moves: HashMap<String, String> = HashMap::new();
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                event = channels.events.recv() => match event {
                    Some(event) => self.process_event(event, &mut moves),
                    None => break,
                },
                complete = channels.scan_complete.recv() => {
                    if complete.is_none() {
                        break;
                    }
                    // every event of the cycle was sent before the rendezvous;
                    // drain whatever is still buffered before syncing
                    while let Ok(event) = channels.events.try_recv() {
                        self.process_event(event, &mut moves);
                    }
                    if moves.is_empty() {
                        continue;
                    }
                    let batch = std::mem::take(&mut moves);
                    self.sync(&batch);
                }
                Some(err) = channels.errors.recv() => error!("{err}"),
            }
        }
    }

    /// Performs a single scan cycle and applies any resulting moves.
    pub async fn run_once(&self) -> Result<(), Error> {
        let taken = self.channels.lock().unwrap().take();
        let Some(mut channels) = taken else {
            return Ok(());
        };

        let scanner = {
            let watcher = self.watcher.clone();
            tokio::spawn(async move { watcher.scan().await })
        };

        let mut moves: HashMap<String, String> = HashMap::new();
        loop {
            tokio::select! {
                event = channels.events.recv() => match event {
                    Some(event) => self.process_event(event, &mut moves),
                    None => break,
                },
                _ = channels.scan_complete.recv() => {
                    while let Ok(event) = channels.events.try_recv() {
                        self.process_event(event, &mut moves);
                    }
                    break;
                }
                Some(err) = channels.errors.recv() => error!("{err}"),
            }
        }
        if !moves.is_empty() {
            self.sync(&moves);
        }

        *self.channels.lock().unwrap() = Some(channels);
        scanner.await.unwrap_or(Ok(()))
    }

    /// Spawns the event loop and the watcher ticker. Returns the event-loop
    /// handle so callers can await a clean drain after [`LinkSyncer::close`].
    pub fn watch(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let events = {
            let syncer = self.clone();
            tokio::spawn(async move { syncer.run().await })
        };
        let watcher = self.watcher.clone();
        tokio::spawn(async move {
            if let Err(err) = watcher.start(interval).await {
                error!("{err}");
            }
        });
        events
    }

    /// Triggers one scan cycle on the watcher.
    pub async fn scan(&self) -> Result<(), Error> {
        self.watcher.scan().await
    }

    /// Shuts everything down in reverse order of acquisition: the watcher
    /// first, then the event loop. Idempotent.
    pub fn close(&self) {
        self.watcher.close();
        self.stop.cancel();
    }

    pub fn sources_len(&self) -> usize {
        self.graph.lock().unwrap().sources.len()
    }

    pub fn refs_len(&self) -> usize {
        self.graph.lock().unwrap().linked.len()
    }

    /// Copy of the note -> links mapping.
    pub fn sources(&self) -> HashMap<String, Vec<LinkInfo>> {
        self.graph.lock().unwrap().sources.clone()
    }

    /// Copy of the asset -> notes mapping.
    pub fn linked(&self) -> HashMap<String, HashSet<String>> {
        self.graph.lock().unwrap().linked.clone()
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.fs.read(path).map_err(|e| Error::from_io(path, e))
    }
}

/// Removes the `source -> asset` reference, dropping the asset entry when it
/// loses its last referent.
fn clear_link_references(graph: &mut Graph, source: &str, asset: &str) {
    if let Some(referents) = graph.linked.get_mut(asset) {
        referents.remove(source);
        if referents.is_empty() {
            graph.linked.remove(asset);
        }
    }
}

/// Records a note's links, replacing whatever was stored before. Duplicates
/// collapse in `linked` but stay in `sources`, whose order mirrors the text.
fn save_links(graph: &mut Graph, source: &str, groups: [Vec<LinkInfo>; 2]) {
    let mut all = Vec::new();
    for group in groups {
        for link in group {
            graph
                .linked
                .entry(link.root_path.clone())
                .or_default()
                .insert(source.to_string());
            all.push(link);
        }
    }
    graph.sources.insert(source.to_string(), all);
}

/// Collects the notes that reference a moved asset, with the exact links to
/// rewrite in each.
fn files_to_sync(
    graph: &Graph,
    moved_assets: &HashMap<String, String>,
) -> Vec<(String, Vec<MovedLink>)> {
    let mut result: HashMap<String, Vec<MovedLink>> = HashMap::new();
    for from in moved_assets.keys() {
        let Some(referents) = graph.linked.get(from) else {
            continue;
        };
        for source in referents {
            if result.contains_key(source) {
                continue;
            }
            let Some(links) = graph.sources.get(source) else {
                continue;
            };
            let moved: Vec<MovedLink> = links
                .iter()
                .filter_map(|link| {
                    moved_assets.get(&link.root_path).map(|to| MovedLink {
                        to: to.clone(),
                        link: link.clone(),
                    })
                })
                .collect();
            if !moved.is_empty() {
                result.insert(source.clone(), moved);
            }
        }
    }
    result.into_iter().collect()
}
