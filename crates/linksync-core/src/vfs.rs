//! File system abstraction.
//!
//! The watcher and the synchronizer never touch `std::fs` directly; they go
//! through [`FileSystem`] so the whole pipeline runs identically over the
//! real disk and over [`MemoryFileSystem`] trees. All paths handed to a
//! `FileSystem` are relative to its root, with forward slashes; `"."` names
//! the root itself.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Identity of a file, used to recognize renames between scans.
///
/// Two snapshots refer to the same underlying object when their ids compare
/// equal. `Device` carries device + inode where the platform exposes them,
/// `Fallback` degrades to size + mtime, `Synthetic` is assigned by the
/// in-memory file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileId {
    Device { dev: u64, ino: u64 },
    Synthetic(u64),
    Fallback { len: u64, mtime: SystemTime },
}

#[derive(Debug, Clone)]
pub struct FileMeta {
    /// Root-relative path with forward slashes.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub is_dir: bool,
    pub len: u64,
    pub mtime: SystemTime,
    pub id: FileId,
}

/// Abstract interface for file system operations.
pub trait FileSystem: Send + Sync {
    /// Stat a single path.
    fn metadata(&self, path: &str) -> io::Result<FileMeta>;

    /// List the immediate children of a directory.
    fn read_dir(&self, path: &str) -> io::Result<Vec<FileMeta>>;

    /// Read the entire contents of a file.
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Write exactly these bytes to the file. Existing files are truncated in
    /// place so their permission bits survive.
    fn write_all(&self, path: &str, bytes: &[u8]) -> io::Result<()>;
}

fn file_name(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[i + 1..].to_string(),
        None => path.to_string(),
    }
}

/// Standard implementation of [`FileSystem`] rooted at a directory.
pub struct PhysicalFileSystem {
    root: PathBuf,
}

impl PhysicalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path == "." {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn meta_from(&self, path: &str, md: &std::fs::Metadata) -> FileMeta {
        let mtime = md.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        FileMeta {
            path: path.to_string(),
            name: file_name(path),
            is_dir: md.is_dir(),
            len: md.len(),
            mtime,
            id: physical_file_id(md, md.len(), mtime),
        }
    }
}

#[cfg(unix)]
fn physical_file_id(md: &std::fs::Metadata, _len: u64, _mtime: SystemTime) -> FileId {
    use std::os::unix::fs::MetadataExt;
    FileId::Device {
        dev: md.dev(),
        ino: md.ino(),
    }
}

#[cfg(not(unix))]
fn physical_file_id(_md: &std::fs::Metadata, len: u64, mtime: SystemTime) -> FileId {
    FileId::Fallback { len, mtime }
}

impl FileSystem for PhysicalFileSystem {
    fn metadata(&self, path: &str) -> io::Result<FileMeta> {
        let md = std::fs::metadata(self.resolve(path))?;
        Ok(self.meta_from(path, &md))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<FileMeta>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(self.resolve(path))? {
            let Ok(entry) = entry else { continue };
            let Ok(md) = entry.metadata() else { continue };
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = if path == "." {
                name.clone()
            } else {
                format!("{path}/{name}")
            };
            entries.push(self.meta_from(&child, &md));
        }
        Ok(entries)
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path))
    }

    fn write_all(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        use std::io::Write;
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(target)?;
        file.write_all(bytes)
    }
}

#[derive(Clone)]
struct MemEntry {
    data: Vec<u8>,
    mtime: SystemTime,
    is_dir: bool,
    id: u64,
}

struct MemState {
    entries: Mutex<BTreeMap<String, MemEntry>>,
    clock: AtomicU64,
    next_id: AtomicU64,
}

/// In-memory [`FileSystem`] with synthetic inode identity and a deterministic
/// logical clock for modification times.
#[derive(Clone)]
pub struct MemoryFileSystem {
    inner: Arc<MemState>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemState {
                entries: Mutex::new(BTreeMap::new()),
                clock: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn tick(&self) -> SystemTime {
        let t = self.inner.clock.fetch_add(1, Ordering::SeqCst) + 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(t)
    }

    fn new_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn ensure_parents(&self, entries: &mut BTreeMap<String, MemEntry>, path: &str) {
        let mut dir = crate::paths::parent(path);
        let mut missing = Vec::new();
        while !dir.is_empty() && !entries.contains_key(dir) {
            missing.push(dir.to_string());
            dir = crate::paths::parent(dir);
        }
        for dir in missing.into_iter().rev() {
            let entry = MemEntry {
                data: Vec::new(),
                mtime: self.tick(),
                is_dir: true,
                id: self.new_id(),
            };
            entries.insert(dir, entry);
        }
    }

    pub fn add_dir(&self, path: &str) {
        let mtime = self.tick();
        let id = self.new_id();
        let mut entries = self.inner.entries.lock().unwrap();
        self.ensure_parents(&mut entries, path);
        entries.insert(
            path.to_string(),
            MemEntry {
                data: Vec::new(),
                mtime,
                is_dir: true,
                id,
            },
        );
    }

    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let mtime = self.tick();
        let id = self.new_id();
        let mut entries = self.inner.entries.lock().unwrap();
        self.ensure_parents(&mut entries, path);
        entries.insert(
            path.to_string(),
            MemEntry {
                data: contents.into(),
                mtime,
                is_dir: false,
                id,
            },
        );
    }

    /// Bumps the entry's modification time, as an editor save would.
    pub fn touch(&self, path: &str) {
        let mtime = self.tick();
        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(path) {
            entry.mtime = mtime;
        }
    }

    /// Moves an entry (and, for directories, everything under it) while
    /// preserving identity, the way a rename on a real file system does.
    pub fn rename(&self, from: &str, to: &str) {
        let mut entries = self.inner.entries.lock().unwrap();
        let Some(entry) = entries.remove(from) else {
            return;
        };
        if entry.is_dir {
            let prefix = format!("{from}/");
            let children: Vec<String> = entries
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            for child in children {
                if let Some(e) = entries.remove(&child) {
                    let moved = format!("{to}/{}", &child[prefix.len()..]);
                    entries.insert(moved, e);
                }
            }
        }
        self.ensure_parents(&mut entries, to);
        entries.insert(to.to_string(), entry);
    }

    pub fn remove(&self, path: &str) {
        let mut entries = self.inner.entries.lock().unwrap();
        let dir = entries.get(path).is_some_and(|e| e.is_dir);
        entries.remove(path);
        if dir {
            let prefix = format!("{path}/");
            entries.retain(|k, _| !k.starts_with(&prefix));
        }
    }

    /// Returns the file contents as text, for assertions.
    pub fn contents(&self, path: &str) -> Option<String> {
        let entries = self.inner.entries.lock().unwrap();
        entries
            .get(path)
            .map(|e| String::from_utf8_lossy(&e.data).into_owned())
    }

    fn meta_of(&self, path: &str, entry: &MemEntry) -> FileMeta {
        FileMeta {
            path: path.to_string(),
            name: file_name(path),
            is_dir: entry.is_dir,
            len: entry.data.len() as u64,
            mtime: entry.mtime,
            id: FileId::Synthetic(entry.id),
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn metadata(&self, path: &str) -> io::Result<FileMeta> {
        if path == "." {
            return Ok(FileMeta {
                path: ".".to_string(),
                name: ".".to_string(),
                is_dir: true,
                len: 0,
                mtime: SystemTime::UNIX_EPOCH,
                id: FileId::Synthetic(0),
            });
        }
        let entries = self.inner.entries.lock().unwrap();
        entries
            .get(path)
            .map(|e| self.meta_of(path, e))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<FileMeta>> {
        let entries = self.inner.entries.lock().unwrap();
        if path != "." && !entries.get(path).is_some_and(|e| e.is_dir) {
            return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
        }
        let prefix = if path == "." {
            String::new()
        } else {
            format!("{path}/")
        };
        Ok(entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix) && !k[prefix.len()..].contains('/'))
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, e)| self.meta_of(k, e))
            .collect())
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let entries = self.inner.entries.lock().unwrap();
        match entries.get(path) {
            Some(e) if !e.is_dir => Ok(e.data.clone()),
            Some(_) => Err(io::Error::new(io::ErrorKind::InvalidInput, "is a directory")),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }

    fn write_all(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let mtime = self.tick();
        let mut entries = self.inner.entries.lock().unwrap();
        self.ensure_parents(&mut entries, path);
        match entries.get_mut(path) {
            Some(entry) => {
                entry.data = bytes.to_vec();
                entry.mtime = mtime;
            }
            None => {
                let id = self.new_id();
                entries.insert(
                    path.to_string(),
                    MemEntry {
                        data: bytes.to_vec(),
                        mtime,
                        is_dir: false,
                        id,
                    },
                );
            }
        }
        Ok(())
    }
}
