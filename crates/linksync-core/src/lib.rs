//! linksync core library.
//!
//! Keeps image and note links inside Markdown and HTML files consistent when
//! files are rearranged. A polling watcher diffs directory snapshots into
//! file events, a hand-written parser extracts link occurrences with their
//! exact source spans, and the synchronizer maintains the note/asset
//! reference graph and rewrites note bodies whenever linked files move.

pub mod config;
pub mod error;
pub mod links;
pub mod parser;
pub mod paths;
pub mod syncer;
pub mod vfs;
pub mod watcher;


pub use config::SyncConfig;
pub use error::Error;
pub use links::{LinkExtractor, LinkInfo, MarkupExtractor, MovedLink};
pub use syncer::LinkSyncer;
pub use vfs::{FileId, FileMeta, FileSystem, MemoryFileSystem, PhysicalFileSystem};
pub use watcher::{Event, FsPoller, Op, WatcherChannels};
