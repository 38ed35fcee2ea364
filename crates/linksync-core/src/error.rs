use thiserror::Error;

/// Errors surfaced by the watcher and the synchronizer.
///
/// `Io` and `Walk` are recoverable: the affected operation is aborted and
/// logged, the watcher keeps running. `Closed` and `AlreadyRunning` are
/// returned to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("watcher is closed")]
    Closed,

    #[error("watcher is already running")]
    AlreadyRunning,

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error while walking {path}: {source}")]
    Walk {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn from_io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path),
            _ => Error::Io { path, source },
        }
    }
}
