use std::path::PathBuf;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch service closed")]
    Closed,
    #[error("failed to register {}: {source}", path.display())]
    Registration {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("{backend} watch backend is not usable on this platform")]
    Unusable { backend: &'static str },
    #[error("failed to initialize watch service: {0}")]
    Init(#[source] BoxError),
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("event loop aborted: {0}")]
    Aborted(#[source] Box<WatchError>),
}

impl WatchError {
    pub fn registration(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        Self::Registration {
            path: path.into(),
            source: source.into(),
        }
    }

    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
