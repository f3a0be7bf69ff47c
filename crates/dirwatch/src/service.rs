use std::{fmt::Debug, hash::Hash, path::Path, path::PathBuf};

pub use common::Sensitivity;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Deleted,
    Modified,
    /// Events were coalesced or dropped by the platform.
    Overflow,
}

pub const WATCHED_KINDS: [EventKind; 3] = [EventKind::Created, EventKind::Deleted, EventKind::Modified];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    /// Entry name relative to the key's directory. `None` for overflow.
    pub context: Option<PathBuf>,
}

impl WatchEvent {
    pub fn new(kind: EventKind, context: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            context: Some(context.into()),
        }
    }

    pub const fn overflow() -> Self {
        Self {
            kind: EventKind::Overflow,
            context: None,
        }
    }
}

/// A key is handed out by `take` once, then not again until `reset`; events
/// keep accumulating on it in between.
pub trait WatchKey: Clone + Eq + Hash + Send + Sync + Debug + 'static {
    fn poll_events(&self) -> Vec<WatchEvent>;

    /// Re-arms the key. Returns `false` once the key is permanently invalid.
    fn reset(&self) -> bool;
}

pub trait WatchService: Send + Sync + 'static {
    type Key: WatchKey;

    fn usable() -> bool
    where
        Self: Sized;

    fn register(
        &self,
        dir: &Path,
        kinds: &[EventKind],
        sensitivity: Option<Sensitivity>,
    ) -> Result<Self::Key>;

    /// Blocks until a key is ready. Fails with `WatchError::Closed` once closed.
    fn take(&self) -> Result<Self::Key>;

    fn close(&self);

    fn honors_sensitivity(&self) -> bool {
        false
    }
}
