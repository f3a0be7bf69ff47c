use std::sync::Arc;

use ahash::AHashSet;
use parking_lot::Mutex;

/// Directories with changes not yet reported, shared between the event loop
/// (which only appends) and whoever drains it.
#[derive(Debug, Clone, Default)]
pub struct ChangedDirectories {
    inner: Arc<Mutex<Vec<String>>>,
}

impl ChangedDirectories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, dir: String) {
        self.inner.lock().push(dir);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Empties the buffer, returning each directory once in first-seen order.
    pub fn drain(&self) -> Vec<String> {
        let pending = std::mem::take(&mut *self.inner.lock());
        let mut seen = AHashSet::with_capacity(pending.len());
        pending
            .into_iter()
            .filter(|dir| seen.insert(dir.clone()))
            .collect()
    }
}

/// Receives drained batches of changed directories.
pub trait ChangeListener: Send + Sync + 'static {
    fn on_change(&self, directories: Vec<String>);
}

impl<F> ChangeListener for F
where
    F: Fn(Vec<String>) + Send + Sync + 'static,
{
    fn on_change(&self, directories: Vec<String>) {
        self(directories);
    }
}
