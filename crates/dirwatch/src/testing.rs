use std::{
    collections::VecDeque,
    fmt,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
};

use ahash::{AHashMap, AHashSet};
use parking_lot::{Condvar, Mutex};

use crate::{
    error::{Result, WatchError},
    service::{EventKind, Sensitivity, WatchEvent, WatchKey, WatchService},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Registration {
    pub dir: PathBuf,
    pub kinds: Vec<EventKind>,
    pub sensitivity: Option<Sensitivity>,
}

#[derive(Default)]
struct KeyState {
    dir: PathBuf,
    events: Vec<WatchEvent>,
    signalled: bool,
    valid: bool,
}

#[derive(Default)]
struct State {
    next_id: u64,
    keys: AHashMap<u64, KeyState>,
    by_dir: AHashMap<PathBuf, u64>,
    ready: VecDeque<u64>,
    closed: bool,
    failing: AHashSet<PathBuf>,
    honors_sensitivity: bool,
    broken_take: bool,
    registrations: Vec<Registration>,
}

impl State {
    fn signal(&mut self, id: u64) -> bool {
        let Some(key) = self.keys.get_mut(&id) else {
            return false;
        };
        if !key.signalled {
            key.signalled = true;
            self.ready.push_back(id);
            return true;
        }
        false
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

#[derive(Clone, Default)]
pub(crate) struct FakeService {
    shared: Arc<Shared>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_registration(&self, dir: &Path) {
        self.shared.state.lock().failing.insert(dir.to_path_buf());
    }

    /// Makes every later `take` fail with a backend error.
    pub fn break_take(&self) {
        self.shared.state.lock().broken_take = true;
        self.shared.ready.notify_all();
    }

    pub fn set_honors_sensitivity(&self, honors: bool) {
        self.shared.state.lock().honors_sensitivity = honors;
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.shared.state.lock().registrations.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn key_for(&self, dir: &Path) -> Option<FakeKey> {
        let id = *self.shared.state.lock().by_dir.get(dir)?;
        Some(self.key(id))
    }

    /// Queues `event` on the key watching `dir`. Returns `false` when `dir`
    /// is not watched.
    pub fn emit(&self, dir: &Path, event: WatchEvent) -> bool {
        let mut state = self.shared.state.lock();
        let Some(&id) = state.by_dir.get(dir) else {
            return false;
        };
        if let Some(key) = state.keys.get_mut(&id) {
            key.events.push(event);
        }
        if state.signal(id) {
            self.shared.ready.notify_all();
        }
        true
    }

    /// Marks the key for `dir` as permanently invalid and signals it.
    pub fn invalidate(&self, dir: &Path) {
        let mut state = self.shared.state.lock();
        let Some(&id) = state.by_dir.get(dir) else {
            return;
        };
        if let Some(key) = state.keys.get_mut(&id) {
            key.valid = false;
        }
        if state.signal(id) {
            self.shared.ready.notify_all();
        }
    }

    /// Non-blocking variant of `take`.
    pub fn try_take(&self) -> Option<FakeKey> {
        let id = self.shared.state.lock().ready.pop_front()?;
        Some(self.key(id))
    }

    fn key(&self, id: u64) -> FakeKey {
        FakeKey {
            id,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl WatchService for FakeService {
    type Key = FakeKey;

    fn usable() -> bool {
        true
    }

    fn register(
        &self,
        dir: &Path,
        kinds: &[EventKind],
        sensitivity: Option<Sensitivity>,
    ) -> Result<FakeKey> {
        let mut state = self.shared.state.lock();
        state.registrations.push(Registration {
            dir: dir.to_path_buf(),
            kinds: kinds.to_vec(),
            sensitivity,
        });
        if state.closed {
            return Err(WatchError::Closed);
        }
        if state.failing.contains(dir) || !dir.is_dir() {
            return Err(WatchError::registration(dir, "directory unavailable"));
        }
        if let Some(&id) = state.by_dir.get(dir) {
            drop(state);
            return Ok(self.key(id));
        }

        let id = state.next_id;
        state.next_id += 1;
        state.keys.insert(
            id,
            KeyState {
                dir: dir.to_path_buf(),
                valid: true,
                ..KeyState::default()
            },
        );
        state.by_dir.insert(dir.to_path_buf(), id);
        drop(state);
        Ok(self.key(id))
    }

    fn take(&self) -> Result<FakeKey> {
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(WatchError::Closed);
            }
            if state.broken_take {
                return Err(WatchError::Init("fake backend failed".into()));
            }
            if let Some(id) = state.ready.pop_front() {
                drop(state);
                return Ok(self.key(id));
            }
            self.shared.ready.wait(&mut state);
        }
    }

    fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.ready.notify_all();
    }

    fn honors_sensitivity(&self) -> bool {
        self.shared.state.lock().honors_sensitivity
    }
}

#[derive(Clone)]
pub(crate) struct FakeKey {
    id: u64,
    shared: Arc<Shared>,
}

impl PartialEq for FakeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FakeKey {}

impl Hash for FakeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for FakeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FakeKey").field(&self.id).finish()
    }
}

impl WatchKey for FakeKey {
    fn poll_events(&self) -> Vec<WatchEvent> {
        self.shared
            .state
            .lock()
            .keys
            .get_mut(&self.id)
            .map(|key| std::mem::take(&mut key.events))
            .unwrap_or_default()
    }

    fn reset(&self) -> bool {
        let mut state = self.shared.state.lock();
        let Some(key) = state.keys.get_mut(&self.id) else {
            return false;
        };
        if !key.valid {
            let dir = key.dir.clone();
            state.keys.remove(&self.id);
            state.by_dir.remove(&dir);
            return false;
        }
        if key.events.is_empty() {
            key.signalled = false;
        } else {
            state.ready.push_back(self.id);
            self.shared.ready.notify_all();
        }
        true
    }
}

/// A service that is never usable, for platform gating checks.
pub(crate) struct UnsupportedService;

impl WatchService for UnsupportedService {
    type Key = FakeKey;

    fn usable() -> bool {
        false
    }

    fn register(&self, _: &Path, _: &[EventKind], _: Option<Sensitivity>) -> Result<FakeKey> {
        Err(WatchError::Unusable {
            backend: "unsupported",
        })
    }

    fn take(&self) -> Result<FakeKey> {
        Err(WatchError::Closed)
    }

    fn close(&self) {}
}
