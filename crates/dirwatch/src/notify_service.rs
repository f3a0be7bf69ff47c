use std::{
    collections::{VecDeque, hash_map::Entry},
    fmt,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
};

use ahash::AHashMap;
use notify::{
    Event, EventKind as NotifyKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::{
    error::{Result, WatchError},
    service::{EventKind, Sensitivity, WatchEvent, WatchKey, WatchService},
};

pub trait Backend: Send + Sync + 'static {
    type Watcher: Watcher + Send + 'static;

    const NAME: &'static str;

    fn usable() -> bool;

    fn honors_sensitivity() -> bool;

    fn config(sensitivity: Sensitivity) -> notify::Config;
}

pub struct Native;

impl Backend for Native {
    type Watcher = RecommendedWatcher;

    const NAME: &'static str = "native";

    fn usable() -> bool {
        cfg!(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios",
            target_os = "windows",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        ))
    }

    fn honors_sensitivity() -> bool {
        false
    }

    fn config(_sensitivity: Sensitivity) -> notify::Config {
        notify::Config::default()
    }
}

pub struct Polling;

impl Backend for Polling {
    type Watcher = PollWatcher;

    const NAME: &'static str = "polling";

    fn usable() -> bool {
        true
    }

    fn honors_sensitivity() -> bool {
        true
    }

    fn config(sensitivity: Sensitivity) -> notify::Config {
        notify::Config::default().with_poll_interval(sensitivity.poll_interval())
    }
}

pub type NativeWatchService = NotifyWatchService<Native>;
pub type PollingWatchService = NotifyWatchService<Polling>;

struct KeyState {
    dir: PathBuf,
    kinds: Vec<EventKind>,
    slot: Sensitivity,
    events: Vec<WatchEvent>,
    signalled: bool,
    valid: bool,
}

impl KeyState {
    fn accepts(&self, kind: EventKind) -> bool {
        kind == EventKind::Overflow || self.kinds.contains(&kind)
    }
}

#[derive(Default)]
struct State {
    next_id: u64,
    keys: AHashMap<u64, KeyState>,
    by_dir: AHashMap<PathBuf, u64>,
    ready: VecDeque<u64>,
    closed: bool,
}

impl State {
    fn insert_key(&mut self, dir: PathBuf, kinds: &[EventKind], slot: Sensitivity) -> u64 {
        if let Some(&id) = self.by_dir.get(&dir) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_dir.insert(dir.clone(), id);
        self.keys.insert(
            id,
            KeyState {
                dir,
                kinds: kinds.to_vec(),
                slot,
                events: Vec::new(),
                signalled: false,
                valid: true,
            },
        );
        id
    }

    /// Returns whether the key was newly queued.
    fn signal(&mut self, id: u64) -> bool {
        match self.keys.get_mut(&id) {
            Some(key) if !key.signalled => {
                key.signalled = true;
                self.ready.push_back(id);
                true
            }
            _ => false,
        }
    }

    fn push(&mut self, id: u64, event: WatchEvent) -> bool {
        match self.keys.get_mut(&id) {
            Some(key) if key.accepts(event.kind) => key.events.push(event),
            _ => return false,
        }
        self.signal(id)
    }

    fn invalidate(&mut self, id: u64) -> bool {
        if let Some(key) = self.keys.get_mut(&id) {
            key.valid = false;
        }
        self.signal(id)
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

impl Shared {
    fn dispatch(&self, event: &Event) {
        let rescan = event.need_rescan();
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let mut woke = false;
        if rescan && event.paths.is_empty() {
            let ids = state.keys.keys().copied().collect::<Vec<_>>();
            for id in ids {
                woke |= state.push(id, WatchEvent::overflow());
            }
        }

        for (path, kind) in translate(event) {
            if let Some(&id) = state.by_dir.get(path) {
                if rescan {
                    woke |= state.push(id, WatchEvent::overflow());
                    continue;
                }
                if kind == EventKind::Deleted {
                    trace!(path = %path.display(), "watched directory removed");
                    woke |= state.invalidate(id);
                }
            }

            let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
                continue;
            };
            let Some(&id) = state.by_dir.get(parent) else {
                continue;
            };
            let queued = if rescan {
                WatchEvent::overflow()
            } else {
                WatchEvent::new(kind, name)
            };
            woke |= state.push(id, queued);
        }

        drop(state);
        if woke {
            self.ready.notify_all();
        }
    }
}

fn translate(event: &Event) -> Vec<(&Path, EventKind)> {
    let all = |kind: EventKind| {
        event
            .paths
            .iter()
            .map(|p| (p.as_path(), kind))
            .collect::<Vec<_>>()
    };
    match event.kind {
        NotifyKind::Access(_) => Vec::new(),
        NotifyKind::Create(_) => all(EventKind::Created),
        NotifyKind::Remove(_) => all(EventKind::Deleted),
        NotifyKind::Modify(ModifyKind::Name(RenameMode::From)) => all(EventKind::Deleted),
        NotifyKind::Modify(ModifyKind::Name(RenameMode::To)) => all(EventKind::Created),
        NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let kind = match i {
                    0 => EventKind::Deleted,
                    1 => EventKind::Created,
                    _ => EventKind::Modified,
                };
                (p.as_path(), kind)
            })
            .collect(),
        NotifyKind::Modify(_) | NotifyKind::Any | NotifyKind::Other => all(EventKind::Modified),
    }
}

struct Inner<B: Backend> {
    shared: Arc<Shared>,
    /// One watcher per sensitivity slot; `None` once closed.
    watchers: Mutex<Option<AHashMap<Sensitivity, B::Watcher>>>,
}

impl<B: Backend> Inner<B> {
    fn unwatch(&self, dir: &Path, slot: Sensitivity) {
        let mut watchers = self.watchers.lock();
        let Some(watcher) = watchers.as_mut().and_then(|w| w.get_mut(&slot)) else {
            return;
        };
        if let Err(err) = watcher.unwatch(dir) {
            trace!(path = %dir.display(), error = %err, "unwatch after invalidation failed");
        }
    }
}

fn create_watcher<B: Backend>(shared: &Arc<Shared>, slot: Sensitivity) -> Result<B::Watcher> {
    let shared = Arc::clone(shared);
    let handler = move |res: notify::Result<Event>| match res {
        Ok(event) => shared.dispatch(&event),
        Err(err) => warn!(error = %err, paths = ?err.paths, "watch backend error"),
    };
    let watcher =
        B::Watcher::new(handler, B::config(slot)).map_err(|err| WatchError::Init(Box::new(err)))?;
    trace!(backend = B::NAME, sensitivity = slot.as_str(), "created watcher");
    Ok(watcher)
}

/// One non-recursive watch per directory. An event for `p` is queued on the
/// key for `p.parent()` with `p.file_name()` as context.
pub struct NotifyWatchService<B: Backend> {
    inner: Arc<Inner<B>>,
}

impl<B: Backend> NotifyWatchService<B> {
    pub fn new() -> Result<Self> {
        if !B::usable() {
            return Err(WatchError::Unusable { backend: B::NAME });
        }
        let shared = Arc::new(Shared::default());
        let mut watchers = AHashMap::new();
        watchers.insert(
            Sensitivity::default(),
            create_watcher::<B>(&shared, Sensitivity::default())?,
        );
        debug!(backend = B::NAME, "watch service initialized");
        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                watchers: Mutex::new(Some(watchers)),
            }),
        })
    }

    fn key(&self, id: u64) -> NotifyKey<B> {
        NotifyKey {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    fn slot_for(sensitivity: Option<Sensitivity>) -> Sensitivity {
        if B::honors_sensitivity() {
            sensitivity.unwrap_or_default()
        } else {
            Sensitivity::default()
        }
    }
}

impl<B: Backend> WatchService for NotifyWatchService<B> {
    type Key = NotifyKey<B>;

    fn usable() -> bool {
        B::usable()
    }

    fn register(
        &self,
        dir: &Path,
        kinds: &[EventKind],
        sensitivity: Option<Sensitivity>,
    ) -> Result<NotifyKey<B>> {
        let shared = &self.inner.shared;
        {
            let state = shared.state.lock();
            if state.closed {
                return Err(WatchError::Closed);
            }
            if let Some(&id) = state.by_dir.get(dir) {
                return Ok(self.key(id));
            }
        }
        if !dir.is_dir() {
            return Err(WatchError::registration(dir, "not a directory"));
        }

        let slot = Self::slot_for(sensitivity);
        {
            let mut watchers = self.inner.watchers.lock();
            let Some(watchers) = watchers.as_mut() else {
                return Err(WatchError::Closed);
            };
            let watcher = match watchers.entry(slot) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(create_watcher::<B>(shared, slot)?),
            };
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|err| WatchError::registration(dir, err))?;
        }

        let id = shared
            .state
            .lock()
            .insert_key(dir.to_path_buf(), kinds, slot);
        Ok(self.key(id))
    }

    fn take(&self) -> Result<NotifyKey<B>> {
        let shared = &self.inner.shared;
        let mut state = shared.state.lock();
        loop {
            if state.closed {
                return Err(WatchError::Closed);
            }
            if let Some(id) = state.ready.pop_front() {
                drop(state);
                return Ok(self.key(id));
            }
            shared.ready.wait(&mut state);
        }
    }

    fn close(&self) {
        {
            let mut state = self.inner.shared.state.lock();
            state.closed = true;
            state.ready.clear();
        }
        self.inner.shared.ready.notify_all();
        let watchers = self.inner.watchers.lock().take();
        drop(watchers);
        debug!(backend = B::NAME, "watch service closed");
    }

    fn honors_sensitivity(&self) -> bool {
        B::honors_sensitivity()
    }
}

pub struct NotifyKey<B: Backend> {
    id: u64,
    inner: Arc<Inner<B>>,
}

impl<B: Backend> Clone for NotifyKey<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> PartialEq for NotifyKey<B> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<B: Backend> Eq for NotifyKey<B> {}

impl<B: Backend> Hash for NotifyKey<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<B: Backend> fmt::Debug for NotifyKey<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyKey")
            .field("backend", &B::NAME)
            .field("id", &self.id)
            .finish()
    }
}

impl<B: Backend> WatchKey for NotifyKey<B> {
    fn poll_events(&self) -> Vec<WatchEvent> {
        self.inner
            .shared
            .state
            .lock()
            .keys
            .get_mut(&self.id)
            .map(|key| std::mem::take(&mut key.events))
            .unwrap_or_default()
    }

    fn reset(&self) -> bool {
        let shared = &self.inner.shared;
        let mut state = shared.state.lock();
        let Some(key) = state.keys.get_mut(&self.id) else {
            return false;
        };
        if key.valid && !key.dir.is_dir() {
            key.valid = false;
        }
        if !key.valid {
            let dir = key.dir.clone();
            let slot = key.slot;
            state.keys.remove(&self.id);
            state.by_dir.remove(&dir);
            drop(state);
            self.inner.unwatch(&dir, slot);
            return false;
        }
        if key.events.is_empty() {
            key.signalled = false;
        } else {
            state.ready.push_back(self.id);
            drop(state);
            shared.ready.notify_all();
        }
        true
    }
}
