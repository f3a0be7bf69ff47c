use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use common::config::WatchConfig;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::{
    control::{AdapterState, SharedControl},
    error::{Result, WatchError},
    event_loop::EventLoop,
    notify_service::{Backend, NotifyWatchService},
    registrar::{Registrar, SharedRegistry},
    registry::WatchRegistry,
    service::{Sensitivity, WatchService},
    sink::{ChangeListener, ChangedDirectories},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherOptions {
    pub latency: Duration,
    pub report_changes: bool,
    pub sensitivity: Sensitivity,
    /// Directory names that are never watched or descended into.
    pub ignore_dirs: Vec<String>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(250),
            report_changes: true,
            sensitivity: Sensitivity::High,
            ignore_dirs: Vec::new(),
        }
    }
}

impl From<&WatchConfig> for WatcherOptions {
    fn from(cfg: &WatchConfig) -> Self {
        Self {
            latency: cfg.latency(),
            report_changes: cfg.report_changes,
            sensitivity: cfg.sensitivity,
            ignore_dirs: cfg.ignore_dirs.clone(),
        }
    }
}

type ServiceFactory<S> = Box<dyn Fn() -> Result<S> + Send + Sync>;

struct Workers<S: WatchService> {
    service: Arc<S>,
    event_loop: JoinHandle<()>,
    reporter: Option<JoinHandle<()>>,
}

/// A directory created below a watched one is registered once its creation
/// is processed. Changes made inside it before that moment are missed.
pub struct DirectoryWatcher<S: WatchService> {
    directories: Vec<PathBuf>,
    options: WatcherOptions,
    factory: ServiceFactory<S>,
    control: Arc<SharedControl>,
    // Held for the whole of a start or stop.
    workers: Mutex<Option<Workers<S>>>,
    registry: SharedRegistry<S::Key>,
    changed: ChangedDirectories,
    listener: Option<Arc<dyn ChangeListener>>,
}

impl<B: Backend> DirectoryWatcher<NotifyWatchService<B>> {
    pub fn with_notify<I, P>(directories: I, options: WatcherOptions) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::new(directories, options, NotifyWatchService::<B>::new)
    }
}

impl<S: WatchService> DirectoryWatcher<S> {
    pub fn new<I, P, F>(directories: I, options: WatcherOptions, factory: F) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
        F: Fn() -> Result<S> + Send + Sync + 'static,
    {
        Self {
            directories: directories.into_iter().map(Into::into).collect(),
            options,
            factory: Box::new(factory),
            control: Arc::new(SharedControl::default()),
            workers: Mutex::new(None),
            registry: Arc::new(Mutex::new(WatchRegistry::new())),
            changed: ChangedDirectories::new(),
            listener: None,
        }
    }

    /// Changes still buffered at stop are delivered before `stop` returns.
    #[must_use]
    pub fn with_listener(mut self, listener: impl ChangeListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn usable() -> bool {
        S::usable()
    }

    /// With `blocking`, returns once the event loop exits on stop or error.
    pub fn start(&self, blocking: bool) -> Result<()> {
        let session = {
            let mut workers = self.workers.lock();
            // Only a failing event loop changes the state without `workers`
            // held, and only towards Stopped.
            if self.control.state() == AdapterState::Running {
                return Ok(());
            }
            if let Some(failed) = workers.take() {
                debug!("reaping workers of a failed session");
                shutdown(failed);
            }
            self.control.lock().state = AdapterState::Running;
            match self.launch() {
                Ok((launched, session)) => {
                    *workers = Some(launched);
                    session
                }
                Err(err) => {
                    self.control.lock().state = AdapterState::Stopped;
                    return Err(err);
                }
            }
        };

        if blocking && let Some(err) = self.control.wait_for_session_end(session) {
            return Err(WatchError::Aborted(Box::new(err)));
        }
        Ok(())
    }

    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        self.control.lock().state = AdapterState::Stopped;
        let Some(running) = workers.take() else {
            return;
        };
        self.control.notify();

        shutdown(running);
        self.registry.lock().clear();
        info!("directory watcher stopped");
    }

    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    pub fn unpause(&self) {
        self.control.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_running(&self) -> bool {
        self.control.state() == AdapterState::Running
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.registry.lock().directories()
    }

    /// The pending-changes buffer. Drain it directly when no listener is set.
    pub fn changed_directories(&self) -> &ChangedDirectories {
        &self.changed
    }

    fn launch(&self) -> Result<(Workers<S>, u64)> {
        let service = Arc::new((self.factory)()?);
        self.registry.lock().clear();

        let registrar = Registrar::new(
            Arc::clone(&service),
            Arc::clone(&self.registry),
            self.options.ignore_dirs.clone(),
            self.options.sensitivity,
        );
        for dir in &self.directories {
            let root = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.clone());
            match registrar.register_recursively(&root) {
                0 => warn!(path = %root.display(), "configured directory could not be watched"),
                count => debug!(path = %root.display(), directories = count, "registered watch tree"),
            }
        }

        let session = self.control.begin_session();
        let event_loop = EventLoop::new(
            Arc::clone(&service),
            registrar,
            self.changed.clone(),
            Arc::clone(&self.control),
        );
        let event_handle = match thread::Builder::new()
            .name("dirwatch-events".to_string())
            .spawn(move || event_loop.run(session))
        {
            Ok(handle) => handle,
            Err(err) => {
                self.control.end_session(session);
                service.close();
                return Err(WatchError::Spawn(err));
            }
        };

        let reporter = match (&self.listener, self.options.report_changes) {
            (Some(listener), true) => {
                let control = Arc::clone(&self.control);
                let changed = self.changed.clone();
                let listener = Arc::clone(listener);
                let latency = self.options.latency;
                let spawned = thread::Builder::new()
                    .name("dirwatch-report".to_string())
                    .spawn(move || {
                        report_changes(&control, session, &changed, listener.as_ref(), latency);
                    });
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        service.close();
                        if event_handle.join().is_err() {
                            error!("event loop thread panicked");
                        }
                        return Err(WatchError::Spawn(err));
                    }
                }
            }
            _ => None,
        };

        info!(
            roots = self.directories.len(),
            watched = self.registry.lock().len(),
            reporting = reporter.is_some(),
            "directory watcher started"
        );
        Ok((
            Workers {
                service,
                event_loop: event_handle,
                reporter,
            },
            session,
        ))
    }
}

impl<S: WatchService> Drop for DirectoryWatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn shutdown<S: WatchService>(workers: Workers<S>) {
    workers.service.close();
    if workers.event_loop.join().is_err() {
        error!("event loop thread panicked");
    }
    if let Some(reporter) = workers.reporter
        && reporter.join().is_err()
    {
        error!("reporting thread panicked");
    }
}

fn report_changes(
    control: &SharedControl,
    session: u64,
    changed: &ChangedDirectories,
    listener: &dyn ChangeListener,
    latency: Duration,
) {
    loop {
        let running = control.sleep_while_running(latency);
        if !running {
            // The final batch waits for the event loop's last key.
            drop(control.wait_for_loop_exit(session));
        }
        let dirs = changed.drain();
        if !dirs.is_empty() {
            trace!(count = dirs.len(), "reporting changed directories");
            listener.on_change(dirs);
        }
        if !running {
            break;
        }
    }
}
