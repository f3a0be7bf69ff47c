use std::{path::Path, sync::Arc};

use tracing::{debug, error, trace};

use crate::{
    control::SharedControl,
    registrar::Registrar,
    service::{EventKind, WatchKey, WatchService},
    sink::ChangedDirectories,
};

pub(crate) struct EventLoop<S: WatchService> {
    service: Arc<S>,
    registrar: Registrar<S>,
    changed: ChangedDirectories,
    control: Arc<SharedControl>,
}

impl<S: WatchService> EventLoop<S> {
    pub fn new(
        service: Arc<S>,
        registrar: Registrar<S>,
        changed: ChangedDirectories,
        control: Arc<SharedControl>,
    ) -> Self {
        Self {
            service,
            registrar,
            changed,
            control,
        }
    }

    /// Runs until the service is closed. Any other `take` failure stops the
    /// adapter.
    pub fn run(self, session: u64) {
        let _exit = SessionGuard {
            control: Arc::clone(&self.control),
            session,
        };
        loop {
            let key = match self.service.take() {
                Ok(key) => key,
                Err(err) if err.is_closed() => {
                    debug!("watch service closed; event loop exiting");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "event loop aborted");
                    self.control.fail_session(session, err);
                    break;
                }
            };
            self.handle(&key);
        }
    }

    pub fn handle(&self, key: &S::Key) {
        let paused = self.control.is_paused();

        let dir = self
            .registrar
            .registry()
            .lock()
            .get(key)
            .map(Path::to_path_buf);
        let Some(dir) = dir else {
            trace!(?key, "ignoring evicted watch key");
            return;
        };

        if !paused {
            self.changed.push(dir.to_string_lossy().into_owned());
        }

        // A directory created here is only watched from this point on;
        // changes inside it before registration are not observed.
        for event in key.poll_events() {
            if event.kind == EventKind::Overflow {
                continue;
            }
            let Some(context) = event.context else {
                continue;
            };
            let entry = dir.join(context);
            if entry.is_dir() {
                let registered = self.registrar.register_recursively(&entry);
                trace!(path = %entry.display(), registered, "extended watch to new directory");
            }
        }

        if !key.reset() {
            self.registrar.registry().lock().remove(key);
            debug!(path = %dir.display(), "watch key invalidated; directory evicted");
        }
    }
}

struct SessionGuard {
    control: Arc<SharedControl>,
    session: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.control.end_session(self.session);
    }
}
