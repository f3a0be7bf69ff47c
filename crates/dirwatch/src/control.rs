use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Stopped,
    Running,
}

#[derive(Debug)]
pub(crate) struct Control {
    pub state: AdapterState,
    pub paused: bool,
    /// Incremented on every successful start.
    pub session: u64,
    pub event_loop_active: bool,
    /// Set when the event loop of that session died on an error.
    pub failure: Option<(u64, WatchError)>,
}

#[derive(Debug)]
pub(crate) struct SharedControl {
    inner: Mutex<Control>,
    changed: Condvar,
}

impl Default for SharedControl {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Control {
                state: AdapterState::Stopped,
                paused: false,
                session: 0,
                event_loop_active: false,
                failure: None,
            }),
            changed: Condvar::new(),
        }
    }
}

impl SharedControl {
    pub fn lock(&self) -> MutexGuard<'_, Control> {
        self.inner.lock()
    }

    pub fn notify(&self) {
        self.changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.lock().paused = paused;
    }

    pub fn state(&self) -> AdapterState {
        self.inner.lock().state
    }

    pub fn begin_session(&self) -> u64 {
        let mut control = self.inner.lock();
        control.session += 1;
        control.event_loop_active = true;
        control.failure = None;
        control.session
    }

    /// Stops the adapter if `session` is still the current one.
    pub fn fail_session(&self, session: u64, err: WatchError) {
        let mut control = self.inner.lock();
        if control.session == session {
            control.state = AdapterState::Stopped;
            control.failure = Some((session, err));
        }
        drop(control);
        self.changed.notify_all();
    }

    pub fn end_session(&self, session: u64) {
        let mut control = self.inner.lock();
        if control.session == session {
            control.event_loop_active = false;
        }
        drop(control);
        self.changed.notify_all();
    }

    /// Blocks until the event loop of `session` has exited or a newer
    /// session has started. Returns the error the loop died on, if any.
    pub fn wait_for_session_end(&self, session: u64) -> Option<WatchError> {
        let mut control = self.wait_for_loop_exit(session);
        if control.failure.as_ref().is_some_and(|(s, _)| *s == session) {
            return control.failure.take().map(|(_, err)| err);
        }
        None
    }

    pub fn wait_for_loop_exit(&self, session: u64) -> MutexGuard<'_, Control> {
        let mut control = self.inner.lock();
        while control.session == session && control.event_loop_active {
            self.changed.wait(&mut control);
        }
        control
    }

    /// Returns whether the adapter is still running once `period` elapsed.
    pub fn sleep_while_running(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut control = self.inner.lock();
        while control.state == AdapterState::Running {
            if self.changed.wait_until(&mut control, deadline).timed_out() {
                return control.state == AdapterState::Running;
            }
        }
        false
    }
}
