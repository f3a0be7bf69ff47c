mod control;
pub mod error;
mod event_loop;
pub mod notify_service;
pub mod registrar;
pub mod registry;
pub mod service;
pub mod sink;
#[cfg(test)]
mod testing;
pub mod watcher;

pub use control::AdapterState;
pub use error::{Result, WatchError};
pub use notify_service::{Native, NativeWatchService, NotifyWatchService, Polling, PollingWatchService};
pub use registry::WatchRegistry;
pub use service::{EventKind, Sensitivity, WatchEvent, WatchKey, WatchService};
pub use sink::{ChangeListener, ChangedDirectories};
pub use watcher::{DirectoryWatcher, WatcherOptions};
