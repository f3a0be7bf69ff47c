use std::{path::Path, sync::Arc};

use ignore::WalkBuilder;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    registry::WatchRegistry,
    service::{Sensitivity, WATCHED_KINDS, WatchService},
};

pub type SharedRegistry<K> = Arc<Mutex<WatchRegistry<K>>>;

/// Registers directories, and whole directory trees, with a watch service.
pub struct Registrar<S: WatchService> {
    service: Arc<S>,
    registry: SharedRegistry<S::Key>,
    ignored: Arc<[String]>,
    sensitivity: Sensitivity,
}

impl<S: WatchService> Clone for Registrar<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            registry: Arc::clone(&self.registry),
            ignored: Arc::clone(&self.ignored),
            sensitivity: self.sensitivity,
        }
    }
}

impl<S: WatchService> Registrar<S> {
    pub fn new(
        service: Arc<S>,
        registry: SharedRegistry<S::Key>,
        ignored: Vec<String>,
        sensitivity: Sensitivity,
    ) -> Self {
        Self {
            service,
            registry,
            ignored: ignored.into(),
            sensitivity,
        }
    }

    pub fn registry(&self) -> &SharedRegistry<S::Key> {
        &self.registry
    }

    /// Registers `dir` and every directory below it. Returns how many
    /// directories were registered; entries that vanish mid-walk are skipped.
    pub fn register_recursively(&self, dir: &Path) -> usize {
        if is_ignored(&self.ignored, dir) {
            trace!(path = %dir.display(), "not watching ignored directory");
            return 0;
        }
        if !self.register(dir) {
            return 0;
        }

        let ignored = Arc::clone(&self.ignored);
        let walker = WalkBuilder::new(dir)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| !is_ignored(&ignored, entry.path()))
            .build();

        let mut registered = 1;
        for entry in walker.flatten() {
            if entry.depth() == 0 {
                continue;
            }
            if !entry.file_type().is_some_and(|t| t.is_dir()) {
                continue;
            }
            if self.register(entry.path()) {
                registered += 1;
            }
        }
        registered
    }

    /// Registers a single directory. Failure is logged and reported as `false`.
    pub fn register(&self, dir: &Path) -> bool {
        let hint = self
            .service
            .honors_sensitivity()
            .then_some(self.sensitivity);
        match self.service.register(dir, &WATCHED_KINDS, hint) {
            Ok(key) => {
                self.registry.lock().insert(key, dir.to_path_buf());
                trace!(path = %dir.display(), "watching directory");
                true
            }
            Err(err) => {
                debug!(path = %dir.display(), error = %err, "skipping unregistrable directory");
                false
            }
        }
    }
}

fn is_ignored(ignored: &[String], path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .is_some_and(|name| ignored.iter().any(|i| *i == name))
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path, sync::Arc};

    use parking_lot::Mutex;

    use super::{Registrar, is_ignored};
    use crate::{
        registry::WatchRegistry,
        service::{Sensitivity, WATCHED_KINDS},
        testing::FakeService,
    };

    fn registrar(service: &FakeService, ignored: &[&str]) -> Registrar<FakeService> {
        Registrar::new(
            Arc::new(service.clone()),
            Arc::new(Mutex::new(WatchRegistry::new())),
            ignored.iter().map(ToString::to_string).collect(),
            Sensitivity::Medium,
        )
    }

    #[test]
    fn registers_nested_directories_and_skips_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b/c")).expect("mkdir");
        fs::create_dir_all(root.join(".hidden")).expect("mkdir hidden");
        fs::write(root.join("a/file.txt"), "x").expect("write");

        let service = FakeService::new();
        let registrar = registrar(&service, &[]);
        let count = registrar.register_recursively(root);

        assert_eq!(count, 5);
        let registry = registrar.registry().lock();
        assert!(registry.contains_directory(root));
        assert!(registry.contains_directory(&root.join("a/b/c")));
        assert!(registry.contains_directory(&root.join(".hidden")));
        assert!(!registry.contains_directory(&root.join("a/file.txt")));
    }

    #[test]
    fn failed_registration_is_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("ok")).expect("mkdir");
        fs::create_dir_all(root.join("flaky/inner")).expect("mkdir");

        let service = FakeService::new();
        service.fail_registration(&root.join("flaky/inner"));
        let registrar = registrar(&service, &[]);

        assert_eq!(registrar.register_recursively(root), 3);
        let registry = registrar.registry().lock();
        assert!(registry.contains_directory(&root.join("flaky")));
        assert!(!registry.contains_directory(&root.join("flaky/inner")));
    }

    #[test]
    fn missing_root_registers_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        let registrar = registrar(&service, &[]);

        assert_eq!(registrar.register_recursively(&tmp.path().join("nope")), 0);
        assert!(registrar.registry().lock().is_empty());
    }

    #[test]
    fn ignored_directories_are_not_descended() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join(".git/objects")).expect("mkdir");
        fs::create_dir_all(root.join("src")).expect("mkdir");

        let service = FakeService::new();
        let registrar = registrar(&service, &[".git"]);

        assert_eq!(registrar.register_recursively(root), 2);
        assert!(!registrar.registry().lock().contains_directory(&root.join(".git/objects")));
    }

    #[test]
    fn requests_watched_kinds_and_hint_when_honored() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.set_honors_sensitivity(true);
        let registrar = registrar(&service, &[]);

        assert!(registrar.register(tmp.path()));
        let calls = service.registrations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kinds, WATCHED_KINDS.to_vec());
        assert_eq!(calls[0].sensitivity, Some(Sensitivity::Medium));
    }

    #[test]
    fn omits_hint_when_not_honored() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        let registrar = registrar(&service, &[]);

        assert!(registrar.register(tmp.path()));
        let calls = service.registrations();
        assert_eq!(calls[0].dir, tmp.path());
        assert_eq!(calls[0].sensitivity, None);
    }

    #[test]
    fn ignore_matches_final_component_only() {
        let ignored = vec!["target".to_string()];
        assert!(is_ignored(&ignored, Path::new("/repo/target")));
        assert!(!is_ignored(&ignored, Path::new("/repo/target/debug")));
        assert!(!is_ignored(&ignored, Path::new("/repo/targets")));
    }
}
