//! Ownership of per-element generated resources.
//!
//! Every processed image node gets a generated artifact (an inverted copy on
//! disk, a compositor texture, ...). The table owns at most one per element:
//! replacing it releases the previous one, and [`ResourceTable::teardown`]
//! releases everything when the page goes away.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

/// A resource that needs explicit cleanup when its owner lets go of it.
pub trait Release {
    /// Free the resource. Called exactly once by the owning table.
    fn release(self);
}

/// Generated file that is deleted on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile(PathBuf);

impl GeneratedFile {
    /// Take ownership of a file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Location on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Release for GeneratedFile {
    fn release(self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), %e, "failed to remove generated file");
            }
        }
    }
}

/// Table of generated resources keyed by a stable element identifier.
#[derive(Debug)]
pub struct ResourceTable<K, R: Release> {
    entries: HashMap<K, R>,
}

impl<K: Eq + Hash, R: Release> Default for ResourceTable<K, R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, R: Release> ResourceTable<K, R> {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `resource` for `key`, releasing whatever was there before.
    pub fn replace(&mut self, key: K, resource: R) {
        if let Some(previous) = self.entries.insert(key, resource) {
            previous.release();
        }
    }

    /// Release the resource for `key`, if any. Returns whether one existed.
    pub fn release(&mut self, key: &K) -> bool {
        self.entries.remove(key).map(Release::release).is_some()
    }

    /// Current resource for `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&R> {
        self.entries.get(key)
    }

    /// Number of live resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every resource.
    pub fn teardown(&mut self) {
        for (_, resource) in self.entries.drain() {
            resource.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Tracked(&'static str, Rc<RefCell<Vec<&'static str>>>);

    impl Release for Tracked {
        fn release(self) {
            self.1.borrow_mut().push(self.0);
        }
    }

    #[test]
    fn replace_releases_previous_resource() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut table = ResourceTable::new();
        table.replace("img-1", Tracked("a", Rc::clone(&log)));
        table.replace("img-1", Tracked("b", Rc::clone(&log)));
        table.replace("img-2", Tracked("c", Rc::clone(&log)));

        assert_eq!(*log.borrow(), vec!["a"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&"img-1").map(|t| t.0), Some("b"));
    }

    #[test]
    fn release_and_teardown() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut table = ResourceTable::new();
        table.replace(1, Tracked("a", Rc::clone(&log)));
        table.replace(2, Tracked("b", Rc::clone(&log)));

        assert!(table.release(&1));
        assert!(!table.release(&1));
        table.teardown();

        assert!(table.is_empty());
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn generated_files_are_deleted_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.png");
        let second = dir.path().join("second.png");
        std::fs::write(&first, b"x").unwrap();
        std::fs::write(&second, b"y").unwrap();

        let mut table = ResourceTable::new();
        table.replace("img", GeneratedFile::new(&first));
        table.replace("img", GeneratedFile::new(&second));
        assert!(!first.exists());
        assert!(second.exists());

        table.teardown();
        assert!(!second.exists());
    }
}
