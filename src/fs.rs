//! Filesystem port
//!
//! The cgroup manager and the `/proc` usage reader touch host-global
//! filesystem trees. Both go through this port so tests can substitute an
//! in-memory fake instead of requiring a Linux host with cgroups-v2.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Minimal filesystem surface needed by the resource subsystem.
pub trait FilesystemPort: Send + Sync + std::fmt::Debug {
    /// Reads an entire file into a string
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Writes a string to a file, replacing any previous contents
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Creates a directory and all missing parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Removes a directory
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Whether a file or directory exists at the path
    fn exists(&self, path: &Path) -> bool;
}

/// Type alias for shared filesystem port
pub type SharedFilesystem = Arc<dyn FilesystemPort>;

/// Passthrough to the host filesystem
#[derive(Debug, Clone, Default)]
pub struct HostFilesystem;

impl HostFilesystem {
    /// Creates a new host filesystem port
    pub fn new() -> Self {
        Self
    }

    /// Creates a shared host filesystem port
    pub fn shared() -> SharedFilesystem {
        Arc::new(Self)
    }
}

impl FilesystemPort for HostFilesystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        std::fs::write(path, contents)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// In-memory filesystem fake for tests
#[derive(Debug, Default)]
pub struct MemoryFilesystem {
    files: Mutex<HashMap<PathBuf, String>>,
    dirs: Mutex<HashSet<PathBuf>>,
}

impl MemoryFilesystem {
    /// Creates an empty in-memory filesystem
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates a file, creating parent directories implicitly
    pub fn put(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        let path = path.into();
        if let Some(parent) = path.parent() {
            self.record_dirs(parent);
        }
        self.files
            .lock()
            .expect("fs lock poisoned")
            .insert(path, contents.into());
    }

    /// Removes a file, if present
    pub fn remove_file(&self, path: &Path) {
        self.files.lock().expect("fs lock poisoned").remove(path);
    }

    /// Returns the current contents of a file, if any
    pub fn contents(&self, path: &Path) -> Option<String> {
        self.files
            .lock()
            .expect("fs lock poisoned")
            .get(path)
            .cloned()
    }

    fn record_dirs(&self, dir: &Path) {
        let mut dirs = self.dirs.lock().expect("fs lock poisoned");
        let mut current = PathBuf::new();
        for part in dir.components() {
            current.push(part);
            dirs.insert(current.clone());
        }
    }
}

impl FilesystemPort for MemoryFilesystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.contents(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{}", path.display())))
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        self.put(path, contents);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.record_dirs(path);
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut dirs = self.dirs.lock().expect("fs lock poisoned");
        if !dirs.remove(&path.to_path_buf()) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}", path.display()),
            ));
        }
        // The fake mirrors rmdir on a cgroup directory: contained control
        // files disappear with it.
        self.files
            .lock()
            .expect("fs lock poisoned")
            .retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("fs lock poisoned").contains_key(path)
            || self.dirs.lock().expect("fs lock poisoned").contains(path)
    }
}
