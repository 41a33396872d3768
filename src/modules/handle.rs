//! Object handles and the registries that mint and translate them.
//!
//! Every backend of a namespace draws its handles from one shared
//! [`HandleGenerator`], so a handle value identifies a single object across
//! the whole tree and only the backend that minted it recognizes it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::constants::INITIAL_HANDLE;

/// Opaque reference to a file, directory or symlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u64);

impl ObjectHandle {
    /// Wire form of the handle.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decodes a handle from its wire form. Returns `None` on a length mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(raw)))
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source of globally unique handle values, shared between backends.
#[derive(Debug, Clone)]
pub struct HandleGenerator {
    next: Arc<AtomicU64>,
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleGenerator {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(INITIAL_HANDLE)),
        }
    }

    pub fn next_handle(&self) -> ObjectHandle {
        ObjectHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct RegistryMaps {
    by_handle: HashMap<ObjectHandle, PathBuf>,
    by_path: HashMap<PathBuf, ObjectHandle>,
}

/// Bidirectional map between backend-relative paths and handles.
///
/// Paths are relative to the backend root; the root itself is the empty path.
#[derive(Debug)]
pub struct HandleRegistry {
    generator: HandleGenerator,
    maps: RwLock<RegistryMaps>,
}

impl HandleRegistry {
    pub fn new(generator: HandleGenerator) -> Self {
        Self {
            generator,
            maps: RwLock::new(RegistryMaps::default()),
        }
    }

    /// Returns the handle registered for `path`, minting one if needed.
    pub fn to_handle(&self, path: &Path) -> ObjectHandle {
        if let Some(handle) = self.maps.read().by_path.get(path) {
            return *handle;
        }
        let mut maps = self.maps.write();
        if let Some(handle) = maps.by_path.get(path) {
            return *handle;
        }
        let handle = self.generator.next_handle();
        maps.by_path.insert(path.to_path_buf(), handle);
        maps.by_handle.insert(handle, path.to_path_buf());
        handle
    }

    /// Resolves a handle back to its path, failing with `ESTALE` if unknown.
    pub fn to_path(&self, handle: ObjectHandle) -> io::Result<PathBuf> {
        self.maps
            .read()
            .by_handle
            .get(&handle)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ESTALE))
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.maps.read().by_handle.contains_key(&handle)
    }

    /// Moves `from` and everything below it to `to`, keeping handles stable.
    pub fn rename(&self, from: &Path, to: &Path) {
        let mut maps = self.maps.write();
        let moved: Vec<(PathBuf, ObjectHandle)> = maps
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, handle)| (path.clone(), *handle))
            .collect();

        // A handle already registered at the destination is overwritten
        if let Some(replaced) = maps.by_path.remove(to) {
            maps.by_handle.remove(&replaced);
        }

        for (old_path, handle) in moved {
            maps.by_path.remove(&old_path);
            let suffix = old_path.strip_prefix(from).unwrap_or(Path::new(""));
            let new_path = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            maps.by_handle.insert(handle, new_path.clone());
            maps.by_path.insert(new_path, handle);
        }
    }

    /// Drops `path` and everything below it.
    pub fn forget(&self, path: &Path) {
        let mut maps = self.maps.write();
        let gone: Vec<PathBuf> = maps
            .by_path
            .keys()
            .filter(|candidate| candidate.starts_with(path))
            .cloned()
            .collect();
        for gone_path in gone {
            if let Some(handle) = maps.by_path.remove(&gone_path) {
                maps.by_handle.remove(&handle);
            }
        }
    }

    pub fn clear(&self) {
        let mut maps = self.maps.write();
        maps.by_path.clear();
        maps.by_handle.clear();
    }

    pub fn len(&self) -> usize {
        self.maps.read().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
