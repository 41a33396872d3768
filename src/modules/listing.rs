//! Paginated directory listings that splice attached backends into the host tree.
//!
//! Positions are assigned to children in the host's enumeration order. A
//! cookie of 0 starts the listing at position 0; any other cookie resumes
//! strictly after the position it names. The verifier folds every child name
//! and position into one value, so it changes whenever the child set does.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::alias::Alias;
use super::backend::{Backend, DirectoryStream, HostBackend, Verifier};
use super::constants::{COOKIE_STRIDE, VERIFIER_SEED};
use super::handle::ObjectHandle;

/// Returns true if the child at `position` belongs to the page requested by `cookie`.
pub fn in_page(cookie: u64, position: u64) -> bool {
    if cookie == 0 {
        true
    } else {
        position > cookie
    }
}

/// Running verifier over the children of one directory.
#[derive(Debug, Clone, Copy)]
pub struct VerifierAccumulator {
    value: i64,
}

impl Default for VerifierAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl VerifierAccumulator {
    pub fn new() -> Self {
        Self {
            value: VERIFIER_SEED,
        }
    }

    pub fn push(&mut self, name: &str, position: u64) {
        let step = fingerprint(name).wrapping_add((position as i64).wrapping_mul(COOKIE_STRIDE));
        self.value = self.value.wrapping_add(step);
    }

    pub fn finish(&self) -> Verifier {
        Verifier::from_i64(self.value)
    }
}

fn fingerprint(name: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as i64
}

/// Verifier of a full child name sequence.
pub fn verifier_of<'a>(names: impl IntoIterator<Item = &'a str>) -> Verifier {
    let mut acc = VerifierAccumulator::new();
    for (position, name) in names.into_iter().enumerate() {
        acc.push(name, position as u64);
    }
    acc.finish()
}

/// Lists a host directory, substituting the root entry of an attached
/// backend for every child whose path is an alias.
///
/// `attached_at` maps a normalized alias to the backend mounted there.
pub fn compose<F>(
    host: &dyn HostBackend,
    dir: ObjectHandle,
    cookie: u64,
    attached_at: F,
) -> io::Result<DirectoryStream>
where
    F: Fn(&Alias) -> Option<Arc<dyn Backend>>,
{
    let dir_path = host.resolve_path(dir)?;
    let mut acc = VerifierAccumulator::new();
    let mut entries = Vec::new();

    for (position, (name, handle)) in host.children(dir)?.into_iter().enumerate() {
        let position = position as u64;
        acc.push(&name, position);
        if !in_page(cookie, position) {
            continue;
        }

        let child = Alias::new(dir_path.join(Path::new(&name)));
        match attached_at(&child) {
            Some(backend) => entries.push(backend.root_entry(&name, position)?),
            None => entries.push(host.entry(handle, &name, position)?),
        }
    }

    Ok(DirectoryStream {
        verifier: acc.finish(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::handle::HandleGenerator;
    use crate::modules::memory::MemoryFs;
    use crate::modules::permission::PermissionsConfig;
    use anyhow::Result;

    fn host_with(names: &[&str]) -> Result<MemoryFs> {
        let host = MemoryFs::new(HandleGenerator::new(), &PermissionsConfig::default());
        for name in names {
            host.create_directories(&Path::new("/").join(name))?;
        }
        Ok(host)
    }

    fn names(stream: &DirectoryStream) -> Vec<&str> {
        stream.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_page_rule() {
        assert!(in_page(0, 0));
        assert!(in_page(0, 5));
        assert!(!in_page(1, 0));
        assert!(!in_page(1, 1));
        assert!(in_page(1, 2));
    }

    #[test]
    fn test_empty_directory_keeps_seed() -> Result<()> {
        let host = host_with(&[])?;
        let root = host.root_handle()?;

        let stream = compose(&host, root, 0, |_| None)?;

        assert!(stream.entries.is_empty());
        assert_eq!(stream.verifier, Verifier::from_i64(VERIFIER_SEED));
        Ok(())
    }

    #[test]
    fn test_alias_child_is_substituted() -> Result<()> {
        let generator = HandleGenerator::new();
        let host = MemoryFs::new(generator.clone(), &PermissionsConfig::default());
        for name in ["a", "mnt", "z"] {
            host.create_directories(&Path::new("/").join(name))?;
        }
        let mounted: Arc<dyn Backend> =
            Arc::new(MemoryFs::new(generator, &PermissionsConfig::default()));
        let mounted_root = mounted.root_handle()?;
        let root = host.root_handle()?;

        let stream = compose(&host, root, 0, |alias| {
            (alias.as_path() == Path::new("/mnt")).then(|| mounted.clone())
        })?;

        assert_eq!(names(&stream), vec!["a", "mnt", "z"]);
        assert_eq!(stream.entries[1].handle, mounted_root);
        assert_eq!(stream.entries[1].cookie, 1);
        assert!(host.has_handle(stream.entries[0].handle));
        assert!(host.has_handle(stream.entries[2].handle));
        Ok(())
    }

    #[test]
    fn test_resume_after_cookie() -> Result<()> {
        let host = host_with(&["a", "b", "c", "d"])?;
        let root = host.root_handle()?;

        let all = compose(&host, root, 0, |_| None)?;
        let tail = compose(&host, root, 1, |_| None)?;

        assert_eq!(names(&all), vec!["a", "b", "c", "d"]);
        assert_eq!(names(&tail), vec!["c", "d"]);
        assert_eq!(all.verifier, tail.verifier);
        Ok(())
    }

    #[test]
    fn test_verifier_tracks_child_set() -> Result<()> {
        let host = host_with(&["a", "b"])?;
        let root = host.root_handle()?;

        let first = compose(&host, root, 0, |_| None)?;
        let again = compose(&host, root, 0, |_| None)?;
        assert_eq!(first.verifier, again.verifier);

        host.create_directories(Path::new("/c"))?;
        let changed = compose(&host, root, 0, |_| None)?;
        assert_ne!(first.verifier, changed.verifier);
        assert_eq!(changed.verifier, verifier_of(["a", "b", "c"]));
        Ok(())
    }
}
