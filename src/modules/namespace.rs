use fuser::{FileAttr, FileType};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::alias::Alias;
use super::backend::{
    Ace, Backend, DirectoryStream, FsStat, HostBackend, SetAttr, StabilityLevel,
    Subject, Verifier, WriteResult,
};
use super::error::AttachError;
use super::handle::{HandleGenerator, ObjectHandle};
use super::listing;
use super::memory::MemoryFs;
use super::permission::PermissionsConfig;

/// A backend attached to the namespace at an alias.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Where the backend appears in the tree
    pub alias: Alias,
    /// The attached backend
    pub backend: Arc<dyn Backend>,
}

/// Owner of a handle, as seen by the router.
enum Delegate {
    Host,
    Attached(Arc<dyn Backend>),
}

/// Single directory tree composed of a host backend and attached backends.
///
/// Every operation is routed to the backend that recognizes the handle it
/// targets; handles nobody else claims belong to the host. Listings and
/// lookups in host directories substitute the root of any backend attached
/// at the child's path.
#[derive(Debug)]
pub struct Namespace {
    /// Host tree in which aliases are created
    host: Arc<dyn HostBackend>,
    /// The same host, as a plain backend
    host_backend: Arc<dyn Backend>,
    /// Attachments in attach order
    attachments: RwLock<Vec<Attachment>>,
    /// Handle source shared with backends built for this namespace
    handles: HandleGenerator,
}

impl Namespace {
    /// Creates a namespace rooted in a fresh in-memory tree.
    ///
    /// # Arguments
    ///
    /// * `permissions` - Attribute mapping applied to the root tree
    pub fn new(permissions: &PermissionsConfig) -> Self {
        let handles = HandleGenerator::new();
        let root = Arc::new(MemoryFs::new(handles.clone(), permissions));
        Self::with_host(root, handles)
    }

    /// Creates a namespace over an existing host backend.
    ///
    /// `handles` must be the generator the host mints its handles from, so
    /// that backends built later with [`Namespace::handles`] never collide.
    pub fn with_host<H>(host: Arc<H>, handles: HandleGenerator) -> Self
    where
        H: HostBackend + 'static,
    {
        let host_backend: Arc<dyn Backend> = host.clone();
        Self {
            host,
            host_backend,
            attachments: RwLock::new(Vec::new()),
            handles,
        }
    }

    /// Handle generator to build attachable backends with.
    pub fn handles(&self) -> &HandleGenerator {
        &self.handles
    }

    /// The host backend.
    pub fn host(&self) -> Arc<dyn Backend> {
        self.host_backend.clone()
    }

    /// Attaches `backend` at `alias`, creating the alias directory in the host.
    ///
    /// # Errors
    ///
    /// * `AlreadyAttached` if the backend instance already holds an alias
    /// * `AliasCollision` if another backend occupies the normalized alias
    /// * `Io` if the alias directory cannot be created
    ///
    /// A failed attach leaves the registry unchanged.
    pub fn attach(
        &self,
        backend: Arc<dyn Backend>,
        alias: impl AsRef<Path>,
    ) -> Result<Attachment, AttachError> {
        let alias = Alias::new(alias);
        let mut attachments = self.attachments.write();

        if let Some(existing) = attachments
            .iter()
            .find(|a| Arc::ptr_eq(&a.backend, &backend))
        {
            return Err(AttachError::AlreadyAttached(existing.alias.clone()));
        }
        if let Some(existing) = attachments.iter().find(|a| a.alias == alias) {
            return Err(AttachError::AliasCollision {
                alias,
                existing: existing.backend.clone(),
            });
        }

        self.host
            .create_directories(alias.as_path())
            .map_err(|source| AttachError::Io {
                alias: alias.clone(),
                source,
            })?;

        let attachment = Attachment { alias, backend };
        attachments.push(attachment.clone());
        info!("Attached backend at {}", attachment.alias);
        Ok(attachment)
    }

    /// Detaches the backend at `alias` and releases its resources.
    ///
    /// Release failures are logged; once the alias is removed the detach
    /// succeeds and the removed backend is returned.
    pub fn detach(&self, alias: impl AsRef<Path>) -> Result<Arc<dyn Backend>, AttachError> {
        let alias = Alias::new(alias);
        let removed = {
            let mut attachments = self.attachments.write();
            let index = attachments
                .iter()
                .position(|a| a.alias == alias)
                .ok_or_else(|| AttachError::NoSuchAlias(alias.clone()))?;
            attachments.remove(index)
        };

        if let Err(e) = removed.backend.release() {
            error!(
                "An error occurred while releasing resources of the backend detached from {}: {}",
                alias, e
            );
        }
        info!("Detached {}", alias);
        Ok(removed.backend)
    }

    /// Detaches every attachment, most recent first.
    pub fn detach_all(&self) {
        let drained: Vec<Attachment> = self.attachments.write().drain(..).rev().collect();
        for attachment in drained {
            if let Err(e) = attachment.backend.release() {
                error!(
                    "An error occurred while releasing resources of the backend detached from {}: {}",
                    attachment.alias, e
                );
            }
            debug!("Detached {}", attachment.alias);
        }
    }

    /// Snapshot of current attachments in attach order.
    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments.read().clone()
    }

    /// Backend that owns `handle`: the first attachment recognizing it, or the host.
    pub fn resolve_owner(&self, handle: ObjectHandle) -> Arc<dyn Backend> {
        match self.delegate(handle) {
            Delegate::Host => self.host_backend.clone(),
            Delegate::Attached(backend) => backend,
        }
    }

    fn delegate(&self, handle: ObjectHandle) -> Delegate {
        self.attachments
            .read()
            .iter()
            .find(|a| a.backend.has_handle(handle))
            .map(|a| Delegate::Attached(a.backend.clone()))
            .unwrap_or(Delegate::Host)
    }

    fn attached_at(&self, alias: &Alias) -> Option<Arc<dyn Backend>> {
        self.attachments
            .read()
            .iter()
            .find(|a| &a.alias == alias)
            .map(|a| a.backend.clone())
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        self.detach_all();
    }
}

impl Backend for Namespace {
    fn has_handle(&self, handle: ObjectHandle) -> bool {
        self.host.has_handle(handle)
            || self
                .attachments
                .read()
                .iter()
                .any(|a| a.backend.has_handle(handle))
    }

    fn root_handle(&self) -> io::Result<ObjectHandle> {
        let root = self.host.root_handle()?;
        let root_alias = Alias::new(self.host.resolve_path(root)?);
        match self.attached_at(&root_alias) {
            Some(backend) => backend.root_handle(),
            None => Ok(root),
        }
    }

    fn lookup(&self, parent: ObjectHandle, name: &str) -> io::Result<ObjectHandle> {
        match self.delegate(parent) {
            Delegate::Host => {
                let child = Alias::new(self.host.resolve_path(parent)?.join(name));
                if let Some(backend) = self.attached_at(&child) {
                    debug!("Lookup of {} crosses into attachment", child);
                    return backend.root_handle();
                }
                self.host.lookup(parent, name)
            }
            Delegate::Attached(backend) => backend.lookup(parent, name),
        }
    }

    fn list(
        &self,
        dir: ObjectHandle,
        verifier: &Verifier,
        cookie: u64,
    ) -> io::Result<DirectoryStream> {
        match self.delegate(dir) {
            Delegate::Host => {
                listing::compose(self.host.as_ref(), dir, cookie, |alias| self.attached_at(alias))
            }
            Delegate::Attached(backend) => backend.list(dir, verifier, cookie),
        }
    }

    fn directory_verifier(&self, dir: ObjectHandle) -> io::Result<Verifier> {
        self.resolve_owner(dir).directory_verifier(dir)
    }

    fn getattr(&self, handle: ObjectHandle) -> io::Result<FileAttr> {
        self.resolve_owner(handle).getattr(handle)
    }

    fn setattr(&self, handle: ObjectHandle, changes: &SetAttr) -> io::Result<()> {
        self.resolve_owner(handle).setattr(handle, changes)
    }

    fn access(&self, handle: ObjectHandle, mode: u32) -> io::Result<u32> {
        self.resolve_owner(handle).access(handle, mode)
    }

    fn create(
        &self,
        parent: ObjectHandle,
        kind: FileType,
        name: &str,
        subject: &Subject,
        mode: u32,
    ) -> io::Result<ObjectHandle> {
        self.resolve_owner(parent)
            .create(parent, kind, name, subject, mode)
    }

    fn mkdir(
        &self,
        parent: ObjectHandle,
        name: &str,
        subject: &Subject,
        mode: u32,
    ) -> io::Result<ObjectHandle> {
        self.resolve_owner(parent).mkdir(parent, name, subject, mode)
    }

    fn remove(&self, parent: ObjectHandle, name: &str) -> io::Result<()> {
        self.resolve_owner(parent).remove(parent, name)
    }

    fn rename(
        &self,
        src: ObjectHandle,
        old_name: &str,
        dest: ObjectHandle,
        new_name: &str,
    ) -> io::Result<bool> {
        // Ownership follows the source; cross-backend moves fail in the backend
        self.resolve_owner(src).rename(src, old_name, dest, new_name)
    }

    fn link(
        &self,
        parent: ObjectHandle,
        existing: ObjectHandle,
        name: &str,
        subject: &Subject,
    ) -> io::Result<ObjectHandle> {
        self.resolve_owner(parent)
            .link(parent, existing, name, subject)
    }

    fn symlink(
        &self,
        parent: ObjectHandle,
        name: &str,
        target: &str,
        subject: &Subject,
        mode: u32,
    ) -> io::Result<ObjectHandle> {
        self.resolve_owner(parent)
            .symlink(parent, name, target, subject, mode)
    }

    fn readlink(&self, handle: ObjectHandle) -> io::Result<String> {
        self.resolve_owner(handle).readlink(handle)
    }

    fn parent_of(&self, handle: ObjectHandle) -> io::Result<ObjectHandle> {
        self.resolve_owner(handle).parent_of(handle)
    }

    fn read(&self, handle: ObjectHandle, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.resolve_owner(handle).read(handle, buf, offset)
    }

    fn write(
        &self,
        handle: ObjectHandle,
        data: &[u8],
        offset: u64,
        stability: StabilityLevel,
    ) -> io::Result<WriteResult> {
        self.resolve_owner(handle)
            .write(handle, data, offset, stability)
    }

    fn commit(&self, handle: ObjectHandle, offset: u64, count: u64) -> io::Result<()> {
        self.resolve_owner(handle).commit(handle, offset, count)
    }

    fn get_acl(&self, handle: ObjectHandle) -> io::Result<Vec<Ace>> {
        self.resolve_owner(handle).get_acl(handle)
    }

    fn set_acl(&self, handle: ObjectHandle, acl: &[Ace]) -> io::Result<()> {
        self.resolve_owner(handle).set_acl(handle, acl)
    }

    fn has_io_layout(&self, handle: ObjectHandle) -> io::Result<bool> {
        self.resolve_owner(handle).has_io_layout(handle)
    }

    /// Statistics of the first attached backend, standing in for the whole
    /// tree. Falls back to the host when nothing is attached.
    fn fs_stat(&self) -> io::Result<FsStat> {
        let first = self.attachments.read().first().map(|a| a.backend.clone());
        match first {
            Some(backend) => backend.fs_stat(),
            None => {
                warn!("No backend attached, reporting host statistics");
                self.host.fs_stat()
            }
        }
    }

    fn release(&self) -> io::Result<()> {
        self.detach_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const USER: Subject = Subject {
        uid: 1000,
        gid: 1000,
    };

    fn setup_namespace() -> Namespace {
        Namespace::new(&PermissionsConfig::default())
    }

    fn memory_backend(ns: &Namespace) -> Arc<dyn Backend> {
        Arc::new(MemoryFs::new(ns.handles().clone(), &PermissionsConfig::default()))
    }

    /// Backend whose release always fails, counting invocations.
    #[derive(Debug)]
    struct FailingRelease {
        inner: MemoryFs,
        releases: Arc<AtomicUsize>,
    }

    impl Backend for FailingRelease {
        fn has_handle(&self, handle: ObjectHandle) -> bool {
            self.inner.has_handle(handle)
        }
        fn root_handle(&self) -> io::Result<ObjectHandle> {
            self.inner.root_handle()
        }
        fn lookup(&self, parent: ObjectHandle, name: &str) -> io::Result<ObjectHandle> {
            self.inner.lookup(parent, name)
        }
        fn list(&self, dir: ObjectHandle, v: &Verifier, cookie: u64) -> io::Result<DirectoryStream> {
            self.inner.list(dir, v, cookie)
        }
        fn directory_verifier(&self, dir: ObjectHandle) -> io::Result<Verifier> {
            self.inner.directory_verifier(dir)
        }
        fn getattr(&self, handle: ObjectHandle) -> io::Result<FileAttr> {
            self.inner.getattr(handle)
        }
        fn setattr(&self, handle: ObjectHandle, changes: &SetAttr) -> io::Result<()> {
            self.inner.setattr(handle, changes)
        }
        fn access(&self, handle: ObjectHandle, mode: u32) -> io::Result<u32> {
            self.inner.access(handle, mode)
        }
        fn create(
            &self,
            parent: ObjectHandle,
            kind: FileType,
            name: &str,
            subject: &Subject,
            mode: u32,
        ) -> io::Result<ObjectHandle> {
            self.inner.create(parent, kind, name, subject, mode)
        }
        fn remove(&self, parent: ObjectHandle, name: &str) -> io::Result<()> {
            self.inner.remove(parent, name)
        }
        fn rename(
            &self,
            src: ObjectHandle,
            old_name: &str,
            dest: ObjectHandle,
            new_name: &str,
        ) -> io::Result<bool> {
            self.inner.rename(src, old_name, dest, new_name)
        }
        fn link(
            &self,
            parent: ObjectHandle,
            existing: ObjectHandle,
            name: &str,
            subject: &Subject,
        ) -> io::Result<ObjectHandle> {
            self.inner.link(parent, existing, name, subject)
        }
        fn symlink(
            &self,
            parent: ObjectHandle,
            name: &str,
            target: &str,
            subject: &Subject,
            mode: u32,
        ) -> io::Result<ObjectHandle> {
            self.inner.symlink(parent, name, target, subject, mode)
        }
        fn readlink(&self, handle: ObjectHandle) -> io::Result<String> {
            self.inner.readlink(handle)
        }
        fn parent_of(&self, handle: ObjectHandle) -> io::Result<ObjectHandle> {
            self.inner.parent_of(handle)
        }
        fn read(&self, handle: ObjectHandle, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            self.inner.read(handle, buf, offset)
        }
        fn write(
            &self,
            handle: ObjectHandle,
            data: &[u8],
            offset: u64,
            stability: StabilityLevel,
        ) -> io::Result<WriteResult> {
            self.inner.write(handle, data, offset, stability)
        }
        fn commit(&self, handle: ObjectHandle, offset: u64, count: u64) -> io::Result<()> {
            self.inner.commit(handle, offset, count)
        }
        fn get_acl(&self, handle: ObjectHandle) -> io::Result<Vec<Ace>> {
            self.inner.get_acl(handle)
        }
        fn set_acl(&self, handle: ObjectHandle, acl: &[Ace]) -> io::Result<()> {
            self.inner.set_acl(handle, acl)
        }
        fn fs_stat(&self) -> io::Result<FsStat> {
            self.inner.fs_stat()
        }
        fn release(&self) -> io::Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::other("teardown failed"))
        }
    }

    #[test]
    fn test_namespace_creation() -> Result<()> {
        let ns = setup_namespace();
        let root = ns.root_handle()?;

        assert!(ns.attachments().is_empty());
        assert!(Arc::ptr_eq(&ns.resolve_owner(root), &ns.host()));
        assert_eq!(ns.getattr(root)?.kind, FileType::Directory);
        Ok(())
    }

    #[test]
    fn test_attach_resolves_owner() -> Result<()> {
        let ns = setup_namespace();
        let backend = memory_backend(&ns);
        let attachment = ns.attach(backend.clone(), "data/./sub/")?;

        assert_eq!(attachment.alias.as_path(), Path::new("/data/sub"));
        let root = backend.root_handle()?;
        assert!(Arc::ptr_eq(&ns.resolve_owner(root), &backend));

        let file = ns.create(root, FileType::RegularFile, "f", &USER, 0o644)?;
        assert!(Arc::ptr_eq(&ns.resolve_owner(file), &backend));
        Ok(())
    }

    #[test]
    fn test_alias_collision_keeps_first() -> Result<()> {
        let ns = setup_namespace();
        let first = memory_backend(&ns);
        let second = memory_backend(&ns);
        ns.attach(first.clone(), "/mnt")?;

        match ns.attach(second, "/mnt/../mnt/") {
            Err(AttachError::AliasCollision { alias, existing }) => {
                assert_eq!(alias, Alias::new("/mnt"));
                assert!(Arc::ptr_eq(&existing, &first));
            }
            other => panic!("expected collision, got {:?}", other),
        }

        let attachments = ns.attachments();
        assert_eq!(attachments.len(), 1);
        assert!(Arc::ptr_eq(&attachments[0].backend, &first));
        Ok(())
    }

    #[test]
    fn test_attach_twice_fails() -> Result<()> {
        let ns = setup_namespace();
        let backend = memory_backend(&ns);
        ns.attach(backend.clone(), "/one")?;

        let err = ns.attach(backend, "/two").unwrap_err();
        assert!(matches!(err, AttachError::AlreadyAttached(ref alias) if alias == &Alias::new("/one")));
        assert_eq!(ns.attachments().len(), 1);
        assert_eq!(ns.attachments()[0].alias, Alias::new("/one"));
        Ok(())
    }

    #[test]
    fn test_attach_through_file_fails() -> Result<()> {
        let ns = setup_namespace();
        let root = ns.root_handle()?;
        ns.create(root, FileType::RegularFile, "file", &USER, 0o644)?;

        let err = ns.attach(memory_backend(&ns), "/file/mnt").unwrap_err();
        assert!(matches!(err, AttachError::Io { .. }));
        assert!(ns.attachments().is_empty());
        Ok(())
    }

    #[test]
    fn test_detach_unknown_alias() -> Result<()> {
        let ns = setup_namespace();
        ns.attach(memory_backend(&ns), "/mnt")?;

        let err = ns.detach("/other").unwrap_err();
        assert!(matches!(err, AttachError::NoSuchAlias(_)));
        assert_eq!(ns.attachments().len(), 1);
        Ok(())
    }

    #[test]
    fn test_detach_releases_once_even_on_failure() -> Result<()> {
        let ns = setup_namespace();
        let releases = Arc::new(AtomicUsize::new(0));
        let backend: Arc<dyn Backend> = Arc::new(FailingRelease {
            inner: MemoryFs::new(ns.handles().clone(), &PermissionsConfig::default()),
            releases: releases.clone(),
        });
        ns.attach(backend.clone(), "/flaky")?;

        let removed = ns.detach("/flaky/")?;

        assert!(Arc::ptr_eq(&removed, &backend));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(ns.attachments().is_empty());
        drop(ns);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_drop_releases_remaining() -> Result<()> {
        let releases = Arc::new(AtomicUsize::new(0));
        {
            let ns = setup_namespace();
            let backend: Arc<dyn Backend> = Arc::new(FailingRelease {
                inner: MemoryFs::new(ns.handles().clone(), &PermissionsConfig::default()),
                releases: releases.clone(),
            });
            ns.attach(backend, "/kept")?;
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_list_substitutes_alias() -> Result<()> {
        let ns = setup_namespace();
        let root = ns.root_handle()?;
        ns.mkdir(root, "a", &USER, 0o755)?;
        ns.mkdir(root, "z", &USER, 0o755)?;
        let backend = memory_backend(&ns);
        ns.attach(backend.clone(), "/mnt")?;

        let stream = ns.list(root, &Verifier::default(), 0)?;
        let names: Vec<_> = stream.entries.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(names, vec!["a", "mnt", "z"]);
        assert_eq!(stream.entries[1].handle, backend.root_handle()?);
        assert!(Arc::ptr_eq(&ns.resolve_owner(stream.entries[0].handle), &ns.host()));

        let again = ns.list(root, &stream.verifier, 0)?;
        assert_eq!(again.verifier, stream.verifier);

        let tail = ns.list(root, &stream.verifier, 1)?;
        let tail_names: Vec<_> = tail.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(tail_names, vec!["z"]);
        Ok(())
    }

    #[test]
    fn test_aliases_in_nested_host_directory() -> Result<()> {
        let ns = setup_namespace();
        let a = memory_backend(&ns);
        let b = memory_backend(&ns);
        ns.attach(a.clone(), "/shares/a")?;
        ns.attach(b.clone(), "/shares/b")?;

        let shares = ns.lookup(ns.root_handle()?, "shares")?;
        assert!(Arc::ptr_eq(&ns.resolve_owner(shares), &ns.host()));

        // A directory holding only aliases still lists ordinary directories
        let stream = ns.list(shares, &Verifier::default(), 0)?;
        let listed: Vec<_> = stream
            .entries
            .iter()
            .map(|e| (e.name.as_str(), e.handle, e.attr.kind))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("a", a.root_handle()?, FileType::Directory),
                ("b", b.root_handle()?, FileType::Directory),
            ]
        );
        assert_eq!(ns.lookup(shares, "b")?, b.root_handle()?);
        Ok(())
    }

    #[test]
    fn test_list_inside_attachment_is_native() -> Result<()> {
        let ns = setup_namespace();
        let backend = memory_backend(&ns);
        let root = backend.root_handle()?;
        backend.create(root, FileType::RegularFile, "inner.txt", &USER, 0o644)?;
        ns.attach(backend.clone(), "/mnt")?;

        let stream = ns.list(root, &Verifier::default(), 0)?;
        assert_eq!(stream.entries.len(), 1);
        assert_eq!(stream.entries[0].name, "inner.txt");
        assert!(backend.has_handle(stream.entries[0].handle));
        Ok(())
    }

    #[test]
    fn test_lookup_crosses_alias() -> Result<()> {
        let ns = setup_namespace();
        let root = ns.root_handle()?;
        let backend = memory_backend(&ns);
        ns.attach(backend.clone(), "/mnt")?;
        ns.mkdir(root, "plain", &USER, 0o755)?;

        assert_eq!(ns.lookup(root, "mnt")?, backend.root_handle()?);

        let plain = ns.lookup(root, "plain")?;
        assert!(Arc::ptr_eq(&ns.resolve_owner(plain), &ns.host()));
        Ok(())
    }

    #[test]
    fn test_root_alias_replaces_root() -> Result<()> {
        let ns = setup_namespace();
        let host_root = ns.root_handle()?;
        let backend = memory_backend(&ns);
        ns.attach(backend.clone(), "/")?;

        assert_eq!(ns.root_handle()?, backend.root_handle()?);
        ns.detach("/")?;
        assert_eq!(ns.root_handle()?, host_root);
        Ok(())
    }

    #[test]
    fn test_nested_alias_owned_by_membership() -> Result<()> {
        let ns = setup_namespace();
        let outer = memory_backend(&ns);
        let inner = memory_backend(&ns);
        ns.attach(outer.clone(), "/data")?;
        ns.attach(inner.clone(), "/data/nested")?;

        let inner_root = inner.root_handle()?;
        let deep = ns.mkdir(inner_root, "deep", &USER, 0o755)?;
        let file = ns.create(deep, FileType::RegularFile, "leaf", &USER, 0o644)?;

        assert!(Arc::ptr_eq(&ns.resolve_owner(file), &inner));
        assert!(Arc::ptr_eq(&ns.resolve_owner(deep), &inner));
        assert!(Arc::ptr_eq(&ns.resolve_owner(outer.root_handle()?), &outer));

        // Listing /data goes to the outer backend, which knows nothing of /data/nested
        let outer_listing = ns.list(outer.root_handle()?, &Verifier::default(), 0)?;
        assert!(outer_listing.entries.is_empty());
        Ok(())
    }

    #[test]
    fn test_delegated_errors_pass_through() -> Result<()> {
        let ns = setup_namespace();
        let backend = memory_backend(&ns);
        ns.attach(backend.clone(), "/mnt")?;

        let err = ns.lookup(backend.root_handle()?, "missing").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        Ok(())
    }

    #[test]
    fn test_read_write_through_namespace() -> Result<()> {
        let ns = setup_namespace();
        let backend = memory_backend(&ns);
        ns.attach(backend, "/mnt")?;
        let mnt = ns.lookup(ns.root_handle()?, "mnt")?;

        let file = ns.create(mnt, FileType::RegularFile, "note", &USER, 0o644)?;
        ns.write(file, b"routed", 0, StabilityLevel::FileSync)?;
        let mut buf = [0u8; 16];
        let count = ns.read(file, &mut buf, 0)?;

        assert_eq!(&buf[..count], b"routed");
        Ok(())
    }

    #[test]
    fn test_fs_stat_fallback() -> Result<()> {
        let ns = setup_namespace();
        assert_eq!(ns.fs_stat()?, ns.host().fs_stat()?);

        let backend = memory_backend(&ns);
        let root = backend.root_handle()?;
        let file = backend.create(root, FileType::RegularFile, "f", &USER, 0o644)?;
        backend.write(file, b"1234", 0, StabilityLevel::FileSync)?;
        ns.attach(backend.clone(), "/mnt")?;

        assert_eq!(ns.fs_stat()?, backend.fs_stat()?);
        Ok(())
    }

    #[test]
    fn test_concurrent_attach_single_winner() -> Result<()> {
        let ns = setup_namespace();
        let backends: Vec<_> = (0..8).map(|_| memory_backend(&ns)).collect();

        let wins = std::thread::scope(|scope| {
            let handles: Vec<_> = backends
                .iter()
                .map(|backend| {
                    let ns = &ns;
                    let backend = backend.clone();
                    scope.spawn(move || ns.attach(backend, "/contested").is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join())
                .filter(|r| matches!(r, Ok(true)))
                .count()
        });

        assert_eq!(wins, 1);
        assert_eq!(ns.attachments().len(), 1);
        Ok(())
    }
}
