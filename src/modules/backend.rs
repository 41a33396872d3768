//! The capability contract every attachable filesystem implements.
//!
//! A [`Backend`] owns its own handle space and answers the full operation set
//! of the namespace. The host backend additionally implements
//! [`HostBackend`], which exposes the path view the router needs to place
//! aliases inside the tree and to compose directory listings.

use fuser::{FileAttr, FileType};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::handle::ObjectHandle;

/// Change verifier attached to a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Verifier(pub [u8; 8]);

impl Verifier {
    pub fn from_i64(value: i64) -> Self {
        Self(value.to_be_bytes())
    }

    pub fn as_i64(&self) -> i64 {
        i64::from_be_bytes(self.0)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Name of the entry inside the listed directory
    pub name: String,
    /// Handle of the object the entry refers to
    pub handle: ObjectHandle,
    /// Ordinal position of the entry; pass it back to resume after it
    pub cookie: u64,
    /// Attributes of the object
    pub attr: FileAttr,
}

/// A page of directory entries and the verifier of the listed generation.
#[derive(Debug, Clone, Default)]
pub struct DirectoryStream {
    pub verifier: Verifier,
    pub entries: Vec<DirectoryEntry>,
}

/// Caller identity used when creating objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub uid: u32,
    pub gid: u32,
}

/// Attribute changes requested by `setattr`; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetAttr {
    pub mode: Option<u16>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

/// How durable a write must be before it is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityLevel {
    Unstable,
    DataSync,
    FileSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub count: usize,
    pub stability: StabilityLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AceType {
    Allow,
    Deny,
    Audit,
    Alarm,
}

/// Access control entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ace {
    pub kind: AceType,
    pub flags: u32,
    pub access_mask: u32,
    pub who: String,
}

/// Aggregate filesystem statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsStat {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub total_files: u64,
    pub free_files: u64,
}

/// Operation set of a filesystem that can serve part of the namespace.
///
/// Handles passed to a backend are expected to belong to it; the router only
/// forwards a handle to the backend whose [`Backend::has_handle`] accepted it.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Returns true if `handle` was minted by this backend.
    fn has_handle(&self, handle: ObjectHandle) -> bool;

    fn root_handle(&self) -> io::Result<ObjectHandle>;

    /// Builds the entry that stands for this backend's root inside a parent
    /// directory of another backend.
    fn root_entry(&self, name: &str, cookie: u64) -> io::Result<DirectoryEntry> {
        let handle = self.root_handle()?;
        Ok(DirectoryEntry {
            name: name.to_string(),
            handle,
            cookie,
            attr: self.getattr(handle)?,
        })
    }

    fn lookup(&self, parent: ObjectHandle, name: &str) -> io::Result<ObjectHandle>;

    /// Lists `dir` starting after `cookie` (0 lists from the start).
    fn list(
        &self,
        dir: ObjectHandle,
        verifier: &Verifier,
        cookie: u64,
    ) -> io::Result<DirectoryStream>;

    fn directory_verifier(&self, dir: ObjectHandle) -> io::Result<Verifier>;

    fn getattr(&self, handle: ObjectHandle) -> io::Result<FileAttr>;

    fn setattr(&self, handle: ObjectHandle, changes: &SetAttr) -> io::Result<()>;

    /// Returns the subset of `mode` the caller is granted.
    fn access(&self, handle: ObjectHandle, mode: u32) -> io::Result<u32>;

    fn create(
        &self,
        parent: ObjectHandle,
        kind: FileType,
        name: &str,
        subject: &Subject,
        mode: u32,
    ) -> io::Result<ObjectHandle>;

    fn mkdir(
        &self,
        parent: ObjectHandle,
        name: &str,
        subject: &Subject,
        mode: u32,
    ) -> io::Result<ObjectHandle> {
        self.create(parent, FileType::Directory, name, subject, mode)
    }

    fn remove(&self, parent: ObjectHandle, name: &str) -> io::Result<()>;

    /// Moves `old_name` in `src` to `new_name` in `dest`. Returns false when
    /// nothing changed.
    fn rename(
        &self,
        src: ObjectHandle,
        old_name: &str,
        dest: ObjectHandle,
        new_name: &str,
    ) -> io::Result<bool>;

    fn link(
        &self,
        parent: ObjectHandle,
        existing: ObjectHandle,
        name: &str,
        subject: &Subject,
    ) -> io::Result<ObjectHandle>;

    fn symlink(
        &self,
        parent: ObjectHandle,
        name: &str,
        target: &str,
        subject: &Subject,
        mode: u32,
    ) -> io::Result<ObjectHandle>;

    fn readlink(&self, handle: ObjectHandle) -> io::Result<String>;

    fn parent_of(&self, handle: ObjectHandle) -> io::Result<ObjectHandle>;

    /// Reads into `buf` from `offset`, returning the number of bytes read.
    fn read(&self, handle: ObjectHandle, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    fn write(
        &self,
        handle: ObjectHandle,
        data: &[u8],
        offset: u64,
        stability: StabilityLevel,
    ) -> io::Result<WriteResult>;

    fn commit(&self, handle: ObjectHandle, offset: u64, count: u64) -> io::Result<()>;

    fn get_acl(&self, handle: ObjectHandle) -> io::Result<Vec<Ace>>;

    fn set_acl(&self, handle: ObjectHandle, acl: &[Ace]) -> io::Result<()>;

    fn has_io_layout(&self, _handle: ObjectHandle) -> io::Result<bool> {
        Ok(false)
    }

    fn fs_stat(&self) -> io::Result<FsStat>;

    fn case_insensitive(&self) -> bool {
        false
    }

    fn case_preserving(&self) -> bool {
        false
    }

    /// Releases resources held by the backend. Called once, when it is
    /// detached from a namespace.
    fn release(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Path view of the backend hosting the namespace tree.
pub trait HostBackend: Backend {
    /// Absolute path of `handle` inside the host tree.
    fn resolve_path(&self, handle: ObjectHandle) -> io::Result<PathBuf>;

    /// Creates `path` and any missing parents, returning the final directory.
    fn create_directories(&self, path: &Path) -> io::Result<ObjectHandle>;

    /// Children of `dir` as `(name, handle)` in a fixed order.
    fn children(&self, dir: ObjectHandle) -> io::Result<Vec<(String, ObjectHandle)>>;

    /// Native listing entry for `handle`.
    fn entry(&self, handle: ObjectHandle, name: &str, cookie: u64) -> io::Result<DirectoryEntry> {
        Ok(DirectoryEntry {
            name: name.to_string(),
            handle,
            cookie,
            attr: self.getattr(handle)?,
        })
    }
}
