//! FUSE presentation of a namespace.
//!
//! Inode 1 is the namespace root; every other inode number is the value of
//! the object handle it stands for.

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyStatfs, ReplyWrite, Request, TimeOrNow, FUSE_ROOT_ID,
};
use libc::{EINVAL, EIO};
use log::{debug, warn};
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use super::backend::{Backend, SetAttr, StabilityLevel, Subject, Verifier};
use super::constants::*;
use super::handle::ObjectHandle;

/// Maps an I/O failure to the errno reported to the kernel.
pub fn errno_of(err: &io::Error) -> i32 {
    if let Some(code) = err.raw_os_error() {
        return code;
    }
    match err.kind() {
        io::ErrorKind::NotFound => libc::ENOENT,
        io::ErrorKind::PermissionDenied => libc::EACCES,
        io::ErrorKind::AlreadyExists => libc::EEXIST,
        io::ErrorKind::InvalidInput => libc::EINVAL,
        io::ErrorKind::Unsupported => libc::ENOTSUP,
        _ => EIO,
    }
}

fn time_of(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// FUSE filesystem over any backend, normally a [`Namespace`](super::namespace::Namespace).
#[derive(Debug, Clone)]
pub struct NamespaceFs {
    backend: Arc<dyn Backend>,
    root: ObjectHandle,
}

impl NamespaceFs {
    pub fn new(backend: Arc<dyn Backend>) -> io::Result<Self> {
        let root = backend.root_handle()?;
        Ok(Self { backend, root })
    }

    /// Handle behind a FUSE inode number.
    pub fn to_handle(&self, ino: u64) -> ObjectHandle {
        if ino == FUSE_ROOT_ID {
            self.root
        } else {
            ObjectHandle(ino)
        }
    }

    /// FUSE inode number of a handle.
    pub fn to_ino(&self, handle: ObjectHandle) -> u64 {
        if handle == self.root {
            FUSE_ROOT_ID
        } else {
            handle.0
        }
    }

    /// Attributes of `handle` with the inode number FUSE expects.
    pub fn attr(&self, handle: ObjectHandle) -> io::Result<FileAttr> {
        let mut attr = self.backend.getattr(handle)?;
        attr.ino = self.to_ino(handle);
        Ok(attr)
    }

    fn name<'a>(&self, name: &'a OsStr) -> Result<&'a str, i32> {
        name.to_str().ok_or(EINVAL)
    }

    fn reply_entry(&self, result: io::Result<ObjectHandle>, reply: ReplyEntry) {
        match result.and_then(|handle| self.attr(handle)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn reply_empty(result: io::Result<()>, reply: ReplyEmpty) {
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_of(&e)),
        }
    }
}

impl Filesystem for NamespaceFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("Lookup for parent: {}, name: {:?}", parent, name);
        let name = match self.name(name) {
            Ok(name) => name,
            Err(code) => return reply.error(code),
        };
        let result = self.backend.lookup(self.to_handle(parent), name);
        self.reply_entry(result, reply);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.attr(self.to_handle(ino)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let handle = self.to_handle(ino);
        let changes = SetAttr {
            mode: mode.map(|m| (m & 0o7777) as u16),
            uid,
            gid,
            size,
            atime: atime.map(time_of),
            mtime: mtime.map(time_of),
        };
        match self
            .backend
            .setattr(handle, &changes)
            .and_then(|_| self.attr(handle))
        {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        match self.backend.readlink(self.to_handle(ino)) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match self.name(name) {
            Ok(name) => name,
            Err(code) => return reply.error(code),
        };
        let subject = Subject {
            uid: req.uid(),
            gid: req.gid(),
        };
        let result = self
            .backend
            .mkdir(self.to_handle(parent), name, &subject, mode & !umask);
        self.reply_entry(result, reply);
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match self.name(name) {
            Ok(name) => name,
            Err(code) => return reply.error(code),
        };
        Self::reply_empty(self.backend.remove(self.to_handle(parent), name), reply);
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match self.name(name) {
            Ok(name) => name,
            Err(code) => return reply.error(code),
        };
        Self::reply_empty(self.backend.remove(self.to_handle(parent), name), reply);
    }

    fn symlink(
        &mut self,
        req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let (name, target) = match (self.name(link_name), target.to_str()) {
            (Ok(name), Some(target)) => (name, target),
            _ => return reply.error(EINVAL),
        };
        let subject = Subject {
            uid: req.uid(),
            gid: req.gid(),
        };
        let result = self
            .backend
            .symlink(self.to_handle(parent), name, target, &subject, 0o777);
        self.reply_entry(result, reply);
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (name, newname) = match (self.name(name), self.name(newname)) {
            (Ok(name), Ok(newname)) => (name, newname),
            _ => return reply.error(EINVAL),
        };
        let result = self
            .backend
            .rename(
                self.to_handle(parent),
                name,
                self.to_handle(newparent),
                newname,
            )
            .map(|_| ());
        Self::reply_empty(result, reply);
    }

    fn link(
        &mut self,
        req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let name = match self.name(newname) {
            Ok(name) => name,
            Err(code) => return reply.error(code),
        };
        let subject = Subject {
            uid: req.uid(),
            gid: req.gid(),
        };
        let result = self.backend.link(
            self.to_handle(newparent),
            self.to_handle(ino),
            name,
            &subject,
        );
        self.reply_entry(result, reply);
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            return reply.error(EINVAL);
        }
        let mut buf = vec![0u8; size as usize];
        match self.backend.read(self.to_handle(ino), &mut buf, offset as u64) {
            Ok(count) => reply.data(&buf[..count]),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            return reply.error(EINVAL);
        }
        let stability = if flags & libc::O_SYNC == libc::O_SYNC {
            StabilityLevel::FileSync
        } else if flags & libc::O_DSYNC != 0 {
            StabilityLevel::DataSync
        } else {
            StabilityLevel::Unstable
        };
        match self
            .backend
            .write(self.to_handle(ino), data, offset as u64, stability)
        {
            Ok(result) => reply.written(result.count as u32),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn fsync(&mut self, _req: &Request, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        Self::reply_empty(self.backend.commit(self.to_handle(ino), 0, 0), reply);
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match self.name(name) {
            Ok(name) => name,
            Err(code) => return reply.error(code),
        };
        let subject = Subject {
            uid: req.uid(),
            gid: req.gid(),
        };
        let result = self
            .backend
            .create(
                self.to_handle(parent),
                FileType::RegularFile,
                name,
                &subject,
                mode & !umask,
            )
            .and_then(|handle| self.attr(handle));
        match result {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let result = self
            .backend
            .access(self.to_handle(ino), mask as u32)
            .and_then(|granted| {
                if granted & mask as u32 == mask as u32 {
                    Ok(())
                } else {
                    Err(io::Error::from_raw_os_error(libc::EACCES))
                }
            });
        Self::reply_empty(result, reply);
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let dir = self.to_handle(ino);
        let parent = self
            .backend
            .parent_of(dir)
            .map(|parent| self.to_ino(parent))
            .unwrap_or(FUSE_ROOT_ID);
        let stream = match self.backend.list(dir, &Verifier::default(), 0) {
            Ok(stream) => stream,
            Err(e) => return reply.error(errno_of(&e)),
        };

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent, FileType::Directory, "..".to_string()),
        ];
        entries.extend(
            stream
                .entries
                .into_iter()
                .map(|entry| (self.to_ino(entry.handle), entry.attr.kind, entry.name)),
        );

        for (i, entry) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry.0, (i + 1) as i64, entry.1, entry.2) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        match self.backend.fs_stat() {
            Ok(stat) => reply.statfs(
                stat.total_bytes / BLOCK_SIZE,
                stat.free_bytes / BLOCK_SIZE,
                stat.free_bytes / BLOCK_SIZE,
                stat.total_files,
                stat.free_files,
                BLOCK_SIZE as u32,
                MAX_NAME_LENGTH,
                BLOCK_SIZE as u32,
            ),
            Err(e) => {
                warn!("Failed to read filesystem statistics: {}", e);
                reply.error(errno_of(&e))
            }
        }
    }
}
