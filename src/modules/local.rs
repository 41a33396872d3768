//! Backend serving a directory of the local filesystem.

use fuser::{FileAttr, FileType};
use log::{debug, info};
use nix::sys::statvfs::statvfs;
use std::fs::{self, File, FileTimes, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::backend::{
    Ace, Backend, DirectoryEntry, DirectoryStream, FsStat, SetAttr, StabilityLevel, Subject,
    Verifier, WriteResult,
};
use super::handle::{HandleGenerator, HandleRegistry, ObjectHandle};
use super::listing::{in_page, verifier_of, VerifierAccumulator};
use super::permission::PermissionsMapper;

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn file_type(metadata: &fs::Metadata) -> FileType {
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        FileType::Directory
    } else if file_type.is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    }
}

fn timestamp(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

// Helper function to create FileAttr from metadata
fn create_file_attr(handle: ObjectHandle, metadata: &fs::Metadata) -> FileAttr {
    FileAttr {
        ino: handle.0,
        size: metadata.len(),
        blocks: metadata.blocks(),
        atime: timestamp(metadata.atime(), metadata.atime_nsec()),
        mtime: timestamp(metadata.mtime(), metadata.mtime_nsec()),
        ctime: timestamp(metadata.ctime(), metadata.ctime_nsec()),
        crtime: metadata.created().unwrap_or(UNIX_EPOCH),
        kind: file_type(metadata),
        perm: (metadata.mode() & 0o7777) as u16,
        nlink: metadata.nlink() as u32,
        uid: metadata.uid(),
        gid: metadata.gid(),
        rdev: metadata.rdev() as u32,
        flags: 0,
        blksize: metadata.blksize() as u32,
    }
}

fn check_name(name: &str) -> io::Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(errno(libc::EINVAL)),
    }
}

/// Serves the directory tree below `root` on the local filesystem.
///
/// Handles are minted lazily as objects are looked up or listed, and stay
/// valid across renames performed through the backend.
#[derive(Debug)]
pub struct LocalFs {
    root: PathBuf,
    registry: HandleRegistry,
    root_handle: ObjectHandle,
    permissions: Arc<dyn PermissionsMapper>,
    released: AtomicBool,
}

impl LocalFs {
    /// Creates a backend over `root`, which must be an existing directory.
    pub fn new(
        root: &Path,
        generator: HandleGenerator,
        permissions: Arc<dyn PermissionsMapper>,
    ) -> io::Result<Self> {
        let root = fs::canonicalize(root)?;
        if !fs::metadata(&root)?.is_dir() {
            return Err(errno(libc::ENOTDIR));
        }
        let registry = HandleRegistry::new(generator);
        let root_handle = registry.to_handle(Path::new(""));
        debug!("Serving {:?} with root handle {}", root, root_handle);

        Ok(Self {
            root,
            registry,
            root_handle,
            permissions,
            released: AtomicBool::new(false),
        })
    }

    /// Local directory served by this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative(&self, handle: ObjectHandle) -> io::Result<PathBuf> {
        if self.released.load(Ordering::Acquire) {
            return Err(errno(libc::ESTALE));
        }
        self.registry.to_path(handle)
    }

    fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    fn attr_of(&self, handle: ObjectHandle, relative: &Path) -> io::Result<FileAttr> {
        let metadata = fs::symlink_metadata(self.absolute(relative))?;
        let mut attr = create_file_attr(handle, &metadata);
        self.permissions.map_at(relative, &mut attr);
        Ok(attr)
    }

    /// Children names of a directory, sorted for a stable listing order.
    fn sorted_children(&self, relative: &Path) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.absolute(relative))?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn child(&self, parent: ObjectHandle, name: &str) -> io::Result<PathBuf> {
        check_name(name)?;
        Ok(self.relative(parent)?.join(name))
    }

    fn apply_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
    }
}

impl Backend for LocalFs {
    fn has_handle(&self, handle: ObjectHandle) -> bool {
        !self.released.load(Ordering::Acquire) && self.registry.contains(handle)
    }

    fn root_handle(&self) -> io::Result<ObjectHandle> {
        Ok(self.root_handle)
    }

    fn lookup(&self, parent: ObjectHandle, name: &str) -> io::Result<ObjectHandle> {
        let parent_path = self.relative(parent)?;
        let relative = match name {
            "." => parent_path,
            ".." => parent_path.parent().map(Path::to_path_buf).unwrap_or_default(),
            _ => {
                check_name(name)?;
                parent_path.join(name)
            }
        };
        fs::symlink_metadata(self.absolute(&relative))?;
        Ok(self.registry.to_handle(&relative))
    }

    fn list(
        &self,
        dir: ObjectHandle,
        _verifier: &Verifier,
        cookie: u64,
    ) -> io::Result<DirectoryStream> {
        let relative = self.relative(dir)?;
        let mut acc = VerifierAccumulator::new();
        let mut entries = Vec::new();

        for (position, name) in self.sorted_children(&relative)?.into_iter().enumerate() {
            let position = position as u64;
            acc.push(&name, position);
            if !in_page(cookie, position) {
                continue;
            }
            let child = relative.join(&name);
            let handle = self.registry.to_handle(&child);
            let attr = self.attr_of(handle, &child)?;
            entries.push(DirectoryEntry {
                name,
                handle,
                cookie: position,
                attr,
            });
        }

        Ok(DirectoryStream {
            verifier: acc.finish(),
            entries,
        })
    }

    fn directory_verifier(&self, dir: ObjectHandle) -> io::Result<Verifier> {
        let names = self.sorted_children(&self.relative(dir)?)?;
        Ok(verifier_of(names.iter().map(String::as_str)))
    }

    fn getattr(&self, handle: ObjectHandle) -> io::Result<FileAttr> {
        let relative = self.relative(handle)?;
        self.attr_of(handle, &relative)
    }

    fn setattr(&self, handle: ObjectHandle, changes: &SetAttr) -> io::Result<()> {
        let path = self.absolute(&self.relative(handle)?);

        if let Some(mode) = changes.mode {
            self.apply_mode(&path, mode as u32)?;
        }
        if changes.uid.is_some() || changes.gid.is_some() {
            std::os::unix::fs::lchown(&path, changes.uid, changes.gid)?;
        }
        if let Some(size) = changes.size {
            OpenOptions::new().write(true).open(&path)?.set_len(size)?;
        }
        if changes.atime.is_some() || changes.mtime.is_some() {
            let mut times = FileTimes::new();
            if let Some(atime) = changes.atime {
                times = times.set_accessed(atime);
            }
            if let Some(mtime) = changes.mtime {
                times = times.set_modified(mtime);
            }
            File::open(&path)?.set_times(times)?;
        }
        Ok(())
    }

    fn access(&self, handle: ObjectHandle, mode: u32) -> io::Result<u32> {
        fs::symlink_metadata(self.absolute(&self.relative(handle)?))?;
        Ok(mode)
    }

    fn create(
        &self,
        parent: ObjectHandle,
        kind: FileType,
        name: &str,
        subject: &Subject,
        mode: u32,
    ) -> io::Result<ObjectHandle> {
        let relative = self.child(parent, name)?;
        let path = self.absolute(&relative);
        match kind {
            FileType::Directory => fs::create_dir(&path)?,
            FileType::RegularFile => {
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)?;
            }
            FileType::Symlink => return Err(errno(libc::EINVAL)),
            _ => return Err(errno(libc::ENOTSUP)),
        }
        self.apply_mode(&path, mode)?;
        debug!("Created {:?} for uid {}", path, subject.uid);
        Ok(self.registry.to_handle(&relative))
    }

    fn remove(&self, parent: ObjectHandle, name: &str) -> io::Result<()> {
        let relative = self.child(parent, name)?;
        let path = self.absolute(&relative);
        if fs::symlink_metadata(&path)?.is_dir() {
            fs::remove_dir(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        self.registry.forget(&relative);
        Ok(())
    }

    fn rename(
        &self,
        src: ObjectHandle,
        old_name: &str,
        dest: ObjectHandle,
        new_name: &str,
    ) -> io::Result<bool> {
        let from = self.child(src, old_name)?;
        let to = self.child(dest, new_name)?;
        if from == to {
            return Ok(false);
        }
        fs::rename(self.absolute(&from), self.absolute(&to))?;
        self.registry.rename(&from, &to);
        Ok(true)
    }

    fn link(
        &self,
        parent: ObjectHandle,
        existing: ObjectHandle,
        name: &str,
        _subject: &Subject,
    ) -> io::Result<ObjectHandle> {
        let original = self.absolute(&self.relative(existing)?);
        let relative = self.child(parent, name)?;
        fs::hard_link(original, self.absolute(&relative))?;
        Ok(self.registry.to_handle(&relative))
    }

    fn symlink(
        &self,
        parent: ObjectHandle,
        name: &str,
        target: &str,
        _subject: &Subject,
        _mode: u32,
    ) -> io::Result<ObjectHandle> {
        let relative = self.child(parent, name)?;
        std::os::unix::fs::symlink(target, self.absolute(&relative))?;
        Ok(self.registry.to_handle(&relative))
    }

    fn readlink(&self, handle: ObjectHandle) -> io::Result<String> {
        let target = fs::read_link(self.absolute(&self.relative(handle)?))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn parent_of(&self, handle: ObjectHandle) -> io::Result<ObjectHandle> {
        let relative = self.relative(handle)?;
        let parent = relative.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(self.registry.to_handle(&parent))
    }

    fn read(&self, handle: ObjectHandle, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let file = File::open(self.absolute(&self.relative(handle)?))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read_at(&mut buf[total..], offset + total as u64)? {
                0 => break,
                count => total += count,
            }
        }
        Ok(total)
    }

    fn write(
        &self,
        handle: ObjectHandle,
        data: &[u8],
        offset: u64,
        stability: StabilityLevel,
    ) -> io::Result<WriteResult> {
        let file = OpenOptions::new()
            .write(true)
            .open(self.absolute(&self.relative(handle)?))?;
        file.write_all_at(data, offset)?;
        match stability {
            StabilityLevel::Unstable => {}
            StabilityLevel::DataSync => file.sync_data()?,
            StabilityLevel::FileSync => file.sync_all()?,
        }
        Ok(WriteResult {
            count: data.len(),
            stability,
        })
    }

    fn commit(&self, handle: ObjectHandle, _offset: u64, _count: u64) -> io::Result<()> {
        File::open(self.absolute(&self.relative(handle)?))?.sync_all()
    }

    fn get_acl(&self, handle: ObjectHandle) -> io::Result<Vec<Ace>> {
        self.relative(handle)?;
        Ok(Vec::new())
    }

    fn set_acl(&self, _handle: ObjectHandle, _acl: &[Ace]) -> io::Result<()> {
        Err(errno(libc::ENOTSUP))
    }

    fn fs_stat(&self) -> io::Result<FsStat> {
        let stat = statvfs(&self.root)?;
        let fragment = stat.fragment_size() as u64;
        Ok(FsStat {
            total_bytes: stat.blocks() as u64 * fragment,
            free_bytes: stat.blocks_available() as u64 * fragment,
            total_files: stat.files() as u64,
            free_files: stat.files_free() as u64,
        })
    }

    fn release(&self) -> io::Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(
            "Releasing {:?} ({} handles)",
            self.root,
            self.registry.len()
        );
        self.registry.clear();
        Ok(())
    }
}
