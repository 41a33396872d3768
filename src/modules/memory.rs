//! In-memory filesystem used as the root of a namespace.
//!
//! The tree never touches the operating system, so directories created for
//! aliases exist only inside the namespace. Handles double as inode numbers.

use fuser::{FileAttr, FileType};
use log::debug;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::backend::{
    Ace, Backend, DirectoryEntry, DirectoryStream, FsStat, HostBackend, SetAttr, StabilityLevel,
    Subject, Verifier, WriteResult,
};
use super::constants::*;
use super::handle::{HandleGenerator, ObjectHandle};
use super::listing::{in_page, verifier_of, VerifierAccumulator};
use super::permission::{PermissionsConfig, PermissionsMapper};

#[derive(Debug, Clone)]
enum Content {
    Directory(BTreeMap<String, ObjectHandle>),
    File(Vec<u8>),
    Symlink(String),
}

#[derive(Debug, Clone)]
struct Node {
    attr: FileAttr,
    parent: ObjectHandle,
    name: String,
    content: Content,
    acl: Vec<Ace>,
}

type Nodes = HashMap<ObjectHandle, Node>;

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn new_attr(handle: ObjectHandle, kind: FileType, perm: u16, uid: u32, gid: u32) -> FileAttr {
    let now = SystemTime::now();
    FileAttr {
        ino: handle.0,
        size: 0,
        blocks: 0,
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind,
        perm,
        nlink: if kind == FileType::Directory { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE as u32,
    }
}

fn node(nodes: &Nodes, handle: ObjectHandle) -> io::Result<&Node> {
    nodes.get(&handle).ok_or_else(|| errno(libc::ESTALE))
}

fn node_mut(nodes: &mut Nodes, handle: ObjectHandle) -> io::Result<&mut Node> {
    nodes.get_mut(&handle).ok_or_else(|| errno(libc::ESTALE))
}

fn children(nodes: &Nodes, dir: ObjectHandle) -> io::Result<&BTreeMap<String, ObjectHandle>> {
    match &node(nodes, dir)?.content {
        Content::Directory(children) => Ok(children),
        _ => Err(errno(libc::ENOTDIR)),
    }
}

fn children_mut(
    nodes: &mut Nodes,
    dir: ObjectHandle,
) -> io::Result<&mut BTreeMap<String, ObjectHandle>> {
    match &mut node_mut(nodes, dir)?.content {
        Content::Directory(children) => Ok(children),
        _ => Err(errno(libc::ENOTDIR)),
    }
}

fn check_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(errno(libc::EINVAL));
    }
    if name == "." || name == ".." {
        return Err(errno(libc::EEXIST));
    }
    if name.len() > MAX_NAME_LENGTH as usize {
        return Err(errno(libc::ENAMETOOLONG));
    }
    Ok(())
}

fn touch(nodes: &mut Nodes, handle: ObjectHandle) {
    if let Some(node) = nodes.get_mut(&handle) {
        let now = SystemTime::now();
        node.attr.mtime = now;
        node.attr.ctime = now;
    }
}

/// End offset of a write, or `EFBIG` past [`MAX_FILE_SIZE`].
fn checked_end(offset: u64, len: usize) -> io::Result<u64> {
    offset
        .checked_add(len as u64)
        .filter(|end| *end <= MAX_FILE_SIZE)
        .ok_or_else(|| errno(libc::EFBIG))
}

/// Points a file that lost one of its names at a name it still has.
fn rehome(nodes: &mut Nodes, handle: ObjectHandle) {
    let home = nodes.iter().find_map(|(dir, n)| match &n.content {
        Content::Directory(entries) => entries
            .iter()
            .find(|(_, h)| **h == handle)
            .map(|(entry_name, _)| (*dir, entry_name.clone())),
        _ => None,
    });
    if let Some((dir, entry_name)) = home {
        if let Some(node) = nodes.get_mut(&handle) {
            node.parent = dir;
            node.name = entry_name;
        }
    }
}

fn set_size(attr: &mut FileAttr, size: u64) {
    attr.size = size;
    attr.blocks = size.div_ceil(BLOCK_SIZE);
}

/// Thread-safe in-memory tree. All data is lost when dropped or released.
#[derive(Debug)]
pub struct MemoryFs {
    generator: HandleGenerator,
    root: ObjectHandle,
    nodes: RwLock<Nodes>,
    permissions: Arc<dyn PermissionsMapper>,
}

impl MemoryFs {
    /// Creates an empty tree whose root is owned by the default user.
    pub fn new(generator: HandleGenerator, permissions: &PermissionsConfig) -> Self {
        Self::with_mapper(generator, permissions.mapper())
    }

    pub fn with_mapper(generator: HandleGenerator, permissions: Arc<dyn PermissionsMapper>) -> Self {
        let root = generator.next_handle();
        let mut nodes = HashMap::new();
        nodes.insert(root, Self::root_node(root));
        debug!("Created in-memory tree with root {}", root);

        Self {
            generator,
            root,
            nodes: RwLock::new(nodes),
            permissions,
        }
    }

    fn root_node(root: ObjectHandle) -> Node {
        Node {
            attr: new_attr(
                root,
                FileType::Directory,
                DEFAULT_PERMISSION,
                DEFAULT_UID,
                DEFAULT_GID,
            ),
            parent: root,
            name: String::new(),
            content: Content::Directory(BTreeMap::new()),
            acl: Vec::new(),
        }
    }

    fn insert_child(
        &self,
        nodes: &mut Nodes,
        parent: ObjectHandle,
        name: &str,
        attr_kind: FileType,
        perm: u16,
        subject: &Subject,
        content: Content,
    ) -> io::Result<ObjectHandle> {
        check_name(name)?;
        if children(nodes, parent)?.contains_key(name) {
            return Err(errno(libc::EEXIST));
        }

        let handle = self.generator.next_handle();
        let mut attr = new_attr(handle, attr_kind, perm, subject.uid, subject.gid);
        if let Content::Symlink(target) = &content {
            set_size(&mut attr, target.len() as u64);
        }
        nodes.insert(
            handle,
            Node {
                attr,
                parent,
                name: name.to_string(),
                content,
                acl: Vec::new(),
            },
        );
        children_mut(nodes, parent)?.insert(name.to_string(), handle);
        if attr_kind == FileType::Directory {
            node_mut(nodes, parent)?.attr.nlink += 1;
        }
        touch(nodes, parent);
        Ok(handle)
    }

    fn native_entry(
        &self,
        nodes: &Nodes,
        handle: ObjectHandle,
        name: &str,
        cookie: u64,
    ) -> io::Result<DirectoryEntry> {
        let mut attr = node(nodes, handle)?.attr;
        self.permissions.map(&mut attr);
        Ok(DirectoryEntry {
            name: name.to_string(),
            handle,
            cookie,
            attr,
        })
    }

    /// Returns true if `ancestor` is `handle` or one of its parents.
    fn is_ancestor(&self, nodes: &Nodes, ancestor: ObjectHandle, mut handle: ObjectHandle) -> bool {
        loop {
            if handle == ancestor {
                return true;
            }
            match nodes.get(&handle) {
                Some(node) if handle != self.root => handle = node.parent,
                _ => return false,
            }
        }
    }
}

impl Backend for MemoryFs {
    fn has_handle(&self, handle: ObjectHandle) -> bool {
        self.nodes.read().contains_key(&handle)
    }

    fn root_handle(&self) -> io::Result<ObjectHandle> {
        Ok(self.root)
    }

    fn lookup(&self, parent: ObjectHandle, name: &str) -> io::Result<ObjectHandle> {
        let nodes = self.nodes.read();
        match name {
            "." => children(&nodes, parent).map(|_| parent),
            ".." => {
                children(&nodes, parent)?;
                Ok(node(&nodes, parent)?.parent)
            }
            _ => children(&nodes, parent)?
                .get(name)
                .copied()
                .ok_or_else(|| errno(libc::ENOENT)),
        }
    }

    fn list(
        &self,
        dir: ObjectHandle,
        _verifier: &Verifier,
        cookie: u64,
    ) -> io::Result<DirectoryStream> {
        let nodes = self.nodes.read();
        let mut acc = VerifierAccumulator::new();
        let mut entries = Vec::new();
        for (position, (name, handle)) in children(&nodes, dir)?.iter().enumerate() {
            let position = position as u64;
            acc.push(name, position);
            if in_page(cookie, position) {
                entries.push(self.native_entry(&nodes, *handle, name, position)?);
            }
        }
        Ok(DirectoryStream {
            verifier: acc.finish(),
            entries,
        })
    }

    fn directory_verifier(&self, dir: ObjectHandle) -> io::Result<Verifier> {
        let nodes = self.nodes.read();
        Ok(verifier_of(children(&nodes, dir)?.keys().map(String::as_str)))
    }

    fn getattr(&self, handle: ObjectHandle) -> io::Result<FileAttr> {
        let mut attr = node(&self.nodes.read(), handle)?.attr;
        self.permissions.map(&mut attr);
        Ok(attr)
    }

    fn setattr(&self, handle: ObjectHandle, changes: &SetAttr) -> io::Result<()> {
        let mut nodes = self.nodes.write();
        let node = node_mut(&mut nodes, handle)?;

        if let Some(size) = changes.size {
            match &mut node.content {
                Content::File(data) => {
                    checked_end(size, 0)?;
                    data.resize(size as usize, 0);
                    set_size(&mut node.attr, size);
                    node.attr.mtime = SystemTime::now();
                }
                Content::Directory(_) => return Err(errno(libc::EISDIR)),
                Content::Symlink(_) => return Err(errno(libc::EINVAL)),
            }
        }
        if let Some(mode) = changes.mode {
            node.attr.perm = mode & 0o7777;
        }
        if let Some(uid) = changes.uid {
            node.attr.uid = uid;
        }
        if let Some(gid) = changes.gid {
            node.attr.gid = gid;
        }
        if let Some(atime) = changes.atime {
            node.attr.atime = atime;
        }
        if let Some(mtime) = changes.mtime {
            node.attr.mtime = mtime;
        }
        node.attr.ctime = SystemTime::now();
        Ok(())
    }

    fn access(&self, handle: ObjectHandle, mode: u32) -> io::Result<u32> {
        node(&self.nodes.read(), handle)?;
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
        let content = match kind {
            FileType::Directory => Content::Directory(BTreeMap::new()),
            FileType::RegularFile => Content::File(Vec::new()),
            FileType::Symlink => return Err(errno(libc::EINVAL)),
            _ => return Err(errno(libc::ENOTSUP)),
        };
        let mut nodes = self.nodes.write();
        self.insert_child(
            &mut nodes,
            parent,
            name,
            kind,
            (mode & 0o7777) as u16,
            subject,
            content,
        )
    }

    fn remove(&self, parent: ObjectHandle, name: &str) -> io::Result<()> {
        let mut nodes = self.nodes.write();
        let handle = *children(&nodes, parent)?
            .get(name)
            .ok_or_else(|| errno(libc::ENOENT))?;

        let is_dir = match &node(&nodes, handle)?.content {
            Content::Directory(entries) if !entries.is_empty() => {
                return Err(errno(libc::ENOTEMPTY))
            }
            Content::Directory(_) => true,
            _ => false,
        };

        children_mut(&mut nodes, parent)?.remove(name);
        touch(&mut nodes, parent);

        if is_dir {
            node_mut(&mut nodes, parent)?.attr.nlink -= 1;
            nodes.remove(&handle);
            return Ok(());
        }

        let remaining = {
            let child = node_mut(&mut nodes, handle)?;
            child.attr.nlink = child.attr.nlink.saturating_sub(1);
            child.attr.ctime = SystemTime::now();
            child.attr.nlink
        };
        if remaining == 0 {
            nodes.remove(&handle);
        } else {
            rehome(&mut nodes, handle);
        }
        Ok(())
    }

    fn rename(
        &self,
        src: ObjectHandle,
        old_name: &str,
        dest: ObjectHandle,
        new_name: &str,
    ) -> io::Result<bool> {
        let mut nodes = self.nodes.write();
        let moved = *children(&nodes, src)?
            .get(old_name)
            .ok_or_else(|| errno(libc::ENOENT))?;
        check_name(new_name)?;
        children(&nodes, dest)?;

        if src == dest && old_name == new_name {
            return Ok(false);
        }

        let moved_is_dir = node(&nodes, moved)?.attr.kind == FileType::Directory;
        if moved_is_dir && self.is_ancestor(&nodes, moved, dest) {
            return Err(errno(libc::EINVAL));
        }

        let mut replaced_file = None;
        if let Some(&existing) = children(&nodes, dest)?.get(new_name) {
            if existing == moved {
                return Ok(false);
            }
            // Some(is_empty) for directories
            let replaced_dir = match &node(&nodes, existing)?.content {
                Content::Directory(entries) => Some(entries.is_empty()),
                _ => None,
            };
            match (replaced_dir, moved_is_dir) {
                (Some(true), true) => {
                    node_mut(&mut nodes, dest)?.attr.nlink -= 1;
                    nodes.remove(&existing);
                }
                (Some(false), true) => return Err(errno(libc::ENOTEMPTY)),
                (Some(_), false) => return Err(errno(libc::EISDIR)),
                (None, true) => return Err(errno(libc::ENOTDIR)),
                (None, false) => {
                    let target = node_mut(&mut nodes, existing)?;
                    target.attr.nlink = target.attr.nlink.saturating_sub(1);
                    if target.attr.nlink == 0 {
                        nodes.remove(&existing);
                    } else {
                        replaced_file = Some(existing);
                    }
                }
            }
        }

        children_mut(&mut nodes, src)?.remove(old_name);
        children_mut(&mut nodes, dest)?.insert(new_name.to_string(), moved);
        if moved_is_dir && src != dest {
            node_mut(&mut nodes, src)?.attr.nlink -= 1;
            node_mut(&mut nodes, dest)?.attr.nlink += 1;
        }
        {
            let node = node_mut(&mut nodes, moved)?;
            node.parent = dest;
            node.name = new_name.to_string();
            node.attr.ctime = SystemTime::now();
        }
        if let Some(replaced) = replaced_file {
            rehome(&mut nodes, replaced);
        }
        touch(&mut nodes, src);
        touch(&mut nodes, dest);
        Ok(true)
    }

    fn link(
        &self,
        parent: ObjectHandle,
        existing: ObjectHandle,
        name: &str,
        _subject: &Subject,
    ) -> io::Result<ObjectHandle> {
        let mut nodes = self.nodes.write();
        check_name(name)?;
        if node(&nodes, existing)?.attr.kind == FileType::Directory {
            return Err(errno(libc::EPERM));
        }
        let entries = children_mut(&mut nodes, parent)?;
        if entries.contains_key(name) {
            return Err(errno(libc::EEXIST));
        }
        entries.insert(name.to_string(), existing);

        let node = node_mut(&mut nodes, existing)?;
        node.attr.nlink += 1;
        node.attr.ctime = SystemTime::now();
        touch(&mut nodes, parent);
        Ok(existing)
    }

    fn symlink(
        &self,
        parent: ObjectHandle,
        name: &str,
        target: &str,
        subject: &Subject,
        _mode: u32,
    ) -> io::Result<ObjectHandle> {
        let mut nodes = self.nodes.write();
        self.insert_child(
            &mut nodes,
            parent,
            name,
            FileType::Symlink,
            0o777,
            subject,
            Content::Symlink(target.to_string()),
        )
    }

    fn readlink(&self, handle: ObjectHandle) -> io::Result<String> {
        match &node(&self.nodes.read(), handle)?.content {
            Content::Symlink(target) => Ok(target.clone()),
            _ => Err(errno(libc::EINVAL)),
        }
    }

    fn parent_of(&self, handle: ObjectHandle) -> io::Result<ObjectHandle> {
        Ok(node(&self.nodes.read(), handle)?.parent)
    }

    fn read(&self, handle: ObjectHandle, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match &node(&self.nodes.read(), handle)?.content {
            Content::File(data) => {
                let start = (offset as usize).min(data.len());
                let count = buf.len().min(data.len() - start);
                buf[..count].copy_from_slice(&data[start..start + count]);
                Ok(count)
            }
            Content::Directory(_) => Err(errno(libc::EISDIR)),
            Content::Symlink(_) => Err(errno(libc::EINVAL)),
        }
    }

    fn write(
        &self,
        handle: ObjectHandle,
        data: &[u8],
        offset: u64,
        _stability: StabilityLevel,
    ) -> io::Result<WriteResult> {
        let mut nodes = self.nodes.write();
        let node = node_mut(&mut nodes, handle)?;
        let content = match &mut node.content {
            Content::File(content) => content,
            Content::Directory(_) => return Err(errno(libc::EISDIR)),
            Content::Symlink(_) => return Err(errno(libc::EINVAL)),
        };

        let end = checked_end(offset, data.len())? as usize;
        let start = offset as usize;
        if content.len() < end {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);
        let size = content.len() as u64;

        set_size(&mut node.attr, size);
        let now = SystemTime::now();
        node.attr.mtime = now;
        node.attr.ctime = now;

        // Memory is as stable as it gets
        Ok(WriteResult {
            count: data.len(),
            stability: StabilityLevel::FileSync,
        })
    }

    fn commit(&self, handle: ObjectHandle, _offset: u64, _count: u64) -> io::Result<()> {
        node(&self.nodes.read(), handle).map(|_| ())
    }

    fn get_acl(&self, handle: ObjectHandle) -> io::Result<Vec<Ace>> {
        Ok(node(&self.nodes.read(), handle)?.acl.clone())
    }

    fn set_acl(&self, handle: ObjectHandle, acl: &[Ace]) -> io::Result<()> {
        let mut nodes = self.nodes.write();
        let node = node_mut(&mut nodes, handle)?;
        node.acl = acl.to_vec();
        node.attr.ctime = SystemTime::now();
        Ok(())
    }

    fn fs_stat(&self) -> io::Result<FsStat> {
        let nodes = self.nodes.read();
        let used: u64 = nodes
            .values()
            .map(|node| match &node.content {
                Content::File(data) => data.len() as u64,
                _ => 0,
            })
            .sum();
        let files = nodes.len() as u64;
        Ok(FsStat {
            total_bytes: u64::MAX,
            free_bytes: u64::MAX - used,
            total_files: u64::MAX,
            free_files: u64::MAX - files,
        })
    }

    fn release(&self) -> io::Result<()> {
        let mut nodes = self.nodes.write();
        debug!("Releasing in-memory tree with {} nodes", nodes.len());
        nodes.clear();
        nodes.insert(self.root, Self::root_node(self.root));
        Ok(())
    }
}

impl HostBackend for MemoryFs {
    fn resolve_path(&self, handle: ObjectHandle) -> io::Result<PathBuf> {
        let nodes = self.nodes.read();
        let mut names = Vec::new();
        let mut current = handle;
        while current != self.root {
            let node = node(&nodes, current)?;
            names.push(node.name.as_str());
            current = node.parent;
        }

        let mut path = PathBuf::from("/");
        for name in names.into_iter().rev() {
            path.push(name);
        }
        Ok(path)
    }

    fn create_directories(&self, path: &Path) -> io::Result<ObjectHandle> {
        let mut nodes = self.nodes.write();
        let owner = Subject {
            uid: DEFAULT_UID,
            gid: DEFAULT_GID,
        };
        let mut current = self.root;

        for component in path.components() {
            let name = match component {
                Component::Normal(name) => name.to_str().ok_or_else(|| errno(libc::EINVAL))?,
                Component::ParentDir => {
                    current = node(&nodes, current)?.parent;
                    continue;
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => continue,
            };

            current = match children(&nodes, current)?.get(name).copied() {
                Some(existing) => {
                    if node(&nodes, existing)?.attr.kind != FileType::Directory {
                        return Err(errno(libc::ENOTDIR));
                    }
                    existing
                }
                None => self.insert_child(
                    &mut nodes,
                    current,
                    name,
                    FileType::Directory,
                    DEFAULT_PERMISSION,
                    &owner,
                    Content::Directory(BTreeMap::new()),
                )?,
            };
        }
        Ok(current)
    }

    fn children(&self, dir: ObjectHandle) -> io::Result<Vec<(String, ObjectHandle)>> {
        let nodes = self.nodes.read();
        Ok(children(&nodes, dir)?
            .iter()
            .map(|(name, handle)| (name.clone(), *handle))
            .collect())
    }

    fn entry(&self, handle: ObjectHandle, name: &str, cookie: u64) -> io::Result<DirectoryEntry> {
        self.native_entry(&self.nodes.read(), handle, name, cookie)
    }
}
