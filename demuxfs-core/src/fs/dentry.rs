//! In-memory directory entries.
//!
//! The parsed tables are exposed as a tree of dentries: directories, files
//! and symlinks. A dentry is owned by its parent through an `Arc`; the
//! parent back-reference is a `Weak`, so subtrees are reclaimed as soon as
//! the last strong reference (tree membership or a concurrent reader's
//! handle) goes away. That deferred reclamation is what makes version
//! supersession safe against readers that resolved a path before the swap.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::FsError;

/// Extended attribute holding the hex rendering of a numeric leaf.
pub const XATTR_HEX: &str = "user.hex";

static NEXT_INODE: AtomicU64 = AtomicU64::new(1);

fn alloc_inode() -> u64 {
    NEXT_INODE.fetch_add(1, Ordering::Relaxed)
}

/// Kind of a dentry, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DentryKind {
    /// Directory: read/execute only.
    Directory,
    /// Regular file: read only.
    File,
    /// Symbolic link; the target is interpreted relative to the link's
    /// directory.
    Symlink,
}

/// A node of the virtual filesystem tree.
#[derive(Debug)]
pub struct Dentry {
    name: String,
    kind: DentryKind,
    inode: u64,
    parent: RwLock<Weak<Dentry>>,
    /// File bytes, or the symlink target path. Empty for directories.
    content: RwLock<Vec<u8>>,
    children: RwLock<BTreeMap<String, Arc<Dentry>>>,
    xattrs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl Dentry {
    fn new(name: String, kind: DentryKind, content: Vec<u8>) -> Arc<Self> {
        Arc::new(Dentry {
            name,
            kind,
            inode: alloc_inode(),
            parent: RwLock::new(Weak::new()),
            content: RwLock::new(content),
            children: RwLock::new(BTreeMap::new()),
            xattrs: RwLock::new(BTreeMap::new()),
        })
    }

    /// Create the tree root.
    pub fn new_root() -> Arc<Self> {
        Self::new("/".to_string(), DentryKind::Directory, Vec::new())
    }

    /// Create a detached directory.
    pub fn new_directory(name: impl Into<String>) -> Arc<Self> {
        Self::new(name.into(), DentryKind::Directory, Vec::new())
    }

    /// Create a detached file with the given content.
    pub fn new_file(name: impl Into<String>, content: Vec<u8>) -> Arc<Self> {
        Self::new(name.into(), DentryKind::File, content)
    }

    /// Create a detached symlink pointing at `target`.
    pub fn new_symlink(name: impl Into<String>, target: &str) -> Arc<Self> {
        Self::new(name.into(), DentryKind::Symlink, target.as_bytes().to_vec())
    }

    /// Node name, unique among siblings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node kind.
    pub fn kind(&self) -> DentryKind {
        self.kind
    }

    /// Stable identifier, allocated from a process-wide counter.
    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// Unix-style mode bits: directories `r-xr-xr-x`, files `r--r--r--`.
    pub fn mode(&self) -> u32 {
        match self.kind {
            DentryKind::Directory => 0o040555,
            DentryKind::File => 0o100444,
            DentryKind::Symlink => 0o120777,
        }
    }

    /// Parent directory, if attached and still alive.
    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.parent.read().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Dentry>) {
        *self.parent.write() = Arc::downgrade(parent);
    }

    pub(crate) fn clear_parent(&self) {
        *self.parent.write() = Weak::new();
    }

    /// Copy of the file content (or symlink target bytes).
    pub fn content(&self) -> Vec<u8> {
        self.content.read().clone()
    }

    /// File size in bytes.
    pub fn size(&self) -> usize {
        self.content.read().len()
    }

    /// Symlink target, for symlink dentries.
    pub fn symlink_target(&self) -> Option<String> {
        if self.kind != DentryKind::Symlink {
            return None;
        }
        Some(String::from_utf8_lossy(&self.content.read()).into_owned())
    }

    /// Atomically repoint a symlink. Readers observe either the old or the
    /// new target, never a mixture.
    pub fn set_symlink_target(&self, target: &str) {
        debug_assert_eq!(self.kind, DentryKind::Symlink);
        *self.content.write() = target.as_bytes().to_vec();
    }

    /// Attach a detached child. Fails on empty names, non-directory parents
    /// and sibling name collisions.
    pub fn add_child(self: &Arc<Self>, child: Arc<Dentry>) -> Result<Arc<Dentry>, FsError> {
        if self.kind != DentryKind::Directory {
            return Err(FsError::NotADirectory(self.name.clone()));
        }
        if child.name.is_empty() {
            return Err(FsError::EmptyName);
        }
        let mut children = self.children.write();
        if children.contains_key(&child.name) {
            return Err(FsError::DuplicateName(child.name.clone()));
        }
        child.set_parent(self);
        children.insert(child.name.clone(), Arc::clone(&child));
        Ok(child)
    }

    /// Detach a child by name, clearing its parent pointer. The subtree
    /// stays alive while any reader still holds a reference into it.
    pub fn remove_child(&self, name: &str) -> Option<Arc<Dentry>> {
        let removed = self.children.write().remove(name);
        if let Some(child) = &removed {
            child.clear_parent();
        }
        removed
    }

    /// Look up a direct child by name.
    pub fn get_child(&self, name: &str) -> Option<Arc<Dentry>> {
        self.children.read().get(name).cloned()
    }

    /// Check for a direct child.
    pub fn has_child(&self, name: &str) -> bool {
        self.children.read().contains_key(name)
    }

    /// Names of all children, in directory order.
    pub fn child_names(&self) -> Vec<String> {
        self.children.read().keys().cloned().collect()
    }

    /// Snapshot of all children, in directory order.
    pub fn children(&self) -> Vec<Arc<Dentry>> {
        self.children.read().values().cloned().collect()
    }

    /// Number of children.
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Set an extended attribute.
    pub fn set_xattr(&self, name: impl Into<String>, value: Vec<u8>) {
        self.xattrs.write().insert(name.into(), value);
    }

    /// Read an extended attribute.
    pub fn xattr(&self, name: &str) -> Option<Vec<u8>> {
        self.xattrs.read().get(name).cloned()
    }

    /// Names of all extended attributes.
    pub fn xattr_names(&self) -> Vec<String> {
        self.xattrs.read().keys().cloned().collect()
    }

    /// Absolute path of this dentry, following parent pointers.
    pub fn path(&self) -> String {
        if self.name == "/" {
            return "/".to_string();
        }
        let mut components = vec![self.name.clone()];
        let mut current = self.parent();
        while let Some(node) = current {
            if node.parent().is_some() {
                components.push(node.name.clone());
            }
            current = node.parent();
        }
        components.reverse();
        format!("/{}", components.join("/"))
    }
}
