
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::MAX_PATH;
use crate::error::{Error, Result};

/// Inode number of a volume's root directory.
pub const ROOT_INO: u64 = 1;

/// What kind of file an inode backs.
///
/// The dispatcher only forwards events for regular files and
/// directories; pages of special files are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Special,
}

struct InodeEntry {
    kind: FileKind,
    /// Parent directory; `None` only for the root.
    parent: Option<u64>,
    /// Link name under the parent; empty for the root.
    name: String,
    /// Directory entries, name to inode.
    children: BTreeMap<String, u64>,
    /// Cached pages, page index to dirty flag.
    pages: BTreeMap<u64, bool>,
}

impl InodeEntry {
    fn new(kind: FileKind, parent: Option<u64>, name: &str) -> Self {
        InodeEntry {
            kind,
            parent,
            name: name.to_owned(),
            children: BTreeMap::new(),
            pages: BTreeMap::new(),
        }
    }
}

struct VolState {
    next_ino: u64,
    inodes: BTreeMap<u64, InodeEntry>,
}

/// An in-memory filesystem image: the world the framework observes.
///
/// A `Volume` carries the inode table (names, parent links, file kinds)
/// and the per-file set of cached pages. The page mutators double as the
/// cache sites of a real filesystem: each returns the [`PageHandle`] the
/// caller forwards to [`Framework::hook`][crate::registry::Framework::hook].
///
/// Volume identity is `Arc` identity; a task registered against one
/// volume never sees events from another, however similar their content.
pub struct Volume {
    label: String,
    state: RwLock<VolState>,
}

impl Volume {
    /// Creates an empty volume whose root directory is [`ROOT_INO`].
    pub fn new(label: &str) -> Arc<Self> {
        let mut inodes = BTreeMap::new();
        inodes.insert(ROOT_INO, InodeEntry::new(FileKind::Directory, None, ""));
        Arc::new(Volume {
            label: label.to_owned(),
            state: RwLock::new(VolState {
                next_ino: ROOT_INO + 1,
                inodes,
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Creates a directory under `parent` and returns its inode number.
    pub fn mkdir(&self, parent: u64, name: &str) -> Result<u64> {
        self.link(parent, name, FileKind::Directory)
    }

    /// Creates a regular file under `parent` and returns its inode number.
    pub fn create(&self, parent: u64, name: &str) -> Result<u64> {
        self.link(parent, name, FileKind::Regular)
    }

    /// Creates an inode of arbitrary kind under `parent`.
    pub fn create_node(&self, parent: u64, name: &str, kind: FileKind) -> Result<u64> {
        self.link(parent, name, kind)
    }

    fn link(&self, parent: u64, name: &str, kind: FileKind) -> Result<u64> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidArgument("bad link name"));
        }

        let mut state = self.write();
        let ino = state.next_ino;

        let dir = state.inodes.get_mut(&parent).ok_or(Error::NotFound)?;
        if dir.kind != FileKind::Directory {
            return Err(Error::InvalidArgument("parent is not a directory"));
        }
        if dir.children.contains_key(name) {
            return Err(Error::AlreadyExists);
        }
        dir.children.insert(name.to_owned(), ino);

        state.next_ino += 1;
        state
            .inodes
            .insert(ino, InodeEntry::new(kind, Some(parent), name));
        Ok(ino)
    }

    /// Resolves a `/`-separated path relative to the root.
    pub fn lookup(&self, path: &str) -> Result<u64> {
        let state = self.read();
        let mut cur = ROOT_INO;
        for comp in path.split('/').filter(|c| !c.is_empty()) {
            let entry = state.inodes.get(&cur).ok_or(Error::NotFound)?;
            cur = *entry.children.get(comp).ok_or(Error::NotFound)?;
        }
        Ok(cur)
    }

    pub fn kind(&self, ino: u64) -> Result<FileKind> {
        let state = self.read();
        state
            .inodes
            .get(&ino)
            .map(|e| e.kind)
            .ok_or(Error::NotFound)
    }

    /// Records a page insertion and returns the handle for the hook.
    pub fn insert_page(self: &Arc<Self>, ino: u64, index: u64) -> Result<PageHandle> {
        self.page_op(ino, index, |pages| {
            pages.insert(index, false);
            Ok(false)
        })
    }

    /// Marks a cached page dirty.
    pub fn dirty_page(self: &Arc<Self>, ino: u64, index: u64) -> Result<PageHandle> {
        self.page_op(ino, index, |pages| {
            let dirty = pages.get_mut(&index).ok_or(Error::NotFound)?;
            *dirty = true;
            Ok(true)
        })
    }

    /// Marks a cached page for writeback, clearing its dirty flag.
    pub fn flush_page(self: &Arc<Self>, ino: u64, index: u64) -> Result<PageHandle> {
        self.page_op(ino, index, |pages| {
            let dirty = pages.get_mut(&index).ok_or(Error::NotFound)?;
            *dirty = false;
            Ok(false)
        })
    }

    /// Removes a page from the cache.
    pub fn remove_page(self: &Arc<Self>, ino: u64, index: u64) -> Result<PageHandle> {
        self.page_op(ino, index, |pages| {
            pages.remove(&index).ok_or(Error::NotFound)
        })
    }

    fn page_op<F>(self: &Arc<Self>, ino: u64, index: u64, op: F) -> Result<PageHandle>
    where
        F: FnOnce(&mut BTreeMap<u64, bool>) -> Result<bool>,
    {
        let mut state = self.write();
        let entry = state.inodes.get_mut(&ino).ok_or(Error::NotFound)?;
        let dirty = op(&mut entry.pages)?;
        Ok(PageHandle {
            volume: Arc::clone(self),
            ino,
            index,
            kind: entry.kind,
            dirty,
        })
    }

    /// Calls `f` for every cached page, ascending by inode then index.
    pub(crate) fn scan_pages<F>(&self, mut f: F)
    where
        F: FnMut(u64, FileKind, u64, bool),
    {
        let state = self.read();
        for (&ino, entry) in &state.inodes {
            for (&index, &dirty) in &entry.pages {
                f(ino, entry.kind, index, dirty);
            }
        }
    }

    /// Reconstructs the path of `ino` relative to `parent` from the
    /// in-memory parent links.
    ///
    /// Returns `None` when the inode is not reachable under `parent` or
    /// the path would exceed [`MAX_PATH`]; unknown inode numbers are
    /// [`Error::NotFound`]. Never touches anything but the inode table,
    /// so a perfectly valid on-disk path can still come back `None`.
    pub(crate) fn relative_path(&self, ino: u64, parent: u64) -> Result<Option<String>> {
        let state = self.read();
        state.inodes.get(&ino).ok_or(Error::NotFound)?;

        let mut names = Vec::new();
        let mut cur = ino;
        while cur != parent {
            let Some(entry) = state.inodes.get(&cur) else {
                return Ok(None);
            };
            let Some(up) = entry.parent else {
                // Walked off the root without meeting the parent.
                return Ok(None);
            };
            names.push(entry.name.clone());
            cur = up;
        }

        names.reverse();
        let path = names.join("/");
        if path.len() > MAX_PATH {
            return Ok(None);
        }
        Ok(Some(path))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VolState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, VolState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Opaque page descriptor handed to the hook dispatcher.
///
/// Carries everything the dispatcher recovers from a page: the owning
/// volume, the owning inode and its file kind, the page index, and the
/// dirty flag at the time of the event.
pub struct PageHandle {
    volume: Arc<Volume>,
    ino: u64,
    index: u64,
    kind: FileKind,
    dirty: bool,
}

impl PageHandle {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }
}
