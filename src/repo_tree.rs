
use std::io::Write;

use anyhow::Result;
use tracing::debug;

use crate::fast_export::FastExport;
use crate::pool::{Pool, NONE};
use crate::string_pool::StringPool;

/// What a directory entry holds.  The octal forms are the git tree modes
/// fast-import expects; `Absent` marks a deleted or never-present entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeMode {
    #[default]
    Absent,
    Dir,
    Normal,
    Executable,
    Symlink,
}

impl NodeMode {
    pub fn as_octal(self) -> u32 {
        match self {
            NodeMode::Absent => 0,
            NodeMode::Dir => 0o040000,
            NodeMode::Normal => 0o100644,
            NodeMode::Executable => 0o100755,
            NodeMode::Symlink => 0o120000,
        }
    }

    pub fn is_dir(self) -> bool {
        self == NodeMode::Dir
    }
}

/// One name inside a directory.  `content` is a child directory offset
/// when `mode` is `Dir`, otherwise a blob mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dirent {
    pub name: u32,
    pub mode: NodeMode,
    pub content: u32,
}

impl Default for Dirent {
    fn default() -> Self {
        Dirent { name: NONE, mode: NodeMode::Absent, content: 0 }
    }
}

/// A run of `size` contiguous dirents, strictly ascending by name id.
#[derive(Debug, Clone, Copy, Default)]
struct Dir {
    size: u32,
    first: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Commit {
    root_dir: u32,
}

/// Copy-on-write versioned directory tree.  Every revision keeps its root
/// directory; directories written before the current revision are frozen
/// behind the saved watermarks and are cloned before any write.
#[derive(Debug)]
pub struct RepoTree {
    dirs: Pool<Dir>,
    dirents: Pool<Dirent>,
    commits: Pool<Commit>,
    saved_dirs: u32,
    saved_dirents: u32,
    active_commit: u32,
}

impl Default for RepoTree {
    fn default() -> Self {
        RepoTree::new()
    }
}

impl RepoTree {
    pub fn new() -> Self {
        let mut tree = RepoTree {
            dirs: Pool::new(),
            dirents: Pool::new(),
            commits: Pool::new(),
            saved_dirs: 0,
            saved_dirents: 0,
            active_commit: NONE,
        };
        // Directory 0 is the canonical empty directory; it is frozen from
        // the start so fresh subtrees can share it as their content.
        tree.dirs.alloc(1);
        tree.saved_dirs = 1;
        tree
    }

    /// Open revision `revision` for writing.  Revisions skipped over (an
    /// incremental dump starting past 0) get empty-root commits so reads
    /// at any earlier revision resolve.
    pub fn begin_revision(&mut self, revision: u32) {
        while self.commits.len() <= revision {
            let root = match self.commits.len().checked_sub(1) {
                Some(prev) => self.commits.get(prev).map(|c| c.root_dir).unwrap_or(0),
                None => 0,
            };
            let offset = self.commits.alloc(1);
            self.commits.get_mut(offset).unwrap().root_dir = root;
        }
        self.active_commit = revision;
    }

    /// Freeze everything written by the revision just emitted.
    pub fn save_revision(&mut self) {
        self.saved_dirs = self.dirs.len();
        self.saved_dirents = self.dirents.len();
    }

    pub fn active_revision(&self) -> u32 {
        self.active_commit
    }

    fn alloc_dir(&mut self, size: u32) -> u32 {
        let offset = self.dirs.alloc(1);
        let first = self.dirents.alloc(size);
        let dir = self.dirs.get_mut(offset).unwrap();
        dir.size = size;
        dir.first = first;
        offset
    }

    /// Clone `dir_o` so it can be written, leaving `padding` fresh slots at
    /// the end of its dirent run.  Directories below the watermark are
    /// copied to new storage; directories created in the active revision
    /// are grown in place (or returned untouched when no padding is
    /// needed).
    fn clone_dir(&mut self, dir_o: u32, padding: u32) -> u32 {
        let orig = *self.dirs.get(dir_o).expect("clone of missing dir");
        if dir_o < self.saved_dirs {
            // A frozen dir's run was allocated before the watermark snap.
            debug_assert!(orig.size == 0 || orig.first + orig.size <= self.saved_dirents);
            let new_o = self.alloc_dir(orig.size + padding);
            let new_first = self.dirs.get(new_o).unwrap().first;
            self.dirents.copy_within(orig.first, new_first, orig.size);
            new_o
        } else {
            if padding == 0 {
                return dir_o;
            }
            let new_first = self.dirents.alloc(orig.size + padding);
            self.dirents.copy_within(orig.first, new_first, orig.size);
            let dir = self.dirs.get_mut(dir_o).unwrap();
            dir.size = orig.size + padding;
            dir.first = new_first;
            dir_o
        }
    }

    /// Binary-search `dir_o` for `name`; absolute dirent offset on hit.
    fn find(&self, dir_o: u32, name: u32) -> Option<u32> {
        let dir = self.dirs.get(dir_o)?;
        if dir.size == 0 {
            return None;
        }
        let entries = self.dirents.slice(dir.first, dir.size);
        entries
            .binary_search_by_key(&name, |d| d.name)
            .ok()
            .map(|i| dir.first + i as u32)
    }

    fn sort_dir(&mut self, dir_o: u32) {
        let dir = *self.dirs.get(dir_o).unwrap();
        self.dirents
            .slice_mut(dir.first, dir.size)
            .sort_by_key(|d| d.name);
    }

    /// Resolve `path` in `revision`.  `None` when any component is absent
    /// or a non-directory shows up mid-path; the empty path (the root) has
    /// no dirent of its own and also resolves to `None`.
    pub fn read_dirent(&self, revision: u32, path: &[u32]) -> Option<Dirent> {
        let mut dir_o = self.commits.get(revision)?.root_dir;
        for (i, &name) in path.iter().enumerate() {
            let entry = *self.dirents.get(self.find(dir_o, name)?).unwrap();
            if i + 1 == path.len() {
                return Some(entry);
            }
            if !entry.mode.is_dir() {
                return None;
            }
            dir_o = entry.content;
        }
        None
    }

    /// Write `(mode, content)` at `path` in the active revision, cloning
    /// every directory along the way that is still frozen.  With `del`,
    /// the terminal entry is erased instead: its name becomes the
    /// past-the-end sentinel, the run is resorted and shrunk by one.
    fn write_dirent(&mut self, path: &[u32], mode: NodeMode, content: u32, del: bool) {
        let revision = self.active_commit;
        let root = self.commits.get(revision).expect("no active commit").root_dir;
        let mut dir_o = self.clone_dir(root, 0);
        self.commits.get_mut(revision).unwrap().root_dir = dir_o;

        let mut parent_dir = NONE;
        let mut terminal = NONE;
        for &name in path {
            parent_dir = dir_o;
            match self.find(dir_o, name) {
                None => {
                    dir_o = self.clone_dir(dir_o, 1);
                    let dir = *self.dirs.get(dir_o).unwrap();
                    *self.dirents.get_mut(dir.first + dir.size - 1).unwrap() =
                        Dirent { name, mode: NodeMode::Dir, content: 0 };
                    self.sort_dir(dir_o);
                    let entry_o = self.find(dir_o, name).unwrap();
                    let child = self.alloc_dir(0);
                    self.dirents.get_mut(entry_o).unwrap().content = child;
                    terminal = entry_o;
                    dir_o = child;
                }
                Some(entry_o) if self.dirents.get(entry_o).unwrap().mode.is_dir() => {
                    let child = self.dirents.get(entry_o).unwrap().content;
                    let cloned = self.clone_dir(child, 0);
                    self.dirents.get_mut(entry_o).unwrap().content = cloned;
                    terminal = entry_o;
                    dir_o = cloned;
                }
                Some(entry_o) => {
                    // A file in the middle of the path: replace it with a
                    // fresh directory and keep descending.
                    let child = self.alloc_dir(0);
                    let entry = self.dirents.get_mut(entry_o).unwrap();
                    entry.mode = NodeMode::Dir;
                    entry.content = child;
                    terminal = entry_o;
                    dir_o = child;
                }
            }
        }
        if let Some(entry) = self.dirents.get_mut(terminal) {
            entry.mode = mode;
            entry.content = content;
            if del && parent_dir != NONE {
                // The sentinel name sorts last; resorting pushes the entry
                // past the shrunk size, erasing it.
                entry.name = NONE;
            }
        }
        if del && terminal != NONE && parent_dir != NONE {
            self.sort_dir(parent_dir);
            self.dirs.get_mut(parent_dir).unwrap().size -= 1;
        }
    }

    /// Place a copy of `src_path`@`src_rev` at `dst_path` in the active
    /// revision.  An absent source deletes the destination instead.
    /// Returns the copied entry, if any.
    pub fn copy(&mut self, src_rev: u32, src_path: &[u32], dst_path: &[u32]) -> Option<Dirent> {
        match self.read_dirent(src_rev, src_path) {
            Some(entry) => {
                self.write_dirent(dst_path, entry.mode, entry.content, false);
                Some(entry)
            }
            None => {
                debug!(src_rev, "copy source missing, deleting destination");
                self.delete(dst_path);
                None
            }
        }
    }

    pub fn add(&mut self, path: &[u32], mode: NodeMode, blob_mark: u32) {
        self.write_dirent(path, mode, blob_mark, false);
    }

    /// Swap in new content while keeping the entry's current mode.  A
    /// missing entry stays missing.  Returns the inherited mode.
    pub fn replace(&mut self, path: &[u32], blob_mark: u32) -> NodeMode {
        match self.read_dirent(self.active_commit, path) {
            Some(entry) => {
                self.write_dirent(path, entry.mode, blob_mark, false);
                entry.mode
            }
            None => NodeMode::Absent,
        }
    }

    /// Set mode and content at `path`.  A zero mark keeps the existing
    /// content so a property-only change cannot clobber copied data.
    pub fn modify(&mut self, path: &[u32], mode: NodeMode, blob_mark: u32) {
        let content = if blob_mark != 0 {
            blob_mark
        } else {
            self.read_dirent(self.active_commit, path)
                .map(|e| e.content)
                .unwrap_or(0)
        };
        self.write_dirent(path, mode, content, false);
    }

    pub fn delete(&mut self, path: &[u32]) {
        self.write_dirent(path, NodeMode::Absent, 0, true);
    }

    /// Emit the `M`/`D` commands turning revision `r1` into `r2`, walking
    /// both roots in merged dirent order.
    pub fn diff<W: Write>(
        &self,
        r1: u32,
        r2: u32,
        strings: &StringPool,
        out: &mut FastExport<W>,
    ) -> Result<()> {
        let dir1 = self.commits.get(r1).map(|c| c.root_dir).unwrap_or(0);
        let dir2 = self.commits.get(r2).map(|c| c.root_dir).unwrap_or(0);
        let mut path = Vec::new();
        self.diff_dirs(&mut path, dir1, dir2, strings, out)
    }

    fn diff_dirs<W: Write>(
        &self,
        path: &mut Vec<u32>,
        dir1: u32,
        dir2: u32,
        strings: &StringPool,
        out: &mut FastExport<W>,
    ) -> Result<()> {
        let d1 = *self.dirs.get(dir1).unwrap();
        let d2 = *self.dirs.get(dir2).unwrap();
        let mut o1 = 0;
        let mut o2 = 0;
        while o1 < d1.size || o2 < d2.size {
            let e1 = (o1 < d1.size).then(|| *self.dirents.get(d1.first + o1).unwrap());
            let e2 = (o2 < d2.size).then(|| *self.dirents.get(d2.first + o2).unwrap());
            match (e1, e2) {
                (Some(a), Some(b)) if a.name == b.name => {
                    path.push(a.name);
                    if a.mode != b.mode || a.content != b.content {
                        if a.mode.is_dir() && b.mode.is_dir() {
                            self.diff_dirs(path, a.content, b.content, strings, out)?;
                        } else {
                            if a.mode.is_dir() != b.mode.is_dir() {
                                out.delete(strings, path)?;
                            }
                            self.add_recursive(path, b, strings, out)?;
                        }
                    }
                    path.pop();
                    o1 += 1;
                    o2 += 1;
                }
                (Some(a), Some(b)) if a.name < b.name => {
                    path.push(a.name);
                    out.delete(strings, path)?;
                    path.pop();
                    o1 += 1;
                }
                (Some(_), Some(b)) => {
                    path.push(b.name);
                    self.add_recursive(path, b, strings, out)?;
                    path.pop();
                    o2 += 1;
                }
                (Some(a), None) => {
                    path.push(a.name);
                    out.delete(strings, path)?;
                    path.pop();
                    o1 += 1;
                }
                (None, Some(b)) => {
                    path.push(b.name);
                    self.add_recursive(path, b, strings, out)?;
                    path.pop();
                    o2 += 1;
                }
                (None, None) => unreachable!(),
            }
        }
        Ok(())
    }

    /// `M` for a leaf, recursion for a directory.
    fn add_recursive<W: Write>(
        &self,
        path: &mut Vec<u32>,
        entry: Dirent,
        strings: &StringPool,
        out: &mut FastExport<W>,
    ) -> Result<()> {
        if !entry.mode.is_dir() {
            return out.modify(strings, path, entry.mode, entry.content);
        }
        let dir = *self.dirs.get(entry.content).unwrap();
        for i in 0..dir.size {
            let child = *self.dirents.get(dir.first + i).unwrap();
            path.push(child.name);
            self.add_recursive(path, child, strings, out)?;
            path.pop();
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.dirs.reset();
        self.dirents.reset();
        self.commits.reset();
        self.active_commit = NONE;
        self.dirs.alloc(1);
        self.saved_dirs = 1;
        self.saved_dirents = 0;
    }
}
