//! Path resolution: walking a slash-separated path down to the directory
//! that would contain its final component, leaving that last component
//! for the caller (`create`/`open`/`remove`) to interpret.
//!
//! Grounded on the teacher's own `Path`/`skipelem` component iterator,
//! generalized from its fixed `DIRSIZ`-byte components and single rooted
//! filesystem to this core's `.`/`..` stored-parent-pointer walk and
//! per-process choice of root vs. current directory.

use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::free_map::FreeMap;
use crate::inode::InodeStore;
use crate::open_table::OpenInodeTable;
use crate::param::ROOT_DIR_SECTOR;

/// The result of walking every component but the last.
pub struct Resolved {
    /// Handle to the directory that contains (or would contain) the leaf.
    /// Still counted as open in the table — the caller must `close` it.
    pub parent: Directory,
    /// The unresolved final path component. Empty when `is_root`.
    pub leaf: String,
    /// True if the path named the root directory itself (no leaf to
    /// resolve; `parent` *is* the answer).
    pub is_root: bool,
    /// True if the path had a trailing `/`, meaning the leaf — whatever
    /// it resolves to — must be a directory.
    pub leaf_must_be_dir: bool,
}

pub struct PathResolver<'a> {
    table: &'a OpenInodeTable,
    store: &'a InodeStore<'a>,
    free_map: &'a dyn FreeMap,
}

impl<'a> PathResolver<'a> {
    pub fn new(table: &'a OpenInodeTable, store: &'a InodeStore<'a>, free_map: &'a dyn FreeMap) -> Self {
        Self { table, store, free_map }
    }

    /// Resolves `path` against `cwd` (the caller's current directory;
    /// `None` behaves as if it were root). A leading `/` always starts
    /// from root regardless of `cwd`.
    pub fn resolve(&self, path: &str, cwd: Option<&Directory>) -> Result<Resolved> {
        if path.is_empty() {
            return Err(Error::InvalidPath);
        }
        let trailing_slash = path.ends_with('/');
        let mut components: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let (start_sector, start_parent) = if path.starts_with('/') {
            (ROOT_DIR_SECTOR, ROOT_DIR_SECTOR)
        } else {
            match cwd {
                Some(dir) => (dir.sector(), dir.parent_sector()),
                None => (ROOT_DIR_SECTOR, ROOT_DIR_SECTOR),
            }
        };

        let start_inode = self.table.open(start_sector, self.store)?;
        let mut current = Directory::reopen(start_inode, start_parent);

        if components.is_empty() {
            return Ok(Resolved {
                parent: current,
                leaf: String::new(),
                is_root: true,
                leaf_must_be_dir: true,
            });
        }

        let leaf = components.pop().unwrap().to_string();

        for component in components {
            let next = self.step(&current, component);
            self.close(current)?;
            current = next?;
        }

        Ok(Resolved {
            parent: current,
            leaf,
            is_root: false,
            leaf_must_be_dir: trailing_slash,
        })
    }

    fn step(&self, current: &Directory, component: &str) -> Result<Directory> {
        match component {
            "." => {
                let inode = self.table.open(current.sector(), self.store)?;
                Ok(Directory::reopen(inode, current.parent_sector()))
            }
            ".." => {
                let target_sector = current.parent_sector();
                let inode = self.table.open(target_sector, self.store)?;
                let probe = Directory::reopen(inode, target_sector);
                let grandparent = probe.lookup(self.store, "..")?;
                Ok(Directory::reopen(probe.open_inode().clone(), grandparent))
            }
            name => {
                let sector = current.lookup(self.store, name)?;
                let inode = self.table.open(sector, self.store)?;
                if !inode.is_dir() {
                    self.table.close(&inode, self.store, self.free_map)?;
                    return Err(Error::NotADirectory);
                }
                Ok(Directory::reopen(inode, current.sector()))
            }
        }
    }

    /// Releases a directory handle obtained from `resolve` or an
    /// intermediate `step`.
    pub fn close(&self, dir: Directory) -> Result<()> {
        self.table.close(dir.open_inode(), self.store, self.free_map)
    }
}
