//! Error kinds propagated out of the filesystem core.
//!
//! Every component surfaces failures through this single enum rather than
//! each layer inventing its own; callers match on the kind they care about
//! and propagate the rest with `?`.

use core::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Error {
    /// The underlying block device failed a read or write.
    Io,
    /// The free map has no more sectors to hand out.
    NoSpace,
    /// Every cache entry is pinned; no victim could be found within `2*C` steps.
    CacheExhausted,
    /// A path component, or the file it names, does not exist.
    NotFound,
    /// `create` was asked to create a name that already exists.
    Exists,
    /// An intermediate path component resolved to a regular file, not a directory.
    NotADirectory,
    /// `remove` was asked to remove a directory that still has entries.
    NotEmpty,
    /// The path was empty, or named `.`/`..` where a new name was required.
    InvalidPath,
    /// `remove` was asked to remove the root, or a process's current directory.
    Busy,
    /// A write was attempted on an inode with an outstanding `deny_write`.
    DenyWrite,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::Io => "device I/O error",
            Error::NoSpace => "free map exhausted",
            Error::CacheExhausted => "every cache entry is pinned",
            Error::NotFound => "no such file or directory",
            Error::Exists => "name already exists",
            Error::NotADirectory => "not a directory",
            Error::NotEmpty => "directory not empty",
            Error::InvalidPath => "invalid path",
            Error::Busy => "resource busy",
            Error::DenyWrite => "write denied on this inode",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
