//! Compile-time layout constants.
//!
//! Mirrors the teacher convention of centralizing every "magic number" a
//! filesystem module needs in one place instead of scattering literals.

/// Size in bytes of one device sector, and the unit of all cache I/O.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Number of direct data-sector pointers in an on-disk inode.
pub const DIRECT_POINTERS: usize = 100;

/// Number of sector ids held by one indirect block (and by the doubly
/// indirect block itself).
pub const INDIRECT_POINTERS: usize = 128;

/// Largest byte offset an inode can address: `D*512 + P*P*512`.
pub const MAX_FILE_SIZE: usize =
    DIRECT_POINTERS * BLOCK_SECTOR_SIZE + INDIRECT_POINTERS * INDIRECT_POINTERS * BLOCK_SECTOR_SIZE;

/// Magic value stamped into every on-disk inode for sanity checking.
pub const INODE_MAGIC: u32 = 0x494E_4F44;

/// Number of entries in the sector cache.
pub const CACHE_CAPACITY: usize = 64;

/// Sector holding the free-sector bitmap.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the root directory's inode.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Maximum length of one path component (directory entry name), not
/// counting the NUL terminator used when the name is shorter.
pub const NAME_MAX: usize = 28;
