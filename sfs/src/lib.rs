//! A simulated file system that lives entirely in memory and is saved as one image.
//!
//! The file system has a fixed number of inodes and fixed size blocks. Each file
//! addresses its content through ten direct block pointers, and a directory is a
//! file whose content is a sequence of fixed size entries. After every change the whole
//! image (superblock, bitmaps, inode table and every block) is written to an
//! `ImageStore` in one piece.
//!
//! ```no_run
//! use sfs::{FileImage, SFS};
//!
//! let mut fs = SFS::open(FileImage::new("sfs_disk.bin"));
//! if !fs.is_mounted() {
//!     fs.format().unwrap();
//! }
//! fs.create("hello.txt").unwrap();
//! fs.write("hello.txt", b"hello").unwrap();
//! assert_eq!(fs.read("hello.txt").unwrap(), b"hello");
//! ```
mod alloc;
mod block;
mod data;
mod dir;
mod fs;
mod image;
pub mod io;
mod node;
mod sb;

pub use crate::block::{Block, BlockId};
pub use crate::dir::{DirEntry, DIR_ENTRY_SIZE, MAX_NAME_LEN};
pub use crate::fs::{
    BlockRef, FileInfo, FsStats, ListEntry, Resource, SFSError, BLOCK_HEADER_SIZE,
    DIRECT_POINTERS, SFS,
};
pub use crate::image::Image;
pub use crate::io::{FileImage, ImageStore, MemoryImage};
pub use crate::node::{FileKind, Inode, InodeId};
pub use crate::sb::{Geometry, SuperBlock, SB_MAGIC, SB_VERSION};

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the UNIX epoch, 0 if the clock is set before it.
pub(crate) fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
