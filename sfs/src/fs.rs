use std::fmt;

use log::{info, warn};
use thiserror::Error;

use crate::block::BlockId;
use crate::dir::{validate_name, DIR_ENTRY_SIZE, DOT, DOTDOT};
use crate::image::Image;
use crate::io::ImageStore;
use crate::node::{FileKind, InodeId};
use crate::sb::Geometry;

/// Bytes at the front of every block used for its index, in-use flag and used count.
pub const BLOCK_HEADER_SIZE: usize = 12;
/// Data block pointers per inode. There is no indirect addressing.
pub const DIRECT_POINTERS: usize = 10;

const FILE_MODE: u16 = 0o644;
const DIR_MODE: u16 = 0o755;

/// A countable resource of the file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Inodes,
    Blocks,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Inodes => write!(f, "inodes"),
            Resource::Blocks => write!(f, "data blocks"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SFSError {
    #[error("file system is not mounted")]
    NotMounted,
    #[error("\"{0}\" already exists")]
    DuplicateName(String),
    #[error("found no file named \"{0}\"")]
    DoesNotExist(String),
    #[error("\"{name}\" is not a {expected}")]
    TypeMismatch { name: String, expected: FileKind },
    #[error("no free {0} left")]
    AllocationExhausted(Resource),
    #[error("{requested} bytes exceed the {max} bytes a file can address")]
    SizeExceeded { requested: usize, max: usize },
    #[error("directory \"{0}\" is not empty")]
    NotEmpty(String),
    #[error("invalid file system image: {0}")]
    InvalidImage(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("image storage failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub name: String,
    pub inode: InodeId,
    pub kind: FileKind,
    pub size: u32,
    pub block_count: u32,
    pub modified: u64,
}

/// A direct pointer in use.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRef {
    pub slot: usize,
    pub block: BlockId,
    pub used: u32,
}

/// Everything the inode of a file records.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub inode: InodeId,
    pub kind: FileKind,
    pub size: u32,
    pub block_count: u32,
    pub mode: u16,
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
    pub blocks: Vec<BlockRef>,
}

/// File system wide occupancy, as recorded by the superblock.
#[derive(Debug, Clone, PartialEq)]
pub struct FsStats {
    pub version: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub created: u64,
}

impl FsStats {
    pub fn used_blocks(&self) -> u32 {
        self.total_blocks - self.free_blocks
    }

    pub fn used_inodes(&self) -> u32 {
        self.total_inodes - self.free_inodes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_blocks as u64 * self.block_size as u64
    }

    pub fn free_bytes(&self) -> u64 {
        self.free_blocks as u64 * self.block_size as u64
    }

    pub fn usage_percent(&self) -> f64 {
        self.used_blocks() as f64 * 100.0 / self.total_blocks as f64
    }
}

/// A file system image behind a mount gate, saved to `store` after every change.
///
/// Every name is resolved in the current directory. Nothing changes the current
/// directory, so in practice the namespace is the root directory.
pub struct SFS<S: ImageStore> {
    store: S,
    /// `Some` while mounted.
    image: Option<Image>,
}

impl<S: ImageStore> SFS<S> {
    /// An unmounted file system over `store`. Use `mount` or `format` to bring it up.
    pub fn new(store: S) -> Self {
        SFS { store, image: None }
    }

    /// Mounts the image held by `store` if there is a valid one, and otherwise stays
    /// unmounted.
    pub fn open(store: S) -> Self {
        let mut fs = Self::new(store);
        if let Err(e) = fs.mount() {
            warn!("no usable image found, file system left unmounted: {}", e);
        }
        fs
    }

    pub fn is_mounted(&self) -> bool {
        self.image.is_some()
    }

    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns ownership of the underlying store to the caller.
    pub fn into_store(self) -> S {
        self.store
    }

    /// The path of the current directory, while mounted.
    pub fn cwd_path(&self) -> Option<&str> {
        self.image.as_ref().map(Image::cwd_path)
    }

    /// Formats a file system with the default geometry, replacing any mounted one.
    pub fn format(&mut self) -> Result<(), SFSError> {
        self.format_with(Geometry::default())
    }

    pub fn format_with(&mut self, geometry: Geometry) -> Result<(), SFSError> {
        self.image = Some(Image::format(geometry)?);
        self.persist()
    }

    /// Restores the image held by the store. On failure the file system is left
    /// unmounted, even if it was mounted before.
    pub fn mount(&mut self) -> Result<(), SFSError> {
        self.image = None;
        let raw = self.store.load()?;
        let image = Image::decode(&raw).map_err(|e| {
            warn!("rejected stored image: {}", e);
            e
        })?;
        let sb = image.super_block();
        info!(
            "mounted image with {} of {} inodes and {} of {} blocks in use",
            sb.total_inodes - sb.free_inodes,
            sb.total_inodes,
            sb.total_blocks - sb.free_blocks,
            sb.total_blocks
        );
        self.image = Some(image);
        Ok(())
    }

    /// Writes the whole image to the store without changing it.
    pub fn save(&mut self) -> Result<(), SFSError> {
        self.persist()
    }

    fn persist(&mut self) -> Result<(), SFSError> {
        let image = self.image.as_ref().ok_or(SFSError::NotMounted)?;
        let encoded = image.encode();
        self.store.store(&encoded)?;
        info!("saved image of {} bytes", encoded.len());
        Ok(())
    }

    fn mounted(&self) -> Result<&Image, SFSError> {
        self.image.as_ref().ok_or(SFSError::NotMounted)
    }

    fn mounted_mut(&mut self) -> Result<&mut Image, SFSError> {
        self.image.as_mut().ok_or(SFSError::NotMounted)
    }

    /// Creates an empty regular file in the current directory.
    pub fn create(&mut self, name: &str) -> Result<InodeId, SFSError> {
        let image = self.mounted_mut()?;
        let id = make_node(image, name, FileKind::Regular)?;
        self.persist()?;
        Ok(id)
    }

    /// Creates an empty directory in the current directory.
    pub fn mkdir(&mut self, name: &str) -> Result<InodeId, SFSError> {
        let image = self.mounted_mut()?;
        let id = make_node(image, name, FileKind::Directory)?;
        self.persist()?;
        Ok(id)
    }

    /// Replaces the content of the regular file `name`.
    ///
    /// The file's old blocks are released before the new content is checked, so a write
    /// failing with `SizeExceeded` or `AllocationExhausted` leaves the file empty. That
    /// state is saved like any other change.
    pub fn write(&mut self, name: &str, data: &[u8]) -> Result<usize, SFSError> {
        let image = self.mounted_mut()?;
        let id = resolve(image, name)?;
        require_kind(image, id, name, FileKind::Regular)?;

        let written = image.write_data(id, data);
        self.persist()?;
        written
    }

    /// The content of the regular file `name`, empty for an empty file.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, SFSError> {
        let image = self.mounted_mut()?;
        let id = resolve(image, name)?;
        require_kind(image, id, name, FileKind::Regular)?;
        image.read_all(id)
    }

    /// Removes `name` from the current directory and releases its inode and blocks.
    /// Directories must be empty apart from "." and "..".
    pub fn delete(&mut self, name: &str) -> Result<(), SFSError> {
        let image = self.mounted_mut()?;
        if name == DOT || name == DOTDOT {
            return Err(SFSError::InvalidArgument(format!(
                "\"{}\" cannot be deleted",
                name
            )));
        }
        let cwd = image.cwd();
        let id = resolve(image, name)?;
        let node = image.inode(id)?;
        if node.is_dir() && node.size as usize > 2 * DIR_ENTRY_SIZE {
            return Err(SFSError::NotEmpty(name.to_string()));
        }

        image.release_data(id)?;
        image.free_inode(id);
        image.dir_remove(cwd, name)?;
        self.persist()
    }

    /// Every entry of the current directory, "." and ".." included, in on-disk order.
    pub fn list(&mut self) -> Result<Vec<ListEntry>, SFSError> {
        let image = self.mounted_mut()?;
        let cwd = image.cwd();
        let entries = image.dir_entries(cwd)?;

        let mut listing = Vec::with_capacity(entries.len());
        for entry in entries {
            let node = image.inode(entry.inode)?;
            listing.push(ListEntry {
                name: entry.name,
                inode: entry.inode,
                kind: entry.kind,
                size: node.size,
                block_count: node.block_count,
                modified: node.modified,
            });
        }
        Ok(listing)
    }

    pub fn info(&mut self, name: &str) -> Result<FileInfo, SFSError> {
        let image = self.mounted_mut()?;
        let id = resolve(image, name)?;
        let image: &Image = image;
        let node = image.inode(id)?;

        let blocks = node
            .direct
            .iter()
            .enumerate()
            .filter_map(|(slot, block)| block.map(|block| (slot, block)))
            .map(|(slot, block)| BlockRef {
                slot,
                block,
                used: image.blocks.get(block).map_or(0, |b| b.used),
            })
            .collect();

        Ok(FileInfo {
            inode: id,
            kind: node.kind,
            size: node.size,
            block_count: node.block_count,
            mode: node.mode,
            created: node.created,
            modified: node.modified,
            accessed: node.accessed,
            blocks,
        })
    }

    pub fn stat(&self) -> Result<FsStats, SFSError> {
        let sb = self.mounted()?.super_block();
        Ok(FsStats {
            version: sb.version,
            block_size: sb.block_size,
            total_blocks: sb.total_blocks,
            free_blocks: sb.free_blocks,
            total_inodes: sb.total_inodes,
            free_inodes: sb.free_inodes,
            created: sb.created,
        })
    }
}

fn resolve(image: &mut Image, name: &str) -> Result<InodeId, SFSError> {
    let cwd = image.cwd();
    image
        .dir_lookup(cwd, name)?
        .ok_or_else(|| SFSError::DoesNotExist(name.to_string()))
}

fn require_kind(
    image: &Image,
    id: InodeId,
    name: &str,
    expected: FileKind,
) -> Result<(), SFSError> {
    match image.inode(id)?.kind {
        kind if kind == expected => Ok(()),
        _ => Err(SFSError::TypeMismatch {
            name: name.to_string(),
            expected,
        }),
    }
}

/// Allocates an inode of `kind` and links it into the current directory as `name`. Any
/// failure after the allocation hands the inode back.
fn make_node(image: &mut Image, name: &str, kind: FileKind) -> Result<InodeId, SFSError> {
    validate_name(name)?;
    let cwd = image.cwd();
    if image.dir_lookup(cwd, name)?.is_some() {
        return Err(SFSError::DuplicateName(name.to_string()));
    }

    let mode = match kind {
        FileKind::Regular => FILE_MODE,
        FileKind::Directory => DIR_MODE,
    };
    let id = image
        .alloc_inode(kind, mode)
        .ok_or(SFSError::AllocationExhausted(Resource::Inodes))?;

    let linked = match kind {
        FileKind::Regular => Ok(()),
        FileKind::Directory => image
            .dir_insert(id, DOT, id, FileKind::Directory)
            .and_then(|_| image.dir_insert(id, DOTDOT, cwd, FileKind::Directory)),
    }
    .and_then(|_| image.dir_insert(cwd, name, id, kind));

    if let Err(e) = linked {
        // The inode may already hold "." and "..".
        image.release_data(id)?;
        image.free_inode(id);
        return Err(e);
    }
    info!("created {} \"{}\" as inode {}", kind, name, id);
    Ok(id)
}
