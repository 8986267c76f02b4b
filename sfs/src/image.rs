use std::collections::HashMap;
use std::convert::TryInto;

use log::info;

use crate::alloc::{Bitmap, State};
use crate::block::{BlockId, BlockTable};
use crate::dir::{DOT, DOTDOT};
use crate::fs::{Resource, SFSError, BLOCK_HEADER_SIZE};
use crate::node::{FileKind, Inode, InodeId, InodeTable, INODE_RECORD_SIZE};
use crate::sb::{Geometry, SuperBlock, SUPERBLOCK_SIZE};

/// Width of the current path field at the end of an image.
pub const PATH_FIELD_LEN: usize = 256;
const ROOT_MODE: u16 = 0o755;

/// The complete state of a file system. Everything lives in memory and is written out
/// as a single unit.
///
/// # Layout
/// =====================================================================================
/// | SuperBlock | Bitmap (inodes) | Bitmap (blocks) | Inodes | Blocks | cwd | mounted |
/// | path |
/// =====================================================================================
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub(crate) super_block: SuperBlock,
    pub(crate) inode_map: Bitmap,
    pub(crate) block_map: Bitmap,
    pub(crate) inodes: InodeTable,
    pub(crate) blocks: BlockTable,
    pub(crate) cwd: InodeId,
    pub(crate) cwd_path: String,
}

impl Image {
    /// Builds an empty file system holding only the root directory, whose "." and ".."
    /// entries both point back at itself.
    pub fn format(geometry: Geometry) -> Result<Self, SFSError> {
        geometry.validate()?;
        let mut super_block = SuperBlock::new(&geometry, crate::now());

        let mut inode_map = Bitmap::new(geometry.total_inodes as usize);
        // Inode 0 is never handed out.
        inode_map.set_reserved(0);
        let mut block_map = Bitmap::new(geometry.total_blocks as usize);
        for nr in 0..geometry.data_start as usize {
            block_map.set_reserved(nr);
        }
        let image_len = Self::encoded_len(&geometry).ok_or_else(|| {
            SFSError::InvalidArgument("geometry is too large to encode".to_string())
        })?;
        super_block.image_len = image_len as u64;

        let mut image = Self {
            super_block,
            inode_map,
            block_map,
            inodes: InodeTable::new(geometry.total_inodes as usize),
            blocks: BlockTable::new(geometry.total_blocks as usize, geometry.payload_size()),
            cwd: InodeId::new(0),
            cwd_path: "/".to_string(),
        };

        let root = image
            .alloc_inode(FileKind::Directory, ROOT_MODE)
            .ok_or(SFSError::AllocationExhausted(Resource::Inodes))?;
        image.super_block.root_inode = root.get();
        image.cwd = root;
        image.dir_insert(root, DOT, root, FileKind::Directory)?;
        image.dir_insert(root, DOTDOT, root, FileKind::Directory)?;

        info!(
            "formatted {} blocks of {} bytes and {} inodes",
            geometry.total_blocks, geometry.block_size, geometry.total_inodes
        );
        Ok(image)
    }

    pub fn geometry(&self) -> Geometry {
        self.super_block.geometry()
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn root(&self) -> InodeId {
        InodeId::new(self.super_block.root_inode)
    }

    /// The directory names are resolved against.
    pub fn cwd(&self) -> InodeId {
        self.cwd
    }

    pub fn cwd_path(&self) -> &str {
        &self.cwd_path
    }

    /// Looks up a live inode. Handles outside the table or to free slots are rejected.
    pub fn inode(&self, id: InodeId) -> Result<&Inode, SFSError> {
        if id.index() < self.inode_map.len() && self.inode_map.get(id.index()) == State::Used {
            if let Some(node) = self.inodes.get(id) {
                return Ok(node);
            }
        }
        Err(SFSError::DoesNotExist(format!("inode {}", id)))
    }

    pub(crate) fn inode_mut(&mut self, id: InodeId) -> Result<&mut Inode, SFSError> {
        if id.index() < self.inode_map.len() && self.inode_map.get(id.index()) == State::Used {
            if let Some(node) = self.inodes.get_mut(id) {
                return Ok(node);
            }
        }
        Err(SFSError::DoesNotExist(format!("inode {}", id)))
    }

    /// Size in bytes of an encoded image with the given geometry, `None` if it does not
    /// fit in memory.
    pub fn encoded_len(geometry: &Geometry) -> Option<usize> {
        let inodes = geometry.total_inodes as usize;
        let blocks = geometry.total_blocks as usize;
        let payload = (geometry.block_size as usize).checked_sub(BLOCK_HEADER_SIZE)?;
        let block_table = blocks.checked_mul(BLOCK_HEADER_SIZE.checked_add(payload)?)?;
        let inode_table = inodes.checked_mul(INODE_RECORD_SIZE)?;
        [
            Bitmap::encoded_len(inodes),
            Bitmap::encoded_len(blocks),
            inode_table,
            block_table,
            4,
            1,
            PATH_FIELD_LEN,
        ]
        .iter()
        .try_fold(SUPERBLOCK_SIZE, |total, &len| total.checked_add(len))
    }

    /// Serializes the whole file system into one contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        let geometry = self.geometry();
        let mut buf = Vec::with_capacity(Self::encoded_len(&geometry).unwrap_or(0));

        buf.extend_from_slice(&self.super_block.serialize());
        buf.extend_from_slice(&self.inode_map.serialize());
        buf.extend_from_slice(&self.block_map.serialize());
        self.inodes.serialize_into(&mut buf);
        self.blocks.serialize_into(&mut buf);
        buf.extend_from_slice(&self.cwd.get().to_be_bytes());
        // The mounted flag. Only mounted file systems are ever written.
        buf.push(1);
        let mut path = [0; PATH_FIELD_LEN];
        path[..self.cwd_path.len()].copy_from_slice(self.cwd_path.as_bytes());
        buf.extend_from_slice(&path);

        debug_assert_eq!(buf.len() as u64, self.super_block.image_len);
        buf
    }

    /// Rebuilds a file system from the output of `encode`, refusing anything that is
    /// truncated, carries the wrong magic or is internally inconsistent.
    pub fn decode(buf: &[u8]) -> Result<Self, SFSError> {
        let super_block = SuperBlock::parse(buf)?;
        let geometry = super_block.geometry();
        geometry
            .validate()
            .map_err(|e| SFSError::InvalidImage(e.to_string()))?;

        let expected = Self::encoded_len(&geometry).ok_or_else(|| {
            SFSError::InvalidImage("recorded geometry is too large to encode".to_string())
        })?;
        if buf.len() < expected {
            return Err(SFSError::InvalidImage(format!(
                "short read: got {} of {} bytes",
                buf.len(),
                expected
            )));
        }
        if buf.len() != expected || super_block.image_len != expected as u64 {
            return Err(SFSError::InvalidImage(format!(
                "image length {} (recorded {}) does not match the expected {} bytes",
                buf.len(),
                super_block.image_len,
                expected
            )));
        }

        let inode_count = geometry.total_inodes as usize;
        let block_count = geometry.total_blocks as usize;
        let mut rest = &buf[SUPERBLOCK_SIZE..];
        let mut take = |len: usize| split_off(&mut rest, len);

        let inode_map = Bitmap::parse(take(Bitmap::encoded_len(inode_count)), inode_count)?;
        let block_map = Bitmap::parse(take(Bitmap::encoded_len(block_count)), block_count)?;
        let inodes = InodeTable::parse(take(InodeTable::encoded_len(inode_count)), inode_count)?;
        let payload = geometry.payload_size();
        let blocks = BlockTable::parse(
            take(BlockTable::encoded_len(block_count, payload)),
            block_count,
            payload,
        )?;
        let cwd = InodeId::new(u32::from_be_bytes(take(4).try_into().unwrap()));
        // The mounted flag carries no information on disk.
        let _mounted = take(1);
        let path = take(PATH_FIELD_LEN);
        let end = path.iter().position(|&b| b == 0).unwrap_or(PATH_FIELD_LEN);
        let cwd_path = String::from_utf8(path[..end].to_vec())
            .map_err(|_| SFSError::InvalidImage("current path is not valid UTF-8".to_string()))?;

        let image = Self {
            super_block,
            inode_map,
            block_map,
            inodes,
            blocks,
            cwd,
            cwd_path,
        };
        image.check_consistency()?;
        Ok(image)
    }

    fn check_consistency(&self) -> Result<(), SFSError> {
        if self.super_block.free_inodes as usize != self.inode_map.count_free() {
            return Err(SFSError::InvalidImage(format!(
                "superblock counts {} free inodes, bitmap has {}",
                self.super_block.free_inodes,
                self.inode_map.count_free()
            )));
        }
        if self.super_block.free_blocks as usize != self.block_map.count_free() {
            return Err(SFSError::InvalidImage(format!(
                "superblock counts {} free blocks, bitmap has {}",
                self.super_block.free_blocks,
                self.block_map.count_free()
            )));
        }
        if self.inode_map.get(0) == State::Free || self.inodes.get(InodeId::new(0)).is_some() {
            return Err(SFSError::InvalidImage("inode 0 is not reserved".to_string()));
        }
        for nr in 1..self.inodes.len() {
            let live = self.inode_map.get(nr) == State::Used;
            if live != self.inodes.get(InodeId::new(nr as u32)).is_some() {
                return Err(SFSError::InvalidImage(format!(
                    "inode {} disagrees with the inode bitmap",
                    nr
                )));
            }
        }
        self.check_block_ownership()?;
        for &dir in [self.root(), self.cwd].iter() {
            if !self.inode(dir).map(Inode::is_dir).unwrap_or(false) {
                return Err(SFSError::InvalidImage(format!(
                    "inode {} is not a live directory",
                    dir
                )));
            }
        }
        Ok(())
    }

    /// Every live inode must address a prefix of its direct pointers, matching its block
    /// count, with each block in the data region, marked used and owned by no other inode.
    fn check_block_ownership(&self) -> Result<(), SFSError> {
        let geometry = self.geometry();
        let mut owner: HashMap<BlockId, usize> = HashMap::new();

        for nr in 1..self.inodes.len() {
            let node = match self.inodes.get(InodeId::new(nr as u32)) {
                Some(node) => node,
                None => continue,
            };
            let bad = |what: String| SFSError::InvalidImage(format!("inode {}: {}", nr, what));

            let held = node.direct.iter().take_while(|slot| slot.is_some()).count();
            if node.direct[held..].iter().any(Option::is_some) {
                return Err(bad("direct pointers leave a gap".to_string()));
            }
            if held != node.block_count as usize {
                return Err(bad(format!(
                    "block count {} but {} pointers in use",
                    node.block_count, held
                )));
            }

            let mut used = 0;
            for block in node.direct.iter().filter_map(|slot| *slot) {
                if block.get() < geometry.data_start || block.get() >= geometry.total_blocks {
                    return Err(bad(format!("block {} is outside the data region", block)));
                }
                if self.block_map.get(block.index()) == State::Free {
                    return Err(bad(format!("block {} is free in the block bitmap", block)));
                }
                if let Some(other) = owner.insert(block, nr) {
                    return Err(bad(format!("block {} is also held by inode {}", block, other)));
                }
                used += self.blocks.get(block).map_or(0, |b| b.used as usize);
            }

            let size = node.size as usize;
            if size > geometry.max_file_size() || size > used {
                return Err(bad(format!(
                    "size {} exceeds the {} bytes its blocks hold",
                    size, used
                )));
            }
        }
        Ok(())
    }
}

fn split_off<'a>(rest: &mut &'a [u8], len: usize) -> &'a [u8] {
    let buf: &'a [u8] = *rest;
    let (head, tail) = buf.split_at(len);
    *rest = tail;
    head
}
