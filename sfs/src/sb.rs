use std::convert::TryInto;

use crate::fs::{SFSError, BLOCK_HEADER_SIZE, DIRECT_POINTERS};

/// "\xED\x12\x34\x56", the identifying constant every image starts with.
pub const SB_MAGIC: u32 = 0xED12_3456;
pub const SB_VERSION: u32 = 1;
/// Encoded size of the superblock at the front of an image.
pub const SUPERBLOCK_SIZE: usize = 64;

/// Known locations. The bitmaps and the inode table are kept in memory rather than in
/// blocks, but their nominal positions are recorded in the superblock and the blocks
/// below the data region stay reserved.
const INODE_BITMAP_START: u32 = 1;
const BLOCK_BITMAP_START: u32 = 5;
const INODE_TABLE_START: u32 = 10;

/// Upper bounds on a geometry, keeping a whole image well inside addressable memory.
const MAX_BLOCK_SIZE: u32 = 1 << 16;
const MAX_TOTAL_BLOCKS: u32 = 1 << 20;
const MAX_TOTAL_INODES: u32 = 1 << 20;

/// The fixed dimensions of a file system, chosen at format time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub total_blocks: u32,
    pub total_inodes: u32,
    /// Bytes per block including the block header.
    pub block_size: u32,
    /// The first block of the data region. Everything below it is reserved.
    pub data_start: u32,
}

impl Default for Geometry {
    /// 2048 blocks of 512 bytes (1MB) and 256 inodes.
    fn default() -> Self {
        Self {
            total_blocks: 2048,
            total_inodes: 256,
            block_size: 512,
            data_start: 100,
        }
    }
}

impl Geometry {
    pub fn with_total_blocks(mut self, blocks: u32) -> Self {
        self.total_blocks = blocks;
        self
    }

    pub fn with_total_inodes(mut self, inodes: u32) -> Self {
        self.total_inodes = inodes;
        self
    }

    pub fn with_block_size(mut self, bytes: u32) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn with_data_start(mut self, block: u32) -> Self {
        self.data_start = block;
        self
    }

    /// Bytes of file content a single block can hold.
    pub fn payload_size(&self) -> usize {
        self.block_size as usize - BLOCK_HEADER_SIZE
    }

    /// The largest file the direct pointers of one inode can address.
    pub fn max_file_size(&self) -> usize {
        DIRECT_POINTERS * self.payload_size()
    }

    pub fn validate(&self) -> Result<(), SFSError> {
        if self.block_size as usize <= BLOCK_HEADER_SIZE {
            return Err(SFSError::InvalidArgument(format!(
                "block size must exceed the {} byte block header",
                BLOCK_HEADER_SIZE
            )));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(SFSError::InvalidArgument(format!(
                "block size must not exceed {} bytes",
                MAX_BLOCK_SIZE
            )));
        }
        if self.total_blocks > MAX_TOTAL_BLOCKS || self.total_inodes > MAX_TOTAL_INODES {
            return Err(SFSError::InvalidArgument(format!(
                "at most {} blocks and {} inodes are supported",
                MAX_TOTAL_BLOCKS, MAX_TOTAL_INODES
            )));
        }
        // Inode 0 is reserved and the root directory needs one more.
        if self.total_inodes < 2 {
            return Err(SFSError::InvalidArgument(
                "at least two inodes are required".to_string(),
            ));
        }
        if self.data_start <= INODE_TABLE_START || self.data_start >= self.total_blocks {
            return Err(SFSError::InvalidArgument(format!(
                "data region must start after block {} and before block {}",
                INODE_TABLE_START, self.total_blocks
            )));
        }
        Ok(())
    }
}

/// Global description of the file system: its dimensions, where things live and how
/// much of it is still free.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperBlock {
    pub sb_magic: u32,
    pub version: u32,
    pub total_blocks: u32,
    pub total_inodes: u32,
    pub block_size: u32,
    /// Kept equal to the number of unset bits in the block bitmap.
    pub free_blocks: u32,
    /// Kept equal to the number of unset bits in the inode bitmap.
    pub free_inodes: u32,
    pub inode_bitmap_start: u32,
    pub block_bitmap_start: u32,
    pub inode_table_start: u32,
    pub data_start: u32,
    pub root_inode: u32,
    /// Seconds since the UNIX epoch.
    pub created: u64,
    /// Length in bytes of the whole encoded image, this superblock included.
    pub image_len: u64,
}

impl SuperBlock {
    /// A superblock for a freshly formatted file system where every inode and every
    /// block of the data region is free.
    pub fn new(geometry: &Geometry, created: u64) -> Self {
        Self {
            sb_magic: SB_MAGIC,
            version: SB_VERSION,
            total_blocks: geometry.total_blocks,
            total_inodes: geometry.total_inodes,
            block_size: geometry.block_size,
            free_blocks: geometry.total_blocks - geometry.data_start,
            free_inodes: geometry.total_inodes - 1,
            inode_bitmap_start: INODE_BITMAP_START,
            block_bitmap_start: BLOCK_BITMAP_START,
            inode_table_start: INODE_TABLE_START,
            data_start: geometry.data_start,
            root_inode: 0,
            created,
            image_len: 0,
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            total_blocks: self.total_blocks,
            total_inodes: self.total_inodes,
            block_size: self.block_size,
            data_start: self.data_start,
        }
    }

    /// Reads the superblock from the front of `buf`. Buffers shorter than
    /// SUPERBLOCK_SIZE, a wrong magic constant or an unknown version are rejected.
    pub fn parse(buf: &[u8]) -> Result<Self, SFSError> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err(SFSError::InvalidImage(format!(
                "short read: {} bytes cannot hold a superblock",
                buf.len()
            )));
        }
        let word = |at: usize| u32::from_be_bytes(buf[at..at + 4].try_into().unwrap());
        let dword = |at: usize| u64::from_be_bytes(buf[at..at + 8].try_into().unwrap());

        let sb_magic = word(0);
        if sb_magic != SB_MAGIC {
            return Err(SFSError::InvalidImage(format!(
                "superblock magic {:#010x} is invalid",
                sb_magic
            )));
        }
        let version = word(4);
        if version != SB_VERSION {
            return Err(SFSError::InvalidImage(format!(
                "unsupported format version {}",
                version
            )));
        }

        Ok(Self {
            sb_magic,
            version,
            total_blocks: word(8),
            total_inodes: word(12),
            block_size: word(16),
            free_blocks: word(20),
            free_inodes: word(24),
            inode_bitmap_start: word(28),
            block_bitmap_start: word(32),
            inode_table_start: word(36),
            data_start: word(40),
            root_inode: word(44),
            created: dword(48),
            image_len: dword(56),
        })
    }

    /// Serializes the superblock as its fields in declaration order, big endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut sb_encoded = Vec::with_capacity(SUPERBLOCK_SIZE);
        for field in [
            self.sb_magic,
            self.version,
            self.total_blocks,
            self.total_inodes,
            self.block_size,
            self.free_blocks,
            self.free_inodes,
            self.inode_bitmap_start,
            self.block_bitmap_start,
            self.inode_table_start,
            self.data_start,
            self.root_inode,
        ]
        .iter()
        {
            sb_encoded.extend_from_slice(&field.to_be_bytes());
        }
        sb_encoded.extend_from_slice(&self.created.to_be_bytes());
        sb_encoded.extend_from_slice(&self.image_len.to_be_bytes());
        debug_assert_eq!(sb_encoded.len(), SUPERBLOCK_SIZE);
        sb_encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_encode_and_decode_superblocks() {
        let mut sb = SuperBlock::new(&Geometry::default(), 1_600_000_000);
        sb.root_inode = 1;
        sb.image_len = 1 << 20;
        let encoded = sb.serialize();
        assert_eq!(encoded.len(), SUPERBLOCK_SIZE);

        let parsed = SuperBlock::parse(&encoded).unwrap();

        assert_eq!(parsed, sb);
    }

    #[test]
    fn fresh_superblock_counts_reserved_space_as_used() {
        let sb = SuperBlock::new(&Geometry::default(), 0);
        assert_eq!(sb.free_blocks, 2048 - 100);
        assert_eq!(sb.free_inodes, 255);
        assert_eq!(sb.geometry(), Geometry::default());
    }

    #[test]
    fn parsing_buffer_with_invalid_magic_fails() {
        let zero_buffer_with_right_size = vec![0; SUPERBLOCK_SIZE];
        assert!(matches!(
            SuperBlock::parse(&zero_buffer_with_right_size),
            Err(SFSError::InvalidImage(_))
        ));
    }

    #[test]
    fn parsing_buffer_with_invalid_size_fails() {
        let encoded = SuperBlock::new(&Geometry::default(), 0).serialize();
        assert!(matches!(
            SuperBlock::parse(&encoded[..SUPERBLOCK_SIZE - 1]),
            Err(SFSError::InvalidImage(_))
        ));
    }

    #[test]
    fn parsing_unknown_version_fails() {
        let mut sb = SuperBlock::new(&Geometry::default(), 0);
        sb.version = 2;
        assert!(SuperBlock::parse(&sb.serialize()).is_err());
    }

    #[test]
    fn default_geometry_addresses_five_thousand_bytes_per_file() {
        let geometry = Geometry::default();
        assert_eq!(geometry.payload_size(), 500);
        assert_eq!(geometry.max_file_size(), 5000);
        assert!(geometry.validate().is_ok());
    }

    #[test]
    fn degenerate_geometries_are_rejected() {
        let base = Geometry::default();
        assert!(base.with_block_size(12).validate().is_err());
        assert!(base.with_total_inodes(1).validate().is_err());
        assert!(base.with_data_start(10).validate().is_err());
        assert!(base.with_data_start(2048).validate().is_err());
        assert!(base.with_block_size(u32::MAX).validate().is_err());
        assert!(base.with_total_blocks(u32::MAX).validate().is_err());
        assert!(base.with_total_inodes(u32::MAX).validate().is_err());
    }
}
