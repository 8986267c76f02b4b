use std::convert::TryInto;

use log::debug;

use crate::block::BlockId;
use crate::fs::SFSError;
use crate::image::Image;
use crate::node::{FileKind, Inode, InodeId};

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// One bit per allocatable object, packed into 64 bit words. Bit `i` lives in word
/// `i / 64` at position `i % 64`. Bits past `len` are always zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    bitmap: Vec<u64>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bitmap: vec![0; Self::words_for(len)],
            len,
        }
    }

    fn words_for(len: usize) -> usize {
        len / 64 + (len % 64 != 0) as usize
    }

    /// The number of bytes a bitmap tracking `len` objects occupies once serialized.
    pub fn encoded_len(len: usize) -> usize {
        Self::words_for(len) * 8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Reads a bitmap tracking `len` objects from a buffer of exactly
    /// `Bitmap::encoded_len(len)` bytes.
    pub fn parse(buf: &[u8], len: usize) -> Result<Self, SFSError> {
        if buf.len() != Self::encoded_len(len) {
            return Err(SFSError::InvalidImage(format!(
                "bitmap of {} bytes cannot track {} objects",
                buf.len(),
                len
            )));
        }
        let bitmap: Vec<u64> = buf
            .chunks_exact(8)
            .map(|word| u64::from_be_bytes(word.try_into().unwrap()))
            .collect();

        let map = Self { bitmap, len };
        if map.has_stray_bits() {
            return Err(SFSError::InvalidImage(
                "bitmap marks objects past its end".to_string(),
            ));
        }
        Ok(map)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(Self::encoded_len(self.len));
        for word in self.bitmap.iter() {
            encoded.extend_from_slice(&word.to_be_bytes());
        }
        encoded
    }

    pub fn get(&self, nr: usize) -> State {
        assert!(nr < self.len, "bit {} out of range for bitmap of {}", nr, self.len);
        // Grab the u64 containing the significant bit.
        let outer_offset = self.bitmap[nr / 64];

        let inner_offset = nr % 64;
        let mask = 0b01_u64 << inner_offset;
        match (outer_offset & mask) >> inner_offset {
            0 => State::Free,
            1 => State::Used,
            _ => unreachable!("masked a single bit but got a non 0 or 1 value"),
        }
    }

    pub fn set_reserved(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} out of range for bitmap of {}", nr, self.len);
        self.bitmap[nr / 64] |= 0b01_u64 << (nr % 64);
    }

    pub fn set_free(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} out of range for bitmap of {}", nr, self.len);
        self.bitmap[nr / 64] &= !(0b01_u64 << (nr % 64));
    }

    pub fn count_free(&self) -> usize {
        let used: u32 = self.bitmap.iter().map(|word| word.count_ones()).sum();
        self.len - used as usize
    }

    /// Iterates over the free objects at or after `start` in ascending order.
    pub fn free_from(&self, start: usize) -> NextAvailableAllocation<'_> {
        NextAvailableAllocation {
            marker: start,
            bitmap: self,
        }
    }

    fn has_stray_bits(&self) -> bool {
        let tail = self.len % 64;
        match self.bitmap.last() {
            Some(last) if tail != 0 => last >> tail != 0,
            _ => false,
        }
    }
}

/// Implements a naive allocation policy: each call to the iterator returns the next free
/// object after the previously returned one, scanning linearly from the starting point.
pub struct NextAvailableAllocation<'a> {
    /// Keeps track of the next starting place for looking for available objects.
    marker: usize,
    bitmap: &'a Bitmap,
}

impl<'a> Iterator for NextAvailableAllocation<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        for i in self.marker..self.bitmap.len() {
            if let State::Free = self.bitmap.get(i) {
                self.marker = i + 1;
                return Some(i);
            }
        }
        self.marker = self.bitmap.len();
        None
    }
}

impl Image {
    /// Claims the lowest free inode, skipping the reserved inode 0. Returns `None` when
    /// every inode is in use.
    pub(crate) fn alloc_inode(&mut self, kind: FileKind, mode: u16) -> Option<InodeId> {
        let nr = self.inode_map.free_from(1).next()?;
        self.inode_map.set_reserved(nr);
        self.super_block.free_inodes -= 1;

        let id = InodeId::new(nr as u32);
        self.inodes.put(id, Inode::new(kind, mode, crate::now()));
        debug!("allocated inode {}", id);
        Some(id)
    }

    /// Releases an inode and zeroes its record. Releasing an inode that is out of range,
    /// reserved or already free does nothing.
    pub(crate) fn free_inode(&mut self, id: InodeId) {
        let nr = id.index();
        if nr == 0 || nr >= self.inode_map.len() || self.inode_map.get(nr) == State::Free {
            return;
        }
        self.inode_map.set_free(nr);
        self.super_block.free_inodes += 1;
        self.inodes.clear(id);
        debug!("released inode {}", id);
    }

    /// Claims the lowest free block of the data region.
    pub(crate) fn alloc_block(&mut self) -> Option<BlockId> {
        let start = self.super_block.data_start as usize;
        let nr = self.block_map.free_from(start).next()?;
        self.block_map.set_reserved(nr);
        self.super_block.free_blocks -= 1;

        let id = BlockId::new(nr as u32);
        self.blocks.claim(id);
        debug!("allocated block {}", id);
        Some(id)
    }

    /// Releases a data block and zeroes its record. Blocks outside the data region or
    /// already free are left alone.
    pub(crate) fn free_block(&mut self, id: BlockId) {
        let nr = id.index();
        if nr < self.super_block.data_start as usize
            || nr >= self.block_map.len()
            || self.block_map.get(nr) == State::Free
        {
            return;
        }
        self.block_map.set_free(nr);
        self.super_block.free_blocks += 1;
        self.blocks.clear(id);
        debug!("released block {}", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sb::Geometry;

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new(128);

        bmp.set_reserved(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new(4096);

        bmp.set_reserved(0);
        bmp.set_reserved(4095);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(4095), State::Used);
        assert_eq!(bmp.count_free(), 4094);
    }

    #[test]
    fn can_toggle_block_between_free_and_used() {
        let mut bmp = Bitmap::new(64);
        bmp.set_reserved(9);
        bmp.set_reserved(10);
        assert_eq!(bmp.get(10), State::Used);

        bmp.set_free(10);
        assert_eq!(bmp.get(10), State::Free);
        // Neighbouring bits survive the clear.
        assert_eq!(bmp.get(9), State::Used);
    }

    #[test]
    fn can_serialize_and_deserialize_state() {
        let mut bmp = Bitmap::new(100);
        bmp.set_reserved(10);
        bmp.set_reserved(11);
        bmp.set_reserved(99);

        let encoded = bmp.serialize();
        assert_eq!(encoded.len(), Bitmap::encoded_len(100));
        assert_eq!(Bitmap::parse(&encoded, 100).unwrap(), bmp);
    }

    #[test]
    fn parsing_rejects_bits_past_the_end() {
        let mut encoded = Bitmap::new(100).serialize();
        // Bit 100 lives in the second word.
        encoded[8 + 3] = 0x10;
        assert!(matches!(
            Bitmap::parse(&encoded, 100),
            Err(SFSError::InvalidImage(_))
        ));
    }

    #[test]
    fn allocation_scans_from_the_starting_point() {
        let mut bmp = Bitmap::new(16);
        bmp.set_reserved(4);
        bmp.set_reserved(6);

        let free: Vec<usize> = bmp.free_from(3).take(4).collect();
        assert_eq!(free, vec![3, 5, 7, 8]);
        assert_eq!(bmp.free_from(16).next(), None);
    }

    #[test]
    fn inodes_are_handed_out_lowest_first_and_never_zero() {
        let mut image = Image::format(Geometry::default()).unwrap();
        let root = image.super_block.root_inode;
        assert_eq!(root, 1);

        let a = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
        let b = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
        assert_eq!((a.get(), b.get()), (2, 3));

        image.free_inode(a);
        let c = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn releasing_twice_is_the_same_as_releasing_once() {
        let mut image = Image::format(Geometry::default()).unwrap();
        let inode = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
        let block = image.alloc_block().unwrap();

        image.free_inode(inode);
        image.free_block(block);
        let once = image.encode();

        image.free_inode(inode);
        image.free_block(block);
        assert_eq!(image.encode(), once);
    }

    #[test]
    fn releasing_reserved_or_out_of_range_objects_is_ignored() {
        let mut image = Image::format(Geometry::default()).unwrap();
        let before = image.clone();

        image.free_inode(InodeId::new(0));
        image.free_inode(InodeId::new(10_000));
        image.free_block(BlockId::new(3));
        image.free_block(BlockId::new(1_000_000));
        assert_eq!(image, before);
    }

    #[test]
    fn blocks_come_from_the_data_region() {
        let geometry = Geometry::default().with_total_blocks(20).with_data_start(18);
        let mut image = Image::format(geometry).unwrap();

        // The root directory already holds one block for "." and "..".
        assert_eq!(image.alloc_block().map(|b| b.get()), Some(19));
        assert_eq!(image.alloc_block(), None);
        assert_eq!(image.super_block.free_blocks, 0);
    }
}
