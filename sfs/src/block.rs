use std::fmt;

use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::fs::{SFSError, BLOCK_HEADER_SIZE};

/// Handle to a block table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub fn new(nr: u32) -> Self {
        BlockId(nr)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed size unit of file content.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub index: u32,
    pub in_use: bool,
    /// Bytes of `data` that belong to the file.
    pub used: u32,
    pub data: Vec<u8>,
}

impl Block {
    fn zeroed(payload: usize) -> Self {
        Self {
            index: 0,
            in_use: false,
            used: 0,
            data: vec![0; payload],
        }
    }

    /// The file content held by this block.
    pub fn content(&self) -> &[u8] {
        &self.data[..self.used as usize]
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
struct BlockHeader {
    index: U32<BigEndian>,
    in_use: u8,
    _pad: [u8; 3],
    used: U32<BigEndian>,
}

/// Every block of the file system, reserved region included, indexed by `BlockId`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTable {
    blocks: Vec<Block>,
    payload: usize,
}

impl BlockTable {
    pub fn new(count: usize, payload: usize) -> Self {
        Self {
            blocks: vec![Block::zeroed(payload); count],
            payload,
        }
    }

    pub fn payload_size(&self) -> usize {
        self.payload
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    /// Resets a block for a new owner: marked in use, empty, zero filled.
    pub(crate) fn claim(&mut self, id: BlockId) {
        let mut block = Block::zeroed(self.payload);
        block.index = id.get();
        block.in_use = true;
        self.blocks[id.index()] = block;
    }

    pub(crate) fn clear(&mut self, id: BlockId) {
        self.blocks[id.index()] = Block::zeroed(self.payload);
    }

    /// Copies `chunk` to the front of a claimed block and records its length.
    pub(crate) fn fill(&mut self, id: BlockId, chunk: &[u8]) {
        let block = &mut self.blocks[id.index()];
        debug_assert!(block.in_use && chunk.len() <= block.data.len());
        block.data[..chunk.len()].copy_from_slice(chunk);
        block.used = chunk.len() as u32;
    }

    pub fn encoded_len(count: usize, payload: usize) -> usize {
        count * (BLOCK_HEADER_SIZE + payload)
    }

    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        for block in self.blocks.iter() {
            let header = BlockHeader {
                index: U32::new(block.index),
                in_use: block.in_use as u8,
                _pad: [0; 3],
                used: U32::new(block.used),
            };
            buf.extend_from_slice(header.as_bytes());
            buf.extend_from_slice(&block.data);
        }
    }

    pub fn parse(buf: &[u8], count: usize, payload: usize) -> Result<Self, SFSError> {
        if buf.len() != Self::encoded_len(count, payload) {
            return Err(SFSError::InvalidImage(
                "block table has the wrong length".to_string(),
            ));
        }
        let mut blocks = Vec::with_capacity(count);
        for raw in buf.chunks_exact(BLOCK_HEADER_SIZE + payload) {
            let (head, data) = raw.split_at(BLOCK_HEADER_SIZE);
            let header = BlockHeader::read_from(head)
                .ok_or_else(|| SFSError::InvalidImage("truncated block header".to_string()))?;
            let in_use = match header.in_use {
                0 => false,
                1 => true,
                flag => {
                    return Err(SFSError::InvalidImage(format!(
                        "block in-use flag {:#x} is invalid",
                        flag
                    )))
                }
            };
            if header.used.get() as usize > payload {
                return Err(SFSError::InvalidImage(format!(
                    "block {} claims {} used bytes",
                    header.index.get(),
                    header.used.get()
                )));
            }
            blocks.push(Block {
                index: header.index.get(),
                in_use,
                used: header.used.get(),
                data: data.to_vec(),
            });
        }
        Ok(Self { blocks, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_header_is_12_bytes() {
        assert_eq!(std::mem::size_of::<BlockHeader>(), BLOCK_HEADER_SIZE);
    }

    #[test]
    fn claimed_blocks_start_empty() {
        let mut table = BlockTable::new(8, 20);
        let id = BlockId::new(5);
        table.claim(id);
        table.fill(id, b"abc");
        table.claim(id);

        let block = table.get(id).unwrap();
        assert!(block.in_use);
        assert_eq!(block.index, 5);
        assert_eq!(block.content(), b"");
        assert_eq!(block.data, vec![0; 20]);
    }

    #[test]
    fn only_used_bytes_are_content() {
        let mut table = BlockTable::new(4, 16);
        let id = BlockId::new(2);
        table.claim(id);
        table.fill(id, b"hello");

        let mut buf = vec![];
        table.serialize_into(&mut buf);
        let parsed = BlockTable::parse(&buf, 4, 16).unwrap();
        assert_eq!(parsed.get(id).unwrap().content(), b"hello");
        assert_eq!(parsed, table);
    }

    #[test]
    fn used_count_larger_than_payload_is_rejected() {
        let mut buf = vec![0; BlockTable::encoded_len(1, 16)];
        buf[11] = 17;
        assert!(matches!(
            BlockTable::parse(&buf, 1, 16),
            Err(SFSError::InvalidImage(_))
        ));
    }
}
