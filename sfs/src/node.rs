use std::fmt;

use zerocopy::byteorder::{BigEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::block::BlockId;
use crate::fs::{SFSError, DIRECT_POINTERS};

pub const INODE_RECORD_SIZE: usize = 76;

const KIND_FREE: u16 = 0;
const KIND_REGULAR: u16 = 0x01;
const KIND_DIRECTORY: u16 = 0x02;

/// Handle to an inode table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeId(u32);

impl InodeId {
    pub fn new(nr: u32) -> Self {
        InodeId(nr)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
}

impl FileKind {
    /// The tag used for this kind in inode records and directory entries.
    pub fn tag(self) -> u8 {
        match self {
            FileKind::Regular => KIND_REGULAR as u8,
            FileKind::Directory => KIND_DIRECTORY as u8,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag as u16 {
            KIND_REGULAR => Some(FileKind::Regular),
            KIND_DIRECTORY => Some(FileKind::Directory),
            _ => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Regular => write!(f, "regular file"),
            FileKind::Directory => write!(f, "directory"),
        }
    }
}

/// Metadata of a live file or directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Inode {
    pub kind: FileKind,
    /// Permission bits. Stored, never enforced.
    pub mode: u16,
    /// The total size of the file in bytes.
    pub size: u32,
    /// The number of occupied direct pointers.
    pub block_count: u32,
    /// Creation time in seconds since the UNIX epoch.
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
    /// Data blocks in file order. Occupied slots always form a prefix.
    pub direct: [Option<BlockId>; DIRECT_POINTERS],
}

impl Inode {
    pub fn new(kind: FileKind, mode: u16, now: u64) -> Self {
        Self {
            kind,
            mode,
            size: 0,
            block_count: 0,
            created: now,
            modified: now,
            accessed: now,
            direct: [None; DIRECT_POINTERS],
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// The occupied direct pointers in file order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.direct.iter().map_while(|slot| *slot)
    }
}

/// On-disk form of an inode. A free slot is all zeroes.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
struct InodeRecord {
    kind: U16<BigEndian>,
    mode: U16<BigEndian>,
    size: U32<BigEndian>,
    block_count: U32<BigEndian>,
    create_time: U64<BigEndian>,
    update_time: U64<BigEndian>,
    access_time: U64<BigEndian>,
    /// Block numbers of the data blocks, 0 for an unused pointer.
    blocks: [U32<BigEndian>; DIRECT_POINTERS],
}

impl InodeRecord {
    fn from_inode(node: &Inode) -> Self {
        let mut blocks = [U32::new(0); DIRECT_POINTERS];
        for (slot, block) in blocks.iter_mut().zip(node.direct.iter()) {
            *slot = U32::new(block.map_or(0, BlockId::get));
        }
        Self {
            kind: U16::new(node.kind.tag() as u16),
            mode: U16::new(node.mode),
            size: U32::new(node.size),
            block_count: U32::new(node.block_count),
            create_time: U64::new(node.created),
            update_time: U64::new(node.modified),
            access_time: U64::new(node.accessed),
            blocks,
        }
    }

    fn into_inode(self) -> Result<Option<Inode>, SFSError> {
        let kind = match self.kind.get() {
            KIND_FREE => {
                if self.as_bytes().iter().any(|&b| b != 0) {
                    return Err(SFSError::InvalidImage(
                        "free inode record holds stale data".to_string(),
                    ));
                }
                return Ok(None);
            }
            KIND_REGULAR => FileKind::Regular,
            KIND_DIRECTORY => FileKind::Directory,
            tag => {
                return Err(SFSError::InvalidImage(format!(
                    "unknown inode type tag {:#x}",
                    tag
                )))
            }
        };

        let mut direct = [None; DIRECT_POINTERS];
        for (slot, block) in direct.iter_mut().zip(self.blocks.iter()) {
            *slot = match block.get() {
                0 => None,
                nr => Some(BlockId::new(nr)),
            };
        }
        Ok(Some(Inode {
            kind,
            mode: self.mode.get(),
            size: self.size.get(),
            block_count: self.block_count.get(),
            created: self.create_time.get(),
            modified: self.update_time.get(),
            accessed: self.access_time.get(),
            direct,
        }))
    }
}

/// Fixed capacity arena of inodes indexed by `InodeId`. `None` marks a free slot; the
/// image keeps this in step with the inode bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct InodeTable {
    nodes: Vec<Option<Inode>>,
}

impl InodeTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: vec![None; capacity],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: InodeId) -> Option<&Inode> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: InodeId) -> Option<&mut Inode> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub(crate) fn put(&mut self, id: InodeId, node: Inode) {
        self.nodes[id.index()] = Some(node);
    }

    pub(crate) fn clear(&mut self, id: InodeId) {
        self.nodes[id.index()] = None;
    }

    pub fn encoded_len(capacity: usize) -> usize {
        capacity * INODE_RECORD_SIZE
    }

    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        for node in self.nodes.iter() {
            match node {
                Some(node) => buf.extend_from_slice(InodeRecord::from_inode(node).as_bytes()),
                None => buf.extend_from_slice(InodeRecord::new_zeroed().as_bytes()),
            }
        }
    }

    pub fn parse(buf: &[u8], capacity: usize) -> Result<Self, SFSError> {
        if buf.len() != Self::encoded_len(capacity) {
            return Err(SFSError::InvalidImage(
                "inode table has the wrong length".to_string(),
            ));
        }
        let nodes = buf
            .chunks_exact(INODE_RECORD_SIZE)
            .map(|raw| match InodeRecord::read_from(raw) {
                Some(record) => record.into_inode(),
                None => Err(SFSError::InvalidImage("truncated inode record".to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { nodes })
    }
}
