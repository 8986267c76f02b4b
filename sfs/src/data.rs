//! Translation between a file's bytes and the direct block pointers of its inode.
//!
//! Writes always replace the whole file. The blocks currently held by the inode are
//! released before the new content is sized and allocated, so a write that fails
//! because the content is too large or the data region is full leaves the file empty.

use log::warn;

use crate::block::BlockId;
use crate::fs::{Resource, SFSError, DIRECT_POINTERS};
use crate::image::Image;
use crate::node::InodeId;

impl Image {
    /// Reads up to `max` bytes of the file at `id` and refreshes its access time.
    pub(crate) fn read_data(&mut self, id: InodeId, max: usize) -> Result<Vec<u8>, SFSError> {
        let node = self.inode(id)?;
        let wanted = max.min(node.size as usize);
        let pointers = node.direct;

        let mut content = Vec::with_capacity(wanted);
        for block in pointers.iter().map_while(|slot| *slot) {
            if content.len() >= wanted {
                break;
            }
            let bytes = match self.blocks.get(block) {
                Some(b) => b.content(),
                None => {
                    return Err(SFSError::InvalidImage(format!(
                        "inode {} points past the block table at {}",
                        id, block
                    )))
                }
            };
            let take = bytes.len().min(wanted - content.len());
            content.extend_from_slice(&bytes[..take]);
        }

        self.inode_mut(id)?.accessed = crate::now();
        Ok(content)
    }

    /// Reads the whole file at `id`.
    pub(crate) fn read_all(&mut self, id: InodeId) -> Result<Vec<u8>, SFSError> {
        let max = self.geometry().max_file_size();
        self.read_data(id, max)
    }

    /// Replaces the content of the file at `id` with `bytes`, returning the number of
    /// bytes written.
    pub(crate) fn write_data(&mut self, id: InodeId, bytes: &[u8]) -> Result<usize, SFSError> {
        // Validate the handle before anything is released.
        self.inode(id)?;
        self.release_data(id)?;

        let payload = self.blocks.payload_size();
        let needed = (bytes.len() + payload - 1) / payload;
        if needed > DIRECT_POINTERS {
            warn!(
                "write of {} bytes to inode {} exceeds direct addressing, file left empty",
                bytes.len(),
                id
            );
            self.inode_mut(id)?.modified = crate::now();
            return Err(SFSError::SizeExceeded {
                requested: bytes.len(),
                max: DIRECT_POINTERS * payload,
            });
        }

        let mut direct: [Option<BlockId>; DIRECT_POINTERS] = [None; DIRECT_POINTERS];
        for (slot, chunk) in bytes.chunks(payload).enumerate() {
            let block = match self.alloc_block() {
                Some(block) => block,
                None => {
                    // Hand back what this write managed to claim so the inode stays
                    // consistent with the bitmap: empty, zero blocks.
                    for claimed in direct.iter().map_while(|slot| *slot) {
                        self.free_block(claimed);
                    }
                    warn!(
                        "data region exhausted writing inode {}, file left empty",
                        id
                    );
                    self.inode_mut(id)?.modified = crate::now();
                    return Err(SFSError::AllocationExhausted(Resource::Blocks));
                }
            };
            self.blocks.fill(block, chunk);
            direct[slot] = Some(block);
        }

        let node = self.inode_mut(id)?;
        node.direct = direct;
        node.size = bytes.len() as u32;
        node.block_count = needed as u32;
        node.modified = crate::now();
        Ok(bytes.len())
    }

    /// Releases every block held by the file at `id` and empties it.
    pub(crate) fn release_data(&mut self, id: InodeId) -> Result<(), SFSError> {
        let pointers = self.inode(id)?.direct;
        for block in pointers.iter().filter_map(|slot| *slot) {
            self.free_block(block);
        }

        let node = self.inode_mut(id)?;
        node.direct = [None; DIRECT_POINTERS];
        node.size = 0;
        node.block_count = 0;
        Ok(())
    }

    /// Fails unless content of `len` bytes could replace the current content of the file
    /// at `id`. Used where losing the old content on a failed write is not acceptable.
    pub(crate) fn check_fits(&self, id: InodeId, len: usize) -> Result<(), SFSError> {
        let payload = self.blocks.payload_size();
        let needed = (len + payload - 1) / payload;
        if needed > DIRECT_POINTERS {
            return Err(SFSError::SizeExceeded {
                requested: len,
                max: DIRECT_POINTERS * payload,
            });
        }
        let held = self.inode(id)?.block_count as usize;
        if needed > held + self.super_block.free_blocks as usize {
            return Err(SFSError::AllocationExhausted(Resource::Blocks));
        }
        Ok(())
    }
}
