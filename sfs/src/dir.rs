//! Directory content is ordinary file data: a packed sequence of fixed size entry
//! records, in insertion order.

use log::debug;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::fs::SFSError;
use crate::image::Image;
use crate::node::{FileKind, InodeId};

/// Width of the name field, terminating NUL included.
pub const NAME_FIELD_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;
pub const DIR_ENTRY_SIZE: usize = 72;

pub const DOT: &str = ".";
pub const DOTDOT: &str = "..";

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
struct DirEntryRecord {
    inode: U32<BigEndian>,
    name_len: U16<BigEndian>,
    kind: u8,
    name: [u8; NAME_FIELD_LEN],
    _reserved: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub inode: InodeId,
    pub kind: FileKind,
    pub name: String,
}

impl DirEntry {
    /// An entry for `name`, which must fit the on-disk name field.
    pub fn new(name: &str, inode: InodeId, kind: FileKind) -> Result<Self, SFSError> {
        validate_name(name)?;
        Ok(Self {
            inode,
            kind,
            name: name.to_string(),
        })
    }

    pub(crate) fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut record = DirEntryRecord::new_zeroed();
        record.inode = U32::new(self.inode.get());
        record.name_len = U16::new(self.name.len() as u16);
        record.kind = self.kind.tag();
        record.name[..self.name.len()].copy_from_slice(self.name.as_bytes());

        let mut out = [0; DIR_ENTRY_SIZE];
        out.copy_from_slice(record.as_bytes());
        out
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, SFSError> {
        let record = DirEntryRecord::read_from(buf).ok_or_else(|| {
            SFSError::InvalidImage(format!(
                "directory entry must be {} bytes, got {}",
                DIR_ENTRY_SIZE,
                buf.len()
            ))
        })?;
        let kind = FileKind::from_tag(record.kind).ok_or_else(|| {
            SFSError::InvalidImage(format!("unknown entry type tag {:#x}", record.kind))
        })?;
        // Names compare up to the first NUL, like the C strings they started out as.
        let end = record
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_FIELD_LEN);
        let name = String::from_utf8(record.name[..end].to_vec()).map_err(|_| {
            SFSError::InvalidImage("directory entry name is not valid UTF-8".to_string())
        })?;

        Ok(Self {
            inode: InodeId::new(record.inode.get()),
            kind,
            name,
        })
    }
}

/// Checks `name` can be stored in a directory entry.
pub fn validate_name(name: &str) -> Result<(), SFSError> {
    if name.is_empty() {
        return Err(SFSError::InvalidArgument("name must not be empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(SFSError::InvalidArgument(format!(
            "name \"{}\" is longer than {} bytes",
            name, MAX_NAME_LEN
        )));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(SFSError::InvalidArgument(format!(
            "name \"{}\" contains '/' or NUL",
            name.escape_default()
        )));
    }
    Ok(())
}

pub fn decode_entries(buf: &[u8]) -> Result<Vec<DirEntry>, SFSError> {
    if buf.len() % DIR_ENTRY_SIZE != 0 {
        return Err(SFSError::InvalidImage(format!(
            "directory content of {} bytes is not a whole number of entries",
            buf.len()
        )));
    }
    buf.chunks_exact(DIR_ENTRY_SIZE).map(DirEntry::decode).collect()
}

pub fn encode_entries(entries: &[DirEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * DIR_ENTRY_SIZE);
    for entry in entries {
        buf.extend_from_slice(&entry.encode());
    }
    buf
}

impl Image {
    /// Every entry of the directory at `dir` in on-disk order.
    pub(crate) fn dir_entries(&mut self, dir: InodeId) -> Result<Vec<DirEntry>, SFSError> {
        if !self.inode(dir)?.is_dir() {
            return Err(SFSError::TypeMismatch {
                name: format!("inode {}", dir),
                expected: FileKind::Directory,
            });
        }
        let content = self.read_all(dir)?;
        decode_entries(&content)
    }

    pub(crate) fn dir_lookup(
        &mut self,
        dir: InodeId,
        name: &str,
    ) -> Result<Option<InodeId>, SFSError> {
        Ok(self
            .dir_entries(dir)?
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.inode))
    }

    /// Appends an entry for `child` to the directory at `dir`. The directory is checked
    /// for room before it is rewritten, so a failed insert leaves it untouched.
    pub(crate) fn dir_insert(
        &mut self,
        dir: InodeId,
        name: &str,
        child: InodeId,
        kind: FileKind,
    ) -> Result<(), SFSError> {
        let entry = DirEntry::new(name, child, kind)?;
        let mut entries = self.dir_entries(dir)?;
        if entries.iter().any(|entry| entry.name == name) {
            return Err(SFSError::DuplicateName(name.to_string()));
        }

        entries.push(entry);
        let content = encode_entries(&entries);
        self.check_fits(dir, content.len())?;
        self.write_data(dir, &content)?;
        debug!("linked \"{}\" -> inode {} in directory {}", name, child, dir);
        Ok(())
    }

    /// Removes the entry called `name`, closing the gap it leaves.
    pub(crate) fn dir_remove(&mut self, dir: InodeId, name: &str) -> Result<(), SFSError> {
        let mut entries = self.dir_entries(dir)?;
        let pos = entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| SFSError::DoesNotExist(name.to_string()))?;

        entries.remove(pos);
        let content = encode_entries(&entries);
        self.write_data(dir, &content)?;
        debug!("unlinked \"{}\" from directory {}", name, dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sb::Geometry;

    fn root_of(image: &Image) -> InodeId {
        InodeId::new(image.super_block.root_inode)
    }

    #[test]
    fn entry_record_is_72_bytes() {
        assert_eq!(std::mem::size_of::<DirEntryRecord>(), DIR_ENTRY_SIZE);
    }

    #[test]
    fn encoded_entry_carries_length_and_nul_padded_name() {
        let entry = DirEntry::new("a.txt", InodeId::new(9), FileKind::Regular).unwrap();
        let raw = entry.encode();

        assert_eq!(&raw[0..4], &[0, 0, 0, 9]);
        assert_eq!(&raw[4..6], &[0, 5]);
        assert_eq!(raw[6], FileKind::Regular.tag());
        assert_eq!(&raw[7..12], b"a.txt");
        assert!(raw[12..].iter().all(|&b| b == 0));
        assert_eq!(DirEntry::decode(&raw).unwrap(), entry);
    }

    #[test]
    fn longest_name_still_leaves_room_for_the_terminator() {
        let name = "n".repeat(MAX_NAME_LEN);
        assert!(validate_name(&name).is_ok());
        let entry = DirEntry::new(&name, InodeId::new(3), FileKind::Directory).unwrap();
        assert_eq!(DirEntry::decode(&entry.encode()).unwrap().name, name);
        assert!(matches!(
            DirEntry::new(&"n".repeat(70), InodeId::new(3), FileKind::Regular),
            Err(SFSError::InvalidArgument(_))
        ));

        assert!(validate_name(&"n".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn ragged_directory_content_is_rejected() {
        assert!(decode_entries(&[0; DIR_ENTRY_SIZE + 1]).is_err());
        assert!(decode_entries(&[]).unwrap().is_empty());
    }

    #[test]
    fn lookup_finds_inserted_entries_and_is_case_sensitive() {
        let mut image = Image::format(Geometry::default()).unwrap();
        let root = root_of(&image);
        let file = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
        image
            .dir_insert(root, "a.txt", file, FileKind::Regular)
            .unwrap();

        assert_eq!(image.dir_lookup(root, "a.txt").unwrap(), Some(file));
        assert_eq!(image.dir_lookup(root, "A.TXT").unwrap(), None);
        assert_eq!(image.dir_lookup(root, "a.tx").unwrap(), None);
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut image = Image::format(Geometry::default()).unwrap();
        let root = root_of(&image);
        let file = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
        image.dir_insert(root, "x", file, FileKind::Regular).unwrap();

        assert!(matches!(
            image.dir_insert(root, "x", file, FileKind::Regular),
            Err(SFSError::DuplicateName(_))
        ));
    }

    #[test]
    fn removal_shifts_later_entries_forward() {
        let mut image = Image::format(Geometry::default()).unwrap();
        let root = root_of(&image);
        for name in ["a", "b", "c"].iter() {
            let id = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
            image.dir_insert(root, name, id, FileKind::Regular).unwrap();
        }

        image.dir_remove(root, "b").unwrap();
        let names: Vec<String> = image
            .dir_entries(root)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".", "..", "a", "c"]);
        assert_eq!(image.inode(root).unwrap().size as usize, 4 * DIR_ENTRY_SIZE);

        assert!(matches!(
            image.dir_remove(root, "b"),
            Err(SFSError::DoesNotExist(_))
        ));
    }

    #[test]
    fn directory_length_stays_a_multiple_of_the_record_size() {
        let mut image = Image::format(Geometry::default()).unwrap();
        let root = root_of(&image);
        for i in 0..12 {
            let id = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
            image
                .dir_insert(root, &format!("f{}", i), id, FileKind::Regular)
                .unwrap();
            if i % 3 == 0 {
                image.dir_remove(root, &format!("f{}", i)).unwrap();
            }
            assert_eq!(image.inode(root).unwrap().size as usize % DIR_ENTRY_SIZE, 0);
        }
    }

    #[test]
    fn full_directory_is_left_intact() {
        let mut image = Image::format(Geometry::default()).unwrap();
        let root = root_of(&image);
        let capacity = image.geometry().max_file_size() / DIR_ENTRY_SIZE;
        let file = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
        for i in 2..capacity {
            image
                .dir_insert(root, &format!("f{}", i), file, FileKind::Regular)
                .unwrap();
        }
        let before = image.dir_entries(root).unwrap();

        assert!(matches!(
            image.dir_insert(root, "overflow", file, FileKind::Regular),
            Err(SFSError::SizeExceeded { .. })
        ));
        assert_eq!(image.dir_entries(root).unwrap(), before);
    }

    #[test]
    fn regular_files_are_not_directories() {
        let mut image = Image::format(Geometry::default()).unwrap();
        let file = image.alloc_inode(FileKind::Regular, 0o644).unwrap();
        assert!(matches!(
            image.dir_lookup(file, "x"),
            Err(SFSError::TypeMismatch { .. })
        ));
    }
}
