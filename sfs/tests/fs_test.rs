use sfs::{FileImage, FileKind, Geometry, Image, SFSError, SFS};
use tempfile::NamedTempFile;

#[test]
fn can_initialize_disk_with_filesystem() {
    let tf = NamedTempFile::new().unwrap();

    // Prepare the image file with a fresh file system.
    let mut fs = SFS::new(FileImage::new(tf.path()));
    fs.format().unwrap();

    // Open the file system again and verify the initial layout.
    let fs = SFS::open(FileImage::new(tf.path()));
    assert!(fs.is_mounted());
    let image = fs.image().unwrap();
    let on_disk = std::fs::metadata(tf.path()).unwrap().len();
    assert_eq!(Some(on_disk as usize), Image::encoded_len(&Geometry::default()));
    assert_eq!(image.inode(image.root()).unwrap().kind, FileKind::Directory);
}

#[test]
fn unformatted_files_do_not_mount() {
    let tf = NamedTempFile::new().unwrap();
    let mut fs = SFS::new(FileImage::new(tf.path()));

    assert!(matches!(fs.mount(), Err(SFSError::InvalidImage(_))));
    assert!(!fs.is_mounted());
}

#[test]
fn missing_image_file_does_not_mount() {
    let dir = tempfile::tempdir().unwrap();
    let mut fs = SFS::new(FileImage::new(dir.path().join("sfs_disk.bin")));

    assert!(matches!(fs.mount(), Err(SFSError::Io(_))));
    assert!(matches!(fs.create("a"), Err(SFSError::NotMounted)));
}

#[test]
fn files_survive_a_remount() {
    let tf = NamedTempFile::new().unwrap();
    {
        let mut fs = SFS::new(FileImage::new(tf.path()));
        fs.format().unwrap();
        fs.create("a.txt").unwrap();
        fs.write("a.txt", b"hello").unwrap();
        fs.create("b.txt").unwrap();
        fs.write("b.txt", &[b'b'; 2600]).unwrap();
        fs.create("gone").unwrap();
        fs.delete("gone").unwrap();
    }

    let mut fs = SFS::open(FileImage::new(tf.path()));
    assert!(fs.is_mounted());
    assert_eq!(fs.read("a.txt").unwrap(), b"hello");
    assert_eq!(fs.read("b.txt").unwrap(), vec![b'b'; 2600]);
    assert!(matches!(fs.read("gone"), Err(SFSError::DoesNotExist(_))));

    let info = fs.info("b.txt").unwrap();
    assert_eq!(info.size, 2600);
    assert_eq!(info.block_count, 6);
    let names: Vec<String> = fs.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec![".", "..", "a.txt", "b.txt"]);
}

#[test]
fn saving_rewrites_the_same_image() {
    let tf = NamedTempFile::new().unwrap();
    let mut fs = SFS::new(FileImage::new(tf.path()));
    fs.format().unwrap();
    fs.create("a.txt").unwrap();
    let first = std::fs::read(tf.path()).unwrap();

    fs.save().unwrap();
    assert_eq!(std::fs::read(tf.path()).unwrap(), first);
}

#[test]
fn corrupted_image_is_refused() {
    let tf = NamedTempFile::new().unwrap();
    let mut fs = SFS::new(FileImage::new(tf.path()));
    fs.format().unwrap();

    let mut raw = std::fs::read(tf.path()).unwrap();
    raw[0..4].copy_from_slice(&0xDEAD_BEEF_u32.to_be_bytes());
    std::fs::write(tf.path(), &raw).unwrap();

    let fs = SFS::open(FileImage::new(tf.path()));
    assert!(!fs.is_mounted());
}

#[test]
fn save_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut fs = SFS::new(FileImage::new(dir.path().join("missing").join("fs.img")));

    assert!(matches!(fs.format(), Err(SFSError::Io(_))));
}
