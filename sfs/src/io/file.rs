use crate::io::ImageStore;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::path::{Path, PathBuf};

/// Keeps the image in a single file on the host file system. Each store truncates the
/// file and writes the new image from the start.
#[derive(Debug)]
pub struct FileImage {
    path: PathBuf,
}

impl FileImage {
    /// Uses the file at `path`. Nothing is opened or created until the first load or
    /// store.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileImage {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageStore for FileImage {
    fn load(&mut self) -> std::io::Result<Vec<u8>> {
        let mut fd = File::open(&self.path)?;
        let mut image = Vec::new();
        fd.read_to_end(&mut image)?;
        Ok(image)
    }

    fn store(&mut self, image: &[u8]) -> std::io::Result<()> {
        let mut fd = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        fd.write_all(image)?;
        // Make sure the image actually reached the disk before reporting success, it
        // may be re-read by another process.
        fd.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn stored_image_is_read_back_whole() {
        let tf = tempfile::NamedTempFile::new().unwrap();
        let mut store = FileImage::new(tf.path());

        store.store(&[0x55; 9000]).unwrap();
        assert_eq!(store.load().unwrap(), vec![0x55; 9000]);
    }

    #[test]
    fn storing_a_shorter_image_truncates_the_file() {
        let tf = tempfile::NamedTempFile::new().unwrap();
        let mut store = FileImage::new(tf.path());

        store.store(&[1; 4096]).unwrap();
        store.store(&[2; 10]).unwrap();
        assert_eq!(std::fs::metadata(tf.path()).unwrap().len(), 10);
        assert_eq!(store.load().unwrap(), vec![2; 10]);
    }

    #[test]
    fn loading_a_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileImage::new(dir.path().join("absent.img"));

        let err = store.load().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn storing_into_a_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileImage::new(dir.path().join("no").join("such").join("fs.img"));
        assert!(store.store(&[0; 16]).is_err());
    }
}
