use crate::io::ImageStore;
use std::io::{Error, ErrorKind};

/// Holds the image in a buffer owned by the caller's process.
#[derive(Debug, Default, Clone)]
pub struct MemoryImage {
    image: Option<Vec<u8>>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `image`.
    pub fn with_image(image: Vec<u8>) -> Self {
        Self { image: Some(image) }
    }

    /// The last stored image, if any.
    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }
}

impl ImageStore for MemoryImage {
    fn load(&mut self) -> std::io::Result<Vec<u8>> {
        self.image
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "no image has been stored"))
    }

    fn store(&mut self, image: &[u8]) -> std::io::Result<()> {
        self.image = Some(image.to_vec());
        Ok(())
    }
}
