/// Stable storage for a file system image.
///
/// An image is always moved as a whole: `store` replaces whatever was stored before in
/// full and `load` returns everything that was last stored. Nothing is written to a
/// temporary location first, so a failure half way through `store` can leave a torn
/// image behind; `Image::decode` rejects such images rather than mounting them.
pub trait ImageStore {
    /// Reads back the last stored image.
    ///
    /// # Errors
    ///
    /// Returns an error of kind `NotFound` if no image was ever stored, or any error the
    /// underlying medium raises.
    fn load(&mut self) -> std::io::Result<Vec<u8>>;
    /// Replaces the stored image with `image`.
    ///
    /// # Errors
    ///
    /// Any error the underlying medium raises. The stored image may be partially
    /// overwritten when this fails.
    fn store(&mut self, image: &[u8]) -> std::io::Result<()>;
}
