mod file;
mod memory;
mod store;

pub use file::FileImage;
pub use memory::MemoryImage;
pub use store::ImageStore;
