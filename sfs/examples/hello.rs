use sfs::{MemoryImage, SFS};

pub fn main() {
    // Format a fresh file system held in memory and store a file on it.
    let mut fs = SFS::new(MemoryImage::new());
    fs.format().expect("should format");
    fs.create("hello.txt").unwrap();
    fs.write("hello.txt", b"hello, world").unwrap();

    for entry in fs.list().unwrap() {
        println!("{:<8} {:>4} {:>6} bytes", entry.name, entry.inode, entry.size);
    }
    let content = fs.read("hello.txt").unwrap();
    println!("{}", String::from_utf8_lossy(&content));
}
