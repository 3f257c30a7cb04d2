use std::path::{Path, PathBuf};

/// Write a local input file for `put` and return its path.
pub fn write_local_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write local file");
    path
}

/// Raw bytes of an image file.
pub fn image_bytes(path: &Path) -> Vec<u8> {
    std::fs::read(path).expect("read image")
}
