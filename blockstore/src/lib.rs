// Command flow:
// 1. A line comes in on stdin
// 2. The shell parses it into a command
// 3. Image commands (open, dir, kill) go to the image directory
// 4. File commands (put, get, find, rm) go to the open image
//     - The image is loaded whole into memory on open
//     - Every mutation rewrites the image file
//
// System components:
//  - Block allocator (bitmap)
//  - B-tree index per stored file
//  - Image codec (metadata, file table, index blocks)

pub mod config;
pub mod shell;
pub mod storage;

#[cfg(test)]
mod testing;
