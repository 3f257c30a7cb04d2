//! The directory holding database images.
//!
//! An image named `movies` is stored as `movies.db0`. The trailing number is
//! the segment; only segment 0 is ever written, but `kill` removes every
//! segment file of an image.

use std::path::{Path, PathBuf};

use crate::storage::database::{Database, DatabaseError};
use crate::storage::file::FileError;

/// Suffix between an image's name and its segment number.
pub const IMAGE_SUFFIX: &str = ".db";

/// A directory of database images.
#[derive(Debug, Clone)]
pub struct ImageDirectory {
    root: PathBuf,
    min_degree: usize,
}

impl ImageDirectory {
    /// Create a handle for images under `root`, indexed with `min_degree`.
    #[must_use]
    pub fn new(root: &Path, min_degree: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            min_degree,
        }
    }

    /// Path of segment 0 of the image `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, DatabaseError> {
        validate_name(name)?;
        Ok(self.root.join(format!("{name}{IMAGE_SUFFIX}0")))
    }

    /// Open the image `name`, creating it if it does not exist.
    pub fn open(&self, name: &str) -> Result<Database, DatabaseError> {
        let path = self.path_for(name)?;
        std::fs::create_dir_all(&self.root).map_err(FileError::Io)?;
        Database::open_or_create(&path, name, self.min_degree)
    }

    /// File names of every image segment in the directory, sorted.
    ///
    /// A missing directory holds no images.
    pub fn list_images(&self) -> Result<Vec<String>, DatabaseError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FileError::Io(e).into()),
        };

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(FileError::Io)?;
            if !entry.file_type().map_err(FileError::Io)?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            match file_name.to_str() {
                Some(name) if parse_segment_file_name(name).is_some() => {
                    images.push(name.to_owned());
                }
                _ => {}
            }
        }
        images.sort();
        Ok(images)
    }

    /// Delete every segment file of the image `name`.
    ///
    /// Returns how many files were removed.
    pub fn kill(&self, name: &str) -> Result<usize, DatabaseError> {
        validate_name(name)?;

        let mut removed = 0;
        for file_name in self.list_images()? {
            if parse_segment_file_name(&file_name).is_some_and(|(image, _)| image == name) {
                std::fs::remove_file(self.root.join(&file_name)).map_err(FileError::Io)?;
                removed += 1;
            }
        }

        tracing::info!("Killed image '{}' ({} segment files)", name, removed);
        Ok(removed)
    }
}

/// Split `<name>.db<segment>` into its image name and segment number.
#[must_use]
pub fn parse_segment_file_name(file_name: &str) -> Option<(&str, u32)> {
    let (name, segment) = file_name.rsplit_once(IMAGE_SUFFIX)?;
    if name.is_empty() || segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((name, segment.parse().ok()?))
}

/// Image names become file names, so they must be a single path component.
fn validate_name(name: &str) -> Result<(), DatabaseError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(DatabaseError::InvalidName(name.to_owned()));
    }
    Ok(())
}
