use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use fs_err as fs;

use crate::StateError;

/// The storage backing a [`crate::State`].
pub trait StateStore {
    /// Returns the persisted bytes, or `None` if nothing is persisted yet.
    fn load(&self) -> Result<Option<Vec<u8>>, StateError>;

    /// Replaces the persisted bytes.
    fn store(&self, data: &[u8]) -> Result<(), StateError>;
}

/// Persists state in a single file.
///
/// Writes go to a temporary file next to the target which is then renamed
/// over it, so readers never observe a partially written file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Constructs a store for the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StateError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, data: &[u8]) -> Result<(), StateError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut file = tempfile::NamedTempFile::new_in(parent)?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!("wrote {} bytes to {}", data.len(), self.path.display());
        Ok(())
    }
}
