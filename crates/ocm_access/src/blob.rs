//! Read-only handles to blob content.

use std::{
    io::Read,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use fs_err as fs;
use ocm_digest::{Algorithm, Digest};

use crate::{AccessError, AccessMethod};

/// The media type used when nothing more specific is known.
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// A read-only, lazily materialized handle to the content of a blob.
///
/// The storage behind a blob access is owned by whoever created it (an
/// archive, a temporary directory, a remote registry); a blob access only
/// borrows it for as long as it lives.
pub trait BlobAccess {
    /// The media type of the content.
    fn mime_type(&self) -> &str;

    /// The size of the content in bytes.
    fn size(&self) -> Result<u64, AccessError>;

    /// The digest of the content.
    fn digest(&self) -> Result<Digest, AccessError>;

    /// Reads the complete content into memory.
    fn get(&self) -> Result<Vec<u8>, AccessError>;

    /// Opens a stream over the content.
    fn reader(&self) -> Result<Box<dyn Read + '_>, AccessError>;
}

/// A blob whose content is held in memory.
#[derive(Debug, Clone)]
pub struct DataBlobAccess {
    mime_type: String,
    data: Vec<u8>,
    digest: Digest,
}

impl DataBlobAccess {
    /// Constructs a blob from bytes, computing the digest right away.
    pub fn new(mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            mime_type: mime_type.into(),
            digest: Digest::from_bytes(&data),
            data,
        }
    }
}

impl BlobAccess for DataBlobAccess {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn size(&self) -> Result<u64, AccessError> {
        Ok(self.data.len() as u64)
    }

    fn digest(&self) -> Result<Digest, AccessError> {
        Ok(self.digest.clone())
    }

    fn get(&self) -> Result<Vec<u8>, AccessError> {
        Ok(self.data.clone())
    }

    fn reader(&self) -> Result<Box<dyn Read + '_>, AccessError> {
        Ok(Box::new(self.data.as_slice()))
    }
}

/// A blob backed by a file on disk.
///
/// If the digest is not known upfront it is computed on first request and
/// cached.
#[derive(Debug)]
pub struct FileBlobAccess {
    mime_type: String,
    path: PathBuf,
    digest: OnceLock<Digest>,
}

impl FileBlobAccess {
    /// Constructs a blob for the file at `path`.
    pub fn new(mime_type: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            mime_type: mime_type.into(),
            path: path.into(),
            digest: OnceLock::new(),
        }
    }

    /// Constructs a blob for a file whose digest is already known, e.g.
    /// because the file is named after it.
    pub fn with_digest(mime_type: impl Into<String>, path: impl Into<PathBuf>, digest: Digest) -> Self {
        Self {
            mime_type: mime_type.into(),
            path: path.into(),
            digest: OnceLock::from(digest),
        }
    }

    /// The path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobAccess for FileBlobAccess {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn size(&self) -> Result<u64, AccessError> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn digest(&self) -> Result<Digest, AccessError> {
        if let Some(digest) = self.digest.get() {
            return Ok(digest.clone());
        }
        let mut file = fs::File::open(&self.path)?;
        let (digest, _) = Digest::from_reader(Algorithm::Sha256, &mut file)?;
        Ok(self.digest.get_or_init(|| digest).clone())
    }

    fn get(&self) -> Result<Vec<u8>, AccessError> {
        Ok(fs::read(&self.path)?)
    }

    fn reader(&self) -> Result<Box<dyn Read + '_>, AccessError> {
        Ok(Box::new(fs::File::open(&self.path)?))
    }
}

/// A blob that reads its content through an [`AccessMethod`].
///
/// Size and digest are unknown until the content has been read once; the
/// first call to [`BlobAccess::size`], [`BlobAccess::digest`] or
/// [`BlobAccess::get`] materializes them.
pub struct AccessMethodBlobAccess {
    method: Box<dyn AccessMethod>,
    info: OnceLock<(Digest, u64)>,
}

impl AccessMethodBlobAccess {
    /// Wraps an access method.
    pub fn new(method: Box<dyn AccessMethod>) -> Self {
        Self {
            method,
            info: OnceLock::new(),
        }
    }

    /// Wraps an access method whose digest and size are already known.
    pub fn with_info(method: Box<dyn AccessMethod>, digest: Digest, size: u64) -> Self {
        Self {
            method,
            info: OnceLock::from((digest, size)),
        }
    }

    fn info(&self) -> Result<&(Digest, u64), AccessError> {
        if let Some(info) = self.info.get() {
            return Ok(info);
        }
        let mut reader = self.method.reader()?;
        let info = Digest::from_reader(Algorithm::Sha256, &mut reader)?;
        Ok(self.info.get_or_init(|| info))
    }
}

impl BlobAccess for AccessMethodBlobAccess {
    fn mime_type(&self) -> &str {
        self.method.mime_type()
    }

    fn size(&self) -> Result<u64, AccessError> {
        Ok(self.info()?.1)
    }

    fn digest(&self) -> Result<Digest, AccessError> {
        Ok(self.info()?.0.clone())
    }

    fn get(&self) -> Result<Vec<u8>, AccessError> {
        let data = self.method.get()?;
        self.info
            .get_or_init(|| (Digest::from_bytes(&data), data.len() as u64));
        Ok(data)
    }

    fn reader(&self) -> Result<Box<dyn Read + '_>, AccessError> {
        self.method.reader()
    }
}
