//! Storage shared by everything that is laid out as "one descriptor file next
//! to a `blobs/` directory", in either [`Format`].

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use flate2::{read::GzDecoder, write::GzEncoder};
use fs_err as fs;
use ocm_access::{BlobAccess, FileBlobAccess};
use ocm_digest::{Digest, HashingWriter};
use ocm_state::{FileStateStore, State, StateHandler};
use tempfile::{NamedTempFile, TempDir};
use walkdir::WalkDir;

use crate::{AccessMode, ArtifactSetError, ArtifactSetOptions, Format};

/// The directory that holds the blobs of a container.
pub const BLOBS_DIRECTORY_NAME: &str = "blobs";

/// Where the files of an open container live.
enum Root {
    /// The container is a directory and is modified in place.
    Directory(PathBuf),
    /// The container is an archive, extracted into a temporary directory for
    /// as long as it is open.
    Extracted(TempDir),
}

impl Root {
    fn path(&self) -> &Path {
        match self {
            Root::Directory(path) => path,
            Root::Extracted(dir) => dir.path(),
        }
    }
}

/// A descriptor file plus a directory of digest-named blobs.
///
/// The descriptor is held in a [`State`] so that [`Container::close`] only
/// rewrites it when it changed. A tgz container is repacked on close only if
/// its descriptor or its blobs changed.
///
/// Dropping a container without closing it discards all modifications of the
/// descriptor. Blobs written to a directory container stay in place.
pub struct Container<H: StateHandler> {
    path: PathBuf,
    format: Format,
    mode: AccessMode,
    options: ArtifactSetOptions,
    root: Root,
    descriptor_file: &'static str,
    state: State<H>,
    needs_repack: bool,
    closed: bool,
}

impl<H: StateHandler> Container<H> {
    /// Creates a new, empty container at `path`. Fails if anything exists at
    /// that path.
    pub fn create(
        path: impl Into<PathBuf>,
        descriptor_file: &'static str,
        handler: H,
        options: ArtifactSetOptions,
    ) -> Result<Self, ArtifactSetError> {
        let path = path.into();
        if fs::symlink_metadata(&path).is_ok() {
            return Err(ArtifactSetError::AlreadyExists(path));
        }

        let root = match options.format {
            Format::Directory => {
                fs::create_dir_all(&path)?;
                set_permissions(&path, options.file_mode)?;
                Root::Directory(path.clone())
            }
            Format::Tgz => Root::Extracted(tempfile::tempdir()?),
        };
        fs::create_dir_all(root.path().join(BLOBS_DIRECTORY_NAME))?;

        tracing::debug!("created {} container at {}", options.format, path.display());
        Ok(Self {
            format: options.format,
            path,
            mode: AccessMode::Writable,
            options,
            root,
            descriptor_file,
            state: State::open(handler, None)?,
            needs_repack: true,
            closed: false,
        })
    }

    /// Opens an existing container, detecting its format. With
    /// [`AccessMode::Create`] a missing container is created using `options`.
    pub fn open(
        mode: AccessMode,
        path: impl Into<PathBuf>,
        descriptor_file: &'static str,
        handler: H,
        options: ArtifactSetOptions,
    ) -> Result<Self, ArtifactSetError> {
        let path = path.into();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound && mode == AccessMode::Create => {
                return Self::create(path, descriptor_file, handler, options);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ArtifactSetError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let (format, root) = if metadata.is_dir() {
            (Format::Directory, Root::Directory(path.clone()))
        } else {
            let dir = tempfile::tempdir()?;
            tracing::debug!("extracting {} to {}", path.display(), dir.path().display());
            tar::Archive::new(GzDecoder::new(fs::File::open(&path)?)).unpack(dir.path())?;
            (Format::Tgz, Root::Extracted(dir))
        };

        let descriptor_path = root.path().join(descriptor_file);
        let data = match fs::read(&descriptor_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ArtifactSetError::MissingDescriptor(path));
            }
            Err(e) => return Err(e.into()),
        };
        let state = State::open(handler, Some(&data))?;

        Ok(Self {
            path,
            format,
            mode: if mode.is_read_only() {
                AccessMode::ReadOnly
            } else {
                AccessMode::Writable
            },
            options: ArtifactSetOptions { format, ..options },
            root,
            descriptor_file,
            state,
            needs_repack: false,
            closed: false,
        })
    }

    /// The path of the directory or archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The physical format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Returns true if the container can not be modified.
    pub fn is_read_only(&self) -> bool {
        self.mode.is_read_only()
    }

    /// Returns true if [`Container::close`] succeeded.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The directory that currently holds the files of the container.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// The descriptor.
    pub fn descriptor(&self) -> &H::Object {
        self.state.get()
    }

    /// The descriptor, for modification.
    pub fn descriptor_mut(&mut self) -> Result<&mut H::Object, ArtifactSetError> {
        self.ensure_writable()?;
        Ok(self.state.get_mut())
    }

    /// Returns true if the descriptor differs from what is persisted.
    pub fn has_changed(&self) -> bool {
        self.state.has_changed()
    }

    /// The path a blob is stored at.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .path()
            .join(BLOBS_DIRECTORY_NAME)
            .join(digest.file_name())
    }

    /// Returns true if a blob with the digest is present.
    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Stores the content of `blob` unless a blob with the same digest is
    /// already present. The content is verified against the digest announced
    /// by the blob.
    pub fn add_blob(&mut self, blob: &dyn BlobAccess) -> Result<Digest, ArtifactSetError> {
        self.ensure_writable()?;
        let expected = blob.digest()?;
        let target = self.blob_path(&expected);
        match fs::metadata(&target) {
            Ok(metadata) if metadata.is_file() => {
                tracing::debug!("blob {} is already present", expected);
                return Ok(expected);
            }
            Ok(_) => tracing::warn!("{} is not a regular file, replacing it", target.display()),
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                tracing::warn!("failed to inspect existing blob: {e}");
            }
            Err(_) => {}
        }

        let mut file = NamedTempFile::new_in(self.root.path().join(BLOBS_DIRECTORY_NAME))?;
        let mut writer = HashingWriter::new(&mut file, expected.algorithm());
        let mut reader = blob.reader()?;
        std::io::copy(&mut reader, &mut writer)?;
        let (_, actual, size) = writer.finalize();
        if actual != expected {
            return Err(ArtifactSetError::DigestMismatch { expected, actual });
        }
        file.persist(&target).map_err(|e| e.error)?;

        tracing::debug!("added blob {} ({} bytes)", expected, size);
        self.needs_repack = true;
        Ok(expected)
    }

    /// Returns a handle to a stored blob.
    ///
    /// For a tgz container the handle is only readable while the container is
    /// open.
    pub fn get_blob(
        &self,
        digest: &Digest,
        mime_type: &str,
    ) -> Result<FileBlobAccess, ArtifactSetError> {
        self.ensure_open()?;
        let path = self.blob_path(digest);
        if !path.is_file() {
            return Err(ArtifactSetError::NotFound(format!("blob {digest}")));
        }
        Ok(FileBlobAccess::with_digest(mime_type, path, digest.clone()))
    }

    /// Commits all modifications: the descriptor is rewritten if it changed
    /// and a tgz archive is repacked if anything changed. Returns true if
    /// anything was written.
    ///
    /// Closing a read-only container or closing twice does nothing.
    pub fn close(&mut self) -> Result<bool, ArtifactSetError> {
        if self.closed {
            return Ok(false);
        }
        if self.is_read_only() {
            self.closed = true;
            return Ok(false);
        }

        let store = FileStateStore::new(self.root.path().join(self.descriptor_file));
        let descriptor_written = self.state.commit(&store)?;
        if descriptor_written {
            tracing::debug!("rewrote descriptor of {}", self.path.display());
        }

        let written = match self.format {
            Format::Directory => descriptor_written,
            Format::Tgz => {
                self.needs_repack |= descriptor_written;
                if self.needs_repack {
                    self.repack()?;
                    self.needs_repack = false;
                    true
                } else {
                    false
                }
            }
        };

        self.closed = true;
        Ok(written)
    }

    fn repack(&self) -> Result<(), ArtifactSetError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let file = NamedTempFile::new_in(parent)?;
        let encoder = GzEncoder::new(file, self.options.compression.to_gzip_level()?);
        let mut archive = tar::Builder::new(encoder);
        archive.follow_symlinks(false);
        archive.mode(tar::HeaderMode::Deterministic);

        let root = self.root.path();
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            let Ok(name) = entry.path().strip_prefix(root) else {
                continue;
            };
            if entry.file_type().is_dir() {
                archive.append_dir(name, entry.path())?;
            } else {
                archive.append_path_with_name(entry.path(), name)?;
            }
        }

        let file = archive.into_inner()?.finish()?;
        set_permissions(file.path(), self.options.file_mode)?;
        file.persist(&self.path).map_err(|e| e.error)?;
        tracing::debug!("packed {}", self.path.display());
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), ArtifactSetError> {
        if self.closed {
            return Err(ArtifactSetError::Closed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), ArtifactSetError> {
        self.ensure_open()?;
        if self.is_read_only() {
            return Err(ArtifactSetError::ReadOnly);
        }
        Ok(())
    }
}

impl<H: StateHandler> Drop for Container<H> {
    fn drop(&mut self) {
        if !self.closed && !self.is_read_only() && self.state.has_changed() {
            tracing::debug!(
                "discarding uncommitted changes of {}",
                self.path.display()
            );
        }
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: Option<u32>) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: Option<u32>) -> Result<(), std::io::Error> {
    Ok(())
}
