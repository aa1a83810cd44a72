use std::path::{Path, PathBuf};

use ocm_access::{BlobAccess, DataBlobAccess, FileBlobAccess, MIME_OCTET_STREAM};
use ocm_digest::Digest;

use crate::{
    container::Container,
    descriptor::{ArtifactSetDescriptorHandler, ARTIFACT_SET_DESCRIPTOR_FILE_NAME},
    AccessMode, ArtifactEntry, ArtifactSetDescriptor, ArtifactSetError, ArtifactSetOptions,
    BlobDescriptor, Format, Manifest,
};

/// A local, content-addressable set of blobs and the artifacts (manifests)
/// built from them.
///
/// Blobs are stored once per digest. Every digest mentioned in the descriptor
/// refers to a blob that is present in the set.
pub struct ArtifactSet {
    container: Container<ArtifactSetDescriptorHandler>,
}

impl ArtifactSet {
    /// Creates a new, empty artifact set. Fails if anything exists at `path`.
    pub fn create(
        path: impl Into<PathBuf>,
        options: ArtifactSetOptions,
    ) -> Result<Self, ArtifactSetError> {
        Ok(Self {
            container: Container::create(
                path,
                ARTIFACT_SET_DESCRIPTOR_FILE_NAME,
                ArtifactSetDescriptorHandler,
                options,
            )?,
        })
    }

    /// Opens an existing artifact set, detecting its format.
    pub fn open(mode: AccessMode, path: impl Into<PathBuf>) -> Result<Self, ArtifactSetError> {
        Self::open_with_options(mode, path, ArtifactSetOptions::default())
    }

    /// Opens an artifact set. `options` are used if the set has to be created
    /// ([`AccessMode::Create`]) and when a tgz archive is repacked.
    pub fn open_with_options(
        mode: AccessMode,
        path: impl Into<PathBuf>,
        options: ArtifactSetOptions,
    ) -> Result<Self, ArtifactSetError> {
        Ok(Self {
            container: Container::open(
                mode,
                path,
                ARTIFACT_SET_DESCRIPTOR_FILE_NAME,
                ArtifactSetDescriptorHandler,
                options,
            )?,
        })
    }

    /// The path of the directory or archive.
    pub fn path(&self) -> &Path {
        self.container.path()
    }

    /// The physical format.
    pub fn format(&self) -> Format {
        self.container.format()
    }

    /// Returns true if the set can not be modified.
    pub fn is_read_only(&self) -> bool {
        self.container.is_read_only()
    }

    /// The descriptor, including all uncommitted modifications.
    pub fn descriptor(&self) -> &ArtifactSetDescriptor {
        self.container.descriptor()
    }

    /// Returns true if a blob with the digest is present.
    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.container.has_blob(digest)
    }

    /// Adds a blob and returns its digest. Adding content that is already
    /// present does nothing.
    pub fn add_blob(&mut self, blob: &dyn BlobAccess) -> Result<Digest, ArtifactSetError> {
        let digest = self.container.add_blob(blob)?;
        let descriptor = self.container.descriptor_mut()?;
        if descriptor.blob(&digest).is_none() && descriptor.manifest(&digest).is_none() {
            descriptor.blobs.push(BlobDescriptor {
                media_type: blob.mime_type().to_string(),
                digest: digest.clone(),
                size: blob.size()?,
            });
        }
        Ok(digest)
    }

    /// Returns a stored blob. The media type is the one the blob was added
    /// with.
    pub fn get_blob_data(&self, digest: &Digest) -> Result<FileBlobAccess, ArtifactSetError> {
        let descriptor = self.descriptor();
        let mime_type = descriptor
            .blob(digest)
            .map(|b| b.media_type.as_str())
            .or_else(|| descriptor.manifest(digest).map(|m| m.media_type.as_str()))
            .unwrap_or(MIME_OCTET_STREAM);
        self.container.get_blob(digest, mime_type)
    }

    /// Registers a manifest whose blobs have already been added, optionally
    /// under a tag. Adding the same manifest again only adds the tag.
    pub fn add_artifact(
        &mut self,
        manifest: &Manifest,
        tag: Option<&str>,
    ) -> Result<ArtifactEntry, ArtifactSetError> {
        if let Some(missing) = manifest.digests().find(|d| !self.has_blob(d)) {
            return Err(ArtifactSetError::NotFound(format!(
                "blob {missing} referenced by manifest"
            )));
        }

        let data = manifest
            .to_json()
            .map_err(ArtifactSetError::InvalidManifest)?;
        let size = data.len() as u64;
        let digest = self
            .container
            .add_blob(&DataBlobAccess::new(manifest.media_type.clone(), data))?;

        let descriptor = self.container.descriptor_mut()?;
        if descriptor.manifest(&digest).is_none() {
            tracing::debug!("adding artifact {}", digest);
            descriptor.manifests.push(ArtifactEntry {
                media_type: manifest.media_type.clone(),
                digest: digest.clone(),
                size,
                tags: Vec::new(),
            });
        }
        if let Some(tag) = tag {
            descriptor.tag(&digest, &[tag]);
        }

        descriptor
            .manifest(&digest)
            .cloned()
            .ok_or_else(|| ArtifactSetError::NotFound(format!("artifact {digest}")))
    }

    /// Attaches additional tags to an artifact.
    pub fn add_tags(&mut self, digest: &Digest, tags: &[&str]) -> Result<(), ArtifactSetError> {
        if !self.container.descriptor_mut()?.tag(digest, tags) {
            return Err(ArtifactSetError::NotFound(format!("artifact {digest}")));
        }
        Ok(())
    }

    /// Returns the artifact tagged with `tag`.
    pub fn resolve_tag(&self, tag: &str) -> Option<&ArtifactEntry> {
        self.descriptor().resolve_tag(tag)
    }

    /// Reads the manifest of an artifact.
    pub fn get_artifact(&self, digest: &Digest) -> Result<Manifest, ArtifactSetError> {
        let entry = self
            .descriptor()
            .manifest(digest)
            .ok_or_else(|| ArtifactSetError::NotFound(format!("artifact {digest}")))?;
        let data = self.container.get_blob(digest, &entry.media_type)?.get()?;
        Manifest::from_json(&data).map_err(ArtifactSetError::InvalidManifest)
    }

    /// Commits all modifications and returns true if anything was written.
    /// Closing a second time does nothing.
    ///
    /// # Panics
    ///
    /// Panics if the descriptor mentions a digest whose blob is not present,
    /// which can only happen through a bug in the code building the set.
    pub fn close(&mut self) -> Result<bool, ArtifactSetError> {
        if !self.container.is_closed() && !self.is_read_only() {
            for digest in self.descriptor().referenced_digests() {
                assert!(
                    self.has_blob(digest),
                    "artifact set {} references missing blob {digest}",
                    self.path().display()
                );
            }
        }
        self.container.close()
    }
}
