use std::collections::BTreeMap;

use ocm_access::{AccessError, BlobAccess, DataBlobAccess};
use ocm_digest::Digest;
use serde::{Deserialize, Serialize};

use crate::{ArtifactSet, ArtifactSetError};

/// The media type of an image manifest.
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// The media type of an image config.
pub const MEDIA_TYPE_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// Describes a blob by its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobDescriptor {
    /// The media type of the blob
    pub media_type: String,
    /// The digest of the blob
    pub digest: Digest,
    /// The size of the blob in bytes
    pub size: u64,
}

impl BlobDescriptor {
    /// Describes the content of `blob`.
    pub fn for_blob(blob: &dyn BlobAccess) -> Result<Self, AccessError> {
        Ok(Self {
            media_type: blob.mime_type().to_string(),
            digest: blob.digest()?,
            size: blob.size()?,
        })
    }
}

/// A manifest: a config blob and a list of layer blobs, all referenced by
/// digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Always `2`
    pub schema_version: u32,
    /// The media type of the manifest itself
    pub media_type: String,
    /// The config blob
    pub config: BlobDescriptor,
    /// The layer blobs, in order
    pub layers: Vec<BlobDescriptor>,
    /// Free-form annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    /// Returns the digests of all blobs the manifest references.
    pub fn digests(&self) -> impl Iterator<Item = &Digest> + '_ {
        std::iter::once(&self.config.digest).chain(self.layers.iter().map(|l| &l.digest))
    }

    /// Serializes the manifest.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a manifest.
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Assembles a [`Manifest`] from blobs, adding every blob to an artifact set
/// on the way.
#[derive(Debug, Clone, Default)]
pub struct ArtifactBuilder {
    config: Option<BlobDescriptor>,
    layers: Vec<BlobDescriptor>,
    annotations: BTreeMap<String, String>,
}

impl ArtifactBuilder {
    /// Constructs an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer and returns its index.
    pub fn add_layer(
        &mut self,
        set: &mut ArtifactSet,
        blob: &dyn BlobAccess,
    ) -> Result<usize, ArtifactSetError> {
        set.add_blob(blob)?;
        self.layers.push(BlobDescriptor::for_blob(blob)?);
        Ok(self.layers.len() - 1)
    }

    /// Sets the config blob.
    pub fn set_config(
        &mut self,
        set: &mut ArtifactSet,
        blob: &dyn BlobAccess,
    ) -> Result<(), ArtifactSetError> {
        set.add_blob(blob)?;
        self.config = Some(BlobDescriptor::for_blob(blob)?);
        Ok(())
    }

    /// Adds an annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Finishes the manifest. If no config was set, an empty JSON object is
    /// added as config.
    pub fn build(self, set: &mut ArtifactSet) -> Result<Manifest, ArtifactSetError> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let blob = DataBlobAccess::new(MEDIA_TYPE_IMAGE_CONFIG, "{}");
                set.add_blob(&blob)?;
                BlobDescriptor::for_blob(&blob)?
            }
        };
        Ok(Manifest {
            schema_version: 2,
            media_type: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
            config,
            layers: self.layers,
            annotations: self.annotations,
        })
    }
}
