use ocm_digest::Digest;
use ocm_state::{StateError, StateHandler};
use serde::{Deserialize, Serialize};

use crate::BlobDescriptor;

/// The name of the descriptor file of an artifact set.
pub const ARTIFACT_SET_DESCRIPTOR_FILE_NAME: &str = "artifact-set-descriptor.json";

/// The media type of the artifact set descriptor.
pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// The descriptor of an artifact set: an index of the artifacts it contains
/// and of the media types of its other blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSetDescriptor {
    /// Always `2`
    pub schema_version: u32,
    /// The media type of the descriptor
    pub media_type: String,
    /// The artifacts, in the order they were added
    pub manifests: Vec<ArtifactEntry>,
    /// The non-manifest blobs, in the order they were added
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blobs: Vec<BlobDescriptor>,
}

impl Default for ArtifactSetDescriptor {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_IMAGE_INDEX.to_string(),
            manifests: Vec::new(),
            blobs: Vec::new(),
        }
    }
}

/// An artifact of an artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactEntry {
    /// The media type of the manifest
    pub media_type: String,
    /// The digest of the manifest
    pub digest: Digest,
    /// The size of the manifest in bytes
    pub size: u64,
    /// The names the artifact is known under
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ArtifactSetDescriptor {
    /// Returns the artifact with the given manifest digest.
    pub fn manifest(&self, digest: &Digest) -> Option<&ArtifactEntry> {
        self.manifests.iter().find(|m| &m.digest == digest)
    }

    /// Returns the artifact tagged with `tag`.
    pub fn resolve_tag(&self, tag: &str) -> Option<&ArtifactEntry> {
        self.manifests
            .iter()
            .find(|m| m.tags.iter().any(|t| t == tag))
    }

    /// Returns the description of a non-manifest blob.
    pub fn blob(&self, digest: &Digest) -> Option<&BlobDescriptor> {
        self.blobs.iter().find(|b| &b.digest == digest)
    }

    /// Returns every digest the descriptor mentions.
    pub fn referenced_digests(&self) -> impl Iterator<Item = &Digest> + '_ {
        self.manifests
            .iter()
            .map(|m| &m.digest)
            .chain(self.blobs.iter().map(|b| &b.digest))
    }

    /// Attaches tags to an artifact. A tag names at most one artifact, so it is
    /// removed from any other artifact first. Returns false if there is no
    /// artifact with the digest.
    pub(crate) fn tag(&mut self, digest: &Digest, tags: &[&str]) -> bool {
        if self.manifest(digest).is_none() {
            return false;
        }
        for entry in &mut self.manifests {
            if &entry.digest == digest {
                for tag in tags {
                    if !entry.tags.iter().any(|t| t == tag) {
                        entry.tags.push(tag.to_string());
                    }
                }
            } else {
                entry.tags.retain(|t| !tags.contains(&t.as_str()));
            }
        }
        true
    }
}

/// Persists an [`ArtifactSetDescriptor`] as pretty printed JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArtifactSetDescriptorHandler;

impl StateHandler for ArtifactSetDescriptorHandler {
    type Object = ArtifactSetDescriptor;

    fn initial(&self) -> Self::Object {
        ArtifactSetDescriptor::default()
    }

    fn decode(&self, data: &[u8]) -> Result<Self::Object, StateError> {
        serde_json::from_slice(data).map_err(StateError::decode)
    }

    fn encode(&self, object: &Self::Object) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec_pretty(object).map_err(StateError::encode)
    }

    fn equivalent(&self, a: &Self::Object, b: &Self::Object) -> bool {
        a == b
    }
}
