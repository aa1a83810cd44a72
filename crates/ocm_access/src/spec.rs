//! The concrete access specifications.

use ocm_digest::Digest;
use ocm_types::GenericAccessSpec;
use serde::{Deserialize, Serialize, Serializer};
use serde_with::skip_serializing_none;

use crate::AccessContext;

/// The current type name of local blob access specifications.
pub const LOCAL_BLOB_TYPE: &str = "localBlob";

/// The legacy type name of local blob access specifications.
pub const LEGACY_LOCAL_FILESYSTEM_BLOB_TYPE: &str = "localFilesystemBlob";

/// The current type name of OCI artifact access specifications.
pub const OCI_ARTIFACT_TYPE: &str = "ociArtifact";

/// The legacy type name of OCI artifact access specifications.
pub const LEGACY_OCI_REGISTRY_TYPE: &str = "ociRegistry";

/// The type name of OCI blob access specifications.
pub const OCI_BLOB_TYPE: &str = "ociBlob";

/// Content stored as a blob inside the storage of the component version
/// itself.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalBlobAccessSpec {
    /// The storage specific reference of the blob, usually the file name of
    /// the blob derived from its digest.
    pub local_reference: String,
    /// The media type of the blob
    pub media_type: String,
    /// An optional name under which the blob is known outside of the storage
    pub reference_name: Option<String>,
    /// An optional access specification usable outside of the storage
    pub global_access: Option<GenericAccessSpec>,
}

impl LocalBlobAccessSpec {
    /// Constructs a spec for a blob stored under `local_reference`.
    pub fn new(local_reference: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            local_reference: local_reference.into(),
            media_type: media_type.into(),
            reference_name: None,
            global_access: None,
        }
    }
}

/// The legacy wire form of [`LocalBlobAccessSpec`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LegacyLocalFilesystemBlob {
    pub file_name: String,
    #[serde(default)]
    pub media_type: String,
}

impl From<LegacyLocalFilesystemBlob> for LocalBlobAccessSpec {
    fn from(value: LegacyLocalFilesystemBlob) -> Self {
        LocalBlobAccessSpec::new(value.file_name, value.media_type)
    }
}

/// Content stored as an artifact in an OCI registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciArtifactAccessSpec {
    /// The full reference of the artifact, e.g. `ghcr.io/acme/app:v1`
    pub image_reference: String,
}

/// Content stored as a single blob in an OCI registry repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciBlobAccessSpec {
    /// The repository reference, e.g. `ghcr.io/acme/app`
    pub reference: String,
    /// The media type of the blob
    pub media_type: String,
    /// The digest of the blob
    pub digest: Digest,
    /// The size of the blob in bytes
    pub size: u64,
}

/// A decoded access specification: a description of where the content of a
/// resource or source lives.
///
/// Instances are immutable values. They are created by decoding through an
/// [`crate::AccessSpecRegistry`] or by direct construction when new content is
/// placed. Serializing an instance always produces the current canonical type
/// name.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessSpec {
    /// A blob local to the storage of the component version
    LocalBlob(LocalBlobAccessSpec),
    /// An artifact in an OCI registry
    OciArtifact(OciArtifactAccessSpec),
    /// A blob in an OCI registry
    OciBlob(OciBlobAccessSpec),
    /// A kind that is known to the registry but not interpreted
    Opaque(GenericAccessSpec),
}

impl AccessSpec {
    /// Returns the canonical kind of the spec.
    pub fn kind(&self) -> &str {
        match self {
            AccessSpec::LocalBlob(_) => LOCAL_BLOB_TYPE,
            AccessSpec::OciArtifact(_) => OCI_ARTIFACT_TYPE,
            AccessSpec::OciBlob(_) => OCI_BLOB_TYPE,
            AccessSpec::Opaque(spec) => spec.kind(),
        }
    }

    /// Returns true if the content can only be resolved through the storage
    /// context it was found in, i.e. it has to be copied along when the
    /// component version is moved to another repository.
    ///
    /// Local blobs are always local. Other kinds are local only if the context
    /// declares them so, which allows a registry-local notion of locality.
    pub fn is_local(&self, ctx: &AccessContext) -> bool {
        match self {
            AccessSpec::LocalBlob(_) => true,
            other => ctx.is_local_kind(other.kind()),
        }
    }

    /// Returns the local blob spec if this is one.
    pub fn as_local_blob(&self) -> Option<&LocalBlobAccessSpec> {
        match self {
            AccessSpec::LocalBlob(spec) => Some(spec),
            _ => None,
        }
    }
}

impl From<LocalBlobAccessSpec> for AccessSpec {
    fn from(value: LocalBlobAccessSpec) -> Self {
        AccessSpec::LocalBlob(value)
    }
}

impl From<OciArtifactAccessSpec> for AccessSpec {
    fn from(value: OciArtifactAccessSpec) -> Self {
        AccessSpec::OciArtifact(value)
    }
}

impl From<OciBlobAccessSpec> for AccessSpec {
    fn from(value: OciBlobAccessSpec) -> Self {
        AccessSpec::OciBlob(value)
    }
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    #[serde(rename = "type")]
    type_: &'a str,
    #[serde(flatten)]
    spec: &'a T,
}

impl Serialize for AccessSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AccessSpec::LocalBlob(spec) => Tagged {
                type_: LOCAL_BLOB_TYPE,
                spec,
            }
            .serialize(serializer),
            AccessSpec::OciArtifact(spec) => Tagged {
                type_: OCI_ARTIFACT_TYPE,
                spec,
            }
            .serialize(serializer),
            AccessSpec::OciBlob(spec) => Tagged {
                type_: OCI_BLOB_TYPE,
                spec,
            }
            .serialize(serializer),
            AccessSpec::Opaque(spec) => spec.serialize(serializer),
        }
    }
}
