#![deny(missing_docs)]

//! Access specifications describe *where* the content of a resource or source
//! lives. This crate decodes them from their raw `{"type": ..}` form through an
//! [`AccessSpecRegistry`], decides whether they are local to a storage
//! context, and turns them into [`AccessMethod`]s and [`BlobAccess`]es that
//! provide the actual bytes.

mod blob;
mod context;
pub mod credentials;
mod method;
mod registry;
mod spec;

pub use blob::{AccessMethodBlobAccess, BlobAccess, DataBlobAccess, FileBlobAccess, MIME_OCTET_STREAM};
pub use context::AccessContext;
pub use method::{
    AccessMethod, OciReference, RegistryClient, RegistryClientError, DEFAULT_REGISTRY_HOST,
};
pub use registry::{AccessSpecRegistry, DecodeFn};
pub use spec::{
    AccessSpec, LocalBlobAccessSpec, OciArtifactAccessSpec, OciBlobAccessSpec,
    LEGACY_LOCAL_FILESYSTEM_BLOB_TYPE, LEGACY_OCI_REGISTRY_TYPE, LOCAL_BLOB_TYPE,
    OCI_ARTIFACT_TYPE, OCI_BLOB_TYPE,
};

use ocm_digest::Digest;

/// An error that can occur when decoding access specs or reading the content
/// they point at.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// No decoder is registered for the type of the spec.
    #[error("unknown access method type '{kind}' (version '{version}')")]
    UnknownAccessKind {
        /// The kind part of the type
        kind: String,
        /// The version part of the type, empty if omitted
        version: String,
    },

    /// The bytes are not a JSON object with a `type` field.
    #[error("invalid access specification: {0}")]
    InvalidGenericSpec(String),

    /// The spec has a known type but its fields could not be decoded.
    #[error("invalid access specification of type '{type_name}'")]
    InvalidSpec {
        /// The full type of the spec
        type_name: String,
        /// The decode error
        #[source]
        source: serde_json::Error,
    },

    /// The spec could not be encoded.
    #[error("failed to encode access specification")]
    Encode(#[source] serde_json::Error),

    /// The content a spec points at does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The spec needs the storage of a component version to be resolved.
    #[error("access method '{0}' can only be resolved by the storage it belongs to")]
    NoStorageContext(String),

    /// The spec can not be resolved in this context.
    #[error("access method '{0}' is not supported in this context")]
    NotSupported(String),

    /// A reference string could not be parsed.
    #[error("invalid OCI reference '{0}'")]
    InvalidReference(String),

    /// No usable credentials were found.
    #[error("no credentials for {0}")]
    Credentials(String),

    /// The registry client failed.
    #[error("failed to access {reference}")]
    Registry {
        /// The reference that was accessed
        reference: String,
        /// The error of the client
        #[source]
        source: RegistryClientError,
    },

    /// The content does not match the digest it was announced with.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The announced digest
        expected: Digest,
        /// The digest of the content that was read
        actual: Digest,
    },

    /// An IO error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
