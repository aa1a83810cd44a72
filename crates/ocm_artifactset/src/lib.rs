#![deny(missing_docs)]

//! Content-addressable storage of blobs.
//!
//! An [`ArtifactSet`] holds blobs named after their digest plus a descriptor
//! listing the artifacts (manifests) built from them. It is stored either as
//! a directory:
//!
//! ```text
//! <root>/
//!   artifact-set-descriptor.json
//!   blobs/
//!     sha256.<hex>
//! ```
//!
//! or as the same tree packed into a gzip compressed tar archive. The layout
//! itself ("a descriptor file next to `blobs/`") is provided by [`Container`],
//! which is also used for other kinds of descriptors.

mod artifact_set;
pub mod container;
mod descriptor;
mod manifest;
mod options;

use std::path::PathBuf;

pub use artifact_set::ArtifactSet;
pub use container::{Container, BLOBS_DIRECTORY_NAME};
pub use descriptor::{
    ArtifactEntry, ArtifactSetDescriptor, ArtifactSetDescriptorHandler,
    ARTIFACT_SET_DESCRIPTOR_FILE_NAME, MEDIA_TYPE_IMAGE_INDEX,
};
pub use manifest::{
    ArtifactBuilder, BlobDescriptor, Manifest, MEDIA_TYPE_IMAGE_CONFIG, MEDIA_TYPE_IMAGE_MANIFEST,
};
pub use options::{AccessMode, ArtifactSetOptions, CompressionLevel, Format};

use ocm_access::AccessError;
use ocm_digest::Digest;
use ocm_state::StateError;

/// An error that can occur when working with an artifact set.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactSetError {
    /// Something already exists where a new set should be created.
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    /// A blob, artifact or the set itself does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The set does not contain a descriptor.
    #[error("{0} does not contain a descriptor")]
    MissingDescriptor(PathBuf),

    /// The set was opened read-only.
    #[error("the artifact set is read-only")]
    ReadOnly,

    /// The set was already closed.
    #[error("the artifact set is closed")]
    Closed,

    /// Blob content does not match the digest it was announced with.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The announced digest
        expected: Digest,
        /// The digest of the content
        actual: Digest,
    },

    /// A manifest could not be serialized or parsed.
    #[error("invalid manifest")]
    InvalidManifest(#[source] serde_json::Error),

    /// The descriptor could not be loaded or stored.
    #[error(transparent)]
    State(#[from] StateError),

    /// Blob content could not be read.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// An IO error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
