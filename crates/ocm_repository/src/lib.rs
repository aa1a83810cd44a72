#![deny(missing_docs)]

//! Repositories of component versions.
//!
//! The traits in this crate ([`Repository`], [`ComponentAccess`] and
//! [`ComponentVersionAccess`]) are the surface the transfer engine works
//! against. Two storage backends are provided:
//!
//! - [`ComponentArchive`]: a single component version stored as a
//!   `component-descriptor.yaml` next to a `blobs/` directory, as a directory
//!   or a tgz archive.
//! - [`FileSystemRepository`]: a directory holding any number of component
//!   versions (each one a component archive) and an `index.json` listing them
//!   in the order they were added.

mod access;
mod comparch;
mod filesystem;

use std::path::PathBuf;

pub use access::{ContentElement, ElementAccess, ResourceAccess, SourceAccess};
pub use comparch::{ComponentArchive, ComponentDescriptorHandler, COMPONENT_DESCRIPTOR_FILE_NAME};
pub use filesystem::{
    FileSystemRepository, IndexEntry, RepositoryIndex, COMPONENTS_DIRECTORY_NAME, INDEX_FILE_NAME,
};

use ocm_access::{AccessContext, AccessError, AccessMethod, AccessSpec, BlobAccess};
use ocm_artifactset::ArtifactSetError;
use ocm_digest::Digest;
use ocm_state::StateError;
use ocm_types::{ComponentDescriptor, DescriptorError, GenericAccessSpec, NameVersion};

/// An error that can occur when working with a repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The repository does not contain any version of the component.
    #[error("component {0} not found")]
    ComponentNotFound(String),

    /// The component version does not exist.
    #[error("component version {0} not found")]
    VersionNotFound(NameVersion),

    /// The component version already exists.
    #[error("component version {0} already exists")]
    VersionAlreadyExists(NameVersion),

    /// A repository should be created where something already exists.
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    /// The repository or version can not be modified.
    #[error("read-only")]
    ReadOnly,

    /// A resource or source index does not exist.
    #[error("{kind} index {index} out of range")]
    IndexOutOfRange {
        /// `resource` or `source`
        kind: &'static str,
        /// The index
        index: usize,
    },

    /// A version was added to a component it does not belong to.
    #[error("component version {actual} does not belong to component {expected}")]
    NameMismatch {
        /// The name of the component
        expected: String,
        /// The component version
        actual: NameVersion,
    },

    /// A repository does not exist at the path.
    #[error("no repository found at {0}")]
    RepositoryNotFound(PathBuf),

    /// An element declaration can not be added.
    #[error("{element}: {reason}")]
    InvalidElement {
        /// Where the element was declared
        element: String,
        /// What is wrong with it
        reason: String,
    },

    /// A local blob spec does not reference a blob by digest.
    #[error("invalid local blob reference '{0}'")]
    InvalidLocalReference(String),

    /// An element references a local blob the version does not contain.
    #[error("{element} references blob {digest} which is not part of the component version")]
    MissingLocalBlob {
        /// The element
        element: String,
        /// The digest of the missing blob
        digest: Digest,
    },

    /// A descriptor is invalid.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// An access spec could not be decoded or resolved.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// The underlying storage failed.
    #[error(transparent)]
    ArtifactSet(#[from] ArtifactSetError),

    /// An index could not be loaded or stored.
    #[error(transparent)]
    State(#[from] StateError),

    /// An IO error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A store of component versions.
pub trait Repository: Send + Sync {
    /// The context access specs of this repository are interpreted in.
    fn context(&self) -> &AccessContext;

    /// Returns a handle to a component. The component does not have to exist
    /// yet, so that new versions can be created through the handle.
    fn lookup_component(&self, name: &str) -> Result<Box<dyn ComponentAccess>, RepositoryError>;

    /// Returns the names of all components with at least one version.
    fn component_names(&self) -> Result<Vec<String>, RepositoryError>;

    /// Opens an existing component version.
    fn lookup_component_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Box<dyn ComponentVersionAccess>, RepositoryError> {
        self.lookup_component(name)?.lookup_version(version)
    }
}

/// A component of a repository.
pub trait ComponentAccess {
    /// The name of the component.
    fn name(&self) -> &str;

    /// The versions of the component, in the order they were added.
    fn versions(&self) -> Result<Vec<String>, RepositoryError>;

    /// Opens an existing version for reading.
    fn lookup_version(&self, version: &str)
        -> Result<Box<dyn ComponentVersionAccess>, RepositoryError>;

    /// Starts a new version. Nothing is visible in the repository until the
    /// version is passed to [`ComponentAccess::add_version`]; dropping it
    /// instead discards it.
    fn new_version(&self, version: &str)
        -> Result<Box<dyn ComponentVersionAccess>, RepositoryError>;

    /// Returns true if the version exists.
    fn has_version(&self, version: &str) -> Result<bool, RepositoryError> {
        Ok(self.versions()?.iter().any(|v| v == version))
    }

    /// Commits a version created by [`ComponentAccess::new_version`].
    fn add_version(&self, version: Box<dyn ComponentVersionAccess>) -> Result<(), RepositoryError> {
        let nv = version.name_version();
        if nv.name != self.name() {
            return Err(RepositoryError::NameMismatch {
                expected: self.name().to_string(),
                actual: nv,
            });
        }
        version.commit()
    }
}

/// An open component version.
pub trait ComponentVersionAccess {
    /// The context access specs of this version are interpreted in.
    fn context(&self) -> &AccessContext;

    /// The descriptor, including uncommitted modifications.
    fn descriptor(&self) -> &ComponentDescriptor;

    /// Replaces the descriptor.
    fn set_descriptor(&mut self, descriptor: ComponentDescriptor) -> Result<(), RepositoryError>;

    /// Returns an access method for a spec of this version. Local blobs are
    /// resolved from the version's own storage.
    fn access_method(&self, spec: &AccessSpec) -> Result<Box<dyn AccessMethod>, RepositoryError>;

    /// Stores `blob` in the version's storage and points the resource at
    /// `index` to it.
    fn set_resource_blob(
        &mut self,
        index: usize,
        blob: &dyn BlobAccess,
        reference_name: Option<&str>,
        global_access: Option<GenericAccessSpec>,
    ) -> Result<(), RepositoryError>;

    /// Stores `blob` in the version's storage and points the source at
    /// `index` to it.
    fn set_source_blob(
        &mut self,
        index: usize,
        blob: &dyn BlobAccess,
        reference_name: Option<&str>,
        global_access: Option<GenericAccessSpec>,
    ) -> Result<(), RepositoryError>;

    /// Persists the version. Use [`ComponentAccess::add_version`] rather than
    /// calling this directly.
    fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    /// The name and version of the component version.
    fn name_version(&self) -> NameVersion {
        self.descriptor().name_version()
    }
}

impl<'v> dyn ComponentVersionAccess + 'v {
    /// Returns views of all resources.
    pub fn resources(&self) -> Vec<ResourceAccess<'_>> {
        self.descriptor()
            .component
            .resources
            .iter()
            .enumerate()
            .map(|(index, resource)| ElementAccess::new(self, index, resource))
            .collect()
    }

    /// Returns views of all sources.
    pub fn sources(&self) -> Vec<SourceAccess<'_>> {
        self.descriptor()
            .component
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| ElementAccess::new(self, index, source))
            .collect()
    }
}
