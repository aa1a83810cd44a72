#![deny(missing_docs)]

//! Transfer of component versions between repositories.
//!
//! [`transfer_version`] copies a component version into a target repository
//! and, depending on the [`TransferHandler`], the component versions it
//! references. Referenced versions are committed before the versions
//! referencing them, so the target never contains a version whose references
//! can not be resolved. Reference cycles are detected and reported with the
//! full path that led to them.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ocm_access::AccessContext;
//! # use ocm_artifactset::AccessMode;
//! # use ocm_repository::{FileSystemRepository, Repository};
//! # use ocm_transfer::{transfer_version, DefaultTransferHandler};
//! # use tokio_util::sync::CancellationToken;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source: Arc<dyn Repository> = Arc::new(FileSystemRepository::open(
//!     AccessMode::ReadOnly,
//!     "source",
//!     AccessContext::default(),
//! )?);
//! let target = FileSystemRepository::open(AccessMode::Create, "target", AccessContext::default())?;
//!
//! let version = source.lookup_component_version("acme.org/app", "v1")?;
//! transfer_version(
//!     &source,
//!     version.as_ref(),
//!     &target,
//!     &DefaultTransferHandler::new(true),
//!     &CancellationToken::new(),
//! )?;
//! # Ok(())
//! # }
//! ```

mod engine;
mod handler;

use std::fmt::{Display, Formatter};

pub use engine::{copy_version, transfer_version};
pub use handler::{DefaultTransferHandler, LocalityPolicy, SpecLocality, TransferHandler};

use ocm_repository::RepositoryError;
use ocm_types::{History, NameVersion};

/// The kind reported for reference cycles between component versions.
pub const KIND_COMPONENT_VERSION: &str = "component version";

/// An error that can occur during a transfer. Every variant carries the
/// history of component versions that led to it.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// A component version (transitively) references itself.
    #[error("{kind} {name_version} is part of a reference cycle: {history}->{name_version}")]
    Recursion {
        /// The kind of object
        kind: &'static str,
        /// The version that was reached again
        name_version: NameVersion,
        /// The path that led to it
        history: History,
    },

    /// The transfer was cancelled.
    #[error("{history}: transfer cancelled")]
    Cancelled {
        /// Where the transfer was cancelled
        history: History,
    },

    /// The target component could not be looked up.
    #[error("{history}: lookup target component")]
    Lookup {
        /// Where the error occurred
        history: History,
        /// The cause
        #[source]
        source: RepositoryError,
    },

    /// The target version could not be created.
    #[error("{history}: creating target version")]
    CreateVersion {
        /// Where the error occurred
        history: History,
        /// The cause
        #[source]
        source: RepositoryError,
    },

    /// The descriptor could not be copied.
    #[error("{history}: copying descriptor")]
    CopyDescriptor {
        /// Where the error occurred
        history: History,
        /// The cause
        #[source]
        source: RepositoryError,
    },

    /// A resource could not be transferred.
    #[error("{history}: transferring resource {index}")]
    Resource {
        /// Where the error occurred
        history: History,
        /// The index of the resource
        index: usize,
        /// The cause
        #[source]
        source: RepositoryError,
    },

    /// A source could not be transferred.
    #[error("{history}: transferring source {index}")]
    Source {
        /// Where the error occurred
        history: History,
        /// The index of the source
        index: usize,
        /// The cause
        #[source]
        source: RepositoryError,
    },

    /// A referenced component version could not be looked up.
    #[error("{history}: nested component {name_version}")]
    NestedComponent {
        /// Where the error occurred
        history: History,
        /// The referenced version
        name_version: NameVersion,
        /// The cause
        #[source]
        source: RepositoryError,
    },

    /// The target version could not be committed.
    #[error("{history}: adding version")]
    Commit {
        /// Where the error occurred
        history: History,
        /// The cause
        #[source]
        source: RepositoryError,
    },
}

impl TransferError {
    /// The history of component versions that led to the error.
    pub fn history(&self) -> &History {
        match self {
            TransferError::Recursion { history, .. }
            | TransferError::Cancelled { history }
            | TransferError::Lookup { history, .. }
            | TransferError::CreateVersion { history, .. }
            | TransferError::CopyDescriptor { history, .. }
            | TransferError::Resource { history, .. }
            | TransferError::Source { history, .. }
            | TransferError::NestedComponent { history, .. }
            | TransferError::Commit { history, .. } => history,
        }
    }
}

/// The steps a single component version passes through while it is
/// transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Nothing happened yet
    Start,
    /// The descriptor is copied into the new target version
    CopyDescriptor,
    /// Resources are handed to the handler
    TransferResources,
    /// Sources are handed to the handler
    TransferSources,
    /// Referenced versions are transferred
    TransferReferences,
    /// The target version was added to the target repository
    Committed,
    /// The target version was discarded
    Aborted,
}

impl TransferState {
    /// Returns true for the final states.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Committed | TransferState::Aborted)
    }
}

impl Display for TransferState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferState::Start => "start",
            TransferState::CopyDescriptor => "copy descriptor",
            TransferState::TransferResources => "transfer resources",
            TransferState::TransferSources => "transfer sources",
            TransferState::TransferReferences => "transfer references",
            TransferState::Committed => "committed",
            TransferState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
