use std::sync::Arc;

use ocm_access::{AccessContext, AccessSpec, BlobAccess};
use ocm_repository::{
    ComponentVersionAccess, ContentElement, ElementAccess, Repository, RepositoryError,
    ResourceAccess, SourceAccess,
};
use ocm_types::{ElementMeta, GenericAccessSpec};

/// Decides how a component version graph is moved between repositories.
pub trait TransferHandler: Send + Sync {
    /// Decides whether the referenced component version `name:version` is
    /// transferred as well. Returns the repository to read it from and the
    /// handler to use for it, or `None` to keep only the reference.
    fn transfer_version(
        &self,
        repo: &Arc<dyn Repository>,
        name: &str,
        version: &str,
    ) -> Option<(Arc<dyn Repository>, Box<dyn TransferHandler>)>;

    /// Moves the content of a resource into the target version, or leaves
    /// its access spec as it is.
    fn transfer_resource(
        &self,
        resource: &ResourceAccess<'_>,
        target: &mut dyn ComponentVersionAccess,
    ) -> Result<(), RepositoryError>;

    /// Moves the content of a source into the target version, or leaves its
    /// access spec as it is.
    fn transfer_source(
        &self,
        source: &SourceAccess<'_>,
        target: &mut dyn ComponentVersionAccess,
    ) -> Result<(), RepositoryError>;
}

/// Decides whether content has to be copied along with a component version.
pub trait LocalityPolicy: Send + Sync {
    /// Returns true if the content behind `spec`, found in a version living in
    /// `source`, has to be copied into the version living in `target`.
    fn is_local(&self, spec: &AccessSpec, source: &AccessContext, target: &AccessContext) -> bool;
}

/// Uses the notion of locality of the access spec itself, evaluated in the
/// target context: local blobs are always copied, other kinds only if the
/// target context declares them local.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpecLocality;

impl LocalityPolicy for SpecLocality {
    fn is_local(&self, spec: &AccessSpec, _source: &AccessContext, target: &AccessContext) -> bool {
        spec.is_local(target)
    }
}

impl<F> LocalityPolicy for F
where
    F: Fn(&AccessSpec, &AccessContext, &AccessContext) -> bool + Send + Sync,
{
    fn is_local(&self, spec: &AccessSpec, source: &AccessContext, target: &AccessContext) -> bool {
        self(spec, source, target)
    }
}

/// The standard transfer policy: local content is copied, everything else is
/// transferred by reference. Local blobs are copied regardless of the
/// locality policy. Referenced component versions are followed only
/// if the handler is recursive.
#[derive(Clone)]
pub struct DefaultTransferHandler {
    recursive: bool,
    locality: Arc<dyn LocalityPolicy>,
}

impl Default for DefaultTransferHandler {
    fn default() -> Self {
        Self::new(false)
    }
}

impl DefaultTransferHandler {
    /// Constructs a handler using [`SpecLocality`].
    pub fn new(recursive: bool) -> Self {
        Self {
            recursive,
            locality: Arc::new(SpecLocality),
        }
    }

    /// Replaces the locality policy. The policy is only asked about content
    /// that is not a local blob.
    pub fn with_locality(self, locality: Arc<dyn LocalityPolicy>) -> Self {
        Self { locality, ..self }
    }

    /// Returns true if referenced component versions are transferred too.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    fn transfer_element<T: ContentElement>(
        &self,
        element: &ElementAccess<'_, T>,
        target: &mut dyn ComponentVersionAccess,
        set_blob: impl FnOnce(
            &mut dyn ComponentVersionAccess,
            &dyn BlobAccess,
            Option<&str>,
            Option<GenericAccessSpec>,
        ) -> Result<(), RepositoryError>,
    ) -> Result<(), RepositoryError> {
        let spec = element.access()?;
        let source = element.component_version().context();
        let is_local_blob = matches!(spec, AccessSpec::LocalBlob(_));
        if !is_local_blob && !self.locality.is_local(&spec, source, target.context()) {
            tracing::debug!(
                "keeping {} access of {} {}",
                spec.kind(),
                T::KIND,
                element.meta().name()
            );
            return Ok(());
        }

        let (reference_name, global_access) = match &spec {
            AccessSpec::LocalBlob(local) => {
                (local.reference_name.clone(), local.global_access.clone())
            }
            _ => (None, Some(element.meta().access_spec().clone())),
        };

        tracing::debug!("copying content of {} {}", T::KIND, element.meta().name());
        let blob = element.blob()?;
        set_blob(target, &blob, reference_name.as_deref(), global_access)
    }
}

impl TransferHandler for DefaultTransferHandler {
    fn transfer_version(
        &self,
        repo: &Arc<dyn Repository>,
        _name: &str,
        _version: &str,
    ) -> Option<(Arc<dyn Repository>, Box<dyn TransferHandler>)> {
        self.recursive
            .then(|| (repo.clone(), Box::new(self.clone()) as Box<dyn TransferHandler>))
    }

    fn transfer_resource(
        &self,
        resource: &ResourceAccess<'_>,
        target: &mut dyn ComponentVersionAccess,
    ) -> Result<(), RepositoryError> {
        let index = resource.index();
        self.transfer_element(resource, target, |target, blob, reference_name, global_access| {
            target.set_resource_blob(index, blob, reference_name, global_access)
        })
    }

    fn transfer_source(
        &self,
        source: &SourceAccess<'_>,
        target: &mut dyn ComponentVersionAccess,
    ) -> Result<(), RepositoryError> {
        let index = source.index();
        self.transfer_element(source, target, |target, blob, reference_name, global_access| {
            target.set_source_blob(index, blob, reference_name, global_access)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocm_access::{LocalBlobAccessSpec, OciArtifactAccessSpec};

    #[test]
    fn test_spec_locality_uses_target_context() {
        let artifact = AccessSpec::OciArtifact(OciArtifactAccessSpec {
            image_reference: "ghcr.io/acme/app:1.0".to_string(),
        });
        let blob = AccessSpec::LocalBlob(LocalBlobAccessSpec::new("sha256.abc", "text/plain"));
        let plain = AccessContext::default();
        let registry = AccessContext::default().with_local_kind("ociArtifact");

        assert!(SpecLocality.is_local(&blob, &plain, &plain));
        assert!(!SpecLocality.is_local(&artifact, &registry, &plain));
        assert!(SpecLocality.is_local(&artifact, &plain, &registry));
    }

    #[test]
    fn test_recursion_follows_flag() {
        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn Repository> = Arc::new(
            ocm_repository::FileSystemRepository::create(dir.path(), AccessContext::default())
                .unwrap(),
        );
        assert!(DefaultTransferHandler::new(false)
            .transfer_version(&repo, "acme.org/lib", "v1")
            .is_none());
        let (nested, _) = DefaultTransferHandler::new(true)
            .transfer_version(&repo, "acme.org/lib", "v1")
            .unwrap();
        assert!(Arc::ptr_eq(&nested, &repo));
    }
}
