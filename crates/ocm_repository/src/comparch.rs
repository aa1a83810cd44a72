use std::{
    io::Read,
    path::{Path, PathBuf},
};

use fs_err as fs;
use ocm_access::{
    AccessContext, AccessError, AccessMethod, AccessSpec, BlobAccess, DataBlobAccess,
    FileBlobAccess, LocalBlobAccessSpec, LOCAL_BLOB_TYPE, MIME_OCTET_STREAM,
};
use ocm_artifactset::{AccessMode, ArtifactSetOptions, Container, Format};
use ocm_digest::Digest;
use ocm_state::{StateError, StateHandler};
use ocm_types::{
    ComponentDescriptor, ComponentReference, Element, ElementKind, ElementMeta, GenericAccessSpec,
    GenericInputSpec, Resource, Source,
};

use crate::{ComponentVersionAccess, ContentElement, RepositoryError};

/// The name of the descriptor file of a component archive.
pub const COMPONENT_DESCRIPTOR_FILE_NAME: &str = "component-descriptor.yaml";

/// Persists a [`ComponentDescriptor`] as YAML.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComponentDescriptorHandler;

impl StateHandler for ComponentDescriptorHandler {
    type Object = ComponentDescriptor;

    fn initial(&self) -> Self::Object {
        ComponentDescriptor::default()
    }

    fn decode(&self, data: &[u8]) -> Result<Self::Object, StateError> {
        ComponentDescriptor::decode(data).map_err(StateError::decode)
    }

    fn encode(&self, object: &Self::Object) -> Result<Vec<u8>, StateError> {
        object.encode().map_err(StateError::encode)
    }

    fn equivalent(&self, a: &Self::Object, b: &Self::Object) -> bool {
        a == b
    }
}

/// A single component version stored as a `component-descriptor.yaml` next to
/// a `blobs/` directory, either as a plain directory or as a tgz archive.
///
/// Content added through [`ComponentArchive::add_blob`] is referenced from the
/// descriptor with `localBlob` access specs whose local reference is the blob
/// file name.
pub struct ComponentArchive {
    container: Container<ComponentDescriptorHandler>,
    context: AccessContext,
}

impl ComponentArchive {
    /// Creates a new archive for a component version. Fails if anything
    /// exists at `path`.
    pub fn create(
        path: impl Into<PathBuf>,
        options: ArtifactSetOptions,
        name: &str,
        version: &str,
        context: AccessContext,
    ) -> Result<Self, RepositoryError> {
        let mut container = Container::create(
            path,
            COMPONENT_DESCRIPTOR_FILE_NAME,
            ComponentDescriptorHandler,
            options,
        )?;
        *container.descriptor_mut()? = ComponentDescriptor::new(name, version);
        Ok(Self { container, context })
    }

    /// Opens an existing archive, detecting its format.
    pub fn open(
        mode: AccessMode,
        path: impl Into<PathBuf>,
        context: AccessContext,
    ) -> Result<Self, RepositoryError> {
        let container = Container::open(
            mode,
            path,
            COMPONENT_DESCRIPTOR_FILE_NAME,
            ComponentDescriptorHandler,
            ArtifactSetOptions::default(),
        )?;
        Ok(Self { container, context })
    }

    /// The path of the directory or archive.
    pub fn path(&self) -> &Path {
        self.container.path()
    }

    /// The physical format.
    pub fn format(&self) -> Format {
        self.container.format()
    }

    /// Returns true if the archive can not be modified.
    pub fn is_read_only(&self) -> bool {
        self.container.is_read_only()
    }

    /// Stores a blob and returns a local blob spec pointing to it.
    pub fn add_blob(&mut self, blob: &dyn BlobAccess) -> Result<LocalBlobAccessSpec, RepositoryError> {
        let digest = self.container.add_blob(blob)?;
        Ok(LocalBlobAccessSpec::new(digest.file_name(), blob.mime_type()))
    }

    /// Returns a stored blob by its local reference. Both the file name form
    /// (`sha256.<hex>`) and the digest form (`sha256:<hex>`) are accepted.
    ///
    /// For a tgz archive the blob is only readable while the archive is open.
    pub fn get_blob(
        &self,
        local_reference: &str,
        mime_type: &str,
    ) -> Result<FileBlobAccess, RepositoryError> {
        let digest = Digest::from_file_name(local_reference)
            .or_else(|_| local_reference.parse::<Digest>())
            .map_err(|_| RepositoryError::InvalidLocalReference(local_reference.to_string()))?;
        Ok(self.container.get_blob(&digest, mime_type)?)
    }

    /// Stores `blob` and adds the resource pointing to it. A resource with the
    /// same identity is replaced.
    pub fn add_resource(
        &mut self,
        mut resource: Resource,
        blob: &dyn BlobAccess,
        reference_name: Option<&str>,
    ) -> Result<(), RepositoryError> {
        resource.access = self.store_local(blob, reference_name, None)?;
        let resources = &mut self.container.descriptor_mut()?.component.resources;
        replace_or_push(resources, resource);
        Ok(())
    }

    /// Adds a resource whose content lives elsewhere. The access spec is
    /// validated against the context's registry. A resource with the same
    /// identity is replaced.
    pub fn add_resource_ref(&mut self, resource: Resource) -> Result<(), RepositoryError> {
        self.context.decode(&resource.access)?;
        let resources = &mut self.container.descriptor_mut()?.component.resources;
        replace_or_push(resources, resource);
        Ok(())
    }

    /// Stores `blob` and adds the source pointing to it. A source with the
    /// same identity is replaced.
    pub fn add_source(
        &mut self,
        mut source: Source,
        blob: &dyn BlobAccess,
        reference_name: Option<&str>,
    ) -> Result<(), RepositoryError> {
        source.access = self.store_local(blob, reference_name, None)?;
        let sources = &mut self.container.descriptor_mut()?.component.sources;
        replace_or_push(sources, source);
        Ok(())
    }

    /// Adds a reference to another component version. A reference with the
    /// same name is replaced.
    pub fn add_reference(&mut self, reference: ComponentReference) -> Result<(), RepositoryError> {
        let references = &mut self.container.descriptor_mut()?.component.component_references;
        replace_or_push(references, reference);
        Ok(())
    }

    /// Adds declared elements, e.g. as read by [`ocm_types::elements_from_yaml`].
    ///
    /// Declarations with an `access` are added as they are. Declarations with
    /// an `input` are ingested; the supported input types are `file` (with a
    /// `path` relative to `base_dir` and an optional `mediaType`) and `utf8`
    /// (with inline `text`).
    pub fn add_elements(&mut self, elements: &[Element], base_dir: &Path) -> Result<(), RepositoryError> {
        let version = self.container.descriptor().version().to_string();
        for element in elements {
            tracing::debug!("adding {} from {}", element.spec().info(), element.source());
            if element.kind() == ElementKind::Reference {
                if let Some(reference) = element.to_reference() {
                    self.add_reference(reference)?;
                }
                continue;
            }

            let access = match (&element.input().access, &element.input().input) {
                (Some(access), _) => {
                    self.context.decode(access)?;
                    access.clone()
                }
                (None, Some(input)) => {
                    let blob = ingest(element, input, base_dir)?;
                    self.store_local(blob.as_ref(), None, None)?
                }
                (None, None) => {
                    return Err(RepositoryError::InvalidElement {
                        element: element.source().to_string(),
                        reason: "neither access nor input specified".to_string(),
                    })
                }
            };

            let descriptor = self.container.descriptor_mut()?;
            if let Some(resource) = element.to_resource(&version, access.clone()) {
                replace_or_push(&mut descriptor.component.resources, resource);
            } else if let Some(source) = element.to_source(&version, access) {
                replace_or_push(&mut descriptor.component.sources, source);
            }
        }
        Ok(())
    }

    /// Validates and commits the descriptor. Returns true if anything was
    /// written. Closing a second time does nothing.
    pub fn close(&mut self) -> Result<bool, RepositoryError> {
        if !self.is_read_only() && self.container.has_changed() {
            let descriptor = self.container.descriptor();
            descriptor.validate()?;
            self.check_local_blobs(&descriptor.component.resources)?;
            self.check_local_blobs(&descriptor.component.sources)?;
        }
        Ok(self.container.close()?)
    }

    /// Fails if an element references a local blob that is not stored in
    /// this archive.
    fn check_local_blobs<T: ContentElement>(&self, elements: &[T]) -> Result<(), RepositoryError> {
        let registry = self.context.registry();
        for element in elements {
            let Ok(AccessSpec::LocalBlob(local)) = registry.decode_generic(element.access_spec())
            else {
                continue;
            };
            let digest = Digest::from_file_name(&local.local_reference)
                .or_else(|_| local.local_reference.parse::<Digest>())
                .map_err(|_| RepositoryError::InvalidLocalReference(local.local_reference.clone()))?;
            if !self.container.has_blob(&digest) {
                return Err(RepositoryError::MissingLocalBlob {
                    element: format!("{} {}", T::KIND, element.name()),
                    digest,
                });
            }
        }
        Ok(())
    }

    fn store_local(
        &mut self,
        blob: &dyn BlobAccess,
        reference_name: Option<&str>,
        global_access: Option<GenericAccessSpec>,
    ) -> Result<GenericAccessSpec, RepositoryError> {
        let mut spec = self.add_blob(blob)?;
        spec.reference_name = reference_name.map(str::to_string);
        spec.global_access = global_access;
        Ok(self.context.registry().to_generic(&AccessSpec::LocalBlob(spec))?)
    }
}

impl ComponentVersionAccess for ComponentArchive {
    fn context(&self) -> &AccessContext {
        &self.context
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        self.container.descriptor()
    }

    fn set_descriptor(&mut self, descriptor: ComponentDescriptor) -> Result<(), RepositoryError> {
        *self.container.descriptor_mut()? = descriptor;
        Ok(())
    }

    fn access_method(&self, spec: &AccessSpec) -> Result<Box<dyn AccessMethod>, RepositoryError> {
        match spec {
            AccessSpec::LocalBlob(local) => {
                let mime_type = if local.media_type.is_empty() {
                    MIME_OCTET_STREAM
                } else {
                    local.media_type.as_str()
                };
                let blob = self.get_blob(&local.local_reference, mime_type)?;
                Ok(Box::new(LocalBlobAccessMethod { blob }))
            }
            other => Ok(self.context.access_method(other)?),
        }
    }

    fn set_resource_blob(
        &mut self,
        index: usize,
        blob: &dyn BlobAccess,
        reference_name: Option<&str>,
        global_access: Option<GenericAccessSpec>,
    ) -> Result<(), RepositoryError> {
        if index >= self.descriptor().component.resources.len() {
            return Err(RepositoryError::IndexOutOfRange {
                kind: Resource::KIND,
                index,
            });
        }
        let access = self.store_local(blob, reference_name, global_access)?;
        self.container.descriptor_mut()?.component.resources[index].access = access;
        Ok(())
    }

    fn set_source_blob(
        &mut self,
        index: usize,
        blob: &dyn BlobAccess,
        reference_name: Option<&str>,
        global_access: Option<GenericAccessSpec>,
    ) -> Result<(), RepositoryError> {
        if index >= self.descriptor().component.sources.len() {
            return Err(RepositoryError::IndexOutOfRange {
                kind: Source::KIND,
                index,
            });
        }
        let access = self.store_local(blob, reference_name, global_access)?;
        self.container.descriptor_mut()?.component.sources[index].access = access;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), RepositoryError> {
        self.close()?;
        Ok(())
    }
}

/// Reads a blob stored in a component archive.
struct LocalBlobAccessMethod {
    blob: FileBlobAccess,
}

impl AccessMethod for LocalBlobAccessMethod {
    fn kind(&self) -> &str {
        LOCAL_BLOB_TYPE
    }

    fn mime_type(&self) -> &str {
        self.blob.mime_type()
    }

    fn get(&self) -> Result<Vec<u8>, AccessError> {
        self.blob.get()
    }

    fn reader(&self) -> Result<Box<dyn Read + '_>, AccessError> {
        self.blob.reader()
    }
}

fn replace_or_push<T: ElementMeta>(elements: &mut Vec<T>, element: T) {
    let identity = element.identity();
    match elements.iter_mut().find(|e| e.identity() == identity) {
        Some(existing) => *existing = element,
        None => elements.push(element),
    }
}

fn ingest(
    element: &Element,
    input: &GenericInputSpec,
    base_dir: &Path,
) -> Result<Box<dyn BlobAccess>, RepositoryError> {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str());
    let mime_type = field("mediaType").unwrap_or(MIME_OCTET_STREAM);
    match input.kind() {
        "file" => {
            let path = field("path").ok_or_else(|| RepositoryError::InvalidElement {
                element: element.source().to_string(),
                reason: "file input requires a path".to_string(),
            })?;
            let data = fs::read(base_dir.join(path))?;
            Ok(Box::new(DataBlobAccess::new(mime_type, data)))
        }
        "utf8" => {
            let text = field("text").unwrap_or_default();
            Ok(Box::new(DataBlobAccess::new(
                field("mediaType").unwrap_or("text/plain"),
                text.as_bytes(),
            )))
        }
        other => Err(RepositoryError::InvalidElement {
            element: element.source().to_string(),
            reason: format!("unsupported input type '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ocm_types::{elements_from_yaml, ResourceRelation};
    use std::collections::BTreeMap;

    fn resource(name: &str) -> Resource {
        Resource {
            name: name.to_string(),
            version: "v1".to_string(),
            extra_identity: BTreeMap::new(),
            type_: "blob".to_string(),
            relation: ResourceRelation::Local,
            labels: Vec::new(),
            access: GenericAccessSpec::new(LOCAL_BLOB_TYPE, Default::default()),
        }
    }

    #[test]
    fn test_local_blob_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive");
        let blob = DataBlobAccess::new("text/plain", "hello");

        let mut archive = ComponentArchive::create(
            &path,
            ArtifactSetOptions::default(),
            "acme.org/app",
            "v1",
            AccessContext::default(),
        )
        .unwrap();
        archive.add_resource(resource("readme"), &blob, Some("docs/readme")).unwrap();
        assert!(archive.close().unwrap());

        let archive = ComponentArchive::open(AccessMode::ReadOnly, &path, AccessContext::default())
            .unwrap();
        let version: &dyn ComponentVersionAccess = &archive;
        let resources = version.resources();
        assert_eq!(resources.len(), 1);
        let spec = resources[0].access().unwrap();
        let local = spec.as_local_blob().unwrap();
        assert_eq!(local.local_reference, blob.digest().unwrap().file_name());
        assert_eq!(local.reference_name.as_deref(), Some("docs/readme"));

        let method = resources[0].access_method().unwrap();
        assert_eq!(method.mime_type(), "text/plain");
        assert_eq!(method.get().unwrap(), b"hello");
    }

    #[test]
    fn test_close_rejects_missing_local_blob() {
        let dir = tempfile::tempdir().unwrap();
        let context = AccessContext::default();
        let mut archive = ComponentArchive::create(
            dir.path().join("archive"),
            ArtifactSetOptions::default(),
            "acme.org/app",
            "v1",
            context.clone(),
        )
        .unwrap();
        let absent = Digest::from_bytes("never stored");
        let mut readme = resource("readme");
        readme.access = context
            .registry()
            .to_generic(&AccessSpec::LocalBlob(LocalBlobAccessSpec::new(
                absent.file_name(),
                "text/plain",
            )))
            .unwrap();
        let mut descriptor = ComponentDescriptor::new("acme.org/app", "v1");
        descriptor.component.resources.push(readme);
        archive.set_descriptor(descriptor).unwrap();

        assert_matches!(
            archive.close(),
            Err(RepositoryError::MissingLocalBlob { element, digest })
                if element == "resource readme" && digest == absent
        );
    }

    #[test]
    fn test_get_blob_accepts_digest_form() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = ComponentArchive::create(
            dir.path().join("archive"),
            ArtifactSetOptions::default(),
            "acme.org/app",
            "v1",
            AccessContext::default(),
        )
        .unwrap();
        let spec = archive.add_blob(&DataBlobAccess::new("text/plain", "hello")).unwrap();
        let digest = Digest::from_file_name(&spec.local_reference).unwrap();

        assert_eq!(archive.get_blob(&digest.to_string(), "text/plain").unwrap().get().unwrap(), b"hello");
        assert_matches!(
            archive.get_blob("nonsense", "text/plain").err(),
            Some(RepositoryError::InvalidLocalReference(_))
        );
    }

    #[test]
    fn test_set_resource_blob_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = ComponentArchive::create(
            dir.path().join("archive"),
            ArtifactSetOptions::default(),
            "acme.org/app",
            "v1",
            AccessContext::default(),
        )
        .unwrap();
        let err = archive
            .set_resource_blob(0, &DataBlobAccess::new("text/plain", "x"), None, None)
            .unwrap_err();
        assert_matches!(err, RepositoryError::IndexOutOfRange { kind: "resource", index: 0 });
    }

    #[test]
    fn test_add_resource_replaces_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = ComponentArchive::create(
            dir.path().join("archive"),
            ArtifactSetOptions::default(),
            "acme.org/app",
            "v1",
            AccessContext::default(),
        )
        .unwrap();
        archive
            .add_resource(resource("readme"), &DataBlobAccess::new("text/plain", "a"), None)
            .unwrap();
        archive
            .add_resource(resource("readme"), &DataBlobAccess::new("text/plain", "b"), None)
            .unwrap();
        assert_eq!(archive.descriptor().component.resources.len(), 1);
    }

    #[test]
    fn test_add_elements() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("chart.tgz"), b"chart").unwrap();
        let resources = elements_from_yaml(
            "resources.yaml",
            ElementKind::Resource,
            r#"
- name: chart
  type: helmChart
  input:
    type: file
    path: chart.tgz
    mediaType: application/gzip
- name: image
  type: ociImage
  version: "1.2"
  access:
    type: ociArtifact
    imageReference: ghcr.io/acme/app:1.2
"#,
        )
        .unwrap();
        let references = elements_from_yaml(
            "references.yaml",
            ElementKind::Reference,
            r#"
- name: lib
  componentName: acme.org/lib
  version: v2
"#,
        )
        .unwrap();

        let mut archive = ComponentArchive::create(
            dir.path().join("archive"),
            ArtifactSetOptions::default(),
            "acme.org/app",
            "v1",
            AccessContext::default(),
        )
        .unwrap();
        archive.add_elements(&resources, dir.path()).unwrap();
        archive.add_elements(&references, dir.path()).unwrap();

        let component = &archive.descriptor().component;
        assert_eq!(component.resources.len(), 2);
        assert_eq!(component.resources[0].version, "v1");
        assert_eq!(component.resources[0].access.type_name(), LOCAL_BLOB_TYPE);
        assert_eq!(component.resources[1].version, "1.2");
        assert_eq!(component.resources[1].access.type_name(), "ociArtifact");
        assert_eq!(component.component_references[0].target().to_string(), "acme.org/lib:v2");

        let blob = archive
            .access_method(&archive.context().decode(&component.resources[0].access).unwrap())
            .unwrap();
        assert_eq!(blob.mime_type(), "application/gzip");
        assert_eq!(blob.get().unwrap(), b"chart");
    }

    #[test]
    fn test_close_validates_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = ComponentArchive::create(
            dir.path().join("archive"),
            ArtifactSetOptions::default(),
            "",
            "v1",
            AccessContext::default(),
        )
        .unwrap();
        assert_matches!(archive.close(), Err(RepositoryError::Descriptor(_)));
    }
}
