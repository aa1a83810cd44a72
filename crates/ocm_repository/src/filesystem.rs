use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use fs_err as fs;
use itertools::Itertools;
use ocm_access::{AccessContext, AccessMethod, AccessSpec, BlobAccess};
use ocm_artifactset::{AccessMode, ArtifactSetOptions};
use ocm_state::{FileStateStore, State, StateError, StateHandler, StateStore};
use ocm_types::{ComponentDescriptor, GenericAccessSpec, NameVersion};
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::{
    ComponentAccess, ComponentArchive, ComponentVersionAccess, Repository, RepositoryError,
};

/// The name of the index file of a filesystem repository.
pub const INDEX_FILE_NAME: &str = "index.json";

/// The directory holding the component archives of a filesystem repository.
pub const COMPONENTS_DIRECTORY_NAME: &str = "components";

const STAGING_PREFIX: &str = ".staging-";

/// Characters that are kept as they are in path segments.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_');

/// Encodes a name as a single path segment. Names consisting of dots only
/// are fully escaped so they never turn into `.` or `..`.
fn path_segment(value: &str) -> String {
    if value.bytes().all(|b| b == b'.') {
        utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
    } else {
        utf8_percent_encode(value, PATH_SEGMENT).to_string()
    }
}

/// The list of component versions of a filesystem repository, in the order
/// they were committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    /// Always `1`
    pub schema_version: u32,
    /// The committed versions
    pub versions: Vec<IndexEntry>,
}

impl Default for RepositoryIndex {
    fn default() -> Self {
        Self {
            schema_version: 1,
            versions: Vec::new(),
        }
    }
}

impl RepositoryIndex {
    /// Returns the entry of a component version.
    pub fn find(&self, name: &str, version: &str) -> Option<&IndexEntry> {
        self.versions
            .iter()
            .find(|e| e.component == name && e.version == version)
    }
}

/// A committed component version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The name of the component
    pub component: String,
    /// The version
    pub version: String,
    /// The path of the component archive, relative to the repository root
    pub path: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct IndexHandler;

impl StateHandler for IndexHandler {
    type Object = RepositoryIndex;

    fn initial(&self) -> Self::Object {
        RepositoryIndex::default()
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

struct Inner {
    root: PathBuf,
    context: AccessContext,
    index: Mutex<State<IndexHandler>>,
    store: FileStateStore,
    read_only: bool,
}

/// A repository stored in a local directory:
///
/// ```text
/// <root>/
///   index.json
///   components/
///     <component>/<version>/      (a component archive)
/// ```
///
/// New versions are staged in a temporary directory below the root and only
/// moved into place and listed in `index.json` when they are committed with
/// [`ComponentAccess::add_version`]. A staged version that is dropped leaves
/// no trace.
#[derive(Clone)]
pub struct FileSystemRepository {
    inner: Arc<Inner>,
}

impl FileSystemRepository {
    /// Creates an empty repository. Fails if a repository already exists at
    /// `root`.
    pub fn create(root: impl Into<PathBuf>, context: AccessContext) -> Result<Self, RepositoryError> {
        let root = root.into();
        let store = FileStateStore::new(root.join(INDEX_FILE_NAME));
        if store.path().exists() {
            return Err(RepositoryError::AlreadyExists(root));
        }

        fs::create_dir_all(root.join(COMPONENTS_DIRECTORY_NAME))?;
        let mut index = State::open(IndexHandler, None)?;
        index.commit(&store)?;

        tracing::debug!("created repository at {}", root.display());
        Ok(Self::from_parts(root, context, index, store, false))
    }

    /// Opens an existing repository. With [`AccessMode::Create`] a missing
    /// repository is created.
    pub fn open(
        mode: AccessMode,
        root: impl Into<PathBuf>,
        context: AccessContext,
    ) -> Result<Self, RepositoryError> {
        let root = root.into();
        let store = FileStateStore::new(root.join(INDEX_FILE_NAME));
        match store.load()? {
            Some(data) => {
                let index = State::open(IndexHandler, Some(data.as_slice()))?;
                Ok(Self::from_parts(root, context, index, store, mode.is_read_only()))
            }
            None if mode == AccessMode::Create => Self::create(root, context),
            None => Err(RepositoryError::RepositoryNotFound(root)),
        }
    }

    fn from_parts(
        root: PathBuf,
        context: AccessContext,
        index: State<IndexHandler>,
        store: FileStateStore,
        read_only: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                root,
                context,
                index: Mutex::new(index),
                store,
                read_only,
            }),
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Returns true if the repository can not be modified.
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Returns all committed component versions in commit order.
    pub fn index(&self) -> Vec<NameVersion> {
        self.inner
            .index
            .lock()
            .get()
            .versions
            .iter()
            .map(|e| NameVersion::new(&e.component, &e.version))
            .collect()
    }

    fn versions_of(&self, name: &str) -> Vec<String> {
        self.inner
            .index
            .lock()
            .get()
            .versions
            .iter()
            .filter(|e| e.component == name)
            .map(|e| e.version.clone())
            .collect()
    }

    fn commit_staged(&self, mut archive: ComponentArchive, staging: TempDir) -> Result<(), RepositoryError> {
        let nv = archive.name_version();
        archive.close()?;
        let source = archive.path().to_path_buf();
        drop(archive);

        let mut index = self.inner.index.lock();
        if index.get().find(&nv.name, &nv.version).is_some() {
            return Err(RepositoryError::VersionAlreadyExists(nv));
        }

        let relative = format!(
            "{COMPONENTS_DIRECTORY_NAME}/{}/{}",
            path_segment(&nv.name),
            path_segment(&nv.version)
        );
        let target = self.inner.root.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&source, &target)?;
        drop(staging);

        index.get_mut().versions.push(IndexEntry {
            component: nv.name.clone(),
            version: nv.version.clone(),
            path: relative,
        });
        if let Err(err) = index.commit(&self.inner.store) {
            index.get_mut().versions.pop();
            if let Err(cleanup) = fs::remove_dir_all(&target) {
                tracing::warn!("failed to remove {}: {}", target.display(), cleanup);
            }
            return Err(err.into());
        }

        tracing::debug!("committed {} to {}", nv, self.inner.root.display());
        Ok(())
    }
}

impl Repository for FileSystemRepository {
    fn context(&self) -> &AccessContext {
        &self.inner.context
    }

    fn lookup_component(&self, name: &str) -> Result<Box<dyn ComponentAccess>, RepositoryError> {
        Ok(Box::new(FileSystemComponent {
            repository: self.clone(),
            name: name.to_string(),
        }))
    }

    fn component_names(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .inner
            .index
            .lock()
            .get()
            .versions
            .iter()
            .map(|e| e.component.clone())
            .unique()
            .collect())
    }
}

struct FileSystemComponent {
    repository: FileSystemRepository,
    name: String,
}

impl ComponentAccess for FileSystemComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn versions(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.repository.versions_of(&self.name))
    }

    fn lookup_version(
        &self,
        version: &str,
    ) -> Result<Box<dyn ComponentVersionAccess>, RepositoryError> {
        let entry = self
            .repository
            .inner
            .index
            .lock()
            .get()
            .find(&self.name, version)
            .cloned();
        let Some(entry) = entry else {
            if self.repository.versions_of(&self.name).is_empty() {
                return Err(RepositoryError::ComponentNotFound(self.name.clone()));
            }
            return Err(RepositoryError::VersionNotFound(NameVersion::new(
                &self.name, version,
            )));
        };

        let inner = &self.repository.inner;
        Ok(Box::new(ComponentArchive::open(
            AccessMode::ReadOnly,
            inner.root.join(&entry.path),
            inner.context.clone(),
        )?))
    }

    fn new_version(
        &self,
        version: &str,
    ) -> Result<Box<dyn ComponentVersionAccess>, RepositoryError> {
        if self.repository.is_read_only() {
            return Err(RepositoryError::ReadOnly);
        }
        if self.has_version(version)? {
            return Err(RepositoryError::VersionAlreadyExists(NameVersion::new(
                &self.name, version,
            )));
        }

        let inner = &self.repository.inner;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&inner.root)?;
        let archive = ComponentArchive::create(
            staging.path().join("archive"),
            ArtifactSetOptions::default(),
            &self.name,
            version,
            inner.context.clone(),
        )?;
        tracing::debug!("staging {}:{} in {}", self.name, version, staging.path().display());
        Ok(Box::new(StagedVersion {
            archive,
            staging,
            repository: self.repository.clone(),
        }))
    }
}

/// A new component version that is not yet part of the repository.
struct StagedVersion {
    archive: ComponentArchive,
    staging: TempDir,
    repository: FileSystemRepository,
}

impl ComponentVersionAccess for StagedVersion {
    fn context(&self) -> &AccessContext {
        self.archive.context()
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        self.archive.descriptor()
    }

    fn set_descriptor(&mut self, descriptor: ComponentDescriptor) -> Result<(), RepositoryError> {
        self.archive.set_descriptor(descriptor)
    }

    fn access_method(&self, spec: &AccessSpec) -> Result<Box<dyn AccessMethod>, RepositoryError> {
        self.archive.access_method(spec)
    }

    fn set_resource_blob(
        &mut self,
        index: usize,
        blob: &dyn BlobAccess,
        reference_name: Option<&str>,
        global_access: Option<GenericAccessSpec>,
    ) -> Result<(), RepositoryError> {
        self.archive
            .set_resource_blob(index, blob, reference_name, global_access)
    }

    fn set_source_blob(
        &mut self,
        index: usize,
        blob: &dyn BlobAccess,
        reference_name: Option<&str>,
        global_access: Option<GenericAccessSpec>,
    ) -> Result<(), RepositoryError> {
        self.archive
            .set_source_blob(index, blob, reference_name, global_access)
    }

    fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let StagedVersion {
            archive,
            staging,
            repository,
        } = *self;
        repository.commit_staged(archive, staging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_version_paths_are_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileSystemRepository::create(dir.path(), AccessContext::default()).unwrap();
        let component = repo.lookup_component("acme.org/app").unwrap();
        let version = component.new_version("v1.0+build").unwrap();
        component.add_version(version).unwrap();

        let index = repo.inner.index.lock().get().clone();
        insta::assert_json_snapshot!(index, @r###"
        {
          "schemaVersion": 1,
          "versions": [
            {
              "component": "acme.org/app",
              "version": "v1.0+build",
              "path": "components/acme.org%2Fapp/v1.0%2Bbuild"
            }
          ]
        }
        "###);
        assert!(dir.path().join(&index.versions[0].path).join("component-descriptor.yaml").is_file());
    }

    #[test]
    fn test_dot_names_stay_inside_components() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let repo = FileSystemRepository::create(&root, AccessContext::default()).unwrap();
        for (name, version) in [("..", "escaped"), ("acme.org/app", "."), (".", "..")] {
            let component = repo.lookup_component(name).unwrap();
            let version = component.new_version(version).unwrap();
            component.add_version(version).unwrap();
        }

        let paths = repo
            .inner
            .index
            .lock()
            .get()
            .versions
            .iter()
            .map(|e| e.path.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            [
                "components/%2E%2E/escaped",
                "components/acme.org%2Fapp/%2E",
                "components/%2E/%2E%2E",
            ]
        );
        assert!(!root.join("escaped").exists());
        assert!(!dir.path().join("escaped").exists());
        for path in &paths {
            assert!(root.join(path).join("component-descriptor.yaml").is_file());
        }
        assert_eq!(
            repo.lookup_component_version("..", "escaped")
                .unwrap()
                .name_version(),
            NameVersion::new("..", "escaped")
        );
    }

    #[test]
    fn test_create_twice() {
        let dir = tempfile::tempdir().unwrap();
        FileSystemRepository::create(dir.path(), AccessContext::default()).unwrap();
        assert_matches!(
            FileSystemRepository::create(dir.path(), AccessContext::default()).err(),
            Some(RepositoryError::AlreadyExists(_))
        );
    }

    #[test]
    fn test_open_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        assert_matches!(
            FileSystemRepository::open(AccessMode::Writable, &root, AccessContext::default()).err(),
            Some(RepositoryError::RepositoryNotFound(_))
        );
        let repo = FileSystemRepository::open(AccessMode::Create, &root, AccessContext::default())
            .unwrap();
        assert!(repo.index().is_empty());
        assert!(root.join(INDEX_FILE_NAME).is_file());
    }
}
