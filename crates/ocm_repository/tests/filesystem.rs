use std::collections::BTreeMap;

use assert_matches::assert_matches;
use ocm_access::{AccessContext, DataBlobAccess, LOCAL_BLOB_TYPE};
use ocm_artifactset::AccessMode;
use ocm_repository::{
    ComponentVersionAccess, FileSystemRepository, Repository, RepositoryError, INDEX_FILE_NAME,
};
use ocm_types::{
    ComponentDescriptor, GenericAccessSpec, NameVersion, Resource, ResourceRelation,
};
use rstest::rstest;
use walkdir::WalkDir;

fn repository() -> (tempfile::TempDir, FileSystemRepository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileSystemRepository::create(dir.path().join("repo"), AccessContext::default())
        .unwrap();
    (dir, repo)
}

fn add(repo: &FileSystemRepository, name: &str, version: &str) {
    let component = repo.lookup_component(name).unwrap();
    let v = component.new_version(version).unwrap();
    component.add_version(v).unwrap();
}

fn blob_resource(name: &str) -> ComponentDescriptor {
    let mut descriptor = ComponentDescriptor::new("acme.org/app", "v1");
    descriptor.component.resources.push(Resource {
        name: name.to_string(),
        version: "v1".to_string(),
        extra_identity: BTreeMap::new(),
        type_: "blob".to_string(),
        relation: ResourceRelation::Local,
        labels: Vec::new(),
        access: GenericAccessSpec::new(LOCAL_BLOB_TYPE, Default::default()),
    });
    descriptor
}

#[test]
fn test_index_keeps_commit_order() {
    let (_dir, repo) = repository();
    add(&repo, "acme.org/lib", "v2");
    add(&repo, "acme.org/app", "v1");
    add(&repo, "acme.org/lib", "v1");

    assert_eq!(
        repo.index(),
        vec![
            NameVersion::new("acme.org/lib", "v2"),
            NameVersion::new("acme.org/app", "v1"),
            NameVersion::new("acme.org/lib", "v1"),
        ]
    );
    assert_eq!(
        repo.component_names().unwrap(),
        vec!["acme.org/lib".to_string(), "acme.org/app".to_string()]
    );
    assert_eq!(
        repo.lookup_component("acme.org/lib").unwrap().versions().unwrap(),
        vec!["v2".to_string(), "v1".to_string()]
    );

    let reopened =
        FileSystemRepository::open(AccessMode::ReadOnly, repo.root(), AccessContext::default())
            .unwrap();
    assert_eq!(reopened.index(), repo.index());
}

#[test]
fn test_dropped_version_leaves_no_trace() {
    let (_dir, repo) = repository();
    let component = repo.lookup_component("acme.org/app").unwrap();
    let mut version = component.new_version("v1").unwrap();
    version.set_descriptor(blob_resource("readme")).unwrap();
    version
        .set_resource_blob(0, &DataBlobAccess::new("text/plain", "hello"), None, None)
        .unwrap();
    drop(version);

    assert!(repo.index().is_empty());
    let entries: Vec<_> = WalkDir::new(repo.root())
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["components".to_string(), INDEX_FILE_NAME.to_string()]);
}

#[test]
fn test_version_already_exists() {
    let (_dir, repo) = repository();
    add(&repo, "acme.org/app", "v1");

    let component = repo.lookup_component("acme.org/app").unwrap();
    assert_matches!(
        component.new_version("v1").err(),
        Some(RepositoryError::VersionAlreadyExists(nv)) if nv == NameVersion::new("acme.org/app", "v1")
    );
}

#[test]
fn test_concurrently_staged_duplicate_is_rejected() {
    let (_dir, repo) = repository();
    let component = repo.lookup_component("acme.org/app").unwrap();
    let first = component.new_version("v1").unwrap();
    let second = component.new_version("v1").unwrap();

    component.add_version(first).unwrap();
    assert_matches!(
        component.add_version(second),
        Err(RepositoryError::VersionAlreadyExists(_))
    );
    assert_eq!(repo.index().len(), 1);
}

#[rstest]
#[case::unknown_component("acme.org/other", "v1")]
#[case::unknown_version("acme.org/app", "v2")]
fn test_lookup_missing(#[case] name: &str, #[case] version: &str) {
    let (_dir, repo) = repository();
    add(&repo, "acme.org/app", "v1");

    let err = repo.lookup_component_version(name, version).err();
    if name == "acme.org/app" {
        assert_matches!(err, Some(RepositoryError::VersionNotFound(_)));
    } else {
        assert_matches!(err, Some(RepositoryError::ComponentNotFound(n)) if n == name);
    }
}

#[test]
fn test_local_blob_survives_commit() {
    let (_dir, repo) = repository();
    let component = repo.lookup_component("acme.org/app").unwrap();
    let mut version = component.new_version("v1").unwrap();
    version.set_descriptor(blob_resource("readme")).unwrap();
    version
        .set_resource_blob(0, &DataBlobAccess::new("text/plain", "hello"), Some("readme"), None)
        .unwrap();
    component.add_version(version).unwrap();

    let version = repo.lookup_component_version("acme.org/app", "v1").unwrap();
    let resources = version.resources();
    let spec = resources[0].access().unwrap();
    assert_eq!(spec.as_local_blob().unwrap().reference_name.as_deref(), Some("readme"));
    assert_eq!(resources[0].access_method().unwrap().get().unwrap(), b"hello");
}

#[test]
fn test_read_only_repository() {
    let (_dir, repo) = repository();
    let reopened =
        FileSystemRepository::open(AccessMode::ReadOnly, repo.root(), AccessContext::default())
            .unwrap();
    assert_matches!(
        reopened.lookup_component("acme.org/app").unwrap().new_version("v1").err(),
        Some(RepositoryError::ReadOnly)
    );
}

#[test]
fn test_add_version_checks_component_name() {
    let (_dir, repo) = repository();
    let app = repo.lookup_component("acme.org/app").unwrap();
    let lib = repo.lookup_component("acme.org/lib").unwrap();
    let version = app.new_version("v1").unwrap();
    assert_matches!(
        lib.add_version(version),
        Err(RepositoryError::NameMismatch { .. })
    );
    assert!(repo.index().is_empty());
}
