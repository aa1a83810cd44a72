use std::{
    collections::BTreeSet,
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};

use assert_matches::assert_matches;
use flate2::read::GzDecoder;
use ocm_access::{BlobAccess, DataBlobAccess, MIME_OCTET_STREAM};
use ocm_artifactset::{
    AccessMode, ArtifactBuilder, ArtifactEntry, ArtifactSet, ArtifactSetError,
    ArtifactSetOptions, Format, ARTIFACT_SET_DESCRIPTOR_FILE_NAME, BLOBS_DIRECTORY_NAME,
};
use ocm_digest::Digest;
use rstest::rstest;

const TESTDATA_BLOB: &str = "sha256.810ff2fb242a5dee4220f2cb0e6a519891fb67f2f828a6cab4ef8894633b1f50";
const CONFIG_BLOB: &str = "sha256.44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a";

/// Adds a manifest with a single `testdata` layer and a `{}` config.
fn fill(set: &mut ArtifactSet) -> ArtifactEntry {
    let mut builder = ArtifactBuilder::new();
    let layer = DataBlobAccess::new(MIME_OCTET_STREAM, "testdata");
    assert_eq!(builder.add_layer(set, &layer).unwrap(), 0);
    builder
        .set_config(set, &DataBlobAccess::new(MIME_OCTET_STREAM, "{}"))
        .unwrap();
    let manifest = builder.build(set).unwrap();

    assert_eq!(manifest.layers[0].digest, Digest::from_bytes("testdata"));
    assert_eq!(manifest.layers[0].media_type, MIME_OCTET_STREAM);
    assert_eq!(manifest.layers[0].size, 8);

    set.add_artifact(&manifest, None).unwrap()
}

fn blob_names(dir: &Path) -> BTreeSet<String> {
    walkdir::WalkDir::new(dir.join(BLOBS_DIRECTORY_NAME))
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

fn tgz_entries(path: &Path) -> Vec<(PathBuf, tar::EntryType)> {
    let mut archive = tar::Archive::new(GzDecoder::new(std::fs::File::open(path).unwrap()));
    archive
        .entries()
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            (e.path().unwrap().into_owned(), e.header().entry_type())
        })
        .collect()
}

#[test]
fn test_directory_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test");

    let mut set = ArtifactSet::create(&path, ArtifactSetOptions::default().with_file_mode(0o700))
        .unwrap();
    assert!(path.join(BLOBS_DIRECTORY_NAME).is_dir());

    let entry = fill(&mut set);
    assert!(set.close().unwrap());
    assert!(path.join(ARTIFACT_SET_DESCRIPTOR_FILE_NAME).is_file());

    let blobs = blob_names(&path);
    assert_eq!(
        blobs,
        BTreeSet::from([
            TESTDATA_BLOB.to_string(),
            CONFIG_BLOB.to_string(),
            entry.digest.file_name(),
        ])
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

#[test]
fn test_tgz_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.tgz");

    let mut set = ArtifactSet::create(
        &path,
        ArtifactSetOptions::default()
            .with_format(Format::Tgz)
            .with_file_mode(0o600),
    )
    .unwrap();
    let entry = fill(&mut set);
    assert!(set.close().unwrap());
    assert!(path.is_file());

    let entries = tgz_entries(&path);
    let dirs: Vec<_> = entries
        .iter()
        .filter(|(_, t)| t.is_dir())
        .map(|(p, _)| p.clone())
        .collect();
    assert_eq!(dirs, vec![PathBuf::from(BLOBS_DIRECTORY_NAME)]);

    let files: BTreeSet<_> = entries
        .iter()
        .filter(|(_, t)| t.is_file())
        .map(|(p, _)| p.clone())
        .collect();
    let blobs = Path::new(BLOBS_DIRECTORY_NAME);
    assert_eq!(
        files,
        BTreeSet::from([
            PathBuf::from(ARTIFACT_SET_DESCRIPTOR_FILE_NAME),
            blobs.join(TESTDATA_BLOB),
            blobs.join(CONFIG_BLOB),
            blobs.join(entry.digest.file_name()),
        ])
    );
}

#[rstest]
#[case::directory(Format::Directory, "test")]
#[case::tgz(Format::Tgz, "test.tgz")]
fn test_read_manifest(#[case] format: Format, #[case] name: &str) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);

    let mut set = ArtifactSet::create(&path, ArtifactSetOptions::default().with_format(format))
        .unwrap();
    fill(&mut set);
    set.close().unwrap();

    let mut set = ArtifactSet::open(AccessMode::ReadOnly, &path).unwrap();
    assert_eq!(set.format(), format);
    assert_eq!(set.descriptor().manifests.len(), 1);

    let manifest = set
        .get_artifact(&set.descriptor().manifests[0].digest)
        .unwrap();
    assert_eq!(manifest.layers.len(), 1);

    let blob = set
        .get_blob_data(
            &"sha256:810ff2fb242a5dee4220f2cb0e6a519891fb67f2f828a6cab4ef8894633b1f50"
                .parse()
                .unwrap(),
        )
        .unwrap();
    assert_eq!(blob.get().unwrap(), b"testdata");
    assert_eq!(blob.mime_type(), MIME_OCTET_STREAM);

    let mut content = String::new();
    blob.reader().unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "testdata");

    assert!(!set.close().unwrap());
}

#[tracing_test::traced_test]
#[test]
fn test_dedup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test");
    let mut set = ArtifactSet::create(&path, ArtifactSetOptions::default()).unwrap();

    let first = set
        .add_blob(&DataBlobAccess::new(MIME_OCTET_STREAM, "testdata"))
        .unwrap();
    let second = set
        .add_blob(&DataBlobAccess::new(MIME_OCTET_STREAM, "testdata"))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(set.descriptor().blobs.len(), 1);
    set.close().unwrap();

    assert_eq!(blob_names(&path), BTreeSet::from([TESTDATA_BLOB.to_string()]));
    assert!(logs_contain("is already present"));
}

#[test]
fn test_format_equivalence() {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().join("test");
    let tgz_path = dir.path().join("test.tgz");

    for (path, format) in [(&dir_path, Format::Directory), (&tgz_path, Format::Tgz)] {
        let mut set =
            ArtifactSet::create(path, ArtifactSetOptions::default().with_format(format)).unwrap();
        let entry = fill(&mut set);
        set.add_tags(&entry.digest, &["v1", "latest"]).unwrap();
        set.close().unwrap();
    }

    let from_dir = ArtifactSet::open(AccessMode::ReadOnly, &dir_path).unwrap();
    let from_tgz = ArtifactSet::open(AccessMode::ReadOnly, &tgz_path).unwrap();
    assert_eq!(from_dir.descriptor(), from_tgz.descriptor());

    let digests = |set: &ArtifactSet| -> BTreeSet<Digest> {
        set.descriptor().referenced_digests().cloned().collect()
    };
    assert_eq!(digests(&from_dir), digests(&from_tgz));
    for digest in digests(&from_dir) {
        assert!(from_tgz.has_blob(&digest));
        assert_eq!(
            from_dir.get_blob_data(&digest).unwrap().get().unwrap(),
            from_tgz.get_blob_data(&digest).unwrap().get().unwrap()
        );
    }
}

#[rstest]
#[case::directory(Format::Directory, "test", ARTIFACT_SET_DESCRIPTOR_FILE_NAME)]
#[case::tgz(Format::Tgz, "test.tgz", "")]
fn test_close_without_changes_does_not_rewrite(
    #[case] format: Format,
    #[case] name: &str,
    #[case] descriptor: &str,
) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    let written = if descriptor.is_empty() {
        path.clone()
    } else {
        path.join(descriptor)
    };

    let mut set = ArtifactSet::create(&path, ArtifactSetOptions::default().with_format(format))
        .unwrap();
    let entry = fill(&mut set);
    set.close().unwrap();
    let modified = std::fs::metadata(&written).unwrap().modified().unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let mut set = ArtifactSet::open(AccessMode::Writable, &path).unwrap();
    assert!(!set.close().unwrap());
    assert_eq!(
        std::fs::metadata(&written).unwrap().modified().unwrap(),
        modified
    );

    // Re-adding existing content is not a change either.
    let mut set = ArtifactSet::open(AccessMode::Writable, &path).unwrap();
    set.add_blob(&DataBlobAccess::new(MIME_OCTET_STREAM, "testdata"))
        .unwrap();
    assert!(!set.close().unwrap());

    let mut set = ArtifactSet::open(AccessMode::Writable, &path).unwrap();
    set.add_tags(&entry.digest, &["v2"]).unwrap();
    assert!(set.close().unwrap());
    assert_ne!(
        std::fs::metadata(&written).unwrap().modified().unwrap(),
        modified
    );

    let set = ArtifactSet::open(AccessMode::ReadOnly, &path).unwrap();
    assert_eq!(set.resolve_tag("v2").unwrap().digest, entry.digest);
}

#[test]
fn test_create_existing_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert_matches!(
        ArtifactSet::create(dir.path(), ArtifactSetOptions::default()).err(),
        Some(ArtifactSetError::AlreadyExists(path)) if path == dir.path()
    );
}

#[test]
fn test_open_without_descriptor_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join(BLOBS_DIRECTORY_NAME)).unwrap();
    assert_matches!(
        ArtifactSet::open(AccessMode::Writable, dir.path()).err(),
        Some(ArtifactSetError::MissingDescriptor(_))
    );
}

#[test]
fn test_open_missing_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing");
    assert_matches!(
        ArtifactSet::open(AccessMode::ReadOnly, &path).err(),
        Some(ArtifactSetError::NotFound(_))
    );

    let mut set = ArtifactSet::open(AccessMode::Create, &path).unwrap();
    assert!(set.close().unwrap());
    assert!(path.join(ARTIFACT_SET_DESCRIPTOR_FILE_NAME).is_file());
}

#[test]
fn test_read_only_set_rejects_modifications() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test");
    let mut set = ArtifactSet::create(&path, ArtifactSetOptions::default()).unwrap();
    let entry = fill(&mut set);
    set.close().unwrap();

    let mut set = ArtifactSet::open(AccessMode::ReadOnly, &path).unwrap();
    assert_matches!(
        set.add_blob(&DataBlobAccess::new(MIME_OCTET_STREAM, "other")),
        Err(ArtifactSetError::ReadOnly)
    );
    assert_matches!(
        set.add_tags(&entry.digest, &["v2"]),
        Err(ArtifactSetError::ReadOnly)
    );
}

#[test]
fn test_artifact_requires_present_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = ArtifactSet::create(dir.path().join("test"), ArtifactSetOptions::default())
        .unwrap();

    let mut other = ArtifactSet::create(dir.path().join("other"), ArtifactSetOptions::default())
        .unwrap();
    let mut builder = ArtifactBuilder::new();
    builder
        .add_layer(&mut other, &DataBlobAccess::new(MIME_OCTET_STREAM, "testdata"))
        .unwrap();
    let manifest = builder.build(&mut other).unwrap();

    assert_matches!(
        set.add_artifact(&manifest, Some("v1")),
        Err(ArtifactSetError::NotFound(_))
    );
    assert!(set.descriptor().manifests.is_empty());
}

#[test]
fn test_unknown_blob() {
    let dir = tempfile::tempdir().unwrap();
    let set = ArtifactSet::create(dir.path().join("test"), ArtifactSetOptions::default()).unwrap();
    assert_matches!(
        set.get_blob_data(&Digest::from_bytes("nothing")),
        Err(ArtifactSetError::NotFound(_))
    );
    assert_matches!(
        set.get_artifact(&Digest::from_bytes("nothing")),
        Err(ArtifactSetError::NotFound(_))
    );
}

#[test]
fn test_tags() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = ArtifactSet::create(dir.path().join("test"), ArtifactSetOptions::default())
        .unwrap();

    let mut builder = ArtifactBuilder::new();
    builder
        .add_layer(&mut set, &DataBlobAccess::new(MIME_OCTET_STREAM, "testdata"))
        .unwrap();
    let manifest = builder.build(&mut set).unwrap();

    let entry = set.add_artifact(&manifest, Some("v1")).unwrap();
    assert_eq!(entry.tags, vec!["v1".to_string()]);

    // Adding the same manifest again only adds the tag.
    let entry = set.add_artifact(&manifest, Some("latest")).unwrap();
    assert_eq!(entry.tags, vec!["v1".to_string(), "latest".to_string()]);
    assert_eq!(set.descriptor().manifests.len(), 1);

    assert_eq!(set.resolve_tag("latest").unwrap().digest, entry.digest);
    assert!(set.resolve_tag("v2").is_none());
    assert_matches!(
        set.add_tags(&Digest::from_bytes("nothing"), &["v2"]),
        Err(ArtifactSetError::NotFound(_))
    );
}
