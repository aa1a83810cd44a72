//! Access methods: the operational counterpart of an access specification.

use std::{
    fmt::{Display, Formatter},
    io::Read,
    sync::Arc,
};

use ocm_digest::Digest;

use crate::{
    credentials::Credentials, spec::OCI_ARTIFACT_TYPE, spec::OCI_BLOB_TYPE, AccessError,
    OciArtifactAccessSpec, OciBlobAccessSpec,
};

/// Provides the content an access spec points at.
///
/// This is the only surface the core needs from any concrete storage
/// backend, local or remote.
pub trait AccessMethod: Send + Sync {
    /// The kind of access spec this method was created for.
    fn kind(&self) -> &str;

    /// The media type of the content.
    fn mime_type(&self) -> &str;

    /// Reads the complete content into memory.
    fn get(&self) -> Result<Vec<u8>, AccessError>;

    /// Opens a stream over the content.
    fn reader(&self) -> Result<Box<dyn Read + '_>, AccessError>;
}

/// A boxed error returned by a [`RegistryClient`].
pub type RegistryClientError = Box<dyn std::error::Error + Send + Sync>;

/// A client for an OCI registry, provided by the application.
///
/// The wire protocol is not implemented here; this is the seam where a real
/// registry client is plugged in.
pub trait RegistryClient: Send + Sync {
    /// Fetches the manifest for a reference, returning the manifest bytes and
    /// its media type.
    fn get_manifest(
        &self,
        reference: &OciReference,
        credentials: Option<&Credentials>,
    ) -> Result<(Vec<u8>, String), RegistryClientError>;

    /// Opens a blob of a repository.
    fn get_blob(
        &self,
        reference: &OciReference,
        digest: &Digest,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Read + Send>, RegistryClientError>;
}

/// A parsed OCI image reference: `[host[:port]/]repository[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    /// The registry host, including an optional port
    pub host: String,
    /// The repository path within the registry
    pub repository: String,
    /// An optional tag
    pub tag: Option<String>,
    /// An optional digest
    pub digest: Option<Digest>,
}

/// The registry host used when a reference does not name one.
pub const DEFAULT_REGISTRY_HOST: &str = "docker.io";

impl OciReference {
    /// Parses a reference string.
    pub fn parse(reference: &str) -> Result<Self, AccessError> {
        let invalid = || AccessError::InvalidReference(reference.to_string());

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.parse::<Digest>().map_err(|_| invalid())?)),
            None => (reference, None),
        };

        let (host, path) = match rest.split_once('/') {
            Some((first, path))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), path)
            }
            _ => (DEFAULT_REGISTRY_HOST.to_string(), rest),
        };

        // A tag separator is only valid in the last path segment.
        let last_segment_start = path.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match path[last_segment_start..].split_once(':') {
            Some((_, tag)) => {
                let end = path.len() - tag.len() - 1;
                (&path[..end], Some(tag.to_string()))
            }
            None => (path, None),
        };

        if repository.is_empty() || tag.as_deref() == Some("") {
            return Err(invalid());
        }

        Ok(Self {
            host,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Returns the hostname without a port.
    pub fn hostname(&self) -> &str {
        self.host.split_once(':').map_or(&self.host, |(h, _)| h)
    }

    /// Returns the port if the host names one.
    pub fn port(&self) -> Option<&str> {
        self.host.split_once(':').map(|(_, p)| p)
    }
}

impl Display for OciReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Reads the manifest of an OCI artifact.
pub(crate) struct OciArtifactAccessMethod {
    manifest: Vec<u8>,
    mime_type: String,
}

impl OciArtifactAccessMethod {
    pub(crate) fn new(
        spec: &OciArtifactAccessSpec,
        client: &dyn RegistryClient,
        credentials: Option<&Credentials>,
    ) -> Result<Self, AccessError> {
        let reference = OciReference::parse(&spec.image_reference)?;
        tracing::debug!("fetching manifest of {reference}");
        let (manifest, mime_type) = client
            .get_manifest(&reference, credentials)
            .map_err(|source| AccessError::Registry {
                reference: spec.image_reference.clone(),
                source,
            })?;
        Ok(Self {
            manifest,
            mime_type,
        })
    }
}

impl AccessMethod for OciArtifactAccessMethod {
    fn kind(&self) -> &str {
        OCI_ARTIFACT_TYPE
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn get(&self) -> Result<Vec<u8>, AccessError> {
        Ok(self.manifest.clone())
    }

    fn reader(&self) -> Result<Box<dyn Read + '_>, AccessError> {
        Ok(Box::new(self.manifest.as_slice()))
    }
}

/// Reads a single blob from an OCI repository.
pub(crate) struct OciBlobAccessMethod {
    spec: OciBlobAccessSpec,
    reference: OciReference,
    client: Arc<dyn RegistryClient>,
    credentials: Option<Credentials>,
}

impl OciBlobAccessMethod {
    pub(crate) fn new(
        spec: &OciBlobAccessSpec,
        client: Arc<dyn RegistryClient>,
        credentials: Option<Credentials>,
    ) -> Result<Self, AccessError> {
        Ok(Self {
            reference: OciReference::parse(&spec.reference)?,
            spec: spec.clone(),
            client,
            credentials,
        })
    }
}

impl AccessMethod for OciBlobAccessMethod {
    fn kind(&self) -> &str {
        OCI_BLOB_TYPE
    }

    fn mime_type(&self) -> &str {
        &self.spec.media_type
    }

    fn get(&self) -> Result<Vec<u8>, AccessError> {
        let mut data = Vec::new();
        self.reader()?.read_to_end(&mut data)?;
        let actual = Digest::from_bytes(&data);
        if actual != self.spec.digest {
            return Err(AccessError::DigestMismatch {
                expected: self.spec.digest.clone(),
                actual,
            });
        }
        Ok(data)
    }

    fn reader(&self) -> Result<Box<dyn Read + '_>, AccessError> {
        tracing::debug!("fetching blob {} of {}", self.spec.digest, self.reference);
        let reader = self
            .client
            .get_blob(&self.reference, &self.spec.digest, self.credentials.as_ref())
            .map_err(|source| AccessError::Registry {
                reference: self.spec.reference.clone(),
                source,
            })?;
        Ok(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ubuntu", "docker.io", "ubuntu", None)]
    #[case("ubuntu:v1", "docker.io", "ubuntu", Some("v1"))]
    #[case("test/ubuntu:v1", "docker.io", "test/ubuntu", Some("v1"))]
    #[case("ghcr.io/test/ubuntu", "ghcr.io", "test/ubuntu", None)]
    #[case("ghcr.io:8080/test/ubuntu", "ghcr.io:8080", "test/ubuntu", None)]
    #[case("localhost/app:1.0", "localhost", "app", Some("1.0"))]
    fn test_parse_reference(
        #[case] input: &str,
        #[case] host: &str,
        #[case] repository: &str,
        #[case] tag: Option<&str>,
    ) {
        let reference = OciReference::parse(input).unwrap();
        assert_eq!(reference.host, host);
        assert_eq!(reference.repository, repository);
        assert_eq!(reference.tag.as_deref(), tag);
        assert!(reference.digest.is_none());
    }

    #[test]
    fn test_parse_reference_with_digest() {
        let reference = OciReference::parse(
            "ghcr.io:8080/test/ubuntu:v1@sha256:3d05e105e350edf5be64fe356f4906dd3f9bf442a279e4142db9879bba8e677a",
        )
        .unwrap();
        assert_eq!(reference.hostname(), "ghcr.io");
        assert_eq!(reference.port(), Some("8080"));
        assert_eq!(reference.tag.as_deref(), Some("v1"));
        assert_eq!(
            reference.digest.as_ref().unwrap().hex(),
            "3d05e105e350edf5be64fe356f4906dd3f9bf442a279e4142db9879bba8e677a"
        );
        assert_eq!(
            reference.to_string(),
            "ghcr.io:8080/test/ubuntu:v1@sha256:3d05e105e350edf5be64fe356f4906dd3f9bf442a279e4142db9879bba8e677a"
        );
    }

    #[rstest]
    #[case("ghcr.io/")]
    #[case("ghcr.io/app:")]
    #[case("ghcr.io/app@sha256:nothex")]
    fn test_parse_invalid_reference(#[case] input: &str) {
        assert!(OciReference::parse(input).is_err());
    }
}
