use std::{collections::HashSet, sync::Arc};

use ocm_types::GenericAccessSpec;

use crate::{
    credentials::{oci_matcher, ConsumerIdentity, CredentialResolver, Credentials},
    method::{OciArtifactAccessMethod, OciBlobAccessMethod, OciReference, RegistryClient},
    AccessError, AccessMethod, AccessSpec, AccessSpecRegistry,
};

/// Everything needed to interpret access specs and turn them into access
/// methods: the spec registry, an optional remote registry client and an
/// optional credential resolver.
///
/// Local blobs can not be resolved by the context alone, they need the
/// storage of the component version they belong to. Repositories handle them
/// before falling back to [`AccessContext::access_method`].
#[derive(Clone)]
pub struct AccessContext {
    registry: Arc<AccessSpecRegistry>,
    client: Option<Arc<dyn RegistryClient>>,
    credentials: Option<Arc<dyn CredentialResolver>>,
    local_kinds: HashSet<String>,
}

impl Default for AccessContext {
    fn default() -> Self {
        Self::new(Arc::new(AccessSpecRegistry::default()))
    }
}

impl AccessContext {
    /// Constructs a context using the given registry.
    pub fn new(registry: Arc<AccessSpecRegistry>) -> Self {
        Self {
            registry,
            client: None,
            credentials: None,
            local_kinds: HashSet::new(),
        }
    }

    /// Sets the client used to talk to OCI registries.
    pub fn with_registry_client(self, client: Arc<dyn RegistryClient>) -> Self {
        Self {
            client: Some(client),
            ..self
        }
    }

    /// Sets the resolver used to look up credentials for remote access.
    pub fn with_credential_resolver(self, resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            credentials: Some(resolver),
            ..self
        }
    }

    /// Declares an additional access kind as local to this context, e.g.
    /// `ociArtifact` for a context whose storage is itself an OCI registry.
    pub fn with_local_kind(mut self, kind: impl Into<String>) -> Self {
        self.local_kinds.insert(kind.into());
        self
    }

    /// Returns the spec registry.
    pub fn registry(&self) -> &AccessSpecRegistry {
        &self.registry
    }

    /// Returns true if specs of `kind` are declared local to this context.
    pub fn is_local_kind(&self, kind: &str) -> bool {
        self.local_kinds.contains(kind)
    }

    /// Decodes a raw access spec with the context's registry.
    pub fn decode(&self, spec: &GenericAccessSpec) -> Result<AccessSpec, AccessError> {
        self.registry.decode_generic(spec)
    }

    /// Resolves the credentials for an OCI repository, if a resolver is
    /// configured.
    pub fn oci_credentials(&self, reference: &OciReference) -> Option<Credentials> {
        let resolver = self.credentials.as_ref()?;
        let identity = ConsumerIdentity::for_oci(reference);
        let credentials = resolver.credentials_for_consumer(&identity, oci_matcher);
        if credentials.is_none() {
            tracing::debug!("no credentials configured for {}", reference);
        }
        credentials
    }

    /// Creates an access method for a spec that can be resolved without a
    /// component version's storage.
    pub fn access_method(&self, spec: &AccessSpec) -> Result<Box<dyn AccessMethod>, AccessError> {
        match spec {
            AccessSpec::OciArtifact(spec) => {
                let client = self.require_client(crate::spec::OCI_ARTIFACT_TYPE)?;
                let reference = OciReference::parse(&spec.image_reference)?;
                let credentials = self.oci_credentials(&reference);
                Ok(Box::new(OciArtifactAccessMethod::new(
                    spec,
                    client.as_ref(),
                    credentials.as_ref(),
                )?))
            }
            AccessSpec::OciBlob(spec) => {
                let client = self.require_client(crate::spec::OCI_BLOB_TYPE)?;
                let reference = OciReference::parse(&spec.reference)?;
                let credentials = self.oci_credentials(&reference);
                Ok(Box::new(OciBlobAccessMethod::new(spec, client, credentials)?))
            }
            AccessSpec::LocalBlob(_) => Err(AccessError::NoStorageContext(spec.kind().to_string())),
            AccessSpec::Opaque(_) => Err(AccessError::NotSupported(spec.kind().to_string())),
        }
    }

    fn require_client(&self, kind: &str) -> Result<Arc<dyn RegistryClient>, AccessError> {
        self.client
            .clone()
            .ok_or_else(|| AccessError::NotSupported(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::StaticCredentialResolver, method::RegistryClientError, LocalBlobAccessSpec,
        OciArtifactAccessSpec,
    };
    use assert_matches::assert_matches;
    use ocm_digest::Digest;
    use std::{io::Read, sync::Mutex};

    #[derive(Default)]
    struct RecordingClient {
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    impl RegistryClient for RecordingClient {
        fn get_manifest(
            &self,
            reference: &OciReference,
            credentials: Option<&Credentials>,
        ) -> Result<(Vec<u8>, String), RegistryClientError> {
            self.seen.lock().unwrap().push((
                reference.to_string(),
                credentials.and_then(|c| c.get("username").map(str::to_string)),
            ));
            Ok((b"{}".to_vec(), "application/vnd.oci.image.manifest.v1+json".to_string()))
        }

        fn get_blob(
            &self,
            _reference: &OciReference,
            _digest: &Digest,
            _credentials: Option<&Credentials>,
        ) -> Result<Box<dyn Read + Send>, RegistryClientError> {
            Err("not implemented".into())
        }
    }

    #[test]
    fn test_locality() {
        let ctx = AccessContext::default();
        let local = AccessSpec::from(LocalBlobAccessSpec::new("sha256.abc", "text/plain"));
        let remote = AccessSpec::from(OciArtifactAccessSpec {
            image_reference: "ghcr.io/acme/app:v1".to_string(),
        });
        assert!(local.is_local(&ctx));
        assert!(!remote.is_local(&ctx));

        let ctx = ctx.with_local_kind("ociArtifact");
        assert!(remote.is_local(&ctx));
    }

    #[test]
    fn test_oci_artifact_method_uses_credentials() {
        let client = Arc::new(RecordingClient::default());
        let resolver = Arc::new(StaticCredentialResolver::new());
        resolver.add_consumer(
            ConsumerIdentity::new()
                .with(crate::credentials::ID_TYPE, crate::credentials::OCI_CONSUMER_TYPE)
                .with(crate::credentials::ID_HOSTNAME, "ghcr.io")
                .with(crate::credentials::ID_PATH_PREFIX, "acme"),
            Credentials::basic("acme", "secret"),
        );
        let ctx = AccessContext::default()
            .with_registry_client(client.clone())
            .with_credential_resolver(resolver);

        let spec = AccessSpec::from(OciArtifactAccessSpec {
            image_reference: "ghcr.io/acme/app:v1".to_string(),
        });
        let method = ctx.access_method(&spec).unwrap();
        assert_eq!(method.kind(), "ociArtifact");
        assert_eq!(method.mime_type(), "application/vnd.oci.image.manifest.v1+json");
        assert_eq!(method.get().unwrap(), b"{}");

        let seen = client.seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[("ghcr.io/acme/app:v1".to_string(), Some("acme".to_string()))]
        );
    }

    #[test]
    fn test_access_method_without_client() {
        let ctx = AccessContext::default();
        let spec = AccessSpec::from(OciArtifactAccessSpec {
            image_reference: "ghcr.io/acme/app:v1".to_string(),
        });
        assert_matches!(
            ctx.access_method(&spec).err(),
            Some(AccessError::NotSupported(kind)) if kind == "ociArtifact"
        );

        let local = AccessSpec::from(LocalBlobAccessSpec::new("sha256.abc", "text/plain"));
        assert_matches!(
            ctx.access_method(&local).err(),
            Some(AccessError::NoStorageContext(_))
        );
    }
}
