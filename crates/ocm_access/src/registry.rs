//! Dispatch from `(kind, version)` type discriminators to concrete access
//! specifications.

use std::collections::HashMap;

use ocm_types::GenericAccessSpec;
use serde::de::DeserializeOwned;

use crate::{
    spec::{
        LegacyLocalFilesystemBlob, LocalBlobAccessSpec, LEGACY_LOCAL_FILESYSTEM_BLOB_TYPE,
        LEGACY_OCI_REGISTRY_TYPE, LOCAL_BLOB_TYPE, OCI_ARTIFACT_TYPE, OCI_BLOB_TYPE,
    },
    AccessError, AccessSpec,
};

/// A function that decodes the raw form of an access spec into a concrete
/// variant.
pub type DecodeFn = fn(&GenericAccessSpec) -> Result<AccessSpec, serde_json::Error>;

/// The decoder registered for one `(kind, version)` pair.
#[derive(Clone, Copy)]
enum Decoder {
    Typed(DecodeFn),
    Opaque,
}

/// Maps `(kind, version)` type discriminators to decoders.
///
/// Decoding is many-to-one: a legacy type name decodes to the same variant as
/// its current name. Encoding is one-to-one: the current canonical name is
/// always emitted. An empty version denotes the default schema of a kind.
///
/// The registry is populated when the application is composed and then only
/// read, so it is passed around as an explicit (usually shared) value rather
/// than being a global.
#[derive(Clone)]
pub struct AccessSpecRegistry {
    decoders: HashMap<(String, String), Decoder>,
}

impl Default for AccessSpecRegistry {
    /// Constructs a registry with all built-in kinds, including legacy names.
    fn default() -> Self {
        let mut registry = Self::empty();
        for version in ["", "v1"] {
            registry.register(LOCAL_BLOB_TYPE, version, decode_local_blob);
            registry.register(LEGACY_LOCAL_FILESYSTEM_BLOB_TYPE, version, decode_legacy_local_blob);
            registry.register(OCI_ARTIFACT_TYPE, version, decode_oci_artifact);
            registry.register(LEGACY_OCI_REGISTRY_TYPE, version, decode_oci_artifact);
            registry.register(OCI_BLOB_TYPE, version, decode_oci_blob);
        }
        registry
    }
}

impl AccessSpecRegistry {
    /// Constructs a registry without any registered kinds.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers a decoder for a `(kind, version)` pair, replacing any
    /// previous registration.
    pub fn register(&mut self, kind: impl Into<String>, version: impl Into<String>, decode: DecodeFn) {
        self.decoders
            .insert((kind.into(), version.into()), Decoder::Typed(decode));
    }

    /// Registers a kind whose specs are accepted but not interpreted. They
    /// decode to [`AccessSpec::Opaque`] and are never considered local unless
    /// a context says so.
    pub fn register_opaque(&mut self, kind: impl Into<String>, version: impl Into<String>) {
        self.decoders
            .insert((kind.into(), version.into()), Decoder::Opaque);
    }

    /// Returns true if the `(kind, version)` pair can be decoded.
    pub fn is_known(&self, kind: &str, version: &str) -> bool {
        self.decoders
            .contains_key(&(kind.to_string(), version.to_string()))
    }

    /// Decodes an access spec from its JSON representation.
    pub fn decode(&self, data: &[u8]) -> Result<AccessSpec, AccessError> {
        let generic = GenericAccessSpec::from_json_bytes(data)
            .map_err(|e| AccessError::InvalidGenericSpec(e.to_string()))?;
        self.decode_generic(&generic)
    }

    /// Decodes the raw form of an access spec, as found in a component
    /// descriptor.
    pub fn decode_generic(&self, spec: &GenericAccessSpec) -> Result<AccessSpec, AccessError> {
        let (kind, version) = (spec.kind(), spec.version());
        let decoder = self
            .decoders
            .get(&(kind.to_string(), version.to_string()))
            .ok_or_else(|| AccessError::UnknownAccessKind {
                kind: kind.to_string(),
                version: version.to_string(),
            })?;
        match decoder {
            Decoder::Typed(decode) => decode(spec).map_err(|source| AccessError::InvalidSpec {
                type_name: spec.type_name().to_string(),
                source,
            }),
            Decoder::Opaque => Ok(AccessSpec::Opaque(spec.clone())),
        }
    }

    /// Encodes an access spec into its canonical JSON representation.
    pub fn encode(&self, spec: &AccessSpec) -> Result<Vec<u8>, AccessError> {
        serde_json::to_vec(spec).map_err(AccessError::Encode)
    }

    /// Converts an access spec into the raw form stored in descriptors.
    pub fn to_generic(&self, spec: &AccessSpec) -> Result<GenericAccessSpec, AccessError> {
        let value = serde_json::to_value(spec).map_err(AccessError::Encode)?;
        serde_json::from_value(value).map_err(AccessError::Encode)
    }

    /// Returns all registered `kind[/version]` type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .decoders
            .keys()
            .map(|(kind, version)| {
                if version.is_empty() {
                    kind.clone()
                } else {
                    format!("{kind}/{version}")
                }
            })
            .collect();
        names.sort();
        names
    }
}

/// Decodes the fields of a spec, ignoring `type`.
fn from_fields<T: DeserializeOwned>(spec: &GenericAccessSpec) -> Result<T, serde_json::Error> {
    let mut fields = spec.fields().clone();
    fields.remove("type");
    serde_json::from_value(serde_json::Value::Object(fields))
}

fn decode_local_blob(spec: &GenericAccessSpec) -> Result<AccessSpec, serde_json::Error> {
    from_fields::<LocalBlobAccessSpec>(spec).map(AccessSpec::LocalBlob)
}

fn decode_legacy_local_blob(spec: &GenericAccessSpec) -> Result<AccessSpec, serde_json::Error> {
    from_fields::<LegacyLocalFilesystemBlob>(spec).map(|legacy| AccessSpec::LocalBlob(legacy.into()))
}

fn decode_oci_artifact(spec: &GenericAccessSpec) -> Result<AccessSpec, serde_json::Error> {
    from_fields(spec).map(AccessSpec::OciArtifact)
}

fn decode_oci_blob(spec: &GenericAccessSpec) -> Result<AccessSpec, serde_json::Error> {
    from_fields(spec).map(AccessSpec::OciBlob)
}
