use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The raw form of access specifications. The concrete kind is only known
/// after the `type` field has been dispatched through an access spec registry.
pub type GenericAccessSpec = TypedObject;

/// The raw form of input specifications, describing content that still has to
/// be ingested from an external location.
pub type GenericInputSpec = TypedObject;

/// Errors that can occur when constructing a [`TypedObject`].
#[derive(Debug, thiserror::Error)]
pub enum TypedObjectError {
    /// The object does not contain a string `type` field.
    #[error("typed object requires a string field 'type'")]
    MissingType,

    /// The bytes are not a JSON object.
    #[error("invalid typed object")]
    InvalidJson(#[from] serde_json::Error),
}

/// A JSON-like object with a mandatory `type` discriminator whose other fields
/// are not interpreted yet.
///
/// The `type` value has the form `<kind>[/<version>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct TypedObject {
    fields: Map<String, Value>,
}

impl TypedObject {
    /// Constructs a typed object from a type string and additional fields. A
    /// `type` entry in `fields` is overwritten.
    pub fn new(type_name: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        fields.insert("type".to_string(), Value::String(type_name.into()));
        Self { fields }
    }

    /// Parses a typed object from JSON (or YAML-compatible JSON) bytes.
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, TypedObjectError> {
        let fields: Map<String, Value> = serde_json::from_slice(data)?;
        Self::try_from(fields)
    }

    /// Serializes the object to JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.fields)
    }

    /// Returns the full `type` string.
    pub fn type_name(&self) -> &str {
        self.fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Returns the kind part of the `type` string.
    pub fn kind(&self) -> &str {
        split_type(self.type_name()).0
    }

    /// Returns the version part of the `type` string, empty if omitted.
    pub fn version(&self) -> &str {
        split_type(self.type_name()).1
    }

    /// Returns a single field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns all fields, including `type`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Converts the object into a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Splits a `<kind>[/<version>]` type string.
fn split_type(type_name: &str) -> (&str, &str) {
    type_name.split_once('/').unwrap_or((type_name, ""))
}

impl TryFrom<Map<String, Value>> for TypedObject {
    type Error = TypedObjectError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        match fields.get("type") {
            Some(Value::String(t)) if !t.is_empty() => Ok(Self { fields }),
            _ => Err(TypedObjectError::MissingType),
        }
    }
}

impl From<TypedObject> for Map<String, Value> {
    fn from(value: TypedObject) -> Self {
        value.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_kind_and_version() {
        let spec = TypedObject::from_json_bytes(br#"{"type":"localBlob/v1","localReference":"x"}"#)
            .unwrap();
        assert_eq!(spec.kind(), "localBlob");
        assert_eq!(spec.version(), "v1");
        assert_eq!(spec.get("localReference"), Some(&Value::from("x")));

        let spec = TypedObject::from_json_bytes(br#"{"type":"localBlob"}"#).unwrap();
        assert_eq!(spec.kind(), "localBlob");
        assert_eq!(spec.version(), "");
    }

    #[test]
    fn test_missing_type_is_rejected() {
        assert_matches!(
            TypedObject::from_json_bytes(br#"{"fileName":"x"}"#),
            Err(TypedObjectError::MissingType)
        );
        assert_matches!(
            serde_yaml::from_str::<TypedObject>("type: 3\n"),
            Err(_)
        );
    }

    #[test]
    fn test_yaml_round_trip() {
        let spec: TypedObject =
            serde_yaml::from_str("type: ociArtifact\nimageReference: ghcr.io/acme/app:v1\n")
                .unwrap();
        let text = serde_yaml::to_string(&spec).unwrap();
        let back: TypedObject = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, spec);
    }
}
