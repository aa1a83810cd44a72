//! The component descriptor: the structured, versioned metadata document of a
//! single component version.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GenericAccessSpec, NameVersion};

/// The schema version written into every descriptor.
pub const SCHEMA_VERSION: &str = "v2";

/// Errors that can occur when decoding, encoding or validating a
/// [`ComponentDescriptor`].
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// The document could not be parsed.
    #[error("failed to decode component descriptor")]
    Decode(#[source] serde_yaml::Error),

    /// The document could not be serialized.
    #[error("failed to encode component descriptor")]
    Encode(#[source] serde_yaml::Error),

    /// The schema version is not supported.
    #[error("unsupported component descriptor schema version '{0}'")]
    UnsupportedSchemaVersion(String),

    /// A mandatory field is empty.
    #[error("component {0} must not be empty")]
    MissingField(&'static str),

    /// Two elements of the same kind share an identity.
    #[error("duplicate {kind} identity {identity}")]
    DuplicateIdentity {
        /// The kind of element (resource, source, reference)
        kind: &'static str,
        /// The rendered identity
        identity: String,
    },

    /// An element with the requested identity does not exist.
    #[error("{kind} {identity} not found")]
    NotFound {
        /// The kind of element (resource, source, reference)
        kind: &'static str,
        /// The rendered identity
        identity: String,
    },
}

/// The identity of an element: its name plus optional extra identity
/// attributes. Attributes are kept sorted so two identities can be compared
/// and rendered deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(BTreeMap<String, String>);

impl Identity {
    /// Constructs an identity consisting only of a name.
    pub fn new(name: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), name.into());
        Self(map)
    }

    /// Adds an attribute to the identity.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the value of a single attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "\"{k}\":\"{v}\"")?;
        }
        f.write_str("}")
    }
}

/// A named, arbitrary value attached to a descriptor element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// The name of the label
    pub name: String,
    /// The value of the label
    pub value: Value,
}

/// Whether a resource is built by the component itself or consumed from
/// elsewhere.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceRelation {
    /// The resource is produced by the component
    #[default]
    Local,
    /// The resource is produced elsewhere and only referenced
    External,
}

/// Capabilities shared by resources, sources and component references.
pub trait ElementMeta {
    /// The kind of element, used in messages.
    const KIND: &'static str;

    /// The name of the element.
    fn name(&self) -> &str;

    /// The version of the element.
    fn version(&self) -> &str;

    /// The extra identity attributes of the element.
    fn extra_identity(&self) -> &BTreeMap<String, String>;

    /// The full identity of the element.
    fn identity(&self) -> Identity {
        self.extra_identity()
            .iter()
            .fold(Identity::new(self.name()), |id, (k, v)| id.with(k, v))
    }
}

/// A piece of content produced or consumed by a component version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// The name of the resource
    pub name: String,
    /// The version of the resource
    #[serde(default)]
    pub version: String,
    /// Additional identity attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    /// The type of the resource, e.g. `ociImage` or `blob`
    #[serde(rename = "type")]
    pub type_: String,
    /// Whether the resource is built by this component
    #[serde(default)]
    pub relation: ResourceRelation,
    /// Labels attached to the resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    /// Where the content of the resource lives
    pub access: GenericAccessSpec,
}

impl ElementMeta for Resource {
    const KIND: &'static str = "resource";

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn extra_identity(&self) -> &BTreeMap<String, String> {
        &self.extra_identity
    }
}

/// The source material a component version was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// The name of the source
    pub name: String,
    /// The version of the source
    #[serde(default)]
    pub version: String,
    /// Additional identity attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    /// The type of the source, e.g. `git`
    #[serde(rename = "type")]
    pub type_: String,
    /// Labels attached to the source
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    /// Where the content of the source lives
    pub access: GenericAccessSpec,
}

impl ElementMeta for Source {
    const KIND: &'static str = "source";

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn extra_identity(&self) -> &BTreeMap<String, String> {
        &self.extra_identity
    }
}

/// A reference to another component version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    /// The local name of the reference
    pub name: String,
    /// The name of the referenced component
    pub component_name: String,
    /// The version of the referenced component
    pub version: String,
    /// Additional identity attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    /// Labels attached to the reference
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

impl ComponentReference {
    /// Returns the name and version of the referenced component version.
    pub fn target(&self) -> NameVersion {
        NameVersion::new(&self.component_name, &self.version)
    }
}

impl ElementMeta for ComponentReference {
    const KIND: &'static str = "reference";

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn extra_identity(&self) -> &BTreeMap<String, String> {
        &self.extra_identity
    }
}

/// The `meta` section of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// The schema version of the document
    pub schema_version: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }
}

/// The `component` section of a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// The name of the component
    pub name: String,
    /// The version of the component
    pub version: String,
    /// The provider of the component
    #[serde(default)]
    pub provider: String,
    /// Labels attached to the component version
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    /// The repositories the component version has been stored in
    #[serde(default)]
    pub repository_contexts: Vec<Value>,
    /// The resources of the component version
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// The sources of the component version
    #[serde(default)]
    pub sources: Vec<Source>,
    /// References to other component versions
    #[serde(default)]
    pub component_references: Vec<ComponentReference>,
}

/// The structured metadata document of a component version.
///
/// Equality is the derived structural equality of all fields; two descriptors
/// are equivalent if and only if they encode to the same document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Document metadata
    pub meta: Metadata,
    /// The component version itself
    pub component: ComponentSpec,
}

impl ComponentDescriptor {
    /// Constructs an empty descriptor for a component version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            meta: Metadata::default(),
            component: ComponentSpec {
                name: name.into(),
                version: version.into(),
                ..ComponentSpec::default()
            },
        }
    }

    /// Parses a descriptor from YAML (or JSON) bytes.
    pub fn decode(data: &[u8]) -> Result<Self, DescriptorError> {
        let descriptor: Self = serde_yaml::from_slice(data).map_err(DescriptorError::Decode)?;
        if descriptor.meta.schema_version != SCHEMA_VERSION {
            return Err(DescriptorError::UnsupportedSchemaVersion(
                descriptor.meta.schema_version,
            ));
        }
        Ok(descriptor)
    }

    /// Serializes the descriptor to YAML.
    pub fn encode(&self) -> Result<Vec<u8>, DescriptorError> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(DescriptorError::Encode)
    }

    /// Returns the name of the component.
    pub fn name(&self) -> &str {
        &self.component.name
    }

    /// Returns the version of the component.
    pub fn version(&self) -> &str {
        &self.component.version
    }

    /// Returns the name and version of the described component version.
    pub fn name_version(&self) -> NameVersion {
        NameVersion::new(&self.component.name, &self.component.version)
    }

    /// Verifies that name and version are set and that element identities are
    /// unique within each element list.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.component.name.is_empty() {
            return Err(DescriptorError::MissingField("name"));
        }
        if self.component.version.is_empty() {
            return Err(DescriptorError::MissingField("version"));
        }
        check_unique(&self.component.resources)?;
        check_unique(&self.component.sources)?;
        check_unique(&self.component.component_references)
    }

    /// Looks up a resource by identity.
    pub fn resource_by_identity(&self, id: &Identity) -> Result<&Resource, DescriptorError> {
        find_by_identity(&self.component.resources, id)
    }

    /// Looks up a source by identity.
    pub fn source_by_identity(&self, id: &Identity) -> Result<&Source, DescriptorError> {
        find_by_identity(&self.component.sources, id)
    }

    /// Looks up a component reference by its local name.
    pub fn reference_by_name(&self, name: &str) -> Result<&ComponentReference, DescriptorError> {
        find_by_identity(&self.component.component_references, &Identity::new(name))
    }
}

fn check_unique<T: ElementMeta>(elements: &[T]) -> Result<(), DescriptorError> {
    let mut seen = HashSet::new();
    for element in elements {
        let identity = element.identity();
        if !seen.insert(identity.clone()) {
            return Err(DescriptorError::DuplicateIdentity {
                kind: T::KIND,
                identity: identity.to_string(),
            });
        }
    }
    Ok(())
}

fn find_by_identity<'a, T: ElementMeta>(
    elements: &'a [T],
    id: &Identity,
) -> Result<&'a T, DescriptorError> {
    elements
        .iter()
        .find(|e| &e.identity() == id)
        .ok_or_else(|| DescriptorError::NotFound {
            kind: T::KIND,
            identity: id.to_string(),
        })
}
