//! Element declarations: resources, sources and references as they are
//! declared in input files (e.g. a `resources.yaml`) before they are added to a
//! component descriptor.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

use crate::{
    ComponentReference, GenericAccessSpec, GenericInputSpec, Label, Resource, ResourceRelation,
    Source,
};

/// An error that occurred while reading element declarations.
#[derive(Debug, thiserror::Error)]
pub enum ElementError {
    /// The declaration file is not valid YAML.
    #[error("{origin}: invalid yaml")]
    InvalidYaml {
        /// The declaration file
        origin: String,
        /// The parse error
        #[source]
        source: serde_yaml::Error,
    },

    /// The declaration file does not contain a list of elements.
    #[error("{origin}: expected a list of {kind} declarations")]
    NotAList {
        /// The declaration file
        origin: String,
        /// The kind of element that was expected
        kind: ElementKind,
    },

    /// A single declaration could not be parsed.
    #[error("{origin}: invalid {kind} declaration")]
    InvalidDeclaration {
        /// The position of the declaration
        origin: SourceInfo,
        /// The kind of element
        kind: ElementKind,
        /// The parse error
        #[source]
        source: serde_json::Error,
    },

    /// A declaration is structurally valid but inconsistent.
    #[error("{origin}: {message}")]
    Invalid {
        /// The position of the declaration
        origin: SourceInfo,
        /// What is wrong
        message: String,
    },
}

/// The kinds of elements a component version is composed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// A resource
    Resource,
    /// A source
    Source,
    /// A component reference
    Reference,
}

impl ElementKind {
    /// The key under which declarations of this kind are listed.
    pub fn key(&self) -> &'static str {
        match self {
            ElementKind::Resource => "resources",
            ElementKind::Source => "sources",
            ElementKind::Reference => "componentReferences",
        }
    }

    /// Returns true if elements of this kind carry content and therefore need
    /// either an access or an input specification.
    pub fn requires_content(&self) -> bool {
        !matches!(self, ElementKind::Reference)
    }
}

impl Display for ElementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ElementKind::Resource => "resource",
            ElementKind::Source => "source",
            ElementKind::Reference => "reference",
        })
    }
}

/// One step of an index path into a declaration file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceIndex {
    Position(usize),
    Key(String),
}

impl Display for SourceIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceIndex::Position(i) => write!(f, "[{i}]"),
            SourceIndex::Key(k) => write!(f, "[{k}]"),
        }
    }
}

/// Traces a declaration back to where it came from, e.g.
/// `resources.yaml[2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    origin: String,
    indices: Vec<SourceIndex>,
}

impl SourceInfo {
    /// Constructs a source info pointing at a whole file.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            indices: Vec::new(),
        }
    }

    /// Returns the file the element was declared in.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns a source info for the entry at `index` below this one.
    pub fn sub(&self, index: usize) -> Self {
        let mut indices = self.indices.clone();
        indices.push(SourceIndex::Position(index));
        Self {
            origin: self.origin.clone(),
            indices,
        }
    }

    /// Returns a source info for the entry named `key` below this one.
    pub fn sub_key(&self, key: impl Into<String>) -> Self {
        let mut indices = self.indices.clone();
        indices.push(SourceIndex::Key(key.into()));
        Self {
            origin: self.origin.clone(),
            indices,
        }
    }

    /// Renders the full path, e.g. `resources.yaml[2]`.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl Display for SourceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.origin)?;
        for index in &self.indices {
            write!(f, "{index}")?;
        }
        Ok(())
    }
}

/// The content part of a declaration: either where the content already lives
/// or where it has to be ingested from.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceInput {
    /// Content that is already placed somewhere
    pub access: Option<GenericAccessSpec>,
    /// Content that still has to be ingested
    pub input: Option<GenericInputSpec>,
}

/// The declaration of a resource.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// The name of the resource
    pub name: String,
    /// The version of the resource, defaults to the component version
    pub version: Option<String>,
    /// Additional identity attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    /// The type of the resource
    #[serde(rename = "type")]
    pub type_: String,
    /// Whether the resource is built by the component
    #[serde(default)]
    pub relation: ResourceRelation,
    /// Labels attached to the resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

/// The declaration of a source.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// The name of the source
    pub name: String,
    /// The version of the source, defaults to the component version
    pub version: Option<String>,
    /// Additional identity attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    /// The type of the source
    #[serde(rename = "type")]
    pub type_: String,
    /// Labels attached to the source
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

/// The declaration of a component reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSpec {
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

/// A declaration of one of the element kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementSpec {
    /// A resource declaration
    Resource(ResourceSpec),
    /// A source declaration
    Source(SourceSpec),
    /// A component reference declaration
    Reference(ReferenceSpec),
}

impl ElementSpec {
    /// Returns the kind of the declared element.
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementSpec::Resource(_) => ElementKind::Resource,
            ElementSpec::Source(_) => ElementKind::Source,
            ElementSpec::Reference(_) => ElementKind::Reference,
        }
    }

    /// Returns the name of the declared element.
    pub fn name(&self) -> &str {
        match self {
            ElementSpec::Resource(r) => &r.name,
            ElementSpec::Source(s) => &s.name,
            ElementSpec::Reference(r) => &r.name,
        }
    }

    /// Returns the declared version, if any.
    pub fn version(&self) -> Option<&str> {
        match self {
            ElementSpec::Resource(r) => r.version.as_deref(),
            ElementSpec::Source(s) => s.version.as_deref(),
            ElementSpec::Reference(r) => Some(&r.version),
        }
    }

    /// Sets the version of the declared element.
    pub fn set_version(&mut self, version: impl Into<String>) {
        let version = version.into();
        match self {
            ElementSpec::Resource(r) => r.version = Some(version),
            ElementSpec::Source(s) => s.version = Some(version),
            ElementSpec::Reference(r) => r.version = version,
        }
    }

    /// Returns the raw identity attributes (name plus extra identity).
    pub fn raw_identity(&self) -> BTreeMap<String, String> {
        let extra = match self {
            ElementSpec::Resource(r) => &r.extra_identity,
            ElementSpec::Source(s) => &s.extra_identity,
            ElementSpec::Reference(r) => &r.extra_identity,
        };
        let mut identity = extra.clone();
        identity.insert("name".to_string(), self.name().to_string());
        identity
    }

    /// Returns the type of the declared element, empty for references.
    pub fn type_name(&self) -> &str {
        match self {
            ElementSpec::Resource(r) => &r.type_,
            ElementSpec::Source(s) => &s.type_,
            ElementSpec::Reference(_) => "",
        }
    }

    /// A short human readable description.
    pub fn info(&self) -> String {
        match self {
            ElementSpec::Reference(r) => {
                format!("reference {}: {}:{}", r.name, r.component_name, r.version)
            }
            other => format!("{} {} ({})", other.kind(), other.name(), other.type_name()),
        }
    }

    /// Checks that the declaration is consistent with its content
    /// specification: resources and sources need exactly one of access and
    /// input, references need none.
    pub fn validate(&self, input: &ResourceInput) -> Result<(), String> {
        if self.name().is_empty() {
            return Err(format!("{} name must not be empty", self.kind()));
        }
        match (self.kind().requires_content(), &input.access, &input.input) {
            (true, Some(_), Some(_)) => Err("access and input are mutually exclusive".to_string()),
            (true, None, None) => Err("either access or input must be specified".to_string()),
            (false, None, None) => Ok(()),
            (false, _, _) => Err("a reference cannot have an access or input".to_string()),
            (true, _, _) => Ok(()),
        }
    }

    fn parse(kind: ElementKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ElementKind::Resource => ElementSpec::Resource(serde_json::from_value(value)?),
            ElementKind::Source => ElementSpec::Source(serde_json::from_value(value)?),
            ElementKind::Reference => ElementSpec::Reference(serde_json::from_value(value)?),
        })
    }
}

/// A validated declaration together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    source: SourceInfo,
    spec: ElementSpec,
    input: ResourceInput,
    data: Vec<u8>,
}

impl Element {
    /// Where the element was declared.
    pub fn source(&self) -> &SourceInfo {
        &self.source
    }

    /// The element declaration.
    pub fn spec(&self) -> &ElementSpec {
        &self.spec
    }

    /// The kind of the element.
    pub fn kind(&self) -> ElementKind {
        self.spec.kind()
    }

    /// The type of the element, empty for references.
    pub fn type_name(&self) -> &str {
        self.spec.type_name()
    }

    /// The raw JSON representation of the declaration.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The content specification of the element.
    pub fn input(&self) -> &ResourceInput {
        &self.input
    }

    /// Converts a resource declaration into a descriptor resource placed at
    /// `access`. Missing versions default to `component_version`.
    pub fn to_resource(&self, component_version: &str, access: GenericAccessSpec) -> Option<Resource> {
        let ElementSpec::Resource(r) = &self.spec else {
            return None;
        };
        Some(Resource {
            name: r.name.clone(),
            version: r.version.clone().unwrap_or_else(|| component_version.to_string()),
            extra_identity: r.extra_identity.clone(),
            type_: r.type_.clone(),
            relation: r.relation,
            labels: r.labels.clone(),
            access,
        })
    }

    /// Converts a source declaration into a descriptor source placed at
    /// `access`. Missing versions default to `component_version`.
    pub fn to_source(&self, component_version: &str, access: GenericAccessSpec) -> Option<Source> {
        let ElementSpec::Source(s) = &self.spec else {
            return None;
        };
        Some(Source {
            name: s.name.clone(),
            version: s.version.clone().unwrap_or_else(|| component_version.to_string()),
            extra_identity: s.extra_identity.clone(),
            type_: s.type_.clone(),
            labels: s.labels.clone(),
            access,
        })
    }

    /// Converts a reference declaration into a descriptor reference.
    pub fn to_reference(&self) -> Option<ComponentReference> {
        let ElementSpec::Reference(r) = &self.spec else {
            return None;
        };
        Some(ComponentReference {
            name: r.name.clone(),
            component_name: r.component_name.clone(),
            version: r.version.clone(),
            extra_identity: r.extra_identity.clone(),
            labels: r.labels.clone(),
        })
    }
}

/// Reads element declarations of the given kind from a YAML document.
///
/// The document is either a plain list of declarations or a mapping that lists
/// them under the kind's key (`resources`, `sources` or
/// `componentReferences`). Every element remembers its position, so errors and
/// diagnostics can point at e.g. `resources.yaml[2]`.
pub fn elements_from_yaml(
    origin: &str,
    kind: ElementKind,
    text: &str,
) -> Result<Vec<Element>, ElementError> {
    let document: Value = serde_yaml::from_str(text).map_err(|source| ElementError::InvalidYaml {
        origin: origin.to_string(),
        source,
    })?;

    let (info, entries) = match document {
        Value::Array(entries) => (SourceInfo::new(origin), entries),
        Value::Object(mut map) => match map.remove(kind.key()) {
            Some(Value::Array(entries)) => (SourceInfo::new(origin).sub_key(kind.key()), entries),
            _ => {
                return Err(ElementError::NotAList {
                    origin: origin.to_string(),
                    kind,
                })
            }
        },
        Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(ElementError::NotAList {
                origin: origin.to_string(),
                kind,
            })
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| element_from_value(info.sub(index), kind, entry))
        .collect()
}

fn element_from_value(
    source: SourceInfo,
    kind: ElementKind,
    entry: Value,
) -> Result<Element, ElementError> {
    let invalid = |source: &SourceInfo, message: String| ElementError::Invalid {
        origin: source.clone(),
        message,
    };

    let data = serde_json::to_vec(&entry).map_err(|e| ElementError::InvalidDeclaration {
        origin: source.clone(),
        kind,
        source: e,
    })?;

    let Value::Object(mut fields) = entry else {
        return Err(invalid(&source, format!("{kind} declaration must be a mapping")));
    };

    let input = ResourceInput {
        access: take_typed(&mut fields, "access").map_err(|m| invalid(&source, m))?,
        input: take_typed(&mut fields, "input").map_err(|m| invalid(&source, m))?,
    };

    let spec = ElementSpec::parse(kind, Value::Object(fields)).map_err(|e| {
        ElementError::InvalidDeclaration {
            origin: source.clone(),
            kind,
            source: e,
        }
    })?;
    spec.validate(&input).map_err(|m| invalid(&source, m))?;

    Ok(Element {
        source,
        spec,
        input,
        data,
    })
}

fn take_typed(fields: &mut Map<String, Value>, key: &str) -> Result<Option<GenericAccessSpec>, String> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => GenericAccessSpec::try_from(map)
            .map(Some)
            .map_err(|e| format!("{key}: {e}")),
        Some(_) => Err(format!("{key} must be a mapping")),
    }
}
