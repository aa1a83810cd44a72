#![deny(missing_docs)]
//! `ocm_types` contains the data models shared by the component transfer
//! crates: component descriptors and their elements, the raw (not yet
//! decoded) form of typed specifications, element declarations as read from
//! `resources.yaml`-like files, and the name/version history used to detect
//! reference cycles.
//!
//! The crate itself does not provide any functionality besides parsing,
//! validating and serializing these types.

mod descriptor;
mod element;
mod name_version;
mod typed_object;

pub use descriptor::{
    ComponentDescriptor, ComponentReference, ComponentSpec, DescriptorError, ElementMeta, Identity,
    Label, Metadata, Resource, ResourceRelation, Source, SCHEMA_VERSION,
};
pub use element::{
    elements_from_yaml, Element, ElementError, ElementKind, ElementSpec, ReferenceSpec,
    ResourceInput, ResourceSpec, SourceInfo, SourceSpec,
};
pub use name_version::{History, NameVersion};
pub use typed_object::{GenericAccessSpec, GenericInputSpec, TypedObject, TypedObjectError};
