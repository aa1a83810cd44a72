use ocm_access::{AccessMethod, AccessMethodBlobAccess, AccessSpec};
use ocm_types::{ElementMeta, GenericAccessSpec, Resource, Source};

use crate::{ComponentVersionAccess, RepositoryError};

mod sealed {
    pub trait Sealed {}
    impl Sealed for ocm_types::Resource {}
    impl Sealed for ocm_types::Source {}
}

/// An element of a component version that carries content.
pub trait ContentElement: ElementMeta + sealed::Sealed {
    /// The raw access spec of the element.
    fn access_spec(&self) -> &GenericAccessSpec;
}

impl ContentElement for Resource {
    fn access_spec(&self) -> &GenericAccessSpec {
        &self.access
    }
}

impl ContentElement for Source {
    fn access_spec(&self) -> &GenericAccessSpec {
        &self.access
    }
}

/// A view of a resource or source of an open component version.
pub struct ElementAccess<'a, T> {
    version: &'a dyn ComponentVersionAccess,
    index: usize,
    meta: &'a T,
}

/// A view of a resource.
pub type ResourceAccess<'a> = ElementAccess<'a, Resource>;

/// A view of a source.
pub type SourceAccess<'a> = ElementAccess<'a, Source>;

impl<'a, T: ContentElement> ElementAccess<'a, T> {
    pub(crate) fn new(version: &'a dyn ComponentVersionAccess, index: usize, meta: &'a T) -> Self {
        Self {
            version,
            index,
            meta,
        }
    }

    /// The position of the element in its list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The element as found in the descriptor.
    pub fn meta(&self) -> &'a T {
        self.meta
    }

    /// The component version the element belongs to.
    pub fn component_version(&self) -> &'a dyn ComponentVersionAccess {
        self.version
    }

    /// Decodes the access spec in the context of the component version.
    pub fn access(&self) -> Result<AccessSpec, RepositoryError> {
        Ok(self.version.context().decode(self.meta.access_spec())?)
    }

    /// Returns an access method for the content of the element.
    pub fn access_method(&self) -> Result<Box<dyn AccessMethod>, RepositoryError> {
        self.version.access_method(&self.access()?)
    }

    /// Returns the content of the element as a blob.
    pub fn blob(&self) -> Result<AccessMethodBlobAccess, RepositoryError> {
        Ok(AccessMethodBlobAccess::new(self.access_method()?))
    }
}
