//! Credentials for remote access methods.
//!
//! Looking up credentials in stores or config files is the business of the
//! application. Access methods only ask a [`CredentialResolver`] for the
//! credentials of a [`ConsumerIdentity`].

use std::{
    collections::BTreeMap,
    fmt::{Debug, Formatter},
    sync::RwLock,
};

use serde::{Deserialize, Serialize};

use crate::method::OciReference;

/// The identity attribute naming the kind of consumer.
pub const ID_TYPE: &str = "type";

/// The identity attribute naming a host.
pub const ID_HOSTNAME: &str = "hostname";

/// The identity attribute naming a port.
pub const ID_PORT: &str = "port";

/// The identity attribute naming a repository path prefix.
pub const ID_PATH_PREFIX: &str = "pathprefix";

/// The consumer type of OCI registries.
pub const OCI_CONSUMER_TYPE: &str = "OCIRegistry";

/// Identifies something that requires credentials, e.g. a registry host.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerIdentity(BTreeMap<String, String>);

impl ConsumerIdentity {
    /// Constructs an empty identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identity with an additional attribute.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the value of an attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the identity of an OCI repository.
    pub fn for_oci(reference: &OciReference) -> Self {
        let mut identity = Self::new()
            .with(ID_TYPE, OCI_CONSUMER_TYPE)
            .with(ID_HOSTNAME, reference.hostname())
            .with(ID_PATH_PREFIX, reference.repository.as_str());
        if let Some(port) = reference.port() {
            identity = identity.with(ID_PORT, port);
        }
        identity
    }
}

/// A set of credential properties, e.g. `username` and `password`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    /// Constructs credentials from properties.
    pub fn new(properties: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(properties.into_iter().collect())
    }

    /// Constructs username/password credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new([
            ("username".to_string(), username.into()),
            ("password".to_string(), password.into()),
        ])
    }

    /// Returns a single property.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

/// Decides whether a configured identity (`pattern`) provides credentials for
/// a requested identity.
pub type IdentityMatcher = fn(pattern: &ConsumerIdentity, requested: &ConsumerIdentity) -> bool;

/// Matches identities whose attributes are all equal.
pub fn exact_matcher(pattern: &ConsumerIdentity, requested: &ConsumerIdentity) -> bool {
    pattern == requested
}

/// Matches OCI registry identities. Type and hostname must match, a port must
/// match if the pattern has one, and the pattern's path prefix must be a
/// prefix of the requested path on a segment boundary.
pub fn oci_matcher(pattern: &ConsumerIdentity, requested: &ConsumerIdentity) -> bool {
    if pattern.get(ID_TYPE) != requested.get(ID_TYPE)
        || pattern.get(ID_HOSTNAME) != requested.get(ID_HOSTNAME)
    {
        return false;
    }
    if let Some(port) = pattern.get(ID_PORT) {
        if requested.get(ID_PORT) != Some(port) {
            return false;
        }
    }
    match pattern.get(ID_PATH_PREFIX) {
        None | Some("") => true,
        Some(prefix) => {
            let path = requested.get(ID_PATH_PREFIX).unwrap_or_default();
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        }
    }
}

/// Resolves credentials for consumers.
pub trait CredentialResolver: Send + Sync {
    /// Returns the credentials for `identity`, or `None` if nothing is
    /// configured for it.
    fn credentials_for_consumer(
        &self,
        identity: &ConsumerIdentity,
        matcher: IdentityMatcher,
    ) -> Option<Credentials>;
}

/// A credential resolver backed by an in-memory list of consumers.
///
/// When several configured identities match, the most specific one (the one
/// with the most attributes) wins.
#[derive(Debug, Default)]
pub struct StaticCredentialResolver {
    consumers: RwLock<Vec<(ConsumerIdentity, Credentials)>>,
}

impl StaticCredentialResolver {
    /// Constructs an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds credentials for a consumer, replacing previous credentials of the
    /// same identity.
    pub fn add_consumer(&self, identity: ConsumerIdentity, credentials: Credentials) {
        let mut consumers = self
            .consumers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        consumers.retain(|(id, _)| id != &identity);
        consumers.push((identity, credentials));
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn credentials_for_consumer(
        &self,
        identity: &ConsumerIdentity,
        matcher: IdentityMatcher,
    ) -> Option<Credentials> {
        let consumers = self
            .consumers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        consumers
            .iter()
            .filter(|(pattern, _)| matcher(pattern, identity))
            .max_by_key(|(pattern, _)| pattern.0.len())
            .map(|(_, credentials)| credentials.clone())
    }
}
