use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// The identity of a component version: a component name paired with a
/// version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameVersion {
    /// The name of the component
    pub name: String,
    /// The version of the component
    pub version: String,
}

impl NameVersion {
    /// Constructs a new instance.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Display for NameVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// The ordered path of component versions visited while following
/// component references.
///
/// The history is only used to detect cycles in the reference graph and to
/// give errors enough context to be diagnosed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History(Vec<NameVersion>);

impl History {
    /// Returns true if the history already contains `nv`.
    pub fn contains(&self, nv: &NameVersion) -> bool {
        self.0.contains(nv)
    }

    /// Returns a new history with `nv` appended. The receiver is unchanged so
    /// that sibling branches of the traversal each see their own path.
    pub fn with(&self, nv: NameVersion) -> Self {
        let mut entries = self.0.clone();
        entries.push(nv);
        Self(entries)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing has been visited yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the visited component versions in order.
    pub fn iter(&self) -> impl Iterator<Item = &NameVersion> + '_ {
        self.0.iter()
    }

    /// Returns the most recently visited component version.
    pub fn last(&self) -> Option<&NameVersion> {
        self.0.last()
    }
}

impl Display for History {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().format("->"))
    }
}

impl FromIterator<NameVersion> for History {
    fn from_iter<T: IntoIterator<Item = NameVersion>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_display() {
        let history = History::default()
            .with(NameVersion::new("acme.org/a", "v1"))
            .with(NameVersion::new("acme.org/b", "v2"));
        assert_eq!(history.to_string(), "acme.org/a:v1->acme.org/b:v2");
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_history_with_leaves_original_untouched() {
        let root = History::default().with(NameVersion::new("a", "1"));
        let branch = root.with(NameVersion::new("b", "1"));
        assert!(!root.contains(&NameVersion::new("b", "1")));
        assert!(branch.contains(&NameVersion::new("a", "1")));
        assert_eq!(branch.last(), Some(&NameVersion::new("b", "1")));
    }
}
