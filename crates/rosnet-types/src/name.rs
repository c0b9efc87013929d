//! Graph names: the hierarchical identifiers for nodes, topics and services.
//!
//! A name is global (`/a/b`), private (`~a`), relative (`a`) or empty.
//! Construction validates the grammar and stores the canonical form, so two
//! `GraphName`s compare equal exactly when their canonical strings do.

use crate::error::NameError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between namespace segments.
pub const SEPARATOR: char = '/';

/// Prefix of names private to a node.
pub const PRIVATE_PREFIX: char = '~';

/// The root namespace.
pub const ROOT: &str = "/";

/// A validated, canonical graph name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GraphName(String);

impl GraphName {
    /// Validate and canonicalize `name`.
    pub fn new(name: impl AsRef<str>) -> Result<Self, NameError> {
        canonicalize(name.as_ref()).map(GraphName)
    }

    /// The root namespace `/`.
    pub fn root() -> Self {
        GraphName(ROOT.to_string())
    }

    /// The empty name.
    pub fn empty() -> Self {
        GraphName(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    pub fn is_global(&self) -> bool {
        self.0.starts_with(SEPARATOR)
    }

    pub fn is_private(&self) -> bool {
        self.0.starts_with(PRIVATE_PREFIX)
    }

    /// Neither global nor private. The empty name counts as relative.
    pub fn is_relative(&self) -> bool {
        !self.is_global() && !self.is_private()
    }

    /// The enclosing namespace. The root is its own parent; a single
    /// relative or private segment has the empty name as parent.
    pub fn parent(&self) -> GraphName {
        if self.is_empty() || self.is_root() {
            return self.clone();
        }
        match self.0.rfind(SEPARATOR) {
            Some(0) => GraphName::root(),
            Some(idx) => GraphName(self.0[..idx].to_string()),
            None => GraphName::empty(),
        }
    }

    /// The last segment of the name.
    pub fn basename(&self) -> &str {
        match self.0.rfind(SEPARATOR) {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Append `other` to this name. A global `other` replaces this name and
    /// an empty `other` leaves it unchanged.
    pub fn join(&self, other: &GraphName) -> Result<GraphName, NameError> {
        if other.is_global() {
            return Ok(other.clone());
        }
        if other.is_private() {
            return Err(NameError::PrivateNotAllowed(other.0.clone()));
        }
        if other.is_empty() {
            return Ok(self.clone());
        }
        GraphName::new(format!("{}{}{}", self.0, SEPARATOR, other.0))
    }

    /// This name anchored at the root.
    pub fn to_global(&self) -> GraphName {
        if self.is_global() {
            return self.clone();
        }
        let relative = self.0.trim_start_matches(PRIVATE_PREFIX);
        GraphName(format!("{SEPARATOR}{relative}"))
    }

    /// This name with any leading `/` or `~` removed.
    pub fn to_relative(&self) -> GraphName {
        let stripped = self
            .0
            .strip_prefix(SEPARATOR)
            .or_else(|| self.0.strip_prefix(PRIVATE_PREFIX))
            .unwrap_or(&self.0);
        GraphName(stripped.to_string())
    }
}

/// Validate `name` and return its canonical form.
///
/// Canonical form collapses repeated separators, rewrites a leading `~/`
/// to `~` and drops any trailing separator except on the root.
pub fn canonicalize(name: &str) -> Result<String, NameError> {
    validate(name)?;

    let mut canonical = String::with_capacity(name.len());
    for c in name.chars() {
        if c == SEPARATOR && canonical.ends_with(SEPARATOR) {
            continue;
        }
        canonical.push(c);
    }
    if canonical.starts_with("~/") {
        canonical.remove(1);
    }
    while canonical.len() > 1 && canonical.ends_with(SEPARATOR) {
        canonical.pop();
    }
    Ok(canonical)
}

fn validate(name: &str) -> Result<(), NameError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Ok(());
    };
    let first_ok = first == SEPARATOR || first == PRIVATE_PREFIX || first.is_ascii_alphabetic();
    let rest_ok = chars.all(|c| c == SEPARATOR || c == '_' || c.is_ascii_alphanumeric());
    if first_ok && rest_ok {
        Ok(())
    } else {
        Err(NameError::Invalid(name.to_string()))
    }
}

impl fmt::Display for GraphName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for GraphName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for GraphName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GraphName::new(s)
    }
}

impl TryFrom<String> for GraphName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GraphName::new(value)
    }
}

impl TryFrom<&str> for GraphName {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        GraphName::new(value)
    }
}

impl From<GraphName> for String {
    fn from(name: GraphName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> GraphName {
        GraphName::new(s).unwrap()
    }

    #[test]
    fn test_valid_forms() {
        for s in ["", "/", "/a", "/a/b_c", "~priv", "rel", "rel/x2", "~/x"] {
            assert!(GraphName::new(s).is_ok(), "{s} should be valid");
        }
    }

    #[test]
    fn test_invalid_forms() {
        for s in ["1abc", "_foo", "a-b", "a b", "/a.b", "a~b", "a/~b"] {
            assert!(
                matches!(GraphName::new(s), Err(NameError::Invalid(_))),
                "{s} should be invalid"
            );
        }
    }

    #[test]
    fn test_canonical_form() {
        assert_eq!(name("/foo/").as_str(), "/foo");
        assert_eq!(name("/").as_str(), "/");
        assert_eq!(name("~/foo").as_str(), "~foo");
        assert_eq!(name("/a//b").as_str(), "/a/b");
        assert_eq!(name("foo//").as_str(), "foo");
    }

    #[test]
    fn test_canonicalize_idempotent() {
        for s in ["", "/", "/foo/", "~/x/", "a//b/", "/ns1/ns2/"] {
            let once = canonicalize(s).unwrap();
            assert_eq!(canonicalize(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_classification() {
        assert!(name("/a").is_global());
        assert!(name("~a").is_private());
        assert!(name("a").is_relative());
        assert!(name("").is_relative());
        assert!(name("/").is_root());
        assert!(!name("/a").is_root());
    }

    #[test]
    fn test_parent() {
        assert_eq!(name("/a/b").parent(), name("/a"));
        assert_eq!(name("/a").parent(), name("/"));
        assert_eq!(name("/").parent(), name("/"));
        assert_eq!(name("").parent(), name(""));
        assert_eq!(name("a/b").parent(), name("a"));
        assert_eq!(name("a").parent(), name(""));
    }

    #[test]
    fn test_basename() {
        assert_eq!(name("/a/b").basename(), "b");
        assert_eq!(name("/a").basename(), "a");
        assert_eq!(name("rel").basename(), "rel");
        assert_eq!(name("/").basename(), "");
    }

    #[test]
    fn test_join() {
        assert_eq!(name("/a").join(&name("b")).unwrap(), name("/a/b"));
        assert_eq!(name("/").join(&name("b")).unwrap(), name("/b"));
        assert_eq!(name("/a").join(&name("/c")).unwrap(), name("/c"));
        assert_eq!(name("/a").join(&name("")).unwrap(), name("/a"));
        assert!(name("/a").join(&name("~p")).is_err());
    }

    #[test]
    fn test_global_and_relative_conversion() {
        assert_eq!(name("foo").to_global(), name("/foo"));
        assert_eq!(name("~foo").to_global(), name("/foo"));
        assert_eq!(name("/foo").to_global(), name("/foo"));
        assert_eq!(name("").to_global(), name("/"));
        assert_eq!(name("/foo/bar").to_relative(), name("foo/bar"));
        assert_eq!(name("~foo").to_relative(), name("foo"));
        assert_eq!(name("/").to_relative(), name(""));
    }

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        n: GraphName,
    }

    #[test]
    fn test_deserialize_canonicalizes() {
        let w: Wrapper = toml::from_str("n = \"/a/b/\"").unwrap();
        assert_eq!(w.n, name("/a/b"));
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        assert!(toml::from_str::<Wrapper>("n = \"9bad\"").is_err());
    }
}
