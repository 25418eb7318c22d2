//! Namespace and table identifiers.
//!
//! Namespaces are multi-level (`a.b.c`). Inside entity records a namespace is
//! encoded as its levels joined by the ASCII unit separator (`0x1F`), the
//! same separator the REST catalog protocol uses in URLs (as `%1F`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used when a namespace is encoded into a single string.
pub const NAMESPACE_SEPARATOR: char = '\u{1F}';

/// A multi-level namespace. The empty namespace is the catalog root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(Vec<String>);

impl Namespace {
    /// Creates a namespace from its levels.
    #[must_use]
    pub fn of<I, S>(levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(levels.into_iter().map(Into::into).collect())
    }

    /// The root namespace.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Parses a dotted name (`a.b.c`).
    #[must_use]
    pub fn from_dotted(name: &str) -> Self {
        if name.is_empty() {
            return Self::empty();
        }
        Self::of(name.split('.'))
    }

    /// Returns the levels.
    #[must_use]
    pub fn levels(&self) -> &[String] {
        &self.0
    }

    /// Returns the number of levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the root namespace.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the last level, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Returns the enclosing namespace; the root's parent is the root.
    #[must_use]
    pub fn parent(&self) -> Self {
        match self.0.split_last() {
            Some((_, rest)) => Self(rest.to_vec()),
            None => Self::empty(),
        }
    }

    /// Returns the namespace made of the first `n` levels.
    #[must_use]
    pub fn prefix(&self, n: usize) -> Self {
        Self(self.0.iter().take(n).cloned().collect())
    }

    /// Returns a child namespace.
    #[must_use]
    pub fn child(&self, level: impl Into<String>) -> Self {
        let mut levels = self.0.clone();
        levels.push(level.into());
        Self(levels)
    }

    /// Encodes the namespace for storage in an internal property.
    #[must_use]
    pub fn encode(&self) -> String {
        self.0.join(&NAMESPACE_SEPARATOR.to_string())
    }

    /// Decodes a namespace produced by [`Namespace::encode`].
    #[must_use]
    pub fn decode(encoded: &str) -> Self {
        if encoded.is_empty() {
            return Self::empty();
        }
        Self::of(encoded.split(NAMESPACE_SEPARATOR))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Identifier of a table or view: namespace plus leaf name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableIdent {
    /// Enclosing namespace.
    pub namespace: Namespace,
    /// Leaf name.
    pub name: String,
}

impl TableIdent {
    /// Creates a table identifier.
    #[must_use]
    pub fn new(namespace: Namespace, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// Parses a dotted name whose last level is the leaf (`a.b.t`).
    #[must_use]
    pub fn from_dotted(name: &str) -> Self {
        match name.rsplit_once('.') {
            Some((ns, leaf)) => Self::new(Namespace::from_dotted(ns), leaf),
            None => Self::new(Namespace::empty(), name),
        }
    }

    /// Returns namespace levels followed by the leaf name.
    #[must_use]
    pub fn path(&self) -> Vec<String> {
        let mut path = self.namespace.levels().to_vec();
        path.push(self.name.clone());
        path
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let ns = Namespace::of(["a", "b", "c"]);
        let encoded = ns.encode();
        assert_eq!(encoded, "a\u{1F}b\u{1F}c");
        assert_eq!(Namespace::decode(&encoded), ns);
        assert_eq!(Namespace::decode(""), Namespace::empty());
    }

    #[test]
    fn parent_and_prefix() {
        let ns = Namespace::from_dotted("a.b.c");
        assert_eq!(ns.parent(), Namespace::of(["a", "b"]));
        assert_eq!(ns.prefix(1), Namespace::of(["a"]));
        assert_eq!(Namespace::empty().parent(), Namespace::empty());
        assert_eq!(ns.name(), Some("c"));
    }

    #[test]
    fn table_ident_display() {
        let ident = TableIdent::from_dotted("a.b.t");
        assert_eq!(ident.namespace, Namespace::of(["a", "b"]));
        assert_eq!(ident.name, "t");
        assert_eq!(ident.to_string(), "a.b.t");
        assert_eq!(ident.path(), vec!["a", "b", "t"]);
    }
}
