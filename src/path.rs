//! Leaf paths into nested records.
//!
//! A [`Path`] names one leaf position inside a nested record: the sequence of
//! map keys and sequence positions walked from the root. Paths order
//! canonically (key by key, strings before integers at the same depth) so that
//! every structure with the same keys flattens in the same order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    /// A map key.
    Key(String),
    /// A position within a sequence.
    Index(usize),
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, "'{k}'"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for PathKey {
    fn from(v: &str) -> Self {
        Self::Key(v.to_string())
    }
}

impl From<String> for PathKey {
    fn from(v: String) -> Self {
        Self::Key(v)
    }
}

impl From<usize> for PathKey {
    fn from(v: usize) -> Self {
        Self::Index(v)
    }
}

/// Ordered tuple of keys identifying one leaf.
///
/// Displays like a tuple literal: `()`, `('x',)`, `('nest', 'sub_list', 1)`.
///
/// # Examples
///
/// ```
/// use trajectory_writer::Path;
///
/// let path = Path::root().join("nest").join(1usize);
/// assert_eq!(path.to_string(), "('nest', 1)");
/// assert_eq!(Path::from("x").to_string(), "('x',)");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathKey>);

impl Path {
    /// The empty path, naming a bare (unnested) leaf.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns a new path with `key` appended.
    #[must_use]
    pub fn join(&self, key: impl Into<PathKey>) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.into());
        Self(keys)
    }

    /// The keys of this path, root first.
    #[must_use]
    pub fn keys(&self) -> &[PathKey] {
        &self.0
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}")?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<PathKey>> for Path {
    fn from(keys: Vec<PathKey>) -> Self {
        Self(keys)
    }
}

impl From<&str> for Path {
    fn from(key: &str) -> Self {
        Self(vec![PathKey::from(key)])
    }
}

impl From<usize> for Path {
    fn from(index: usize) -> Self {
        Self(vec![PathKey::Index(index)])
    }
}

impl<const N: usize> From<[&str; N]> for Path {
    fn from(keys: [&str; N]) -> Self {
        Self(keys.iter().map(|k| PathKey::from(*k)).collect())
    }
}

impl FromIterator<PathKey> for Path {
    fn from_iter<I: IntoIterator<Item = PathKey>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_display() {
        assert_eq!(Path::root().to_string(), "()");
        assert_eq!(Path::from("scalar").to_string(), "('scalar',)");
        assert_eq!(Path::from(["nest", "sub"]).to_string(), "('nest', 'sub')");
        assert_eq!(
            Path::from(["nest", "sub_list"]).join(1usize).to_string(),
            "('nest', 'sub_list', 1)"
        );
    }

    #[test]
    fn test_path_ordering_is_lexicographic_on_keys() {
        let mut paths = vec![
            Path::from("z"),
            Path::from(["a", "b"]),
            Path::from("a"),
            Path::from(["a", "a"]),
        ];
        paths.sort();
        assert_eq!(
            paths,
            vec![
                Path::from("a"),
                Path::from(["a", "a"]),
                Path::from(["a", "b"]),
                Path::from("z"),
            ]
        );
    }

    #[test]
    fn test_index_keys_order_numerically() {
        let a = Path::from(2usize);
        let b = Path::from(10usize);
        assert!(a < b);
    }

    #[test]
    fn test_path_serialization() {
        let path = Path::from(["obs"]).join(3usize);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["obs",3]"#);
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
