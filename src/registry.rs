//! Path registry.
//!
//! Assigns each newly observed leaf path the next unused column index. Indices
//! are handed out in the order paths first appear in a canonical flattening and
//! are never reassigned or reused.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::Path;

/// Stable index of a column, as understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(usize);

impl ColumnId {
    /// Wraps a raw column index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw column index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Path to column index mapping that only grows.
#[derive(Debug, Default, Clone)]
pub struct PathRegistry {
    by_path: HashMap<Path, ColumnId>,
    paths: Vec<Path>,
}

impl PathRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the column for `path`, assigning the next index if unseen.
    ///
    /// The boolean is true when the column was created by this call.
    pub fn resolve(&mut self, path: &Path) -> (ColumnId, bool) {
        if let Some(id) = self.by_path.get(path) {
            return (*id, false);
        }
        let id = ColumnId(self.paths.len());
        self.paths.push(path.clone());
        self.by_path.insert(path.clone(), id);
        (id, true)
    }

    /// Looks up a known column.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<ColumnId> {
        self.by_path.get(path).copied()
    }

    /// Path of a known column.
    #[must_use]
    pub fn path(&self, id: ColumnId) -> Option<&Path> {
        self.paths.get(id.0)
    }

    /// Number of known columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// True before any column has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Known columns in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ColumnId, &Path)> {
        self.paths.iter().enumerate().map(|(i, p)| (ColumnId(i), p))
    }

    /// Known columns in canonical path order.
    #[must_use]
    pub fn canonical(&self) -> Vec<(&Path, ColumnId)> {
        let mut out: Vec<(&Path, ColumnId)> = self.iter().map(|(id, p)| (p, id)).collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_assigns_monotonic_indices() {
        let mut registry = PathRegistry::new();
        assert_eq!(registry.resolve(&Path::from("x")), (ColumnId::new(0), true));
        assert_eq!(registry.resolve(&Path::from("y")), (ColumnId::new(1), true));
        assert_eq!(registry.resolve(&Path::from("x")), (ColumnId::new(0), false));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lookup() {
        let mut registry = PathRegistry::new();
        let (id, _) = registry.resolve(&Path::from(["a", "b"]));
        assert_eq!(registry.get(&Path::from(["a", "b"])), Some(id));
        assert_eq!(registry.path(id), Some(&Path::from(["a", "b"])));
        assert_eq!(registry.get(&Path::from("a")), None);
    }

    #[test]
    fn test_canonical_order_differs_from_index_order() {
        let mut registry = PathRegistry::new();
        registry.resolve(&Path::from("z"));
        registry.resolve(&Path::from("a"));
        let canonical: Vec<usize> = registry.canonical().into_iter().map(|(_, id)| id.index()).collect();
        assert_eq!(canonical, vec![1, 0]);
    }
}
