//! Nested structures of leaves.
//!
//! Records handed to the writer, the history it exposes and the trajectories
//! assembled into items are all trees of maps, sequences and leaves. Flattening
//! is canonical: map entries in key order, sequence entries by position, depth
//! first. A bare leaf flattens to the root path `()`.

use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::path::{Path, PathKey};
use crate::tensor::Tensor;

/// A tree of maps, sequences and leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Nest<T> {
    /// A single value.
    Leaf(T),
    /// Named children, iterated in key order.
    Map(BTreeMap<String, Nest<T>>),
    /// Positional children.
    Seq(Vec<Nest<T>>),
}

/// A record written by the caller. `None` leaves mean "not provided".
pub type Record = Nest<Option<Tensor>>;

impl<T> Nest<T> {
    /// Builds a map node.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Nest<T>)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds a sequence node.
    pub fn seq<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Nest<T>>,
    {
        Self::Seq(items.into_iter().collect())
    }

    /// Borrowing canonical flatten.
    #[must_use]
    pub fn flatten(&self) -> Vec<(Path, &T)> {
        let mut out = Vec::new();
        flatten_ref(self, &Path::root(), &mut out);
        out
    }

    /// Consuming canonical flatten.
    #[must_use]
    pub fn into_flat(self) -> Vec<(Path, T)> {
        let mut out = Vec::new();
        flatten_owned(self, Path::root(), &mut out);
        out
    }

    /// Number of leaves.
    #[must_use]
    pub fn num_leaves(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Map(m) => m.values().map(Self::num_leaves).sum(),
            Self::Seq(s) => s.iter().map(Self::num_leaves).sum(),
        }
    }

    /// Looks up the subtree at `path`.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Self> {
        let mut node = self;
        for key in path.keys() {
            node = match (node, key) {
                (Self::Map(m), PathKey::Key(k)) => m.get(k)?,
                (Self::Seq(s), PathKey::Index(i)) => s.get(*i)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Applies `f` to every leaf, keeping the structure.
    pub fn map_leaves<U, F>(self, mut f: F) -> Nest<U>
    where
        F: FnMut(T) -> U,
    {
        self.map_leaves_inner(&mut f)
    }

    fn map_leaves_inner<U, F>(self, f: &mut F) -> Nest<U>
    where
        F: FnMut(T) -> U,
    {
        match self {
            Self::Leaf(v) => Nest::Leaf(f(v)),
            Self::Map(m) => Nest::Map(m.into_iter().map(|(k, v)| (k, v.map_leaves_inner(f))).collect()),
            Self::Seq(s) => Nest::Seq(s.into_iter().map(|v| v.map_leaves_inner(f)).collect()),
        }
    }

    /// Rebuilds a structure from `(path, leaf)` pairs.
    ///
    /// String keys become maps and integer keys become sequences. Sequence
    /// positions must be contiguous from zero and no path may be both a leaf
    /// and the prefix of another path.
    pub fn unflatten<I>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (Path, T)>,
    {
        let mut root: Option<Builder<T>> = None;
        for (path, leaf) in pairs {
            insert(&mut root, &path, 0, leaf)?;
        }
        match root {
            Some(b) => b.finish(&Path::root()),
            None => Ok(Self::Map(BTreeMap::new())),
        }
    }
}

impl Record {
    /// A provided leaf value.
    pub fn value(v: impl Into<Tensor>) -> Self {
        Self::Leaf(Some(v.into()))
    }

    /// An explicitly absent leaf.
    #[must_use]
    pub const fn none() -> Self {
        Self::Leaf(None)
    }

    /// A flat map of provided values sharing one Rust type.
    ///
    /// # Examples
    ///
    /// ```
    /// use trajectory_writer::Record;
    ///
    /// let record = Record::fields([("x", 1i64), ("z", 2i64)]);
    /// assert_eq!(record.num_leaves(), 2);
    /// ```
    pub fn fields<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Tensor>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::map(entries.into_iter().map(|(k, v)| (k, Self::value(v))))
    }
}

fn flatten_ref<'a, T>(node: &'a Nest<T>, prefix: &Path, out: &mut Vec<(Path, &'a T)>) {
    match node {
        Nest::Leaf(v) => out.push((prefix.clone(), v)),
        Nest::Map(m) => {
            for (k, child) in m {
                flatten_ref(child, &prefix.join(k.as_str()), out);
            }
        }
        Nest::Seq(s) => {
            for (i, child) in s.iter().enumerate() {
                flatten_ref(child, &prefix.join(i), out);
            }
        }
    }
}

fn flatten_owned<T>(node: Nest<T>, prefix: Path, out: &mut Vec<(Path, T)>) {
    match node {
        Nest::Leaf(v) => out.push((prefix, v)),
        Nest::Map(m) => {
            for (k, child) in m {
                let path = prefix.join(k);
                flatten_owned(child, path, out);
            }
        }
        Nest::Seq(s) => {
            for (i, child) in s.into_iter().enumerate() {
                let path = prefix.join(i);
                flatten_owned(child, path, out);
            }
        }
    }
}

enum Builder<T> {
    Leaf(T),
    Map(BTreeMap<String, Builder<T>>),
    Seq(BTreeMap<usize, Builder<T>>),
}

fn conflict(path: &Path, depth: usize, reason: &str) -> ValidationError {
    ValidationError::InconsistentStructure {
        path: path.keys()[..depth].iter().cloned().collect(),
        reason: reason.to_string(),
    }
}

fn insert<T>(slot: &mut Option<Builder<T>>, path: &Path, depth: usize, leaf: T) -> Result<(), ValidationError> {
    let Some(key) = path.keys().get(depth) else {
        if slot.is_some() {
            return Err(conflict(path, depth, "leaf collides with an existing node"));
        }
        *slot = Some(Builder::Leaf(leaf));
        return Ok(());
    };

    if slot.is_none() {
        *slot = Some(match key {
            PathKey::Key(_) => Builder::Map(BTreeMap::new()),
            PathKey::Index(_) => Builder::Seq(BTreeMap::new()),
        });
    }

    match (slot.as_mut(), key) {
        (Some(Builder::Map(m)), PathKey::Key(k)) => {
            let mut child = m.remove(k);
            insert(&mut child, path, depth + 1, leaf)?;
            if let Some(child) = child {
                m.insert(k.clone(), child);
            }
            Ok(())
        }
        (Some(Builder::Seq(s)), PathKey::Index(i)) => {
            let mut child = s.remove(i);
            insert(&mut child, path, depth + 1, leaf)?;
            if let Some(child) = child {
                s.insert(*i, child);
            }
            Ok(())
        }
        (Some(Builder::Leaf(_)), _) => Err(conflict(path, depth, "path descends through a leaf")),
        _ => Err(conflict(path, depth, "mixes map keys and sequence positions")),
    }
}

impl<T> Builder<T> {
    fn finish(self, at: &Path) -> Result<Nest<T>, ValidationError> {
        match self {
            Self::Leaf(v) => Ok(Nest::Leaf(v)),
            Self::Map(m) => {
                let mut out = BTreeMap::new();
                for (k, child) in m {
                    let path = at.join(k.as_str());
                    out.insert(k, child.finish(&path)?);
                }
                Ok(Nest::Map(out))
            }
            Self::Seq(s) => {
                let mut out = Vec::with_capacity(s.len());
                for (expected, (i, child)) in s.into_iter().enumerate() {
                    if i != expected {
                        return Err(ValidationError::InconsistentStructure {
                            path: at.clone(),
                            reason: format!("sequence is missing position {expected}"),
                        });
                    }
                    out.push(child.finish(&at.join(i))?);
                }
                Ok(Nest::Seq(out))
            }
        }
    }
}
