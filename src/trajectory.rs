//! Trajectory columns and item assembly.
//!
//! A [`TrajectoryColumn`] is an immutable, validated selection of one column's
//! history. Callers arrange trajectory columns into a [`Trajectory`] (any
//! nested structure) and submit it as one item.

use crate::cell::CellRef;
use crate::error::{ValidationError, WriterError};
use crate::nest::Nest;
use crate::tensor::{DType, Tensor};

/// Ordered, non-empty run of references into one column.
///
/// When squeezed, the column holds exactly one reference and materializes to
/// that bare value instead of a length-1 stack.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryColumn {
    refs: Vec<CellRef>,
    squeeze: bool,
}

impl TrajectoryColumn {
    /// Builds a column, rejecting empty input, absent entries, and squeezed
    /// columns with more than one entry.
    pub fn new(refs: Vec<Option<CellRef>>, squeeze: bool) -> Result<Self, ValidationError> {
        let refs = refs
            .into_iter()
            .enumerate()
            .map(|(position, r)| r.ok_or(ValidationError::AbsentReference { position }))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_refs(refs, squeeze)
    }

    /// Builds a column from references known to be present.
    pub fn from_refs(refs: Vec<CellRef>, squeeze: bool) -> Result<Self, ValidationError> {
        if refs.is_empty() {
            return Err(ValidationError::EmptyTrajectoryColumn);
        }
        if squeeze && refs.len() != 1 {
            return Err(ValidationError::SqueezeRequiresSingle { len: refs.len() });
        }
        Ok(Self { refs, squeeze })
    }

    /// Number of referenced steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// True when the column materializes to a bare value.
    #[must_use]
    pub const fn is_squeezed(&self) -> bool {
        self.squeeze
    }

    /// The referenced cells, in selection order.
    #[must_use]
    pub fn refs(&self) -> &[CellRef] {
        &self.refs
    }

    /// Common dtype of the referenced values.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.refs[0].dtype()
    }

    /// `(len, *leaf_shape)`, or just the leaf shape when squeezed.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        let leaf = self.refs[0].shape();
        if self.squeeze {
            return leaf.to_vec();
        }
        let mut shape = Vec::with_capacity(leaf.len() + 1);
        shape.push(self.refs.len());
        shape.extend_from_slice(leaf);
        shape
    }

    /// Reads every referenced value.
    pub fn values(&self) -> Result<Vec<Tensor>, WriterError> {
        Ok(self.refs.iter().map(CellRef::value).collect::<Result<Vec<_>, _>>()?)
    }

    /// Materializes the column: the bare value when squeezed, otherwise the
    /// values stacked along a new leading axis.
    pub fn to_tensor(&self) -> Result<Tensor, WriterError> {
        let mut values = self.values()?;
        if self.squeeze {
            return values
                .pop()
                .ok_or_else(|| WriterError::internal("squeezed column without a reference"));
        }
        Ok(Tensor::stack(&values)?)
    }
}

/// A leaf of a trajectory handed to item creation.
///
/// Only [`ItemLeaf::Column`] is accepted; a materialized tensor is rejected
/// because items must reference buffered data.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemLeaf {
    /// References into the writer's history.
    Column(TrajectoryColumn),
    /// A value that was read out of the history.
    Materialized(Tensor),
}

impl ItemLeaf {
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::Column(_) => "trajectory column",
            Self::Materialized(_) => "tensor",
        }
    }
}

impl From<TrajectoryColumn> for ItemLeaf {
    fn from(v: TrajectoryColumn) -> Self {
        Self::Column(v)
    }
}

impl From<Tensor> for ItemLeaf {
    fn from(v: Tensor) -> Self {
        Self::Materialized(v)
    }
}

/// Nested arrangement of trajectory columns submitted as one item.
pub type Trajectory = Nest<ItemLeaf>;

impl From<TrajectoryColumn> for Trajectory {
    fn from(v: TrajectoryColumn) -> Self {
        Self::Leaf(ItemLeaf::Column(v))
    }
}

impl Trajectory {
    /// A flat map of named trajectory columns.
    ///
    /// Entries are submitted in key order.
    pub fn columns<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TrajectoryColumn)>,
    {
        Self::map(entries.into_iter().map(|(k, v)| (k, Self::from(v))))
    }
}
