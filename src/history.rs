//! Column history.
//!
//! Every column owns a growable run of references with lazy padding: a column
//! discovered at step `n` stores nothing for steps `0..n`, and steps a column
//! skipped are simply never written. Reads fill both gaps with `None`, so all
//! columns report the same length at all times.

use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use crate::cell::CellRef;
use crate::error::ValidationError;
use crate::nest::Nest;
use crate::path::Path;
use crate::registry::{ColumnId, PathRegistry};
use crate::tensor::{DType, Tensor};
use crate::trajectory::TrajectoryColumn;

/// Dtype and shape a column was established with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Element type of every value in the column.
    pub dtype: DType,
    /// Exact shape of every value in the column.
    pub shape: Vec<usize>,
}

impl ColumnSpec {
    fn of(cell: &CellRef) -> Self {
        Self {
            dtype: cell.dtype(),
            shape: cell.shape().to_vec(),
        }
    }

    /// Checks `value` against this spec. Shapes must match exactly.
    pub fn check(&self, path: &Path, value: &Tensor) -> Result<(), ValidationError> {
        if value.dtype() != self.dtype {
            return Err(ValidationError::DTypeMismatch {
                path: path.clone(),
                actual: value.dtype(),
                expected: self.dtype,
            });
        }
        if value.shape() != self.shape.as_slice() {
            return Err(ValidationError::ShapeMismatch {
                path: path.clone(),
                actual: value.shape().to_vec(),
                expected: self.shape.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ColumnSlot {
    spec: Option<ColumnSpec>,
    offset: usize,
    refs: Vec<Option<CellRef>>,
}

impl ColumnSlot {
    fn get(&self, step: usize) -> Option<&CellRef> {
        step.checked_sub(self.offset)
            .and_then(|i| self.refs.get(i))
            .and_then(Option::as_ref)
    }

    fn set(&mut self, step: usize, cell: CellRef) {
        if step < self.offset {
            let mut front = vec![None; self.offset - step];
            front.append(&mut self.refs);
            self.refs = front;
            self.offset = step;
        }
        let i = step - self.offset;
        if self.refs.len() <= i {
            self.refs.resize(i + 1, None);
        }
        self.refs[i] = Some(cell);
    }
}

/// Arena of per-column histories indexed by [`ColumnId`].
#[derive(Debug, Default)]
pub struct ColumnArena {
    slots: Vec<ColumnSlot>,
    num_steps: usize,
}

impl ColumnArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of steps recorded, including an open step.
    #[must_use]
    pub const fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Adds storage for a newly registered column.
    pub fn add_column(&mut self, id: ColumnId) {
        if self.slots.len() <= id.index() {
            self.slots.resize_with(id.index() + 1, ColumnSlot::default);
        }
        let slot = &mut self.slots[id.index()];
        if slot.refs.is_empty() {
            slot.offset = self.num_steps;
        }
    }

    /// Spec the column was established with, if any value was ever recorded.
    #[must_use]
    pub fn spec(&self, id: ColumnId) -> Option<&ColumnSpec> {
        self.slots.get(id.index()).and_then(|s| s.spec.as_ref())
    }

    /// Validates `value` against the column's established spec.
    pub fn validate(&self, id: ColumnId, path: &Path, value: &Tensor) -> Result<(), ValidationError> {
        match self.spec(id) {
            Some(spec) => spec.check(path, value),
            None => Ok(()),
        }
    }

    /// Starts a new step and returns its index.
    pub fn push_step(&mut self) -> usize {
        self.num_steps += 1;
        self.num_steps - 1
    }

    /// Drops the most recent step, used when an open step is discarded.
    pub fn pop_step(&mut self) {
        let Some(last) = self.num_steps.checked_sub(1) else {
            return;
        };
        for slot in &mut self.slots {
            if let Some(i) = last.checked_sub(slot.offset) {
                slot.refs.truncate(i);
            }
            slot.offset = slot.offset.min(last);
        }
        self.num_steps = last;
    }

    /// Records `cell` for `id` at `step`.
    ///
    /// The first cell ever recorded for a column establishes its spec.
    pub fn set(&mut self, id: ColumnId, step: usize, cell: CellRef) {
        if self.slots.len() <= id.index() {
            self.add_column(id);
        }
        let slot = &mut self.slots[id.index()];
        if slot.spec.is_none() {
            slot.spec = Some(ColumnSpec::of(&cell));
        }
        slot.set(step, cell);
    }

    /// Reference recorded for `id` at `step`, if any.
    #[must_use]
    pub fn get(&self, id: ColumnId, step: usize) -> Option<&CellRef> {
        self.slots.get(id.index()).and_then(|s| s.get(step))
    }

    /// Forgets every recorded reference. Columns and their specs remain.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.refs.clear();
            slot.offset = 0;
        }
        self.num_steps = 0;
    }
}

/// Selection of steps within one column.
///
/// Negative positions count from the end. Integer and list positions must be
/// in range; range bounds are clamped like sequence slicing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepIndex {
    /// One step; produces a squeezed column.
    At(isize),
    /// A contiguous run; `None` bounds default to the full history.
    Range {
        start: Option<isize>,
        end: Option<isize>,
    },
    /// Arbitrary positions in the given order, repeats allowed.
    List(Vec<isize>),
}

impl StepIndex {
    /// Resolves to absolute step positions and whether to squeeze.
    pub fn resolve(&self, len: usize) -> Result<(Vec<usize>, bool), ValidationError> {
        match self {
            Self::At(i) => Ok((vec![absolute(*i, len)?], true)),
            Self::Range { start, end } => {
                let start = start.map_or(0, |s| clamp(s, len));
                let end = end.map_or(len, |e| clamp(e, len));
                Ok(((start..end.max(start)).collect(), false))
            }
            Self::List(indices) => {
                let steps = indices
                    .iter()
                    .map(|i| absolute(*i, len))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((steps, false))
            }
        }
    }
}

fn signed_len(len: usize) -> isize {
    isize::try_from(len).unwrap_or(isize::MAX)
}

fn absolute(index: isize, len: usize) -> Result<usize, ValidationError> {
    let n = signed_len(len);
    let i = if index < 0 { index + n } else { index };
    if (0..n).contains(&i) {
        Ok(i.unsigned_abs())
    } else {
        Err(ValidationError::IndexOutOfRange { index, len })
    }
}

fn clamp(bound: isize, len: usize) -> usize {
    let n = signed_len(len);
    let b = if bound < 0 { bound + n } else { bound };
    b.clamp(0, n).unsigned_abs()
}

/// Converts to `isize`, saturating where the platform word is narrower.
fn saturating_isize<T>(i: T) -> isize
where
    T: Copy + Default + PartialOrd + TryInto<isize>,
{
    i.try_into()
        .unwrap_or_else(|_| if i < T::default() { isize::MIN } else { isize::MAX })
}

macro_rules! step_index_from_int {
    ($($t:ty),*) => {$(
        impl From<$t> for StepIndex {
            fn from(i: $t) -> Self {
                Self::At(saturating_isize(i))
            }
        }

        impl From<Range<$t>> for StepIndex {
            fn from(r: Range<$t>) -> Self {
                Self::Range { start: Some(saturating_isize(r.start)), end: Some(saturating_isize(r.end)) }
            }
        }

        impl From<RangeFrom<$t>> for StepIndex {
            fn from(r: RangeFrom<$t>) -> Self {
                Self::Range { start: Some(saturating_isize(r.start)), end: None }
            }
        }

        impl From<RangeTo<$t>> for StepIndex {
            fn from(r: RangeTo<$t>) -> Self {
                Self::Range { start: None, end: Some(saturating_isize(r.end)) }
            }
        }

        impl From<Vec<$t>> for StepIndex {
            fn from(v: Vec<$t>) -> Self {
                Self::List(v.into_iter().map(saturating_isize).collect())
            }
        }

        impl From<&[$t]> for StepIndex {
            fn from(v: &[$t]) -> Self {
                Self::List(v.iter().copied().map(saturating_isize).collect())
            }
        }

        impl<const N: usize> From<[$t; N]> for StepIndex {
            fn from(v: [$t; N]) -> Self {
                Self::List(v.iter().copied().map(saturating_isize).collect())
            }
        }
    )*};
}

step_index_from_int!(isize, i32, i64);

impl From<RangeFull> for StepIndex {
    fn from(_: RangeFull) -> Self {
        Self::Range { start: None, end: None }
    }
}

/// Read view over every column's history.
#[derive(Debug, Clone, Copy)]
pub struct History<'a> {
    registry: &'a PathRegistry,
    arena: &'a ColumnArena,
}

impl<'a> History<'a> {
    pub(crate) const fn new(registry: &'a PathRegistry, arena: &'a ColumnArena) -> Self {
        Self { registry, arena }
    }

    /// Steps recorded so far, including an open step.
    #[must_use]
    pub const fn num_steps(&self) -> usize {
        self.arena.num_steps()
    }

    /// Number of known columns.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.registry.len()
    }

    /// Known paths in canonical order.
    #[must_use]
    pub fn paths(&self) -> Vec<&'a Path> {
        self.registry.canonical().into_iter().map(|(p, _)| p).collect()
    }

    /// History of the column at `path`.
    pub fn column(&self, path: &Path) -> Result<ColumnHistory<'a>, ValidationError> {
        let id = self
            .registry
            .get(path)
            .ok_or_else(|| ValidationError::UnknownColumn { path: path.clone() })?;
        let path = self
            .registry
            .path(id)
            .ok_or_else(|| ValidationError::UnknownColumn { path: path.clone() })?;
        Ok(self.view(id, path))
    }

    /// Every column in canonical path order.
    #[must_use]
    pub fn columns(&self) -> Vec<ColumnHistory<'a>> {
        self.registry
            .canonical()
            .into_iter()
            .map(|(path, id)| self.view(id, path))
            .collect()
    }

    /// Column histories arranged in the nested shape the data was written in.
    pub fn structure(&self) -> Result<Nest<ColumnHistory<'a>>, ValidationError> {
        Nest::unflatten(self.columns().into_iter().map(|c| (c.path.clone(), c)))
    }

    fn view(&self, id: ColumnId, path: &'a Path) -> ColumnHistory<'a> {
        ColumnHistory {
            id,
            path,
            arena: self.arena,
        }
    }
}

/// Read view over one column's history.
#[derive(Debug, Clone, Copy)]
pub struct ColumnHistory<'a> {
    id: ColumnId,
    path: &'a Path,
    arena: &'a ColumnArena,
}

impl<'a> ColumnHistory<'a> {
    /// Path of this column.
    #[must_use]
    pub const fn path(&self) -> &'a Path {
        self.path
    }

    /// Engine index of this column.
    #[must_use]
    pub const fn column_id(&self) -> ColumnId {
        self.id
    }

    /// Same as the number of steps in the history.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.arena.num_steps()
    }

    /// True before any step was recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reference at an absolute step, `None` where the column was absent.
    #[must_use]
    pub fn get(&self, step: usize) -> Option<&'a CellRef> {
        self.arena.get(self.id, step)
    }

    /// Every step, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = Option<&'a CellRef>> + 'a {
        let (id, arena) = (self.id, self.arena);
        (0..arena.num_steps()).map(move |step| arena.get(id, step))
    }

    /// Builds a trajectory column from a step selection.
    ///
    /// # Examples
    ///
    /// ```
    /// use trajectory_writer::{InMemoryEngine, Path, Record, TrajectoryWriter};
    ///
    /// let mut writer = TrajectoryWriter::new(InMemoryEngine::default());
    /// for x in 1..=3i64 {
    ///     writer.append(Record::fields([("x", x)])).unwrap();
    /// }
    /// let history = writer.history().unwrap();
    /// let x = history.column(&Path::from("x")).unwrap();
    /// assert!(x.select(0).unwrap().is_squeezed());
    /// assert_eq!(x.select(..2).unwrap().len(), 2);
    /// assert_eq!(x.select(vec![1, 0, 2]).unwrap().len(), 3);
    /// ```
    pub fn select(&self, index: impl Into<StepIndex>) -> Result<TrajectoryColumn, ValidationError> {
        let (steps, squeeze) = index.into().resolve(self.len())?;
        let refs = steps
            .into_iter()
            .map(|step| {
                self.get(step).cloned().ok_or_else(|| ValidationError::AbsentStep {
                    path: self.path.clone(),
                    step,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        TrajectoryColumn::from_refs(refs, squeeze)
    }

    /// Shorthand for `select(StepIndex::At(index))`.
    pub fn at(&self, index: isize) -> Result<TrajectoryColumn, ValidationError> {
        self.select(StepIndex::At(index))
    }

    /// Shorthand for `select(StepIndex::Range { start, end })`.
    pub fn slice(&self, start: Option<isize>, end: Option<isize>) -> Result<TrajectoryColumn, ValidationError> {
        self.select(StepIndex::Range { start, end })
    }
}
