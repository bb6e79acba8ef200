//! Active step assembly.
//!
//! A step is either open (partial appends are accumulating into it) or
//! closed. While open, each column may receive at most one value; a second
//! value for an already-set column is a conflict.

use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::path::Path;
use crate::registry::ColumnId;
use crate::tensor::Tensor;

/// Lifecycle of the in-flight step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum StepState {
    /// No step in progress; the next append starts one.
    #[default]
    Closed,
    /// A step is being assembled at the given history position.
    Open { index: usize },
}

/// Bookkeeping for the step currently being assembled.
#[derive(Debug, Default)]
pub struct ActiveStep {
    state: StepState,
    set: BTreeSet<ColumnId>,
}

impl ActiveStep {
    /// Creates a closed step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a step is being assembled.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, StepState::Open { .. })
    }

    /// History position of the open step.
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        match self.state {
            StepState::Open { index } => Some(index),
            StepState::Closed => None,
        }
    }

    /// True if `column` already holds a value in the open step.
    #[must_use]
    pub fn is_set(&self, column: ColumnId) -> bool {
        self.set.contains(&column)
    }

    /// Rejects a second value for a column already set in the open step.
    pub fn check(&self, column: ColumnId, path: &Path, value: &Tensor) -> Result<(), ValidationError> {
        if self.is_set(column) {
            return Err(ValidationError::FieldAlreadySet {
                path: path.clone(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    /// Opens a step at `index`. No-op when a step is already open.
    pub fn open(&mut self, index: usize) {
        if self.state == StepState::Closed {
            self.state = StepState::Open { index };
            self.set.clear();
        }
    }

    /// Marks `column` as set in the open step.
    pub fn mark(&mut self, column: ColumnId) {
        self.set.insert(column);
    }

    /// Closes the open step, returning its history position.
    pub fn close(&mut self) -> Option<usize> {
        let index = self.index();
        self.state = StepState::Closed;
        self.set.clear();
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_is_idempotent() {
        let mut step = ActiveStep::new();
        assert!(!step.is_open());
        step.open(3);
        step.open(7);
        assert_eq!(step.index(), Some(3));
    }

    #[test]
    fn test_conflict_names_path_and_value() {
        let mut step = ActiveStep::new();
        step.open(0);
        step.mark(ColumnId::new(0));
        let err = step.check(ColumnId::new(0), &Path::from("x"), &Tensor::from(4i64)).unwrap_err();
        assert_eq!(
            format!("{err}"),
            "Field ('x',) has already been set in the active step by previous (partial) append call \
             and thus must be omitted or set to None but got: 4"
        );
        assert!(step.check(ColumnId::new(1), &Path::from("y"), &Tensor::from(4i64)).is_ok());
    }

    #[test]
    fn test_close_resets() {
        let mut step = ActiveStep::new();
        step.open(2);
        step.mark(ColumnId::new(0));
        assert!(step.is_set(ColumnId::new(0)));
        assert_eq!(step.close(), Some(2));
        assert!(!step.is_open());
        assert!(!step.is_set(ColumnId::new(0)));
        assert_eq!(step.close(), None);
    }
}
