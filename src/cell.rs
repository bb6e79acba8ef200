//! Cell references.
//!
//! The engine owns every buffered value. The writer only ever sees a
//! [`CellRef`]: a weak handle carrying the value's dtype and shape. Once the
//! engine drops the value (its keep-alive window moved past it) the reference
//! reports itself as expired and reading through it fails.

use std::sync::{Arc, Weak};

use crate::error::EngineError;
use crate::tensor::{DType, Tensor};

/// Non-owning handle to one engine-buffered value.
#[derive(Debug, Clone)]
pub struct CellRef {
    cell: Weak<Tensor>,
    dtype: DType,
    shape: Vec<usize>,
}

impl CellRef {
    /// Creates a reference to a value owned by the engine.
    #[must_use]
    pub fn new(cell: &Arc<Tensor>) -> Self {
        Self {
            cell: Arc::downgrade(cell),
            dtype: cell.dtype(),
            shape: cell.shape().to_vec(),
        }
    }

    /// Element type of the referenced value.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    /// Shape of the referenced value.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// True once the engine no longer keeps the value alive.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.cell.strong_count() == 0
    }

    /// Reads the referenced value.
    pub fn value(&self) -> Result<Tensor, EngineError> {
        self.cell
            .upgrade()
            .map(|cell| Tensor::clone(&cell))
            .ok_or(EngineError::ExpiredReference)
    }

    /// True if both handles point at the same buffered value.
    #[must_use]
    pub fn same_cell(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.cell, &other.cell)
    }
}

impl PartialEq for CellRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_cell(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_reports_metadata() {
        let cell = Arc::new(Tensor::from(vec![1i64, 2, 3]));
        let r = CellRef::new(&cell);
        assert_eq!(r.dtype(), DType::Int64);
        assert_eq!(r.shape(), &[3]);
        assert!(!r.expired());
        assert_eq!(r.value().unwrap(), Tensor::from(vec![1i64, 2, 3]));
    }

    #[test]
    fn test_reference_expires_with_owner() {
        let cell = Arc::new(Tensor::from(1i64));
        let r = CellRef::new(&cell);
        drop(cell);
        assert!(r.expired());
        assert!(matches!(r.value(), Err(EngineError::ExpiredReference)));
        // Metadata survives expiry.
        assert_eq!(r.dtype(), DType::Int64);
    }

    #[test]
    fn test_equality_is_identity() {
        let a = Arc::new(Tensor::from(1i64));
        let b = Arc::new(Tensor::from(1i64));
        assert_eq!(CellRef::new(&a), CellRef::new(&a));
        assert_ne!(CellRef::new(&a), CellRef::new(&b));
    }
}
