//! Engine contract.
//!
//! The engine buffers leaf values into per-column chunks, turns selections of
//! buffered values into items and ships them to tables. The writer drives it
//! through [`Engine`] only, so an in-memory engine can stand in for a remote
//! one.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cell::CellRef;
use crate::chunker::ChunkerOptions;
use crate::error::EngineError;
use crate::registry::ColumnId;
use crate::tensor::Tensor;

/// Unique identifier of a created item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(uuid::Uuid);

impl ItemId {
    /// Creates a new random item ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data one column contributes to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ItemColumn {
    /// A single value, from a squeezed trajectory column.
    Squeezed(Tensor),
    /// An ordered run of values.
    Stacked(Vec<Tensor>),
}

impl ItemColumn {
    /// Number of steps this column spans.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Squeezed(_) => 1,
            Self::Stacked(values) => values.len(),
        }
    }

    /// True for a stacked column without values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An item delivered to a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Identifier returned by `create_item`.
    pub id: ItemId,
    /// Destination table.
    pub table: String,
    /// Sampling priority.
    pub priority: f64,
    /// One entry per trajectory column, in canonical path order.
    pub columns: Vec<ItemColumn>,
    /// When the engine assembled the item.
    pub created_at: DateTime<Utc>,
}

/// Operations the writer needs from the append/chunk/transmit engine.
///
/// Leaves are passed positionally by column index: `leaves[i]` is the value
/// for column `i`, `None` where the column has no value in this call. The
/// returned references keep the same positions.
pub trait Engine: Send {
    /// Buffers leaves and closes the current step.
    fn append(&mut self, leaves: Vec<Option<Tensor>>) -> Result<Vec<Option<CellRef>>, EngineError>;

    /// Buffers leaves into the current step without closing it.
    fn append_partial(&mut self, leaves: Vec<Option<Tensor>>) -> Result<Vec<Option<CellRef>>, EngineError>;

    /// Submits an item built from buffered references.
    ///
    /// Squeezed columns contribute their single value, the others an ordered
    /// run of values.
    fn create_item(
        &mut self,
        table: &str,
        priority: f64,
        refs_per_column: &[Vec<CellRef>],
        squeeze_per_column: &[bool],
    ) -> Result<ItemId, EngineError>;

    /// Sets the chunking policy of a column.
    fn configure_chunker(&mut self, column: ColumnId, options: ChunkerOptions) -> Result<(), EngineError>;

    /// Blocks until at most `max_outstanding_items` items are unacknowledged.
    ///
    /// `None` waits indefinitely. A timeout yields
    /// [`EngineError::DeadlineExceeded`] and leaves submitted work in flight.
    fn flush(&mut self, max_outstanding_items: usize, timeout: Option<Duration>) -> Result<(), EngineError>;

    /// Seals the episode boundary, optionally releasing buffered values, then
    /// waits for all outstanding items like `flush(0, timeout)`.
    fn end_episode(&mut self, clear_buffers: bool, timeout: Option<Duration>) -> Result<(), EngineError>;

    /// Upper bound on per-column keep-alive windows.
    fn max_num_keep_alive_refs(&self) -> usize;
}

/// Converts a timeout to whole milliseconds for error reporting.
#[must_use]
pub fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
