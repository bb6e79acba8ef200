//! Engine collaborator.
//!
//! [`Engine`] is the boundary to the append/chunk/transmit machinery. The
//! [`memory`] module provides an in-process implementation used for embedded
//! runs and tests.

pub mod memory;
mod traits;

pub use memory::{AppendCall, InMemoryEngine, TableReader};
pub use traits::{timeout_ms, Engine, Item, ItemColumn, ItemId};
