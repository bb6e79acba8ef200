//! # trajectory-writer - Column-oriented trajectory writing
//!
//! A client-side writer that turns a stream of nested records into
//! per-column engine appends, keeps the history of every column, and
//! assembles items from selections of that history.
//!
//! ## Core Concepts
//!
//! - **Record**: A nested structure of optional tensors passed to `append`
//! - **Column**: One leaf path of the records, identified by a stable [`ColumnId`]
//! - **History**: Per-column references to every value written this episode
//! - **Trajectory**: A nested structure of [`TrajectoryColumn`]s submitted as an item
//! - **Engine**: The backend that stores values, owns keep-alive windows and
//!   delivers items to tables
//!
//! ## Usage
//!
//! ```rust
//! use trajectory_writer::{InMemoryEngine, MemoryEngineConfig, Path, Record, Trajectory, TrajectoryWriter};
//!
//! let config = MemoryEngineConfig::default().with_table("replay", 16);
//! let engine = InMemoryEngine::new(&config)?;
//! let reader = engine.reader("replay")?;
//! let mut writer = TrajectoryWriter::new(engine);
//!
//! writer.append_partial(Record::fields([("observation", 0.5f64)]))?;
//! writer.append(Record::fields([("action", 1i64)]))?;
//! writer.append(Record::map([("observation", Record::value(0.7f64)), ("action", Record::value(0i64))]))?;
//!
//! let history = writer.history()?;
//! let trajectory = Trajectory::columns([
//!     ("observation", history.column(&Path::from("observation"))?.select(..)?),
//!     ("action", history.column(&Path::from("action"))?.select(-1)?),
//! ]);
//! writer.create_item("replay", 1.0, trajectory)?;
//! writer.flush(0, None)?;
//! writer.end_episode(true, None)?;
//!
//! assert_eq!(reader.len(), 1);
//! # Ok::<(), trajectory_writer::WriterError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core value types
pub mod cell;
pub mod error;
pub mod nest;
pub mod path;
pub mod tensor;

// Column bookkeeping
pub mod chunker;
pub mod history;
pub mod registry;
pub mod step;
pub mod trajectory;

// Engine, config and the writer itself
pub mod config;
pub mod engine;
pub mod writer;

// Re-export primary types at crate root for convenience
pub use cell::CellRef;
pub use chunker::ChunkerOptions;
pub use config::{MemoryEngineConfig, TableConfig, WriterConfig};
pub use engine::{Engine, InMemoryEngine, Item, ItemColumn, ItemId, TableReader};
pub use error::{ConfigError, EngineError, StateError, ValidationError, WriterError, WriterResult};
pub use history::{ColumnHistory, History, StepIndex};
pub use nest::{Nest, Record};
pub use path::{Path, PathKey};
pub use registry::ColumnId;
pub use tensor::{DType, Tensor, TensorData};
pub use trajectory::{ItemLeaf, Trajectory, TrajectoryColumn};
pub use writer::TrajectoryWriter;
