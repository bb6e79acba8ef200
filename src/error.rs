//! Error types for the trajectory writer.
//!
//! All errors are strongly typed using thiserror. The top-level
//! [`WriterError`] separates caller mistakes (validation, state) from
//! failures that originate in the engine, which scoped use relies on to
//! decide whether a final flush is worth attempting.

use thiserror::Error;

use crate::path::Path;
use crate::tensor::{format_shape, DType};

/// Validation errors raised synchronously by the call that detects them.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(
        "Field {path} has already been set in the active step by previous (partial) append call \
         and thus must be omitted or set to None but got: {value}"
    )]
    FieldAlreadySet {
        path: Path,
        value: String,
    },

    #[error("Tensor of wrong dtype provided for column {path}. Got {actual} but expected {expected}.")]
    DTypeMismatch {
        path: Path,
        actual: DType,
        expected: DType,
    },

    #[error(
        "Tensor of incompatible shape provided for column {path}. Got {} which is incompatible with {}.",
        format_shape(.actual),
        format_shape(.expected)
    )]
    ShapeMismatch {
        path: Path,
        actual: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("TrajectoryColumn must contain at least one data reference")]
    EmptyTrajectoryColumn,

    #[error("TrajectoryColumn cannot contain any None data references, got None at position {position}")]
    AbsentReference {
        position: usize,
    },

    #[error("TrajectoryColumn must contain exactly one data reference when squeeze is set, got {len}")]
    SqueezeRequiresSingle {
        len: usize,
    },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        name: String,
        reason: String,
    },

    #[error("Step index {index} is out of range for a history of {len} steps")]
    IndexOutOfRange {
        index: isize,
        len: usize,
    },

    #[error("Column {path} has no value at step {step}")]
    AbsentStep {
        path: Path,
        step: usize,
    },

    #[error("Unknown column {path}")]
    UnknownColumn {
        path: Path,
    },

    #[error("Item leaf at {path} must be a TrajectoryColumn but got a materialized {kind}")]
    NotATrajectoryColumn {
        path: Path,
        kind: String,
    },

    #[error("Inconsistent structure at {path}: {reason}")]
    InconsistentStructure {
        path: Path,
        reason: String,
    },

    #[error("Tensor data has {actual} elements but shape {} requires {expected}", format_shape(.shape))]
    ElementCount {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Tensor data of kind {storage} cannot hold dtype {dtype}")]
    StorageMismatch {
        dtype: DType,
        storage: &'static str,
    },

    #[error("Value {value} is out of range for dtype {dtype}")]
    ValueOutOfRange {
        dtype: DType,
        value: String,
    },

    #[error("Cannot stack tensors of different dtype or shape: {reason}")]
    StackMismatch {
        reason: String,
    },
}

/// Errors raised when an operation is invalid in the writer's current state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("History is not available before the first call to append")]
    NoHistory,

    #[error("Writer has been closed")]
    Closed,
}

/// Failures that originate in the engine collaborator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Deadline exceeded after {timeout_ms}ms while waiting for {operation}")]
    DeadlineExceeded {
        operation: String,
        timeout_ms: u64,
    },

    #[error("Cell reference has expired and its value is no longer available")]
    ExpiredReference,

    #[error("Unknown table '{table}'")]
    UnknownTable {
        table: String,
    },

    #[error("Engine expected {expected} leaves but received {actual}")]
    LeafCountMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("Engine channel for {what} is disconnected")]
    Disconnected {
        what: String,
    },
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {reason}")]
    Invalid {
        reason: String,
    },
}

/// Top-level error type for the trajectory writer.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl WriterError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a state error.
    #[must_use]
    pub const fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    /// Returns true if the error came from the engine collaborator.
    #[must_use]
    pub const fn is_engine(&self) -> bool {
        matches!(self, Self::Engine(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this is a deadline-exceeded failure.
    #[must_use]
    pub const fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::Engine(EngineError::DeadlineExceeded { .. }))
    }

    /// Returns true if this error is retryable.
    ///
    /// Only timed-out waits qualify: they leave submitted work in flight and
    /// have no side effect beyond the wait itself.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_deadline_exceeded()
    }
}

/// Result type alias for writer operations.
pub type WriterResult<T> = Result<T, WriterError>;
