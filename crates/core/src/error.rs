//! Error types for the engine.

use thiserror::Error;
use voxcel_dag::DagError;
use voxcel_primitives::{AddressError, ArrayId, CellKey};
use voxcel_sheet::SheetError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures surfaced by the engine's write, lifecycle and persistence APIs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Store failure: unknown array, resize beyond limits, bad document.
    #[error(transparent)]
    Sheet(#[from] SheetError),

    /// Dependency graph failure.
    #[error(transparent)]
    Dag(#[from] DagError),

    /// Malformed address text.
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    #[error("array {0} does not exist")]
    ArrayNotFound(ArrayId),

    /// Write rejected because the target cell is locked.
    #[error("cell {0} is locked")]
    LockedCell(CellKey),

    /// Write rejected because the array is sealed.
    #[error("array {0} is sealed")]
    SealedArray(ArrayId),

    #[error("a batch is already open")]
    BatchAlreadyOpen,

    #[error("no batch is open")]
    NoBatchOpen,

    /// Macro definition failed to parse.
    #[error("macro {name}: {message}")]
    Macro { name: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-anchor evaluation failure.
///
/// Never escapes a recomputation pass: the `Display` text becomes the
/// `!ERR:<reason>` marker stored in the anchor's value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("UNKNOWN_FUNCTION:{0}")]
    UnknownFunction(String),

    #[error("ARITY:{name} expects {expected} args, got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("{0} requires a transaction")]
    TransactionRequired(String),

    #[error("POLICY:{0}")]
    PolicyDenied(String),

    #[error("CYCLE")]
    Cycle,

    #[error("PARSE:{0}")]
    Parse(String),

    #[error("RANGE_TOO_LARGE:{cells}>{max}")]
    RangeTooLarge { cells: u64, max: u64 },

    #[error("VALUE")]
    Value,

    #[error("DIV0")]
    DivideByZero,

    /// Failure raised by a write performed during evaluation.
    #[error("WRITE:{0}")]
    Write(String),

    /// Function-specific reason, already formatted (`SEARCH:NOT_FOUND`, ...).
    #[error("{0}")]
    Message(String),
}

impl EvalError {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message(text.into())
    }
}

impl From<EngineError> for EvalError {
    fn from(err: EngineError) -> Self {
        Self::Write(err.to_string())
    }
}

impl From<DagError> for EvalError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::RangeTooLarge { cells, max } => Self::RangeTooLarge { cells, max },
        }
    }
}
