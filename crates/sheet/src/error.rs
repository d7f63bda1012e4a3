use thiserror::Error;
use voxcel_primitives::{ArrayId, CellCoord, Size3};

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Array not found: {0}")]
    ArrayNotFound(ArrayId),

    #[error("Array already exists: {0}")]
    ArrayExists(ArrayId),

    #[error("Array {arr} cannot grow to {requested} to hold {coord} (per-axis limit {max_extent})")]
    ExtentTooLarge {
        arr: ArrayId,
        coord: CellCoord,
        requested: Size3,
        max_extent: u32,
    },

    #[error("Array {arr} cannot grow to {requested}: {cells} cells exceeds limit {max_cells}")]
    TooManyCells {
        arr: ArrayId,
        requested: Size3,
        cells: u64,
        max_cells: u64,
    },

    #[error("Invalid array size: {0}")]
    InvalidSize(Size3),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SheetError>;
