//! # Voxcel Sheet
//!
//! The sparse cell store behind voxcel. Each [`Array`] is a resizable 3D
//! grid partitioned into 16³ [`Chunk`]s that are allocated on first touch.
//! Reads of untouched cells return the empty cell without allocating.
//!
//! ```
//! use voxcel_primitives::{CellCoord, Size3, Value};
//! use voxcel_sheet::{Array, Cell, SizeLimits};
//!
//! let mut array = Array::new(1, "Array", Size3::new(3, 3, 3));
//! array.set(CellCoord::new(0, 0, 0), Cell::new(Value::from(5u32)));
//!
//! let limits = SizeLimits { max_extent: 64, max_cells: 100_000 };
//! let growth = array.ensure_contains(CellCoord::new(4, 0, 0), limits).unwrap();
//! assert_eq!(growth.map(|g| g.new), Some(Size3::new(5, 3, 3)));
//! assert_eq!(array.cell(CellCoord::new(0, 0, 0)).value, Value::Number(5.0));
//! ```

pub mod array;
pub mod cell;
pub mod chunk;
pub mod document;
pub mod error;
pub mod meta;
pub mod policy;

pub use array::{Array, CollisionMode, Offset, SelectHook, SizeLimits};
pub use cell::Cell;
pub use chunk::Chunk;
pub use document::{
    ArrayDocument, CellDocument, ChunkDocument, DockDocument, DockGroup, DockMode, NamedBlock,
    WorldDocument, DOCUMENT_VERSION,
};
pub use error::{Result, SheetError};
pub use meta::{canonical_key, ActionKind, CellMeta};
pub use policy::{FnPolicy, PolicyMode};
