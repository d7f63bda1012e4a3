//! # voxcel-core
//!
//! The reactive engine behind a voxcel world.
//!
//! This crate provides:
//! - The transactional write log with rollback, undo and redo
//! - Dependency-ordered recomputation with cycle marking
//! - The formula evaluator and its builtin function registry
//! - Emission provenance, event listeners and live transforms
//! - World documents for saving and loading

/// Engine configuration.
pub mod config;
/// Which anchor emitted which cells.
pub mod emission;
/// The engine and its host-facing operations.
pub mod engine;
/// Error types and result aliases.
pub mod error;
/// Formula evaluation.
pub mod eval;
/// Builtin functions and the registry.
pub mod functions;
/// Undo/redo ledger.
pub mod history;
/// Post-commit repair queue.
pub mod tasks;
/// Transactions and cell patches.
pub mod transaction;
/// The world aggregate.
pub mod world;

pub use config::EngineConfig;
pub use engine::{ArraySpec, Engine, RecomputeReport};
pub use error::{EngineError, EvalError, Result};
pub use emission::EmissionIndex;
pub use eval::{EvalContext, Operand};
pub use functions::{FnTag, FunctionDefinition, FunctionRegistry, EVENT_PAYLOAD_PREFIX};
pub use history::History;
pub use tasks::Task;
pub use transaction::{CellPatch, Transaction, TxEffect, TxId, WriteOp};
pub use world::{Listener, LiveTransform, WorldState};

/// Re-export the store and primitive types hosts need alongside the engine.
pub use voxcel_primitives::{Anchor, ArrayId, CellCoord, CellKey, Size3, Value};
pub use voxcel_sheet::{ActionKind, Array, Cell, CellMeta, Offset, WorldDocument};
