//! The engine: one world, its history and the machinery that keeps it
//! consistent.

use std::borrow::Cow;
use std::collections::BTreeSet;

use voxcel_primitives::{Anchor, ArrayId, CellKey, Value};
use voxcel_sheet::{Array, Cell};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::functions::FunctionRegistry;
use crate::history::History;
use crate::tasks::{RepairState, Task, TaskQueue};
use crate::transaction::{Transaction, TxId};
use crate::world::WorldState;

mod actions;
mod persist;
mod recompute;
mod write;

pub use actions::ArraySpec;
pub use recompute::RecomputeReport;

/// A single-threaded world engine.
///
/// Reads go through [`Engine::get_cell`]/[`Engine::world`]; every mutation
/// goes through a [`Transaction`] so that rollback, undo and recomputation
/// see the same ops.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) world: WorldState,
    pub(crate) functions: FunctionRegistry,
    pub(crate) history: History,
    pub(crate) tasks: TaskQueue,
    pub(crate) repair: RepairState,
    next_tx_id: TxId,
    batch: Option<Transaction>,
    /// Set while a recomputation pass runs.
    pub(crate) recomputing: bool,
    /// Changes committed by nested transactions during a pass.
    pub(crate) deferred_keys: Vec<CellKey>,
    pub(crate) deferred_roots: Vec<Anchor>,
    pub(crate) dirty_globals: BTreeSet<String>,
    /// Events whose listeners are running.
    pub(crate) firing: BTreeSet<String>,
    /// Set while on-select hooks run.
    selecting: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            world: WorldState::new(config.max_range_cells),
            history: History::new(config.history_limit),
            functions: FunctionRegistry::default(),
            tasks: TaskQueue::default(),
            repair: RepairState::Idle,
            next_tx_id: 1,
            batch: None,
            recomputing: false,
            deferred_keys: Vec::new(),
            deferred_roots: Vec::new(),
            dirty_globals: BTreeSet::new(),
            firing: BTreeSet::new(),
            selecting: false,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Mutable registry, for hosts that add their own functions.
    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn array(&self, id: ArrayId) -> Option<&Array> {
        self.world.array(id)
    }

    pub(crate) fn require_array(&self, id: ArrayId) -> Result<&Array> {
        self.world.array(id).ok_or(EngineError::ArrayNotFound(id))
    }

    /// Cell contents; untouched slots and unknown arrays read as the empty cell.
    pub fn get_cell(&self, key: CellKey) -> Cow<'_, Cell> {
        match self.world.cell(key) {
            Some(cell) => Cow::Borrowed(cell),
            None => Cow::Owned(Cell::default()),
        }
    }

    /// The cell's current value. Formula cells hold their last evaluation,
    /// which every commit keeps current.
    pub fn get_cell_value(&self, key: CellKey) -> Value {
        self.get_cell(key).value.clone()
    }

    pub fn global(&self, key: &str) -> Option<&Value> {
        self.world.global(key)
    }

    pub fn pending_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    fn allocate_tx_id(&mut self) -> TxId {
        let id = self.next_tx_id;
        self.next_tx_id += 1;
        id
    }
}
