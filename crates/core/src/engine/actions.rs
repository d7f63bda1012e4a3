//! Host-facing operations: cell edits, batching, undo/redo, array
//! lifecycle, globals, interactions and the repair queue.

use std::collections::BTreeSet;

use voxcel_formulas::{is_formula, normalize_formula};
use voxcel_primitives::{Anchor, ArrayId, CellCoord, CellKey, Size3, Value};
use voxcel_sheet::{ActionKind, Array, Cell, DockMode, Offset, SheetError};

use super::{Engine, RecomputeReport};
use crate::error::{EngineError, Result};
use crate::tasks::{RepairState, Task};
use crate::transaction::CellPatch;

/// Parameters for [`Engine::create_array`]. Unset fields take defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArraySpec {
    /// Explicit id; the lowest free id when unset.
    pub id: Option<ArrayId>,
    pub name: Option<String>,
    pub size: Option<Size3>,
    pub hidden: bool,
    pub sealed: bool,
    pub offset: Option<Offset>,
}

impl ArraySpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: ArrayId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: Size3) -> Self {
        self.size = Some(size);
        self
    }
}

impl Engine {
    /// Write a value and formula to one cell.
    ///
    /// Inside a batch the write joins the batch transaction and recomputation
    /// waits for [`Engine::end`]. Otherwise the write commits on its own.
    pub fn set_cell(
        &mut self,
        key: CellKey,
        value: impl Into<Value>,
        formula: Option<String>,
    ) -> Result<RecomputeReport> {
        let patch = CellPatch::entry(value, formula);
        if let Some(mut batch) = self.batch.take() {
            let result = self.set(&mut batch, key, patch);
            self.batch = Some(batch);
            return result.map(|()| RecomputeReport::default());
        }
        let mut tx = self.start("actions.setCell", "set_cell");
        if let Err(err) = self.set(&mut tx, key, patch) {
            self.rollback(tx);
            return Err(err);
        }
        Ok(self.commit(tx))
    }

    /// Write raw user input: `=...` becomes a formula, anything else a value.
    pub fn enter(&mut self, key: CellKey, text: &str) -> Result<RecomputeReport> {
        if is_formula(text) {
            self.set_cell(key, Value::Empty, normalize_formula(text))
        } else {
            self.set_cell(key, Value::from_input(text), None)
        }
    }

    /// Group following `set_cell` calls into one undoable transaction.
    pub fn begin(&mut self) -> Result<()> {
        if self.batch.is_some() {
            return Err(EngineError::BatchAlreadyOpen);
        }
        self.batch = Some(self.start("actions.batch", "batch"));
        Ok(())
    }

    pub fn end(&mut self) -> Result<RecomputeReport> {
        let tx = self.batch.take().ok_or(EngineError::NoBatchOpen)?;
        Ok(self.commit(tx))
    }

    /// Discard the open batch, restoring every cell it touched.
    pub fn abort(&mut self) -> Result<()> {
        let tx = self.batch.take().ok_or(EngineError::NoBatchOpen)?;
        self.rollback(tx);
        Ok(())
    }

    /// Revert the most recent committed transaction.
    pub fn undo(&mut self) -> Option<RecomputeReport> {
        let done = self.history.pop_undo()?;
        tracing::debug!("undo tx {} ({})", done.id, done.origin);
        for op in done.ops.iter().rev() {
            self.write_raw(op.key, op.prev.clone());
        }
        self.restore_edges(&done.edges_before);
        for effect in done.effects.iter().rev() {
            self.undo_effect(effect);
        }
        let keys = done.changed_keys();
        let mut tx = self.start("history.undo", "undo");
        let report = self.recompute_in(&mut tx, keys, Vec::new());
        self.finish(tx, false);
        self.history.push_redo(done);
        Some(report)
    }

    /// Reapply the most recently undone transaction.
    pub fn redo(&mut self) -> Option<RecomputeReport> {
        let undone = self.history.pop_redo()?;
        tracing::debug!("redo tx {} ({})", undone.id, undone.origin);
        for op in &undone.ops {
            self.write_raw(op.key, op.next.clone());
        }
        self.restore_edges(&undone.edges_after);
        for effect in &undone.effects {
            self.redo_effect(effect);
        }
        let keys = undone.changed_keys();
        let mut tx = self.start("history.redo", "redo");
        let report = self.recompute_in(&mut tx, keys, Vec::new());
        self.finish(tx, false);
        self.history.push_past(undone);
        Some(report)
    }

    pub fn create_array(&mut self, spec: ArraySpec) -> Result<ArrayId> {
        let id = match spec.id.filter(|id| *id > 0) {
            Some(id) if self.world.arrays.contains_key(&id) => {
                return Err(SheetError::ArrayExists(id).into());
            }
            Some(id) => id,
            None => self.world.lowest_free_id(),
        };
        let size = spec.size.unwrap_or(self.config.default_array_size);
        self.config
            .size_limits()
            .check(id, CellCoord::default(), size)?;

        let name = spec
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Array {id}"));
        let mut array = Array::new(id, name, size);
        array.hidden = spec.hidden;
        array.sealed = spec.sealed;
        if let Some(offset) = spec.offset {
            array.offset = offset;
        }
        tracing::info!("Created array {} '{}' size {}", id, array.name, size);
        self.world.arrays.insert(id, array);
        self.world.next_array_id = self.world.next_array_id.max(id.saturating_add(1));
        Ok(id)
    }

    /// Remove an array and every index entry that mentions it, then
    /// recompute the formulas elsewhere that read from it.
    pub fn delete_array(&mut self, id: ArrayId) -> Result<RecomputeReport> {
        let array = self.require_array(id)?;
        let readers: BTreeSet<Anchor> = array
            .cells()
            .flat_map(|(coord, _)| self.world.deps.dependents_of(array.key(coord)))
            .filter(|anchor| anchor.arr() != id)
            .collect();

        let bound: Vec<Anchor> = self
            .world
            .transforms
            .iter()
            .filter(|(anchor, t)| anchor.arr() == id || t.target == id)
            .map(|(anchor, _)| *anchor)
            .collect();
        for anchor in bound {
            if let Some(t) = self.world.transforms.remove(&anchor) {
                self.shift_array(t.target, -t.dx, -t.dy, -t.dz);
            }
        }

        self.world.arrays.remove(&id);
        self.world.deps.purge_array(id);
        self.world.emissions.purge_array(id);
        self.world.undock(id);
        for registered in self.world.listeners.values_mut() {
            registered.retain(|listener| listener.anchor.arr() != id);
        }
        self.world.listeners.retain(|_, registered| !registered.is_empty());
        tracing::info!("Deleted array {} ({} dependent formulas)", id, readers.len());

        let mut tx = self.start("actions.deleteArray", "delete_array");
        let report = self.recompute_in(&mut tx, Vec::new(), readers.into_iter().collect());
        self.finish(tx, false);
        Ok(report)
    }

    /// Set a global and recompute the formulas reading it.
    pub fn set_global(&mut self, key: &str, value: impl Into<Value>) -> RecomputeReport {
        self.world.globals.insert(key.to_string(), value.into());
        self.dirty_globals.insert(key.to_string());
        self.flush_globals()
    }

    /// Define a named macro. Relative references in `source` resolve
    /// against `origin`. Formulas mentioning the name are re-run.
    pub fn define_macro(
        &mut self,
        name: &str,
        source: &str,
        origin: CellKey,
    ) -> Result<RecomputeReport> {
        self.world
            .macros
            .define(name, source, origin)
            .map_err(|e| EngineError::Macro {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        let needle = name.trim().to_ascii_uppercase();
        let roots: Vec<Anchor> = self
            .world
            .arrays
            .values()
            .flat_map(|array| {
                array
                    .cells()
                    .filter(|(_, cell)| {
                        cell.formula
                            .as_deref()
                            .is_some_and(|f| f.to_ascii_uppercase().contains(&needle))
                    })
                    .map(|(coord, _)| Anchor::from(array.key(coord)))
            })
            .collect();
        let mut tx = self.start("actions.defineMacro", name);
        for anchor in &roots {
            if let Some(formula) = self.world.cell(anchor.key()).and_then(|c| c.formula.clone()) {
                self.index_formula(*anchor, &formula);
            }
        }
        let report = self.recompute_in(&mut tx, Vec::new(), roots);
        self.finish(tx, false);
        Ok(report)
    }

    /// Run the on-select hooks of the array holding `key` whose cell set
    /// contains it. A selection triggered from inside a hook is ignored.
    pub fn select(&mut self, key: CellKey) -> Vec<(Anchor, Value)> {
        if self.selecting {
            return Vec::new();
        }
        let Some(array) = self.world.array(key.arr) else {
            return Vec::new();
        };
        let hooks: Vec<(Anchor, String)> = array
            .hooks_matching(key.coord)
            .map(|hook| (Anchor::from(array.key(hook.anchor)), hook.action.clone()))
            .collect();

        self.selecting = true;
        let mut results = Vec::new();
        for (anchor, action) in hooks {
            if let Some(value) = self.run_action(anchor, &action, "select") {
                results.push((anchor, value));
            }
        }
        self.selecting = false;
        results
    }

    /// Run the action formula bound to `kind` in the cell's metadata.
    pub fn interact(&mut self, key: CellKey, kind: ActionKind) -> Result<Option<Value>> {
        self.require_array(key.arr)?;
        let action = self
            .world
            .cell(key)
            .and_then(|cell| cell.meta.action(kind))
            .map(str::to_string);
        Ok(action.and_then(|action| self.run_action(Anchor::from(key), &action, kind.meta_key())))
    }

    /// One action in its own transaction; an error result rolls it back.
    fn run_action(&mut self, anchor: Anchor, action: &str, label: &str) -> Option<Value> {
        let text = if is_formula(action) {
            action.trim().to_string()
        } else {
            format!("={}", action.trim())
        };
        let mut tx = self.start(&format!("meta.{label}"), action);
        let value = self.execute_formula(Some(&mut tx), anchor, &text, false);
        if value.is_error() {
            tracing::warn!("{} action at {} failed: {}", label, anchor, value);
            self.rollback(tx);
        } else {
            self.commit(tx);
        }
        Some(value)
    }

    /// Drain the repair queue. Each task runs in its own transaction;
    /// repairs never enqueue further repairs. Returns the tasks run.
    pub fn run_pending_tasks(&mut self) -> usize {
        if self.repair == RepairState::Repairing {
            return 0;
        }
        self.repair = RepairState::Repairing;
        let mut ran = 0;
        while let Some(task) = self.tasks.pop() {
            let anchors = match &task {
                Task::RestoreEmission(anchors) => anchors.clone(),
                Task::RefillExpansion { arr, old, .. } => self.refill_sources(*arr, *old),
            };
            let mut tx = self.start(task.origin(), "repair");
            for anchor in anchors {
                let live = self
                    .world
                    .cell(anchor.key())
                    .is_some_and(Cell::has_formula);
                if !live {
                    continue;
                }
                if let Err(err) = self.execute_at(anchor, None, Some(&mut tx)) {
                    tracing::warn!("Repair of {} failed: {}", anchor, err);
                }
            }
            self.commit_internal(tx);
            ran += 1;
        }
        self.repair = RepairState::Idle;
        ran
    }

    /// Emitters owning a blank emitted cell of `arr` outside its `old` bounds.
    pub(crate) fn refill_sources(&self, arr: ArrayId, old: Size3) -> Vec<Anchor> {
        let outside = |c: CellCoord| c.x >= old.x || c.y >= old.y || c.z >= old.z;
        let mut anchors: Vec<Anchor> = self
            .world
            .emissions
            .emitters()
            .filter(|(_, keys)| {
                keys.iter().any(|key| {
                    key.arr == arr
                        && outside(key.coord)
                        && self.world.cell(*key).is_none_or(|cell| cell.value.is_empty())
                })
            })
            .map(|(anchor, _)| anchor)
            .collect();
        anchors.sort();
        anchors
    }

    /// Move an array, dragging its docked companions along.
    ///
    /// `ALL` groups move together whichever member moves; `PARENT` groups
    /// follow only their parent.
    pub fn set_array_offset(&mut self, id: ArrayId, offset: Offset) -> Result<()> {
        let current = self.require_array(id)?.offset;
        let (dx, dy, dz) = (offset.x - current.x, offset.y - current.y, offset.z - current.z);
        let mut moving = BTreeSet::from([id]);
        for group in self.world.docks.groups.values() {
            if !group.members.contains(&id) {
                continue;
            }
            let follows = match group.mode {
                DockMode::All => true,
                DockMode::Parent => group.parent_id == Some(id),
            };
            if follows {
                moving.extend(group.members.iter().copied());
            }
        }
        for member in moving {
            self.shift_array(member, dx, dy, dz);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use voxcel_sheet::CellMeta;

    use super::*;
    use crate::engine::ArraySpec;

    #[test]
    fn test_refill_sources_need_blank_cell_in_grown_area() {
        let mut engine = Engine::new();
        engine.create_array(ArraySpec::named("main")).unwrap();
        engine.set_cell(CellKey::at(1, 10, 0, 0), "edge", None).unwrap();
        engine.enter(CellKey::at(1, 0, 0, 0), "=ADD(1, 1)").unwrap();
        let source = Anchor::from(CellKey::at(1, 0, 0, 0));
        let old = Size3::new(6, 4, 6);

        let mut meta = CellMeta::default();
        meta.set_emitter(source);
        let mut emitted = Cell::new("x");
        emitted.meta = meta;

        // Inside the old bounds: never a refill candidate.
        engine.world.emissions.sync(CellKey::at(1, 2, 0, 0), &emitted);
        assert!(engine.refill_sources(1, old).is_empty());

        // Grown area, but the stored cell still holds a value.
        engine.world.emissions.sync(CellKey::at(1, 10, 0, 0), &emitted);
        assert!(engine.refill_sources(1, old).is_empty());

        // Grown area and blank in the store.
        engine.world.emissions.sync(CellKey::at(1, 8, 0, 0), &emitted);
        assert_eq!(engine.refill_sources(1, old), vec![source]);
        assert!(engine.refill_sources(2, old).is_empty());
    }
}
