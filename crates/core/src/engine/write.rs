//! The write log: `start`, `set`, `commit`, `rollback`.

use std::collections::HashMap;

use voxcel_dag::AnchorEdges;
use voxcel_formulas::{normalize_formula, ArrayGrowth};
use voxcel_primitives::{Anchor, ArrayId, CellKey};
use voxcel_sheet::{Cell, CellMeta};

use super::{Engine, RecomputeReport};
use crate::error::{EngineError, Result};
use crate::tasks::{RepairState, Task};
use crate::transaction::{CellPatch, Transaction, TxEffect, WriteOp};
use crate::world::{Listener, LiveTransform};

impl Engine {
    /// Open a transaction. Ids increase monotonically per engine.
    pub fn start(&mut self, origin: &str, reason: &str) -> Transaction {
        let id = self.allocate_tx_id();
        tracing::debug!("tx {} start origin={} reason={}", id, origin, reason);
        Transaction::new(id, origin, reason)
    }

    /// Apply `patch` to `key` immediately and log the change on `tx`.
    ///
    /// Rejected writes (missing array, locked cell, sealed array, resize
    /// beyond limits) leave the store and `tx` untouched.
    pub fn set(&mut self, tx: &mut Transaction, key: CellKey, patch: CellPatch) -> Result<()> {
        let limits = self.config.size_limits();
        let growth = {
            let array = self
                .world
                .arrays
                .get_mut(&key.arr)
                .ok_or(EngineError::ArrayNotFound(key.arr))?;
            if !patch.internal {
                if array.sealed {
                    return Err(EngineError::SealedArray(key.arr));
                }
                if array.is_locked(key.coord) {
                    return Err(EngineError::LockedCell(key));
                }
            }
            array.ensure_contains(key.coord, limits)?
        };
        if let Some(growth) = growth {
            self.on_growth(&growth);
        }

        let anchor = Anchor::from(key);
        let prev = self.world.cell(key).cloned().unwrap_or_default();
        let prev_source = self.world.emissions.source_of(key);

        let formula = match &patch.formula {
            Some(formula) => formula.as_deref().and_then(normalize_formula),
            None => prev.formula.clone(),
        };
        let formula_changed = prev.formula.as_deref().and_then(normalize_formula) != formula;

        if formula_changed && prev.has_formula() && !patch.skip_cleanup {
            self.revert_transform(tx, anchor);
            self.clear_emissions(tx, anchor);
            self.drop_handlers(tx, anchor);
        }

        let mut next = prev.clone();
        if let Some(value) = patch.value {
            next.value = value;
        }
        next.formula = formula;
        if let Some(meta) = &patch.meta {
            next.meta.merge(meta);
            drop_null_meta(&mut next.meta);
        }
        if next.is_blank() {
            next.meta.strip_provenance();
        }

        self.world.emissions.sync(key, &next);
        if let Some(array) = self.world.arrays.get_mut(&key.arr) {
            array.set(key.coord, next.clone());
        }
        if formula_changed {
            tx.note_edges(&self.world.deps, anchor);
            match next.formula.as_deref() {
                Some(text) => self.index_formula(anchor, text),
                None => self.world.deps.remove_anchor(anchor),
            }
        }

        tx.ops.push(WriteOp {
            key,
            prev,
            next,
            skip_recompute: patch.skip_recompute,
            skip_cleanup: patch.skip_cleanup,
            prev_source,
        });
        Ok(())
    }

    /// Finalize `tx`: recompute, schedule repairs, record for undo.
    pub fn commit(&mut self, mut tx: Transaction) -> RecomputeReport {
        let report = self.settle(&mut tx);
        self.finish(tx, true);
        report
    }

    /// Like [`Engine::commit`], but the transaction is not undoable.
    pub(crate) fn commit_internal(&mut self, mut tx: Transaction) -> RecomputeReport {
        let report = self.settle(&mut tx);
        self.finish(tx, false);
        report
    }

    fn settle(&mut self, tx: &mut Transaction) -> RecomputeReport {
        let changed = tx.changed_keys();
        let roots = tx.formula_roots();
        self.recompute_in(tx, changed, roots)
    }

    pub(crate) fn finish(&mut self, mut tx: Transaction, record: bool) {
        tx.capture_edges_after(&self.world.deps);
        self.schedule_restores(&tx);
        tracing::debug!(
            "tx {} commit origin={} ops={} effects={}",
            tx.id,
            tx.origin,
            tx.ops.len(),
            tx.effects.len()
        );
        if record && !tx.is_empty() {
            self.history.record(tx);
        }
    }

    /// Restore every touched cell to its state before `tx`, newest first.
    /// No recomputation runs.
    pub fn rollback(&mut self, tx: Transaction) {
        tracing::debug!("tx {} rollback ops={}", tx.id, tx.ops.len());
        for op in tx.ops.iter().rev() {
            self.write_raw(op.key, op.prev.clone());
        }
        self.restore_edges(&tx.edges_before);
        for effect in tx.effects.iter().rev() {
            self.undo_effect(effect);
        }
    }

    /// Reinstate saved dependency edges over what `write_raw` indexed.
    pub(crate) fn restore_edges(&mut self, edges: &HashMap<Anchor, AnchorEdges>) {
        for (anchor, saved) in edges {
            self.world.deps.restore_edges(*anchor, saved.clone());
        }
    }

    /// Emitted cells that became empty by hand get their source replayed later.
    fn schedule_restores(&mut self, tx: &Transaction) {
        if self.repair != RepairState::Idle {
            return;
        }
        let mut sources: Vec<Anchor> = Vec::new();
        for op in &tx.ops {
            if op.skip_cleanup || !op.next.is_blank() {
                continue;
            }
            let Some(source) = op.prev_source else {
                continue;
            };
            let live = self
                .world
                .cell(source.key())
                .is_some_and(Cell::has_formula);
            if live && !sources.contains(&source) {
                sources.push(source);
            }
        }
        if !sources.is_empty() {
            self.tasks.push(Task::RestoreEmission(sources));
        }
    }

    /// Clear every cell `anchor` emitted, as further ops on `tx`.
    pub(crate) fn clear_emissions(&mut self, tx: &mut Transaction, anchor: Anchor) {
        let keys = self.world.emissions.take_emitted(anchor);
        for key in keys {
            if key == anchor.key() || self.world.array(key.arr).is_none() {
                continue;
            }
            let patch = CellPatch::clear().skip_cleanup().internal();
            if let Err(err) = self.set(tx, key, patch) {
                tracing::warn!("Failed to clear {} emitted by {}: {}", key, anchor, err);
            }
        }
    }

    fn drop_handlers(&mut self, tx: &mut Transaction, anchor: Anchor) {
        let mut listeners = Vec::new();
        for (event, registered) in &mut self.world.listeners {
            registered.retain(|listener| {
                if listener.anchor == anchor {
                    listeners.push((event.clone(), listener.clone()));
                    false
                } else {
                    true
                }
            });
        }
        self.world.listeners.retain(|_, registered| !registered.is_empty());

        let hook = self.world.arrays.get_mut(&anchor.arr()).and_then(|array| {
            let hook = array
                .on_select_hooks
                .iter()
                .find(|h| h.anchor == anchor.coord())
                .cloned();
            array.replace_hook(anchor.coord(), None);
            hook
        });

        if !listeners.is_empty() || hook.is_some() {
            tx.effects.push(TxEffect::HandlersDropped {
                anchor,
                listeners,
                hook,
            });
        }
    }

    /// Rewrite references after an array grew.
    fn on_growth(&mut self, growth: &ArrayGrowth) {
        let mut rewritten = 0;
        for array in self.world.arrays.values_mut() {
            rewritten += array.apply_growth(growth);
        }
        self.world.deps.remap_keys(|key| growth.shift_key(key));
        self.world.emissions.remap_keys(|key| growth.shift_key(key));
        tracing::debug!(
            "array {} grew {} -> {}, {} cells rewritten",
            growth.arr,
            growth.old,
            growth.new,
            rewritten
        );

        if self.repair == RepairState::Idle
            && !self.refill_sources(growth.arr, growth.old).is_empty()
        {
            self.tasks.push(Task::RefillExpansion {
                arr: growth.arr,
                old: growth.old,
                new: growth.new,
            });
        }
    }

    /// Store `cell` without logging it, keeping the indices in step.
    pub(crate) fn write_raw(&mut self, key: CellKey, cell: Cell) {
        let Some(array) = self.world.arrays.get_mut(&key.arr) else {
            return;
        };
        let anchor = Anchor::from(key);
        let formula = cell.formula.as_deref().and_then(normalize_formula);
        self.world.emissions.sync(key, &cell);
        array.set(key.coord, cell);
        match formula {
            Some(text) => self.index_formula(anchor, &text),
            None => self.world.deps.remove_anchor(anchor),
        }
    }

    /// Bind a transform to `anchor`, replacing the one it held.
    pub(crate) fn apply_transform(
        &mut self,
        tx: &mut Transaction,
        anchor: Anchor,
        transform: LiveTransform,
    ) -> Result<()> {
        self.require_array(transform.target)?;
        self.revert_transform(tx, anchor);
        self.shift_array(transform.target, transform.dx, transform.dy, transform.dz);
        self.world.transforms.insert(anchor, transform);
        tx.effects
            .push(TxEffect::TransformApplied { anchor, transform });
        Ok(())
    }

    pub(crate) fn revert_transform(&mut self, tx: &mut Transaction, anchor: Anchor) {
        if let Some(transform) = self.world.transforms.remove(&anchor) {
            self.shift_array(transform.target, -transform.dx, -transform.dy, -transform.dz);
            tx.effects
                .push(TxEffect::TransformReverted { anchor, transform });
        }
    }

    pub(crate) fn undo_effect(&mut self, effect: &TxEffect) {
        match effect {
            TxEffect::TransformApplied { anchor, transform } => {
                self.world.transforms.remove(anchor);
                self.shift_array(transform.target, -transform.dx, -transform.dy, -transform.dz);
            }
            TxEffect::TransformReverted { anchor, transform } => {
                self.shift_array(transform.target, transform.dx, transform.dy, transform.dz);
                self.world.transforms.insert(*anchor, *transform);
            }
            TxEffect::HandlersDropped {
                anchor,
                listeners,
                hook,
            } => {
                for (event, listener) in listeners {
                    self.world
                        .listeners
                        .entry(event.clone())
                        .or_default()
                        .push(listener.clone());
                }
                if let Some(array) = self.world.arrays.get_mut(&anchor.arr()) {
                    array.replace_hook(anchor.coord(), hook.clone());
                }
            }
        }
    }

    pub(crate) fn redo_effect(&mut self, effect: &TxEffect) {
        match effect {
            TxEffect::TransformApplied { anchor, transform } => {
                self.shift_array(transform.target, transform.dx, transform.dy, transform.dz);
                self.world.transforms.insert(*anchor, *transform);
            }
            TxEffect::TransformReverted { anchor, transform } => {
                self.world.transforms.remove(anchor);
                self.shift_array(transform.target, -transform.dx, -transform.dy, -transform.dz);
            }
            TxEffect::HandlersDropped { anchor, .. } => {
                let anchor = *anchor;
                for registered in self.world.listeners.values_mut() {
                    registered.retain(|l: &Listener| l.anchor != anchor);
                }
                self.world.listeners.retain(|_, registered| !registered.is_empty());
                if let Some(array) = self.world.arrays.get_mut(&anchor.arr()) {
                    array.replace_hook(anchor.coord(), None);
                }
            }
        }
    }

    pub(crate) fn shift_array(&mut self, id: ArrayId, dx: f64, dy: f64, dz: f64) {
        if let Some(array) = self.world.arrays.get_mut(&id) {
            array.offset = array.offset.translated(dx, dy, dz);
        }
    }
}

/// A `null` in a meta patch deletes the key.
fn drop_null_meta(meta: &mut CellMeta) {
    let nulls: Vec<String> = meta
        .iter()
        .filter(|(_, value)| value.is_null())
        .map(|(key, _)| key.to_string())
        .collect();
    for key in nulls {
        meta.remove(&key);
    }
}
