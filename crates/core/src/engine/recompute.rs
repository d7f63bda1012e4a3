//! Recomputation passes and the formula execution entry points.

use std::collections::{BTreeSet, HashSet};

use voxcel_dag::PlanStep;
use voxcel_formulas::{extract_references, normalize_formula, parse_formula};
use voxcel_primitives::{Anchor, CellKey, Value};

use super::Engine;
use crate::error::{EvalError, Result};
use crate::eval::EvalContext;
use crate::transaction::{CellPatch, Transaction};

/// What a recomputation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputeReport {
    /// Anchors evaluated, in evaluation order.
    pub evaluated: Vec<Anchor>,
    /// Anchors marked as members of a cycle.
    pub cycles: Vec<Anchor>,
    pub passes: usize,
    /// Stopped at `max_recompute_passes` with work left.
    pub truncated: bool,
}

impl RecomputeReport {
    pub fn is_empty(&self) -> bool {
        self.evaluated.is_empty() && self.cycles.is_empty()
    }

    pub fn merge(&mut self, other: RecomputeReport) {
        self.evaluated.extend(other.evaluated);
        self.cycles.extend(other.cycles);
        self.passes += other.passes;
        self.truncated |= other.truncated;
    }
}

impl Engine {
    /// Run passes until `changed`, `roots`, emitted cells and dirty globals
    /// stop producing work.
    ///
    /// Re-entrant calls only queue their input for the pass already running.
    pub(crate) fn recompute_in(
        &mut self,
        tx: &mut Transaction,
        mut changed: Vec<CellKey>,
        mut roots: Vec<Anchor>,
    ) -> RecomputeReport {
        let mut report = RecomputeReport::default();
        if self.recomputing {
            self.deferred_keys.append(&mut changed);
            self.deferred_roots.append(&mut roots);
            return report;
        }
        self.recomputing = true;

        loop {
            changed.append(&mut self.deferred_keys);
            roots.append(&mut self.deferred_roots);
            for key in std::mem::take(&mut self.dirty_globals) {
                roots.extend(self.world.deps.anchors_reading_global(&key));
            }
            if changed.is_empty() && roots.is_empty() {
                break;
            }
            if report.passes >= self.config.max_recompute_passes {
                tracing::warn!(
                    "tx {} recompute stopped after {} passes",
                    tx.id,
                    report.passes
                );
                report.truncated = true;
                break;
            }
            report.passes += 1;

            let plan = self.world.deps.plan(&changed, &roots);
            tracing::debug!(
                "tx {} pass {}: {} changed, {} roots, {} steps",
                tx.id,
                report.passes,
                changed.len(),
                roots.len(),
                plan.steps.len()
            );
            let planned = plan.anchors();
            let mark = tx.ops.len();

            for step in &plan.steps {
                match *step {
                    PlanStep::Evaluate(anchor) => {
                        self.evaluate_anchor(tx, anchor);
                        report.evaluated.push(anchor);
                    }
                    PlanStep::Cycle(anchor) => {
                        tracing::warn!("Cycle detected at {}", anchor);
                        let marker = Value::error(EvalError::Cycle.to_string());
                        if let Err(err) =
                            self.set(tx, anchor.key(), CellPatch::value(marker).internal())
                        {
                            tracing::warn!("Failed to mark cycle at {}: {}", anchor, err);
                        }
                        report.cycles.push(anchor);
                    }
                }
            }

            // Cells written during the pass (emissions, SET targets) feed the
            // next one, unless the pass left them as they were.
            let mut seen = HashSet::new();
            changed = tx.ops[mark..]
                .iter()
                .filter(|op| !op.skip_recompute)
                .filter(|op| !planned.contains(&Anchor::from(op.key)))
                .filter(|op| seen.insert(op.key))
                .filter(|op| !self.world.cell(op.key).is_some_and(|cell| *cell == op.prev))
                .map(|op| op.key)
                .collect();
            roots = Vec::new();
        }

        self.deferred_keys.clear();
        self.deferred_roots.clear();
        self.recomputing = false;
        report
    }

    fn evaluate_anchor(&mut self, tx: &mut Transaction, anchor: Anchor) {
        let formula = self
            .world
            .cell(anchor.key())
            .and_then(|cell| cell.formula.as_deref())
            .and_then(normalize_formula);
        match formula {
            Some(formula) => {
                self.execute_formula(Some(tx), anchor, &formula, true);
            }
            None => {
                tx.note_edges(&self.world.deps, anchor);
                self.world.deps.remove_anchor(anchor);
            }
        }
    }

    /// Parse and evaluate `formula` at `anchor`.
    ///
    /// With `persist`, the anchor's dependency edges are replaced and the
    /// result is written back to it; otherwise the run leaves no trace
    /// beyond what its functions write.
    pub(crate) fn execute_formula(
        &mut self,
        tx: Option<&mut Transaction>,
        anchor: Anchor,
        formula: &str,
        persist: bool,
    ) -> Value {
        let parsed = parse_formula(formula, anchor.key(), &self.world.macros);
        let mut ctx = EvalContext::new(anchor, tx, formula, persist);
        let result = if parsed.is_fatal() {
            let reason = parsed
                .first_error()
                .map(ToString::to_string)
                .unwrap_or_default();
            Err(EvalError::Parse(reason))
        } else {
            self.eval(&mut ctx, &parsed.expr)
                .and_then(|operand| self.scalar(&operand))
        };
        let value = result.unwrap_or_else(|err| Value::error(err.to_string()));

        if !persist {
            return value;
        }

        if let Some(tx) = ctx.tx_mut() {
            tx.note_edges(&self.world.deps, anchor);
        }
        let mut deps = std::mem::take(&mut ctx.reads);
        for cells in extract_references(&parsed.expr) {
            match self.world.deps.expand_box(cells) {
                Ok(keys) => deps.extend(keys),
                Err(err) => tracing::warn!("Dependency of {} dropped: {}", anchor, err),
            }
        }
        self.world.deps.set_dependencies(anchor, deps);
        let globals = std::mem::take(&mut ctx.global_reads);
        self.world.deps.set_global_dependencies(anchor, globals);

        if !ctx.anchor_written {
            let patch = ctx.anchor_patch(value.clone());
            if let Err(err) = self.write(&mut ctx, anchor.key(), patch) {
                tracing::warn!("Failed to store result at {}: {}", anchor, err);
            }
        }
        if let Some(tx) = ctx.tx_mut() {
            tx.evaluated.insert(anchor);
        }
        value
    }

    /// Structural dependency edges of `formula`, before it is evaluated.
    pub(crate) fn index_formula(&mut self, anchor: Anchor, formula: &str) {
        let parsed = parse_formula(formula, anchor.key(), &self.world.macros);
        let mut deps = BTreeSet::new();
        for cells in extract_references(&parsed.expr) {
            match self.world.deps.expand_box(cells) {
                Ok(keys) => deps.extend(keys),
                Err(err) => tracing::warn!("Dependency of {} dropped: {}", anchor, err),
            }
        }
        self.world.deps.set_dependencies(anchor, deps);
    }

    /// Run (or re-run) the formula at `anchor`.
    ///
    /// `formula_override` replaces the stored formula. Without `tx` the run
    /// gets a transaction of its own that is committed before returning. A
    /// cell without a formula just yields its value.
    pub fn execute_at(
        &mut self,
        anchor: Anchor,
        formula_override: Option<&str>,
        tx: Option<&mut Transaction>,
    ) -> Result<Value> {
        self.require_array(anchor.arr())?;
        let stored = self
            .world
            .cell(anchor.key())
            .and_then(|cell| cell.formula.as_deref())
            .and_then(normalize_formula);
        let Some(formula) = formula_override.and_then(normalize_formula).or(stored) else {
            return Ok(self.read_value(anchor.key()));
        };
        match tx {
            Some(tx) => Ok(self.execute_formula(Some(tx), anchor, &formula, true)),
            None => {
                let mut tx = self.start("formula.execute", "execute_at");
                let value = self.execute_formula(Some(&mut tx), anchor, &formula, true);
                self.commit(tx);
                Ok(value)
            }
        }
    }

    /// Evaluate `text` at `anchor` without storing it or its result there.
    pub fn run_once_at(
        &mut self,
        anchor: Anchor,
        text: &str,
        tx: Option<&mut Transaction>,
    ) -> Result<Value> {
        self.require_array(anchor.arr())?;
        let owned_tx = tx.is_none();
        let value = self.execute_formula(tx, anchor, text, false);
        if owned_tx {
            self.flush_globals();
        }
        Ok(value)
    }

    /// Recompute every anchor that depends on `changed`.
    pub fn recompute_anchors(&mut self, changed: &[CellKey]) -> RecomputeReport {
        let mut tx = self.start("recompute", "recompute_anchors");
        let report = self.recompute_in(&mut tx, changed.to_vec(), Vec::new());
        self.finish(tx, false);
        report
    }

    /// Recompute readers of globals changed outside any transaction.
    pub(crate) fn flush_globals(&mut self) -> RecomputeReport {
        if self.dirty_globals.is_empty() || self.recomputing {
            return RecomputeReport::default();
        }
        let tx = self.start("globals.flush", "dirty globals");
        self.commit_internal(tx)
    }
}
