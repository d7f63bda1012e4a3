//! Transactions: the unit of atomic, undoable change.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use voxcel_dag::{AnchorEdges, DependencyGraph};
use voxcel_primitives::{Anchor, ArrayId, CellKey, Value};
use voxcel_sheet::{Cell, CellMeta, SelectHook};

use crate::world::{Listener, LiveTransform};

pub type TxId = u64;

/// Fields to merge over a cell. `None` leaves the field as it was.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellPatch {
    pub value: Option<Value>,
    /// `Some(None)` removes the formula.
    pub formula: Option<Option<String>>,
    /// Merged key by key over the existing meta.
    pub meta: Option<CellMeta>,
    /// Do not cascade-clear emissions or revert transforms for this write.
    pub skip_cleanup: bool,
    /// Do not treat this write as a change for recomputation.
    pub skip_recompute: bool,
    /// Engine-originated write; ignores locks and sealing.
    pub internal: bool,
}

impl CellPatch {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Empty value and no formula.
    pub fn clear() -> Self {
        Self {
            value: Some(Value::Empty),
            formula: Some(None),
            ..Self::default()
        }
    }

    /// Value plus formula, the shape user edits take.
    pub fn entry(value: impl Into<Value>, formula: Option<String>) -> Self {
        Self {
            value: Some(value.into()),
            formula: Some(formula.filter(|f| !f.trim().is_empty())),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_formula(mut self, formula: Option<String>) -> Self {
        self.formula = Some(formula.filter(|f| !f.trim().is_empty()));
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: CellMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Mark the written cell as emitted by `anchor`.
    #[must_use]
    pub fn emitted_by(mut self, anchor: Anchor) -> Self {
        let mut meta = self.meta.take().unwrap_or_default();
        meta.set_emitter(anchor);
        self.meta = Some(meta);
        self
    }

    #[must_use]
    pub fn skip_cleanup(mut self) -> Self {
        self.skip_cleanup = true;
        self
    }

    #[must_use]
    pub fn skip_recompute(mut self) -> Self {
        self.skip_recompute = true;
        self
    }

    #[must_use]
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

/// One applied write, with the cell before and after.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub key: CellKey,
    pub prev: Cell,
    pub next: Cell,
    pub skip_recompute: bool,
    pub skip_cleanup: bool,
    /// Emitter that owned the cell before this write.
    pub prev_source: Option<Anchor>,
}

/// Side effects outside the cell store that rollback must reverse.
#[derive(Debug, Clone, PartialEq)]
pub enum TxEffect {
    /// A live transform was bound to `anchor`.
    TransformApplied {
        anchor: Anchor,
        transform: LiveTransform,
    },
    /// The transform bound to `anchor` was reverted.
    TransformReverted {
        anchor: Anchor,
        transform: LiveTransform,
    },
    /// Event listeners and the select hook owned by `anchor` were dropped
    /// because its formula changed.
    HandlersDropped {
        anchor: Anchor,
        listeners: Vec<(String, Listener)>,
        hook: Option<SelectHook>,
    },
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TxId,
    pub origin: String,
    pub reason: String,
    pub time: DateTime<Utc>,
    pub(crate) ops: Vec<WriteOp>,
    pub(crate) effects: Vec<TxEffect>,
    /// Anchors whose formula was evaluated inside this transaction.
    pub(crate) evaluated: HashSet<Anchor>,
    /// Dependency edges of each anchor as they were before its first change
    /// in this transaction, and as they stood at commit.
    pub(crate) edges_before: HashMap<Anchor, AnchorEdges>,
    pub(crate) edges_after: HashMap<Anchor, AnchorEdges>,
}

impl Transaction {
    pub(crate) fn new(id: TxId, origin: &str, reason: &str) -> Self {
        Self {
            id,
            origin: origin.to_string(),
            reason: reason.to_string(),
            time: Utc::now(),
            ops: Vec::new(),
            effects: Vec::new(),
            evaluated: HashSet::new(),
            edges_before: HashMap::new(),
            edges_after: HashMap::new(),
        }
    }

    /// Remember `anchor`'s edges unless an earlier change already did.
    pub(crate) fn note_edges(&mut self, graph: &DependencyGraph, anchor: Anchor) {
        self.edges_before
            .entry(anchor)
            .or_insert_with(|| graph.edges_of(anchor));
    }

    /// Record the final edges of every anchor whose edges changed.
    pub(crate) fn capture_edges_after(&mut self, graph: &DependencyGraph) {
        self.edges_after = self
            .edges_before
            .keys()
            .map(|anchor| (*anchor, graph.edges_of(*anchor)))
            .collect();
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn effects(&self) -> &[TxEffect] {
        &self.effects
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Keys written by this transaction that count as changes, first write
    /// order, without duplicates.
    pub fn changed_keys(&self) -> Vec<CellKey> {
        let mut seen = HashSet::new();
        self.ops
            .iter()
            .filter(|op| !op.skip_recompute)
            .filter(|op| seen.insert(op.key))
            .map(|op| op.key)
            .collect()
    }

    /// Formula cells written as raw data rather than produced by evaluation.
    pub(crate) fn formula_roots(&self) -> Vec<Anchor> {
        let mut seen = HashSet::new();
        self.ops
            .iter()
            .filter(|op| !op.skip_recompute && op.next.has_formula())
            .map(|op| Anchor::from(op.key))
            .filter(|anchor| !self.evaluated.contains(anchor))
            .filter(|anchor| seen.insert(*anchor))
            .collect()
    }

    pub fn touches_array(&self, arr: ArrayId) -> bool {
        self.ops.iter().any(|op| op.key.arr == arr)
    }
}
