//! Dependency graph between formula anchors and the cells and globals they read.
//!
//! Two pairs of inverse indices are kept in lock-step:
//! `deps_by_anchor`/`anchors_by_dep` for cell reads and
//! `globals_by_anchor`/`anchors_by_global` for global-state reads.
//! An anchor's edges are always replaced wholesale.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use voxcel_primitives::{Anchor, ArrayId, CellBox, CellKey};

/// Largest range a single formula may depend on.
pub const DEFAULT_MAX_RANGE_CELLS: u64 = 10_000;

/// Every edge one anchor owns, detached from the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorEdges {
    pub cells: BTreeSet<CellKey>,
    pub globals: BTreeSet<String>,
}

impl AnchorEdges {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.globals.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("range dependency too large: {cells} cells (max {max})")]
    RangeTooLarge { cells: u64, max: u64 },
}

/// One step of a recomputation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStep {
    /// Re-evaluate the anchor; all of its in-pass inputs are already settled.
    Evaluate(Anchor),
    /// The anchor sits on a dependency cycle and must be marked, not evaluated.
    Cycle(Anchor),
}

impl PlanStep {
    pub fn anchor(&self) -> Anchor {
        match self {
            Self::Evaluate(anchor) | Self::Cycle(anchor) => *anchor,
        }
    }
}

/// Ordered recomputation pass over the anchors affected by a change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputePlan {
    pub steps: Vec<PlanStep>,
}

impl RecomputePlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn evaluated(&self) -> impl Iterator<Item = Anchor> + '_ {
        self.steps.iter().filter_map(|step| match step {
            PlanStep::Evaluate(anchor) => Some(*anchor),
            PlanStep::Cycle(_) => None,
        })
    }

    pub fn cyclic(&self) -> impl Iterator<Item = Anchor> + '_ {
        self.steps.iter().filter_map(|step| match step {
            PlanStep::Cycle(anchor) => Some(*anchor),
            PlanStep::Evaluate(_) => None,
        })
    }

    pub fn anchors(&self) -> BTreeSet<Anchor> {
        self.steps.iter().map(PlanStep::anchor).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    deps_by_anchor: HashMap<Anchor, BTreeSet<CellKey>>,
    anchors_by_dep: HashMap<CellKey, BTreeSet<Anchor>>,
    globals_by_anchor: HashMap<Anchor, BTreeSet<String>>,
    anchors_by_global: HashMap<String, BTreeSet<Anchor>>,
    max_range_cells: u64,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self {
            deps_by_anchor: HashMap::new(),
            anchors_by_dep: HashMap::new(),
            globals_by_anchor: HashMap::new(),
            anchors_by_global: HashMap::new(),
            max_range_cells: DEFAULT_MAX_RANGE_CELLS,
        }
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_range_cells(max_range_cells: u64) -> Self {
        Self {
            max_range_cells,
            ..Self::default()
        }
    }

    pub fn max_range_cells(&self) -> u64 {
        self.max_range_cells
    }

    /// Expand a box into its cells, refusing boxes above the configured limit.
    pub fn expand_box(&self, cells: CellBox) -> Result<Vec<CellKey>, DagError> {
        let count = cells.cell_count();
        if count > self.max_range_cells {
            return Err(DagError::RangeTooLarge {
                cells: count,
                max: self.max_range_cells,
            });
        }
        Ok(cells.iter().collect())
    }

    /// Replace the full set of cells `anchor` reads.
    pub fn set_dependencies<I>(&mut self, anchor: Anchor, deps: I)
    where
        I: IntoIterator<Item = CellKey>,
    {
        self.clear_cell_edges(anchor);
        let deps: BTreeSet<CellKey> = deps.into_iter().collect();
        if deps.is_empty() {
            return;
        }
        for dep in &deps {
            self.anchors_by_dep.entry(*dep).or_default().insert(anchor);
        }
        self.deps_by_anchor.insert(anchor, deps);
    }

    /// Replace the full set of global keys `anchor` reads.
    pub fn set_global_dependencies<I, S>(&mut self, anchor: Anchor, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clear_global_edges(anchor);
        let keys: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return;
        }
        for key in &keys {
            self.anchors_by_global
                .entry(key.clone())
                .or_default()
                .insert(anchor);
        }
        self.globals_by_anchor.insert(anchor, keys);
    }

    /// Forget every edge owned by `anchor`.
    pub fn remove_anchor(&mut self, anchor: Anchor) {
        self.clear_cell_edges(anchor);
        self.clear_global_edges(anchor);
    }

    /// Copy of the edges `anchor` currently owns.
    pub fn edges_of(&self, anchor: Anchor) -> AnchorEdges {
        AnchorEdges {
            cells: self.deps_by_anchor.get(&anchor).cloned().unwrap_or_default(),
            globals: self
                .globals_by_anchor
                .get(&anchor)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Put back edges taken with [`DependencyGraph::edges_of`].
    pub fn restore_edges(&mut self, anchor: Anchor, edges: AnchorEdges) {
        self.set_dependencies(anchor, edges.cells);
        self.set_global_dependencies(anchor, edges.globals);
    }

    pub fn dependencies_of(&self, anchor: Anchor) -> Option<&BTreeSet<CellKey>> {
        self.deps_by_anchor.get(&anchor)
    }

    pub fn globals_of(&self, anchor: Anchor) -> Option<&BTreeSet<String>> {
        self.globals_by_anchor.get(&anchor)
    }

    pub fn dependents_of(&self, key: CellKey) -> impl Iterator<Item = Anchor> + '_ {
        self.anchors_by_dep.get(&key).into_iter().flatten().copied()
    }

    pub fn anchors_reading_global(&self, key: &str) -> impl Iterator<Item = Anchor> + '_ {
        self.anchors_by_global.get(key).into_iter().flatten().copied()
    }

    pub fn has_anchor(&self, anchor: Anchor) -> bool {
        self.deps_by_anchor.contains_key(&anchor) || self.globals_by_anchor.contains_key(&anchor)
    }

    pub fn anchor_count(&self) -> usize {
        self.deps_by_anchor
            .keys()
            .chain(self.globals_by_anchor.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Drop every anchor inside `arr` and every edge that points into it.
    pub fn purge_array(&mut self, arr: ArrayId) {
        let anchors: Vec<Anchor> = self
            .deps_by_anchor
            .keys()
            .chain(self.globals_by_anchor.keys())
            .filter(|anchor| anchor.arr() == arr)
            .copied()
            .collect();
        for anchor in anchors {
            self.remove_anchor(anchor);
        }

        let deps: Vec<CellKey> = self
            .anchors_by_dep
            .keys()
            .filter(|key| key.arr == arr)
            .copied()
            .collect();
        for dep in deps {
            if let Some(anchors) = self.anchors_by_dep.remove(&dep) {
                for anchor in anchors {
                    if let Some(set) = self.deps_by_anchor.get_mut(&anchor) {
                        set.remove(&dep);
                        if set.is_empty() {
                            self.deps_by_anchor.remove(&anchor);
                        }
                    }
                }
            }
        }
    }

    /// Rewrite every anchor and dependency key through `map`.
    pub fn remap_keys<F>(&mut self, map: F)
    where
        F: Fn(CellKey) -> CellKey,
    {
        let remap_anchor = |anchor: Anchor| Anchor::from(map(anchor.key()));

        let deps = std::mem::take(&mut self.deps_by_anchor);
        self.anchors_by_dep.clear();
        for (anchor, keys) in deps {
            let anchor = remap_anchor(anchor);
            let keys: BTreeSet<CellKey> = keys.into_iter().map(&map).collect();
            for key in &keys {
                self.anchors_by_dep.entry(*key).or_default().insert(anchor);
            }
            self.deps_by_anchor.insert(anchor, keys);
        }

        let globals = std::mem::take(&mut self.globals_by_anchor);
        self.anchors_by_global.clear();
        for (anchor, keys) in globals {
            let anchor = remap_anchor(anchor);
            for key in &keys {
                self.anchors_by_global
                    .entry(key.clone())
                    .or_default()
                    .insert(anchor);
            }
            self.globals_by_anchor.insert(anchor, keys);
        }
    }

    /// True when both index pairs are exact inverses of each other.
    pub fn is_consistent(&self) -> bool {
        let forward = self.deps_by_anchor.iter().all(|(anchor, deps)| {
            !deps.is_empty()
                && deps.iter().all(|dep| {
                    self.anchors_by_dep
                        .get(dep)
                        .is_some_and(|set| set.contains(anchor))
                })
        });
        let backward = self.anchors_by_dep.iter().all(|(dep, anchors)| {
            !anchors.is_empty()
                && anchors.iter().all(|anchor| {
                    self.deps_by_anchor
                        .get(anchor)
                        .is_some_and(|set| set.contains(dep))
                })
        });
        let globals = self.globals_by_anchor.iter().all(|(anchor, keys)| {
            keys.iter().all(|key| {
                self.anchors_by_global
                    .get(key)
                    .is_some_and(|set| set.contains(anchor))
            })
        }) && self.anchors_by_global.iter().all(|(key, anchors)| {
            anchors.iter().all(|anchor| {
                self.globals_by_anchor
                    .get(anchor)
                    .is_some_and(|set| set.contains(key))
            })
        });
        forward && backward && globals
    }

    /// Build the recomputation pass for a set of changed cells.
    ///
    /// `roots` are anchors that must run themselves (for example because their
    /// formula text just changed); they are included alongside every anchor that
    /// transitively depends on a changed cell or on a root.
    pub fn plan(&self, changed: &[CellKey], roots: &[Anchor]) -> RecomputePlan {
        let affected = self.affected(changed, roots);
        if affected.is_empty() {
            return RecomputePlan::default();
        }

        let (ordered, leftover) = self.kahn_order(&affected, &HashSet::new());
        let mut steps: Vec<PlanStep> = ordered.into_iter().map(PlanStep::Evaluate).collect();
        if leftover.is_empty() {
            return RecomputePlan { steps };
        }

        let cyclic: HashSet<Anchor> = leftover
            .iter()
            .filter(|anchor| self.has_path_within(**anchor, **anchor, &leftover))
            .copied()
            .collect();
        let mut cyclic_sorted: Vec<Anchor> = cyclic.iter().copied().collect();
        cyclic_sorted.sort();
        steps.extend(cyclic_sorted.into_iter().map(PlanStep::Cycle));

        let downstream: BTreeSet<Anchor> = leftover
            .iter()
            .filter(|anchor| !cyclic.contains(*anchor))
            .copied()
            .collect();
        let (rest, _) = self.kahn_order(&downstream, &cyclic);
        steps.extend(rest.into_iter().map(PlanStep::Evaluate));

        RecomputePlan { steps }
    }

    fn affected(&self, changed: &[CellKey], roots: &[Anchor]) -> BTreeSet<Anchor> {
        let mut affected: BTreeSet<Anchor> = BTreeSet::new();
        let mut queue: VecDeque<Anchor> = VecDeque::new();

        for anchor in roots
            .iter()
            .copied()
            .chain(changed.iter().flat_map(|key| self.dependents_of(*key)))
        {
            if affected.insert(anchor) {
                queue.push_back(anchor);
            }
        }

        while let Some(anchor) = queue.pop_front() {
            for dependent in self.dependents_of(anchor.key()) {
                if affected.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }
        affected
    }

    /// Kahn's algorithm over the subgraph induced by `nodes`. Inputs listed in
    /// `settled` count as already resolved. Returns the ordered prefix and the
    /// nodes that could not be ordered.
    fn kahn_order(
        &self,
        nodes: &BTreeSet<Anchor>,
        settled: &HashSet<Anchor>,
    ) -> (Vec<Anchor>, BTreeSet<Anchor>) {
        let mut indegree: HashMap<Anchor, usize> = HashMap::new();
        for anchor in nodes {
            let count = self
                .deps_by_anchor
                .get(anchor)
                .map(|deps| {
                    deps.iter()
                        .map(|dep| Anchor::from(*dep))
                        .filter(|dep| nodes.contains(dep) && !settled.contains(dep))
                        .count()
                })
                .unwrap_or(0);
            indegree.insert(*anchor, count);
        }

        let mut ready: BTreeSet<Anchor> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(anchor, _)| *anchor)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(anchor) = ready.pop_first() {
            order.push(anchor);
            for dependent in self.dependents_of(anchor.key()) {
                if let Some(count) = indegree.get_mut(&dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        let placed: HashSet<Anchor> = order.iter().copied().collect();
        let leftover = nodes
            .iter()
            .filter(|anchor| !placed.contains(anchor))
            .copied()
            .collect();
        (order, leftover)
    }

    fn has_path_within(&self, from: Anchor, to: Anchor, within: &BTreeSet<Anchor>) -> bool {
        let mut visited: HashSet<Anchor> = HashSet::new();
        let mut queue: VecDeque<Anchor> = self
            .dependents_of(from.key())
            .filter(|a| within.contains(a))
            .collect();

        while let Some(anchor) = queue.pop_front() {
            if anchor == to {
                return true;
            }
            if !visited.insert(anchor) {
                continue;
            }
            for dependent in self.dependents_of(anchor.key()) {
                if within.contains(&dependent) && !visited.contains(&dependent) {
                    queue.push_back(dependent);
                }
            }
        }
        false
    }

    fn clear_cell_edges(&mut self, anchor: Anchor) {
        if let Some(deps) = self.deps_by_anchor.remove(&anchor) {
            for dep in deps {
                if let Some(set) = self.anchors_by_dep.get_mut(&dep) {
                    set.remove(&anchor);
                    if set.is_empty() {
                        self.anchors_by_dep.remove(&dep);
                    }
                }
            }
        }
    }

    fn clear_global_edges(&mut self, anchor: Anchor) {
        if let Some(keys) = self.globals_by_anchor.remove(&anchor) {
            for key in keys {
                if let Some(set) = self.anchors_by_global.get_mut(&key) {
                    set.remove(&anchor);
                    if set.is_empty() {
                        self.anchors_by_global.remove(&key);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(x: u32, y: u32) -> Anchor {
        Anchor::from(CellKey::at(1, x, y, 0))
    }

    fn key(x: u32, y: u32) -> CellKey {
        CellKey::at(1, x, y, 0)
    }

    #[test]
    fn test_set_dependencies_replaces_wholesale() {
        let mut graph = DependencyGraph::new();
        let b1 = anchor(1, 0);
        graph.set_dependencies(b1, [key(0, 0), key(0, 1)]);
        graph.set_dependencies(b1, [key(0, 2)]);

        assert_eq!(graph.dependents_of(key(0, 0)).count(), 0);
        assert_eq!(graph.dependents_of(key(0, 2)).collect::<Vec<_>>(), vec![b1]);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_empty_dependency_set_removes_anchor() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(anchor(1, 0), [key(0, 0)]);
        graph.set_dependencies(anchor(1, 0), []);
        assert!(!graph.has_anchor(anchor(1, 0)));
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_plan_orders_chain() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(anchor(1, 0), [key(0, 0)]);
        graph.set_dependencies(anchor(2, 0), [key(1, 0)]);
        graph.set_dependencies(anchor(5, 5), [key(4, 4)]);

        let plan = graph.plan(&[key(0, 0)], &[]);
        assert_eq!(
            plan.steps,
            vec![
                PlanStep::Evaluate(anchor(1, 0)),
                PlanStep::Evaluate(anchor(2, 0))
            ]
        );
    }

    #[test]
    fn test_plan_marks_self_reference() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(anchor(0, 0), [key(0, 0)]);
        let plan = graph.plan(&[], &[anchor(0, 0)]);
        assert_eq!(plan.steps, vec![PlanStep::Cycle(anchor(0, 0))]);
    }

    #[test]
    fn test_range_too_large() {
        let graph = DependencyGraph::with_max_range_cells(3);
        let err = graph
            .expand_box(CellBox::spanning(key(0, 0), key(1, 1)))
            .unwrap_err();
        assert!(matches!(err, DagError::RangeTooLarge { cells: 4, max: 3 }));
    }

    #[test]
    fn test_global_edges() {
        let mut graph = DependencyGraph::new();
        graph.set_global_dependencies(anchor(0, 0), ["n"]);
        graph.set_global_dependencies(anchor(0, 1), ["n", "m"]);
        let readers: Vec<Anchor> = graph.anchors_reading_global("n").collect();
        assert_eq!(readers, vec![anchor(0, 0), anchor(0, 1)]);
        graph.remove_anchor(anchor(0, 1));
        assert_eq!(graph.anchors_reading_global("m").count(), 0);
        assert!(graph.is_consistent());
    }
}
