//! The aggregate of everything a world holds.
//!
//! All mutation goes through [`crate::Engine`]; this type only exposes reads.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use voxcel_dag::DependencyGraph;
use voxcel_formulas::MacroTable;
use voxcel_primitives::{Anchor, ArrayId, CellKey, Value};
use voxcel_sheet::{Array, Cell, DockDocument, NamedBlock};

use crate::emission::EmissionIndex;

/// An `ON_EVENT` registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub anchor: Anchor,
    pub formula: String,
}

/// An offset shift bound to the formula cell that applied it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveTransform {
    pub target: ArrayId,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

#[derive(Debug, Clone, Default)]
pub struct WorldState {
    pub(crate) arrays: BTreeMap<ArrayId, Array>,
    pub(crate) next_array_id: ArrayId,
    pub(crate) globals: BTreeMap<String, Value>,
    pub(crate) deps: DependencyGraph,
    pub(crate) emissions: EmissionIndex,
    pub(crate) macros: MacroTable,
    pub(crate) named_blocks: BTreeMap<String, NamedBlock>,
    pub(crate) docks: DockDocument,
    pub(crate) listeners: BTreeMap<String, Vec<Listener>>,
    pub(crate) transforms: HashMap<Anchor, LiveTransform>,
}

impl WorldState {
    pub(crate) fn new(max_range_cells: u64) -> Self {
        Self {
            next_array_id: 1,
            deps: DependencyGraph::with_max_range_cells(max_range_cells),
            ..Self::default()
        }
    }

    pub fn array(&self, id: ArrayId) -> Option<&Array> {
        self.arrays.get(&id)
    }

    pub fn arrays(&self) -> impl Iterator<Item = &Array> {
        self.arrays.values()
    }

    pub fn array_ids(&self) -> Vec<ArrayId> {
        self.arrays.keys().copied().collect()
    }

    pub fn array_by_name(&self, name: &str) -> Option<&Array> {
        self.arrays
            .values()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Lowest positive id no array uses.
    pub fn lowest_free_id(&self) -> ArrayId {
        let mut id = 1;
        while self.arrays.contains_key(&id) {
            id += 1;
        }
        id
    }

    pub fn next_array_id(&self) -> ArrayId {
        self.next_array_id
    }

    pub fn cell(&self, key: CellKey) -> Option<&Cell> {
        self.arrays.get(&key.arr)?.get(key.coord)
    }

    pub fn global(&self, key: &str) -> Option<&Value> {
        self.globals.get(key)
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    pub fn deps(&self) -> &DependencyGraph {
        &self.deps
    }

    pub fn emissions(&self) -> &EmissionIndex {
        &self.emissions
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    pub fn named_block(&self, name: &str) -> Option<&NamedBlock> {
        self.named_blocks.get(&name.to_ascii_uppercase())
    }

    pub fn docks(&self) -> &DockDocument {
        &self.docks
    }

    pub fn listeners(&self, event: &str) -> &[Listener] {
        self.listeners.get(event).map_or(&[], Vec::as_slice)
    }

    pub fn transform(&self, anchor: Anchor) -> Option<&LiveTransform> {
        self.transforms.get(&anchor)
    }

    /// Ids sharing a dock group with `arr`, including `arr` itself.
    pub fn docked_with(&self, arr: ArrayId) -> BTreeSet<ArrayId> {
        let mut ids: BTreeSet<ArrayId> = self
            .docks
            .groups
            .values()
            .filter(|g| g.members.contains(&arr))
            .flat_map(|g| g.members.iter().copied())
            .collect();
        ids.insert(arr);
        ids
    }

    /// Drop `arr` from every dock group; groups left empty disappear.
    pub(crate) fn undock(&mut self, arr: ArrayId) {
        let docks = &mut self.docks;
        docks.groups.retain(|_, group| {
            group.members.retain(|m| *m != arr);
            if group.parent_id == Some(arr) {
                group.parent_id = group.members.first().copied();
            }
            !group.members.is_empty()
        });
        let groups = &docks.groups;
        docks
            .by_anchor
            .retain(|anchor, id| anchor.arr() != arr && groups.contains_key(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxcel_primitives::Size3;
    use voxcel_sheet::{DockGroup, DockMode};

    #[test]
    fn test_lowest_free_id_fills_gaps() {
        let mut world = WorldState::new(100);
        world.arrays.insert(1, Array::new(1, "a", Size3::new(1, 1, 1)));
        world.arrays.insert(3, Array::new(3, "c", Size3::new(1, 1, 1)));
        assert_eq!(world.lowest_free_id(), 2);
    }

    #[test]
    fn test_undock_drops_empty_groups() {
        let mut world = WorldState::new(100);
        world.docks.groups.insert(
            "g1".to_string(),
            DockGroup {
                mode: DockMode::Parent,
                members: vec![2],
                parent_id: Some(2),
            },
        );
        world.docks.groups.insert(
            "g2".to_string(),
            DockGroup {
                mode: DockMode::All,
                members: vec![2, 3],
                parent_id: Some(2),
            },
        );
        world.undock(2);
        assert_eq!(world.docks.groups.len(), 1);
        assert_eq!(world.docks.groups["g2"].parent_id, Some(3));
        assert_eq!(world.docked_with(3), BTreeSet::from([3]));
    }
}
