//! Provenance of emitted cells: which anchor wrote which cells.
//!
//! `emitted_by_anchor` and `source_by_cell` are inverses. Both are derived
//! from the `emitter` meta of the cells themselves, so every write funnels
//! through [`EmissionIndex::sync`].

use std::collections::{BTreeSet, HashMap};

use voxcel_primitives::{Anchor, ArrayId, CellKey};
use voxcel_sheet::Cell;

#[derive(Debug, Clone, Default)]
pub struct EmissionIndex {
    emitted_by_anchor: HashMap<Anchor, BTreeSet<CellKey>>,
    source_by_cell: HashMap<CellKey, Anchor>,
}

impl EmissionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the entry for `key` in line with the cell now stored there.
    /// An anchor never counts as its own emission.
    pub fn sync(&mut self, key: CellKey, cell: &Cell) {
        let source = cell
            .meta
            .emitter()
            .filter(|anchor| anchor.key() != key && !cell.is_blank());
        self.unlink(key);
        if let Some(anchor) = source {
            self.emitted_by_anchor.entry(anchor).or_default().insert(key);
            self.source_by_cell.insert(key, anchor);
        }
    }

    fn unlink(&mut self, key: CellKey) {
        if let Some(old) = self.source_by_cell.remove(&key) {
            if let Some(set) = self.emitted_by_anchor.get_mut(&old) {
                set.remove(&key);
                if set.is_empty() {
                    self.emitted_by_anchor.remove(&old);
                }
            }
        }
    }

    /// Detach and return everything `anchor` emitted.
    pub fn take_emitted(&mut self, anchor: Anchor) -> BTreeSet<CellKey> {
        let keys = self.emitted_by_anchor.remove(&anchor).unwrap_or_default();
        for key in &keys {
            self.source_by_cell.remove(key);
        }
        keys
    }

    pub fn emitted_by(&self, anchor: Anchor) -> Option<&BTreeSet<CellKey>> {
        self.emitted_by_anchor.get(&anchor)
    }

    pub fn source_of(&self, key: CellKey) -> Option<Anchor> {
        self.source_by_cell.get(&key).copied()
    }

    pub fn emitters(&self) -> impl Iterator<Item = (Anchor, &BTreeSet<CellKey>)> {
        self.emitted_by_anchor.iter().map(|(a, keys)| (*a, keys))
    }

    pub fn len(&self) -> usize {
        self.source_by_cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source_by_cell.is_empty()
    }

    /// Forget every emission that starts or ends in `arr`.
    pub fn purge_array(&mut self, arr: ArrayId) {
        self.emitted_by_anchor.retain(|anchor, keys| {
            keys.retain(|key| key.arr != arr);
            anchor.arr() != arr && !keys.is_empty()
        });
        self.source_by_cell
            .retain(|key, anchor| key.arr != arr && anchor.arr() != arr);
    }

    /// Rewrite every key and anchor through `map`.
    pub fn remap_keys<F>(&mut self, map: F)
    where
        F: Fn(CellKey) -> CellKey,
    {
        let sources = std::mem::take(&mut self.source_by_cell);
        self.emitted_by_anchor.clear();
        for (key, anchor) in sources {
            let key = map(key);
            let anchor = Anchor::from(map(anchor.key()));
            self.emitted_by_anchor.entry(anchor).or_default().insert(key);
            self.source_by_cell.insert(key, anchor);
        }
    }

    pub fn is_consistent(&self) -> bool {
        let forward = self.emitted_by_anchor.iter().all(|(anchor, keys)| {
            keys.iter()
                .all(|key| self.source_by_cell.get(key) == Some(anchor))
        });
        let backward = self.source_by_cell.iter().all(|(key, anchor)| {
            self.emitted_by_anchor
                .get(anchor)
                .is_some_and(|keys| keys.contains(key))
        });
        forward && backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxcel_primitives::Value;

    fn emitted(anchor: Anchor) -> Cell {
        let mut cell = Cell::new("x");
        cell.meta.set_emitter(anchor);
        cell
    }

    #[test]
    fn test_sync_tracks_and_untracks() {
        let anchor = Anchor::from(CellKey::at(1, 0, 0, 0));
        let key = CellKey::at(1, 0, 1, 0);
        let mut index = EmissionIndex::new();

        index.sync(key, &emitted(anchor));
        assert_eq!(index.source_of(key), Some(anchor));
        assert!(index.emitted_by(anchor).is_some_and(|k| k.contains(&key)));

        index.sync(key, &Cell::new(Value::Empty));
        assert_eq!(index.source_of(key), None);
        assert!(index.emitted_by(anchor).is_none());
        assert!(index.is_consistent());
    }

    #[test]
    fn test_anchor_is_not_its_own_emission() {
        let anchor = Anchor::from(CellKey::at(1, 0, 0, 0));
        let mut index = EmissionIndex::new();
        index.sync(anchor.key(), &emitted(anchor));
        assert!(index.is_empty());
    }

    #[test]
    fn test_purge_array() {
        let anchor = Anchor::from(CellKey::at(1, 0, 0, 0));
        let mut index = EmissionIndex::new();
        index.sync(CellKey::at(1, 0, 1, 0), &emitted(anchor));
        index.sync(CellKey::at(2, 0, 0, 0), &emitted(anchor));
        index.purge_array(2);
        assert_eq!(index.len(), 1);
        index.purge_array(1);
        assert!(index.is_empty());
        assert!(index.is_consistent());
    }
}
