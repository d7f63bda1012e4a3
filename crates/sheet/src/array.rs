//! A named, resizable 3D grid of cells backed by lazily allocated chunks.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use voxcel_formulas::{shift_absolute_refs, ArrayGrowth};
use voxcel_primitives::{Anchor, ArrayId, CellCoord, CellKey, ChunkCoord, Size3, CHUNK_SIZE};

use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::error::{Result, SheetError};
use crate::policy::FnPolicy;

/// Placement of an array in world space. Owned by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Offset {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn translated(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionMode {
    #[default]
    Edit,
    Physics,
}

/// An action formula that runs when a matching cell of the array is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectHook {
    pub anchor: CellCoord,
    pub cells: BTreeSet<CellCoord>,
    pub action: String,
}

/// Bounds a resize must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub max_extent: u32,
    pub max_cells: u64,
}

impl SizeLimits {
    pub fn check(&self, arr: ArrayId, coord: CellCoord, requested: Size3) -> Result<()> {
        if requested.x == 0 || requested.y == 0 || requested.z == 0 {
            return Err(SheetError::InvalidSize(requested));
        }
        if requested.largest_axis() > self.max_extent {
            return Err(SheetError::ExtentTooLarge {
                arr,
                coord,
                requested,
                max_extent: self.max_extent,
            });
        }
        let cells = u64::from(requested.x) * u64::from(requested.y) * u64::from(requested.z);
        if cells > self.max_cells {
            return Err(SheetError::TooManyCells {
                arr,
                requested,
                cells,
                max_cells: self.max_cells,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Array {
    pub id: ArrayId,
    pub name: String,
    pub size: Size3,
    pub hidden: bool,
    pub sealed: bool,
    pub offset: Offset,
    pub collision_mode: CollisionMode,
    pub fn_policy: FnPolicy,
    pub params: IndexMap<String, JsonValue>,
    pub locks: BTreeSet<CellCoord>,
    pub on_select_hooks: Vec<SelectHook>,
    chunks: HashMap<ChunkCoord, Chunk>,
}

impl Array {
    /// Create an array with every interior cell allocated.
    pub fn new(id: ArrayId, name: impl Into<String>, size: Size3) -> Self {
        let mut array = Self::empty(id, name, size);
        array.ensure_filled(size);
        array
    }

    /// Create an array without allocating any chunks.
    pub(crate) fn empty(id: ArrayId, name: impl Into<String>, size: Size3) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            hidden: false,
            sealed: false,
            offset: Offset::default(),
            collision_mode: CollisionMode::Edit,
            fn_policy: FnPolicy::default(),
            params: IndexMap::new(),
            locks: BTreeSet::new(),
            on_select_hooks: Vec::new(),
            chunks: HashMap::new(),
        }
    }

    pub fn key(&self, coord: CellCoord) -> CellKey {
        CellKey::new(self.id, coord)
    }

    #[must_use]
    pub fn get(&self, coord: CellCoord) -> Option<&Cell> {
        self.chunks.get(&coord.chunk())?.get(coord)
    }

    /// Read a cell; untouched slots read as the empty cell without allocating.
    #[must_use]
    pub fn cell(&self, coord: CellCoord) -> Cow<'_, Cell> {
        match self.get(coord) {
            Some(cell) => Cow::Borrowed(cell),
            None => Cow::Owned(Cell::default()),
        }
    }

    /// Mutable slot for `coord`, allocating its chunk on demand.
    pub fn cell_mut(&mut self, coord: CellCoord) -> &mut Cell {
        let chunk = coord.chunk();
        self.chunks
            .entry(chunk)
            .or_insert_with(|| Chunk::new(chunk))
            .get_or_insert(coord)
    }

    pub fn set(&mut self, coord: CellCoord, cell: Cell) {
        *self.cell_mut(coord) = cell;
    }

    #[must_use]
    pub fn contains(&self, coord: CellCoord) -> bool {
        self.size.contains(coord)
    }

    /// Grow so that `coord` is inside the array.
    ///
    /// Each exceeded axis grows to exactly `coord + 1`. Every cell inside the
    /// new bounds gets a backing slot. Returns the growth when the size
    /// changed so callers can rewrite references elsewhere.
    pub fn ensure_contains(
        &mut self,
        coord: CellCoord,
        limits: SizeLimits,
    ) -> Result<Option<ArrayGrowth>> {
        if self.size.contains(coord) {
            return Ok(None);
        }
        let requested = self.size.grown_to(coord);
        limits.check(self.id, coord, requested)?;
        let growth = ArrayGrowth::new(self.id, self.size, requested);
        self.size = requested;
        self.ensure_filled(requested);
        Ok(Some(growth))
    }

    pub(crate) fn ensure_filled(&mut self, size: Size3) {
        let span = |n: u32| n.div_ceil(CHUNK_SIZE);
        for cz in 0..span(size.z) {
            for cy in 0..span(size.y) {
                for cx in 0..span(size.x) {
                    let coord = ChunkCoord::new(cx, cy, cz);
                    self.chunks
                        .entry(coord)
                        .or_insert_with(|| Chunk::new(coord))
                        .fill_interior(size);
                }
            }
        }
    }

    /// Rewrite absolute references and emitter provenance after `growth`.
    /// Returns how many cells changed.
    pub fn apply_growth(&mut self, growth: &ArrayGrowth) -> usize {
        let mut changed = 0;
        for chunk in self.chunks.values_mut() {
            for (_, cell) in chunk.iter_mut() {
                let mut touched = false;
                let rewritten = cell.formula.as_deref().and_then(|formula| {
                    match shift_absolute_refs(formula, growth) {
                        Cow::Owned(text) if text != formula => Some(text),
                        _ => None,
                    }
                });
                if let Some(rewritten) = rewritten {
                    cell.formula = Some(rewritten);
                    touched = true;
                }
                if let Some(emitter) = cell.meta.emitter() {
                    let shifted = Anchor::from(growth.shift_key(emitter.key()));
                    if shifted != emitter {
                        cell.meta.set_emitter(shifted);
                        touched = true;
                    }
                }
                if touched {
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub(crate) fn insert_chunk(&mut self, chunk: Chunk) {
        self.chunks.insert(chunk.coord, chunk);
    }

    /// Every allocated cell, in no particular order.
    pub fn cells(&self) -> impl Iterator<Item = (CellCoord, &Cell)> {
        self.chunks.values().flat_map(Chunk::iter)
    }

    /// Coordinates of cells carrying a formula.
    pub fn formula_cells(&self) -> Vec<CellCoord> {
        let mut coords: Vec<CellCoord> = self
            .cells()
            .filter(|(_, cell)| cell.has_formula())
            .map(|(coord, _)| coord)
            .collect();
        coords.sort();
        coords
    }

    /// Holds a formula or a generated cell.
    #[must_use]
    pub fn hosts_formulas(&self) -> bool {
        self.cells()
            .any(|(_, cell)| cell.has_formula() || cell.is_generated())
    }

    pub fn physics_enabled(&self) -> bool {
        self.params
            .get("physics")
            .and_then(|p| p.get("enabled"))
            .is_some_and(json_truthy)
    }

    /// Collision mode implied by the current contents and params.
    pub fn derive_collision_mode(&self) -> CollisionMode {
        if self.physics_enabled() || self.hosts_formulas() {
            CollisionMode::Physics
        } else {
            CollisionMode::Edit
        }
    }

    pub fn is_locked(&self, coord: CellCoord) -> bool {
        self.locks.contains(&coord)
    }

    /// Hooks whose cell set contains `coord`, in registration order.
    pub fn hooks_matching(&self, coord: CellCoord) -> impl Iterator<Item = &SelectHook> {
        self.on_select_hooks
            .iter()
            .filter(move |hook| hook.cells.contains(&coord))
    }

    /// Replace any hook owned by `anchor`; `None` only removes it.
    pub fn replace_hook(&mut self, anchor: CellCoord, hook: Option<SelectHook>) {
        self.on_select_hooks.retain(|h| h.anchor != anchor);
        if let Some(hook) = hook {
            self.on_select_hooks.push(hook);
        }
    }
}

fn json_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !(s.is_empty() || s == "false" || s == "0"),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use voxcel_primitives::Value;

    const LIMITS: SizeLimits = SizeLimits {
        max_extent: 64,
        max_cells: 10_000,
    };

    #[test]
    fn test_new_array_is_prefilled() {
        let array = Array::new(1, "Array", Size3::new(3, 2, 2));
        assert_eq!(array.cells().count(), 12);
        assert_eq!(array.chunk_count(), 1);
    }

    #[test]
    fn test_read_outside_does_not_allocate() {
        let array = Array::new(1, "Array", Size3::new(1, 1, 1));
        let cell = array.cell(CellCoord::new(40, 40, 40));
        assert!(cell.is_blank());
        assert_eq!(array.chunk_count(), 1);
    }

    #[test]
    fn test_ensure_contains_grows_minimally() {
        let mut array = Array::new(1, "Array", Size3::new(3, 3, 3));
        let growth = array
            .ensure_contains(CellCoord::new(4, 1, 0), LIMITS)
            .unwrap()
            .expect("growth");
        assert_eq!(growth.old, Size3::new(3, 3, 3));
        assert_eq!(growth.new, Size3::new(5, 3, 3));
        assert_eq!(array.size, Size3::new(5, 3, 3));
        assert_eq!(array.cells().count(), 45);

        assert!(array
            .ensure_contains(CellCoord::new(1, 1, 1), LIMITS)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_ensure_contains_across_chunks() {
        let mut array = Array::new(1, "Array", Size3::new(2, 1, 1));
        array
            .ensure_contains(CellCoord::new(20, 0, 0), LIMITS)
            .unwrap();
        assert_eq!(array.chunk_count(), 2);
        assert!(array.get(CellCoord::new(17, 0, 0)).is_some());
    }

    #[test]
    fn test_limits_reject_without_change() {
        let mut array = Array::new(1, "Array", Size3::new(2, 2, 2));
        let err = array
            .ensure_contains(CellCoord::new(100, 0, 0), LIMITS)
            .unwrap_err();
        assert!(matches!(err, SheetError::ExtentTooLarge { .. }));
        assert_eq!(array.size, Size3::new(2, 2, 2));

        let tight = SizeLimits {
            max_extent: 64,
            max_cells: 10,
        };
        let err = array
            .ensure_contains(CellCoord::new(5, 0, 0), tight)
            .unwrap_err();
        assert!(matches!(err, SheetError::TooManyCells { .. }));
    }

    #[test]
    fn test_apply_growth_rewrites_formulas() {
        let mut array = Array::new(1, "Array", Size3::new(3, 3, 3));
        array.set(
            CellCoord::new(0, 0, 0),
            Cell::with_formula(Value::Empty, "=ADD(@[4,1,1,1], @[2,1,1,1])"),
        );
        let growth = ArrayGrowth::new(1, Size3::new(3, 3, 3), Size3::new(5, 3, 3));
        assert_eq!(array.apply_growth(&growth), 1);
        assert_eq!(
            array.cell(CellCoord::new(0, 0, 0)).formula.as_deref(),
            Some("=ADD(@[6,1,1,1], @[2,1,1,1])")
        );
    }

    #[test]
    fn test_collision_mode() {
        let mut array = Array::new(1, "Array", Size3::new(2, 2, 2));
        assert_eq!(array.derive_collision_mode(), CollisionMode::Edit);

        array.params.insert("physics".into(), json!({"enabled": true}));
        assert_eq!(array.derive_collision_mode(), CollisionMode::Physics);

        array.params.clear();
        array.set(CellCoord::new(1, 1, 1), Cell::with_formula("", "=1"));
        assert_eq!(array.derive_collision_mode(), CollisionMode::Physics);
    }

    #[test]
    fn test_replace_hook() {
        let mut array = Array::new(1, "Array", Size3::new(2, 2, 2));
        let anchor = CellCoord::new(0, 0, 0);
        let hook = SelectHook {
            anchor,
            cells: [CellCoord::new(1, 0, 0)].into_iter().collect(),
            action: "=1".into(),
        };
        array.replace_hook(anchor, Some(hook.clone()));
        array.replace_hook(anchor, Some(hook));
        assert_eq!(array.on_select_hooks.len(), 1);
        assert_eq!(array.hooks_matching(CellCoord::new(1, 0, 0)).count(), 1);
        array.replace_hook(anchor, None);
        assert!(array.on_select_hooks.is_empty());
    }
}
