//! Fixed-size spatial partitions holding the cells that have been touched.

use std::collections::HashMap;

use voxcel_primitives::{CellCoord, ChunkCoord, Size3, CHUNK_SIZE};

use crate::cell::Cell;

/// Cells of one 16x16x16 block, kept in insertion order with a coordinate index.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub coord: ChunkCoord,
    cells: Vec<(CellCoord, Cell)>,
    index: HashMap<CellCoord, usize>,
}

impl Chunk {
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            cells: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, coord: CellCoord) -> Option<&Cell> {
        self.index.get(&coord).map(|&i| &self.cells[i].1)
    }

    pub fn get_or_insert(&mut self, coord: CellCoord) -> &mut Cell {
        let next = self.cells.len();
        let slot = *self.index.entry(coord).or_insert(next);
        if slot == next {
            self.cells.push((coord, Cell::default()));
        }
        &mut self.cells[slot].1
    }

    pub fn insert(&mut self, coord: CellCoord, cell: Cell) {
        *self.get_or_insert(coord) = cell;
    }

    /// Allocate an empty slot for every coordinate of this chunk inside `size`.
    pub fn fill_interior(&mut self, size: Size3) {
        let origin = self.coord.origin();
        let end = |o: u32, s: u32| o.saturating_add(CHUNK_SIZE).min(s);
        for z in origin.z..end(origin.z, size.z) {
            for y in origin.y..end(origin.y, size.y) {
                for x in origin.x..end(origin.x, size.x) {
                    self.get_or_insert(CellCoord::new(x, y, z));
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellCoord, &Cell)> {
        self.cells.iter().map(|(coord, cell)| (*coord, cell))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (CellCoord, &mut Cell)> {
        self.cells.iter_mut().map(|(coord, cell)| (*coord, cell))
    }
}
