//! # Voxcel Primitives
//!
//! Core primitives shared by every voxcel crate: cell coordinates, the
//! `arrId:x,y,z` cell key, chunk partitioning, scalar cell values and the two
//! textual address notations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub mod address;
mod value;

pub use value::{Value, ERROR_PREFIX};

/// Identifier of a logical 3D array. Ids are positive.
pub type ArrayId = u32;

/// Edge length of a chunk along every axis.
pub const CHUNK_SIZE: u32 = 16;

/// A zero-based coordinate inside an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl CellCoord {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Chunk that owns this coordinate.
    pub fn chunk(&self) -> ChunkCoord {
        ChunkCoord::new(self.x / CHUNK_SIZE, self.y / CHUNK_SIZE, self.z / CHUNK_SIZE)
    }

    /// Translate by a signed delta, returning `None` when any axis would go negative
    /// or overflow.
    pub fn offset(&self, dx: i64, dy: i64, dz: i64) -> Option<Self> {
        let shift = |base: u32, delta: i64| -> Option<u32> {
            u32::try_from(i64::from(base).checked_add(delta)?).ok()
        };
        Some(Self {
            x: shift(self.x, dx)?,
            y: shift(self.y, dy)?,
            z: shift(self.z, dz)?,
        })
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Extent of an array along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Size3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn contains(&self, coord: CellCoord) -> bool {
        coord.x < self.x && coord.y < self.y && coord.z < self.z
    }

    /// Smallest size that covers both `self` and `coord`.
    pub fn grown_to(&self, coord: CellCoord) -> Self {
        Self {
            x: self.x.max(coord.x.saturating_add(1)),
            y: self.y.max(coord.y.saturating_add(1)),
            z: self.z.max(coord.z.saturating_add(1)),
        }
    }

    pub fn largest_axis(&self) -> u32 {
        self.x.max(self.y).max(self.z)
    }
}

impl Default for Size3 {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl fmt::Display for Size3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Chunk-space coordinate; serialized keys look like `cx_cy_cz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl ChunkCoord {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.x, self.y, self.z)
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        let mut parts = key.split('_').map(|p| p.parse::<u32>().ok());
        let chunk = Self::new(parts.next()??, parts.next()??, parts.next()??);
        if parts.next().is_some() {
            return None;
        }
        Some(chunk)
    }

    /// First cell coordinate covered by this chunk.
    pub fn origin(&self) -> CellCoord {
        CellCoord::new(
            self.x * CHUNK_SIZE,
            self.y * CHUNK_SIZE,
            self.z * CHUNK_SIZE,
        )
    }
}

/// Identity of a single cell across the whole world: `arrId:x,y,z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub arr: ArrayId,
    pub coord: CellCoord,
}

impl CellKey {
    pub fn new(arr: ArrayId, coord: CellCoord) -> Self {
        Self { arr, coord }
    }

    pub fn at(arr: ArrayId, x: u32, y: u32, z: u32) -> Self {
        Self::new(arr, CellCoord::new(x, y, z))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.arr, self.coord)
    }
}

impl FromStr for CellKey {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AddressError::Malformed(s.to_string());
        let (arr, rest) = s.split_once(':').ok_or_else(malformed)?;
        let arr = arr.trim().parse::<ArrayId>().map_err(|_| malformed())?;
        let mut parts = rest.split(',').map(|p| p.trim().parse::<u32>());
        let mut next = || -> Result<u32, AddressError> {
            parts.next().ok_or_else(malformed)?.map_err(|_| malformed())
        };
        let coord = CellCoord::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self::new(arr, coord))
    }
}

impl Serialize for CellKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An inclusive, axis-aligned box of cells inside one array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellBox {
    pub arr: ArrayId,
    pub min: CellCoord,
    pub max: CellCoord,
}

impl CellBox {
    /// Box spanning two corners in any order; the array comes from `start`.
    pub fn spanning(start: CellKey, end: CellKey) -> Self {
        let (a, b) = (start.coord, end.coord);
        Self {
            arr: start.arr,
            min: CellCoord::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: CellCoord::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    pub fn single(key: CellKey) -> Self {
        Self::spanning(key, key)
    }

    pub fn extent(&self) -> Size3 {
        Size3::new(
            self.max.x - self.min.x + 1,
            self.max.y - self.min.y + 1,
            self.max.z - self.min.z + 1,
        )
    }

    pub fn cell_count(&self) -> u64 {
        let e = self.extent();
        u64::from(e.x) * u64::from(e.y) * u64::from(e.z)
    }

    pub fn contains(&self, key: CellKey) -> bool {
        key.arr == self.arr
            && (self.min.x..=self.max.x).contains(&key.coord.x)
            && (self.min.y..=self.max.y).contains(&key.coord.y)
            && (self.min.z..=self.max.z).contains(&key.coord.z)
    }

    /// Cells in z-major, then y, then x order.
    pub fn iter(&self) -> impl Iterator<Item = CellKey> + '_ {
        (self.min.z..=self.max.z).flat_map(move |z| {
            (self.min.y..=self.max.y).flat_map(move |y| {
                (self.min.x..=self.max.x).map(move |x| CellKey::at(self.arr, x, y, z))
            })
        })
    }
}

/// The cell that owns a formula. Shares the `arrId:x,y,z` identity of [`CellKey`]
/// but is kept distinct so dependency and emission maps cannot mix up the two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Anchor(CellKey);

impl Anchor {
    pub fn new(key: CellKey) -> Self {
        Self(key)
    }

    pub fn key(&self) -> CellKey {
        self.0
    }

    pub fn arr(&self) -> ArrayId {
        self.0.arr
    }

    pub fn coord(&self) -> CellCoord {
        self.0.coord
    }
}

impl From<CellKey> for Anchor {
    fn from(key: CellKey) -> Self {
        Self(key)
    }
}

impl From<Anchor> for CellKey {
    fn from(anchor: Anchor) -> Self {
        anchor.0
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Anchor {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Errors that can occur when parsing addresses or keys
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,
    #[error("Invalid column: {0}")]
    InvalidColumn(String),
    #[error("Invalid row: {0}")]
    InvalidRow(String),
    #[error("Invalid layer: {0}")]
    InvalidLayer(String),
    #[error("Invalid array id: {0}")]
    InvalidArrayId(String),
    #[error("Coordinate out of range: {0}")]
    OutOfRange(String),
    #[error("Malformed address: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_of_coordinate() {
        let coord = CellCoord::new(17, 3, 40);
        assert_eq!(coord.chunk(), ChunkCoord::new(1, 0, 2));
        assert_eq!(coord.chunk().key(), "1_0_2");
        assert_eq!(ChunkCoord::parse_key("1_0_2"), Some(ChunkCoord::new(1, 0, 2)));
        assert_eq!(ChunkCoord::parse_key("1_0"), None);
    }

    #[test]
    fn test_cell_key_text_form() {
        let key = CellKey::at(3, 1, 2, 0);
        assert_eq!(key.to_string(), "3:1,2,0");
        assert_eq!("3:1,2,0".parse::<CellKey>().unwrap(), key);
        assert!("3:1,2".parse::<CellKey>().is_err());
        assert!("x:1,2,3".parse::<CellKey>().is_err());
    }

    #[test]
    fn test_offset_rejects_negative() {
        let coord = CellCoord::new(0, 5, 1);
        assert_eq!(coord.offset(1, -2, 0), Some(CellCoord::new(1, 3, 1)));
        assert_eq!(coord.offset(-1, 0, 0), None);
    }

    #[test]
    fn test_size_growth_is_minimal() {
        let size = Size3::new(3, 3, 3);
        assert_eq!(size.grown_to(CellCoord::new(4, 0, 2)), Size3::new(5, 3, 3));
        assert!(size.contains(CellCoord::new(2, 2, 2)));
        assert!(!size.contains(CellCoord::new(3, 0, 0)));
    }

    #[test]
    fn test_box_normalizes_descending_corners() {
        let b = CellBox::spanning(CellKey::at(1, 2, 1, 0), CellKey::at(1, 0, 0, 1));
        assert_eq!(b.min, CellCoord::new(0, 0, 0));
        assert_eq!(b.max, CellCoord::new(2, 1, 1));
        assert_eq!(b.cell_count(), 12);
        let cells: Vec<CellKey> = b.iter().take(4).collect();
        assert_eq!(
            cells,
            vec![
                CellKey::at(1, 0, 0, 0),
                CellKey::at(1, 1, 0, 0),
                CellKey::at(1, 2, 0, 0),
                CellKey::at(1, 0, 1, 0),
            ]
        );
        assert!(b.contains(CellKey::at(1, 2, 1, 1)));
        assert!(!b.contains(CellKey::at(2, 0, 0, 0)));
    }

    #[test]
    fn test_anchor_serializes_as_key_string() {
        let anchor = Anchor::from(CellKey::at(1, 0, 0, 0));
        let json = serde_json::to_string(&anchor).unwrap();
        assert_eq!(json, "\"1:0,0,0\"");
        let back: Anchor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, anchor);
    }
}
