//! Logical serialization contract for arrays and the world around them.
//!
//! A persistence collaborator writes [`WorldDocument`] wherever it likes; the
//! helpers here read and write it as JSON files.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use voxcel_primitives::{Anchor, ArrayId, CellCoord, ChunkCoord, Size3, Value};

use crate::array::{Array, CollisionMode, Offset, SelectHook, SizeLimits};
use crate::cell::Cell;
use crate::chunk::Chunk;
use crate::error::{Result, SheetError};
use crate::meta::CellMeta;
use crate::policy::FnPolicy;

pub const DOCUMENT_VERSION: &str = "1.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDocument {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "CellMeta::is_empty")]
    pub meta: CellMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDocument {
    pub coord: ChunkCoord,
    pub cells: Vec<CellDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayDocument {
    pub id: ArrayId,
    pub name: String,
    pub size: Size3,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub offset: Offset,
    #[serde(default)]
    pub collision_mode: CollisionMode,
    #[serde(default)]
    pub fn_policy: FnPolicy,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, JsonValue>,
    #[serde(default)]
    pub locks: Vec<CellCoord>,
    #[serde(
        default,
        rename = "on_select_hooks",
        alias = "onSelectHooks",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub on_select_hooks: Vec<SelectHook>,
    #[serde(default)]
    pub chunks: BTreeMap<String, ChunkDocument>,
}

impl Array {
    /// Snapshot for persistence. Only cells with a value, a formula or
    /// metadata are written; the collision mode is derived, not copied.
    pub fn to_document(&self) -> ArrayDocument {
        let mut chunks = BTreeMap::new();
        for chunk in self.chunks() {
            let mut cells: Vec<CellDocument> = chunk
                .iter()
                .filter(|(_, cell)| cell.is_persistable())
                .map(|(coord, cell)| CellDocument {
                    x: coord.x,
                    y: coord.y,
                    z: coord.z,
                    value: cell.value.clone(),
                    formula: cell.formula.clone(),
                    meta: cell.meta.clone(),
                })
                .collect();
            if cells.is_empty() {
                continue;
            }
            cells.sort_by_key(|c| (c.z, c.y, c.x));
            chunks.insert(
                chunk.coord.key(),
                ChunkDocument {
                    coord: chunk.coord,
                    cells,
                },
            );
        }

        ArrayDocument {
            id: self.id,
            name: self.name.clone(),
            size: self.size,
            hidden: self.hidden,
            sealed: self.sealed,
            offset: self.offset,
            collision_mode: self.derive_collision_mode(),
            fn_policy: self.fn_policy.clone(),
            params: self.params.clone(),
            locks: self.locks.iter().copied().collect(),
            on_select_hooks: self.on_select_hooks.clone(),
            chunks,
        }
    }

    /// Rebuild an array, refilling interior cells the document left out.
    pub fn from_document(doc: ArrayDocument, limits: SizeLimits) -> Result<Self> {
        if doc.id == 0 {
            return Err(SheetError::Parse("array id must be positive".to_string()));
        }
        limits.check(doc.id, CellCoord::default(), doc.size)?;

        let mut array = Array::empty(doc.id, doc.name, doc.size);
        array.hidden = doc.hidden;
        array.sealed = doc.sealed;
        array.offset = doc.offset;
        array.fn_policy = doc.fn_policy;
        array.params = doc.params;
        array.locks = doc.locks.into_iter().collect();
        array.on_select_hooks = doc.on_select_hooks;

        let mut chunks: BTreeMap<ChunkCoord, Chunk> = BTreeMap::new();
        for (key, chunk_doc) in doc.chunks {
            if ChunkCoord::parse_key(&key).is_none() {
                return Err(SheetError::Parse(format!("invalid chunk key: {key}")));
            }
            for cell in chunk_doc.cells {
                let coord = CellCoord::new(cell.x, cell.y, cell.z);
                if !array.size.contains(coord) {
                    return Err(SheetError::Parse(format!(
                        "cell {coord} lies outside array {} of size {}",
                        array.id, array.size
                    )));
                }
                let owner = coord.chunk();
                chunks.entry(owner).or_insert_with(|| Chunk::new(owner)).insert(
                    coord,
                    Cell {
                        value: cell.value,
                        formula: cell.formula.filter(|f| !f.trim().is_empty()),
                        meta: cell.meta,
                    },
                );
            }
        }
        for chunk in chunks.into_values() {
            array.insert_chunk(chunk);
        }
        let size = array.size;
        array.ensure_filled(size);
        array.collision_mode = array.derive_collision_mode();
        Ok(array)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockMode {
    #[default]
    Parent,
    All,
}

/// Arrays that move together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockGroup {
    pub mode: DockMode,
    pub members: Vec<ArrayId>,
    pub parent_id: Option<ArrayId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockDocument {
    #[serde(default)]
    pub groups: BTreeMap<String, DockGroup>,
    #[serde(default)]
    pub by_anchor: BTreeMap<Anchor, String>,
}

/// A stored block of values, indexed `[z][y][x]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedBlock {
    pub size: Size3,
    pub data: Vec<Vec<Vec<Value>>>,
}

impl NamedBlock {
    /// Lay `values` out in x, then y, then z order; missing slots are empty.
    pub fn from_values(size: Size3, values: &[Value]) -> Self {
        let mut flat = values.iter();
        let data = (0..size.z)
            .map(|_| {
                (0..size.y)
                    .map(|_| {
                        (0..size.x)
                            .map(|_| flat.next().cloned().unwrap_or_default())
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Self { size, data }
    }

    /// Values in storage order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.data.iter().flatten().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldDocument {
    pub version: String,
    pub arrays: BTreeMap<ArrayId, ArrayDocument>,
    pub next_array_id: ArrayId,
    #[serde(default)]
    pub global_state: BTreeMap<String, Value>,
    #[serde(default)]
    pub docks: DockDocument,
    #[serde(default)]
    pub named_blocks: BTreeMap<String, NamedBlock>,
    #[serde(default)]
    pub named_macros: BTreeMap<String, String>,
}

impl Default for WorldDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION.to_string(),
            arrays: BTreeMap::new(),
            next_array_id: 1,
            global_state: BTreeMap::new(),
            docks: DockDocument::default(),
            named_blocks: BTreeMap::new(),
            named_macros: BTreeMap::new(),
        }
    }
}

impl WorldDocument {
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| SheetError::Parse(format!("Invalid world document: {e}")))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SheetError::Serialize(format!("Failed to serialize world: {e}")))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| SheetError::Parse(format!("Invalid world document: {e}")))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| SheetError::Serialize(format!("Failed to write world: {e}")))?;
        writer.flush()?;
        Ok(())
    }
}
