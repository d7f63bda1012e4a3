//! World documents in and out of an engine.

use std::collections::BTreeMap;
use std::path::Path;

use voxcel_primitives::{Anchor, CellKey};
use voxcel_sheet::{Array, WorldDocument};

use super::Engine;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Globals under this prefix belong to a running session, not the world.
const TRANSIENT_GLOBAL_PREFIX: &str = "platformer.";

impl Engine {
    /// Snapshot the world. Offsets are written without live transforms,
    /// which are re-applied when their formulas run after a load.
    pub fn to_document(&self) -> WorldDocument {
        let mut arrays = BTreeMap::new();
        for (id, array) in &self.world.arrays {
            let mut doc = array.to_document();
            for transform in self.world.transforms.values().filter(|t| t.target == *id) {
                doc.offset = doc
                    .offset
                    .translated(-transform.dx, -transform.dy, -transform.dz);
            }
            arrays.insert(*id, doc);
        }

        WorldDocument {
            arrays,
            next_array_id: self.world.next_array_id,
            global_state: self
                .world
                .globals
                .iter()
                .filter(|(key, _)| !key.starts_with(TRANSIENT_GLOBAL_PREFIX))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            docks: self.world.docks.clone(),
            named_blocks: self.world.named_blocks.clone(),
            named_macros: self
                .world
                .macros
                .sources()
                .map(|(name, source)| (name.to_string(), source.to_string()))
                .collect(),
            ..WorldDocument::default()
        }
    }

    /// Rebuild an engine from a document and bring every formula up to date.
    pub fn from_document(doc: WorldDocument, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut engine = Self::with_config(config);
        let limits = engine.config.size_limits();

        for (id, array_doc) in doc.arrays {
            if array_doc.id != id {
                return Err(EngineError::Config(format!(
                    "array stored under id {id} claims id {}",
                    array_doc.id
                )));
            }
            let array = Array::from_document(array_doc, limits)?;
            engine.world.arrays.insert(id, array);
        }
        let highest = engine.world.arrays.keys().next_back().copied().unwrap_or(0);
        engine.world.next_array_id = doc.next_array_id.max(highest.saturating_add(1));
        engine.world.globals = doc.global_state;
        engine.world.docks = doc.docks;
        engine.world.named_blocks = doc
            .named_blocks
            .into_iter()
            .map(|(name, block)| (name.to_ascii_uppercase(), block))
            .collect();

        let origin = CellKey::at(1, 0, 0, 0);
        for (name, source) in &doc.named_macros {
            engine
                .world
                .macros
                .define(name, source, origin)
                .map_err(|e| EngineError::Macro {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
        }

        let mut anchors = Vec::new();
        for array in engine.world.arrays.values() {
            for (coord, cell) in array.cells() {
                engine
                    .world
                    .emissions
                    .sync(array.key(coord), cell);
                if cell.has_formula() {
                    anchors.push(Anchor::from(array.key(coord)));
                }
            }
        }
        anchors.sort();
        for anchor in &anchors {
            if let Some(formula) = engine
                .world
                .cell(anchor.key())
                .and_then(|cell| cell.formula.clone())
            {
                engine.index_formula(*anchor, &formula);
            }
        }

        let mut tx = engine.start("world.load", "from_document");
        let report = engine.recompute_in(&mut tx, Vec::new(), anchors);
        engine.finish(tx, false);
        engine.tasks = Default::default();
        tracing::info!(
            "Loaded world: {} arrays, {} formulas evaluated",
            engine.world.arrays.len(),
            report.evaluated.len()
        );
        Ok(engine)
    }

    pub fn load<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        let doc = WorldDocument::load(path)?;
        Self::from_document(doc, config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_document().save(path)?;
        Ok(())
    }
}
