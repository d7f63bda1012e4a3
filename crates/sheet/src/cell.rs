use serde::{Deserialize, Serialize};
use voxcel_primitives::Value;

use crate::meta::CellMeta;

/// Contents of one cell: displayed value, optional formula source, metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "CellMeta::is_empty")]
    pub meta: CellMeta,
}

impl Cell {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_formula(value: impl Into<Value>, formula: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            formula: Some(formula.into()),
            meta: CellMeta::default(),
        }
    }

    #[must_use]
    pub fn has_formula(&self) -> bool {
        self.formula
            .as_deref()
            .is_some_and(|f| !f.trim().is_empty())
    }

    /// No value and no formula. Metadata is not considered.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.value.is_empty() && !self.has_formula()
    }

    /// Whether the cell carries anything worth writing to a document.
    #[must_use]
    pub fn is_persistable(&self) -> bool {
        !self.is_blank() || !self.meta.is_empty()
    }

    /// Emitted by some other formula cell.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.meta.is_generated() || self.meta.emitter().is_some()
    }
}
