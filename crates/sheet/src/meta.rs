//! Open key/value metadata attached to a cell.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use voxcel_primitives::Anchor;

pub const GENERATED: &str = "generated";
pub const EMITTER: &str = "emitter";
/// Text shown in place of the value.
pub const DISPLAY_TEXT: &str = "display_text";

/// Legacy spellings accepted for the interaction bindings.
const KEY_ALIASES: [(&str, &str); 5] = [
    ("onClick", "on_click"),
    ("onHold", "on_hold"),
    ("onTouch", "on_touch"),
    ("onLand", "on_land"),
    ("displayText", "display_text"),
];

/// Canonical spelling of a metadata key.
pub fn canonical_key(key: &str) -> &str {
    KEY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(key)
}

/// Interaction kinds that can carry an action formula in a cell's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Click,
    Hold,
    Touch,
    Land,
}

impl ActionKind {
    pub fn meta_key(&self) -> &'static str {
        match self {
            Self::Click => "on_click",
            Self::Hold => "on_hold",
            Self::Touch => "on_touch",
            Self::Land => "on_land",
        }
    }
}

/// Cell metadata with interaction aliases folded into their snake-case keys.
///
/// Keys keep insertion order so persisted documents stay stable between saves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, JsonValue>", into = "IndexMap<String, JsonValue>")]
pub struct CellMeta(IndexMap<String, JsonValue>);

impl CellMeta {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(canonical_key(key))
    }

    pub fn set(&mut self, key: &str, value: impl Into<JsonValue>) {
        self.0.insert(canonical_key(key).to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.shift_remove(canonical_key(key))
    }

    /// Shallow overlay: keys in `other` replace keys here.
    pub fn merge(&mut self, other: &CellMeta) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Action formula bound to an interaction, if any.
    #[must_use]
    pub fn action(&self, kind: ActionKind) -> Option<&str> {
        self.0
            .get(kind.meta_key())
            .and_then(JsonValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    #[must_use]
    pub fn display_text(&self) -> Option<&str> {
        self.0.get(DISPLAY_TEXT).and_then(JsonValue::as_str)
    }

    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.0
            .get(GENERATED)
            .is_some_and(|v| v.as_bool().unwrap_or(!v.is_null()))
    }

    /// The formula cell that emitted this one.
    #[must_use]
    pub fn emitter(&self) -> Option<Anchor> {
        self.0.get(EMITTER)?.as_str()?.parse().ok()
    }

    pub fn set_emitter(&mut self, anchor: Anchor) {
        self.0.insert(GENERATED.to_string(), JsonValue::Bool(true));
        self.0
            .insert(EMITTER.to_string(), JsonValue::String(anchor.to_string()));
    }

    /// Drop `generated`/`emitter` provenance.
    pub fn strip_provenance(&mut self) {
        self.0.shift_remove(GENERATED);
        self.0.shift_remove(EMITTER);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl From<IndexMap<String, JsonValue>> for CellMeta {
    fn from(raw: IndexMap<String, JsonValue>) -> Self {
        let mut out = IndexMap::with_capacity(raw.len());
        for (key, value) in raw {
            // First spelling wins when both an alias and its canonical key appear.
            out.entry(canonical_key(&key).to_string()).or_insert(value);
        }
        Self(out)
    }
}

impl From<CellMeta> for IndexMap<String, JsonValue> {
    fn from(meta: CellMeta) -> Self {
        meta.0
    }
}

impl<K: Into<String>, V: Into<JsonValue>> FromIterator<(K, V)> for CellMeta {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let raw: IndexMap<String, JsonValue> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use voxcel_primitives::CellKey;

    #[test]
    fn test_aliases_normalize_on_load() {
        let meta: CellMeta =
            serde_json::from_value(json!({"onClick": "=A", "on_click": "=B", "color": "#fff"}))
                .unwrap();
        assert_eq!(meta.action(ActionKind::Click), Some("=A"));
        let out = serde_json::to_value(&meta).unwrap();
        assert_eq!(out, json!({"on_click": "=A", "color": "#fff"}));
    }

    #[test]
    fn test_alias_lookup_on_write() {
        let mut meta = CellMeta::new();
        meta.set("onLand", "=GO()");
        assert_eq!(meta.get("on_land"), Some(&json!("=GO()")));
        assert_eq!(meta.action(ActionKind::Land), Some("=GO()"));
    }

    #[test]
    fn test_display_text_alias() {
        let meta: CellMeta = serde_json::from_value(json!({"displayText": "HP"})).unwrap();
        assert_eq!(meta.display_text(), Some("HP"));
        assert_eq!(serde_json::to_value(&meta).unwrap(), json!({"display_text": "HP"}));
    }

    #[test]
    fn test_provenance() {
        let anchor = Anchor::from(CellKey::at(2, 1, 0, 0));
        let mut meta = CellMeta::new();
        meta.set("color", "#000");
        meta.set_emitter(anchor);
        assert!(meta.is_generated());
        assert_eq!(meta.emitter(), Some(anchor));

        meta.strip_provenance();
        assert!(!meta.is_generated());
        assert_eq!(meta.emitter(), None);
        assert!(!meta.is_empty());
    }
}
