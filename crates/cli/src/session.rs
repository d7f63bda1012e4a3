//! The line language shared by `--execute` and the REPL.
//!
//! A line is either an assignment (`B2 = 5`, `C1 = =B2*2`), a bare formula
//! evaluated once at the cursor (`=ADD(A1:A3)`), a bare address to inspect,
//! or a `:command`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use voxcel_core::{
    ActionKind, Anchor, ArrayId, ArraySpec, Cell, CellKey, Engine, EngineConfig, RecomputeReport,
    Value,
};
use voxcel_primitives::address::{format_spreadsheet, parse_address};

/// What running one line produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A cell after it was written or inspected.
    Cell { key: CellKey, cell: Cell },
    /// Result of a one-off formula or an interaction.
    Value(Value),
    /// Side effects of a history step or repair run.
    Recomputed(RecomputeReport),
    /// Informational text.
    Message(String),
    /// Structured output such as the world document or globals.
    Json(serde_json::Value),
    Nothing,
    Quit,
}

/// An engine plus the REPL cursor state.
pub struct Session {
    engine: Engine,
    config: EngineConfig,
    /// Array that unqualified addresses resolve against.
    current: ArrayId,
    path: Option<PathBuf>,
    dirty: bool,
}

impl Session {
    /// A fresh world with one default array.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let mut engine = Engine::with_config(config.clone());
        let current = engine
            .create_array(ArraySpec::named("Array 1"))
            .context("Failed to create the initial array")?;
        Ok(Self {
            engine,
            config,
            current,
            path: None,
            dirty: false,
        })
    }

    /// Load `path` if it exists, otherwise start fresh and remember it as the
    /// save target.
    pub fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        if !path.exists() {
            let mut session = Self::new(config)?;
            session.path = Some(path.to_path_buf());
            return Ok(session);
        }
        let engine = Engine::load(path, config.clone())
            .with_context(|| format!("Failed to load world: {}", path.display()))?;
        let current = engine.world().array_ids().first().copied().unwrap_or(1);
        Ok(Self {
            engine,
            config,
            current,
            path: Some(path.to_path_buf()),
            dirty: false,
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn current_array(&self) -> ArrayId {
        self.current
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Unsaved changes since the last load or save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Prompt label, e.g. `Array 1` or `Array 1*` inside a batch.
    #[must_use]
    pub fn prompt_label(&self) -> String {
        let name = self
            .engine
            .array(self.current)
            .map_or_else(|| format!("#{}", self.current), |a| a.name.clone());
        if self.engine.in_batch() {
            format!("{name}*")
        } else {
            name
        }
    }

    pub fn set_global(&mut self, key: &str, raw: &str) {
        self.engine.set_global(key, Value::from_input(raw));
        self.dirty = true;
    }

    /// Run one line.
    pub fn execute(&mut self, line: &str) -> Result<Outcome> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Outcome::Nothing);
        }
        if let Some(command) = line.strip_prefix(':') {
            return self.command(command);
        }
        if line.starts_with('=') {
            let value = self.engine.run_once_at(self.cursor(), line, None)?;
            return Ok(Outcome::Value(value));
        }
        if let Some((target, text)) = split_assignment(line) {
            let key = self.resolve(target)?;
            self.engine
                .enter(key, text)
                .with_context(|| format!("Failed to write {target}"))?;
            self.dirty = true;
            return Ok(self.show(key));
        }
        let key = self.resolve(line)?;
        Ok(self.show(key))
    }

    /// Write the world to `path`, or to the path it was opened from.
    pub fn save(&mut self, path: Option<&Path>) -> Result<PathBuf> {
        let target = path
            .map(Path::to_path_buf)
            .or_else(|| self.path.clone())
            .context("No file to save to; pass a path")?;
        self.engine
            .save(&target)
            .with_context(|| format!("Failed to save world: {}", target.display()))?;
        tracing::info!("Saved world to {}", target.display());
        self.path = Some(target.clone());
        self.dirty = false;
        Ok(target)
    }

    fn command(&mut self, command: &str) -> Result<Outcome> {
        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(n, r)| (n, r.trim()));
        match name {
            "quit" | "q" | "exit" => Ok(Outcome::Quit),
            "undo" => Ok(self.history_step(Engine::undo, "Nothing to undo")),
            "redo" => Ok(self.history_step(Engine::redo, "Nothing to redo")),
            "begin" => {
                self.engine.begin()?;
                Ok(Outcome::Message("Batch open".to_string()))
            }
            "end" => {
                let report = self.engine.end()?;
                self.dirty = true;
                Ok(Outcome::Recomputed(report))
            }
            "abort" => {
                self.engine.abort()?;
                Ok(Outcome::Message("Batch discarded".to_string()))
            }
            "arrays" => Ok(Outcome::Json(self.arrays_json())),
            "globals" => Ok(Outcome::Json(serde_json::to_value(
                self.engine.world().globals(),
            )?)),
            "new" => {
                let mut spec = ArraySpec::default();
                if !rest.is_empty() {
                    spec.name = Some(rest.to_string());
                }
                let id = self.engine.create_array(spec)?;
                self.current = id;
                self.dirty = true;
                Ok(Outcome::Message(format!("Created array {id}")))
            }
            "use" => {
                let id = parse_array_id(rest)?;
                self.engine
                    .array(id)
                    .with_context(|| format!("Array {id} does not exist"))?;
                self.current = id;
                Ok(Outcome::Nothing)
            }
            "delete" => {
                let id = parse_array_id(rest)?;
                let report = self.engine.delete_array(id)?;
                if self.current == id {
                    self.current = self.engine.world().array_ids().first().copied().unwrap_or(id);
                }
                self.dirty = true;
                Ok(Outcome::Recomputed(report))
            }
            "show" => {
                let key = self.resolve(rest)?;
                Ok(self.show(key))
            }
            "click" | "hold" | "touch" | "land" => {
                let kind = action_kind(name);
                let key = self.resolve(rest)?;
                match self.engine.interact(key, kind)? {
                    Some(value) => {
                        self.dirty = true;
                        Ok(Outcome::Value(value))
                    }
                    None => Ok(Outcome::Message(format!("No {} action", kind.meta_key()))),
                }
            }
            "select" => {
                let key = self.resolve(rest)?;
                let results = self.engine.select(key);
                if !results.is_empty() {
                    self.dirty = true;
                }
                let lines: Vec<String> = results
                    .iter()
                    .map(|(anchor, value)| format!("{} -> {value}", self.label(anchor.key())))
                    .collect();
                Ok(Outcome::Message(if lines.is_empty() {
                    "No select hooks".to_string()
                } else {
                    lines.join("\n")
                }))
            }
            "tasks" => {
                let ran = self.engine.run_pending_tasks();
                if ran > 0 {
                    self.dirty = true;
                }
                Ok(Outcome::Message(format!("Ran {ran} repair task(s)")))
            }
            "save" => {
                let path = (!rest.is_empty()).then(|| PathBuf::from(rest));
                let saved = self.save(path.as_deref())?;
                Ok(Outcome::Message(format!("Saved {}", saved.display())))
            }
            "load" => {
                if rest.is_empty() {
                    bail!("Usage: :load <file>");
                }
                *self = Self::open(Path::new(rest), self.config.clone())?;
                Ok(Outcome::Message(format!("Loaded {rest}")))
            }
            "dump" => Ok(Outcome::Json(serde_json::to_value(
                self.engine.to_document(),
            )?)),
            other => bail!("Unknown command: :{other}"),
        }
    }

    fn history_step(
        &mut self,
        step: fn(&mut Engine) -> Option<RecomputeReport>,
        empty: &str,
    ) -> Outcome {
        match step(&mut self.engine) {
            Some(report) => {
                self.dirty = true;
                Outcome::Recomputed(report)
            }
            None => Outcome::Message(empty.to_string()),
        }
    }

    fn cursor(&self) -> Anchor {
        Anchor::from(CellKey::at(self.current, 0, 0, 0))
    }

    fn resolve(&self, text: &str) -> Result<CellKey> {
        if text.is_empty() {
            bail!("Expected a cell address");
        }
        parse_address(text, self.cursor().key())
            .with_context(|| format!("Invalid address: '{text}'"))
    }

    fn show(&self, key: CellKey) -> Outcome {
        Outcome::Cell {
            key,
            cell: self.engine.get_cell(key).into_owned(),
        }
    }

    fn label(&self, key: CellKey) -> String {
        format_spreadsheet(key).unwrap_or_else(|_| key.to_string())
    }

    fn arrays_json(&self) -> serde_json::Value {
        let arrays: Vec<serde_json::Value> = self
            .engine
            .world()
            .arrays()
            .map(|array| {
                serde_json::json!({
                    "id": array.id,
                    "name": array.name,
                    "size": [array.size.x, array.size.y, array.size.z],
                    "offset": [array.offset.x, array.offset.y, array.offset.z],
                    "hidden": array.hidden,
                    "sealed": array.sealed,
                })
            })
            .collect();
        serde_json::Value::Array(arrays)
    }
}

/// `target = text`, where `text` may itself start with `=`.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (target, text) = line.split_once('=')?;
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    Some((target, text.trim()))
}

fn parse_array_id(text: &str) -> Result<ArrayId> {
    text.trim()
        .parse::<ArrayId>()
        .with_context(|| format!("Invalid array id: '{text}'"))
}

fn action_kind(name: &str) -> ActionKind {
    match name {
        "hold" => ActionKind::Hold,
        "touch" => ActionKind::Touch,
        "land" => ActionKind::Land,
        _ => ActionKind::Click,
    }
}
