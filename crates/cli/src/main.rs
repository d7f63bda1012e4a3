//! # voxcel-cli
//!
//! Command-line interface for voxcel worlds.

mod session;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use voxcel_core::{Cell, CellKey, EngineConfig, RecomputeReport, Value};
use voxcel_primitives::address::format_spreadsheet;

use session::{Outcome, Session};

/// voxcel - a reactive 3D spreadsheet
#[derive(Parser)]
#[command(name = "voxcel")]
#[command(author, version, about = "Reactive 3D spreadsheet engine", long_about = None)]
struct Cli {
    /// World file to load (created on save when missing)
    #[arg(value_name = "WORLD")]
    file: Option<PathBuf>,

    /// Run a line: `A1 = 5`, `B1 = =A1*2`, `=ADD(A1:B1)`, `:undo`, ...
    #[arg(short = 'e', long = "execute", value_name = "LINE")]
    execute: Vec<String>,

    /// Start REPL mode
    #[arg(short = 'i', long = "interactive")]
    interactive: bool,

    /// Write the world here when done
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Output format (json, table)
    #[arg(short = 'f', long = "format", default_value = "table")]
    format: OutputFormat,

    /// Set a global (key=value)
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// Engine configuration file (JSON)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Output format for results.
#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output (default)
    #[default]
    Table,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let mut session = match &cli.file {
        Some(path) => Session::open(path, config)?,
        None => Session::new(config)?,
    };

    for var in &cli.vars {
        let (key, value) = var.split_once('=').with_context(|| {
            format!("Invalid variable format: '{var}'. Expected KEY=VALUE format")
        })?;
        session.set_global(key.trim(), value.trim());
    }

    for line in &cli.execute {
        let outcome = session
            .execute(line)
            .with_context(|| format!("Failed to run: {line}"))?;
        if outcome == Outcome::Quit {
            break;
        }
        print_outcome(&outcome, cli.format)?;
    }

    if cli.interactive {
        run_repl(&mut session, cli.format)?;
    } else if cli.execute.is_empty() && cli.vars.is_empty() && cli.file.is_none() {
        // No arguments - show help
        Cli::parse_from(["voxcel", "--help"]);
        return Ok(());
    }

    if let Some(output) = &cli.output {
        session.save(Some(output))?;
    } else if session.is_dirty() && session.path().is_some() && !cli.interactive {
        session.save(None)?;
    }

    Ok(())
}

/// Run the REPL.
fn run_repl(session: &mut Session, format: OutputFormat) -> Result<()> {
    println!(
        "{} {} - Interactive Mode",
        "voxcel".cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(
        "Type {} for help, {} to exit\n",
        ":help".yellow(),
        ":quit".yellow()
    );

    let mut rl = DefaultEditor::new()?;
    let history_path = dirs_history_path();

    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    loop {
        let prompt = format!("{}> ", session.prompt_label()).green().bold().to_string();

        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();

                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" | ":h" | ":?" => {
                        print_help();
                        continue;
                    }
                    ":clear" => {
                        print!("\x1B[2J\x1B[1;1H");
                        continue;
                    }
                    _ => {}
                }

                match session.execute(line) {
                    Ok(Outcome::Quit) => break,
                    Ok(outcome) => {
                        if let Err(e) = print_outcome(&outcome, format) {
                            println!("{} {e}", "Error:".red().bold());
                        }
                    }
                    Err(e) => {
                        println!("{} {e:#}", "Error:".red().bold());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                println!("{} {e}", "Error:".red().bold());
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        let _ = rl.save_history(path);
    }

    if session.is_dirty() && session.path().is_some() {
        println!(
            "{} unsaved changes; use {} before quitting to keep them",
            "Note:".yellow().bold(),
            ":save".yellow()
        );
    }

    Ok(())
}

/// Get the history file path.
fn dirs_history_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|mut p| {
        p.push("voxcel");
        let _ = std::fs::create_dir_all(&p);
        p.push("history.txt");
        p
    })
}

/// Print an outcome in the specified format.
fn print_outcome(outcome: &Outcome, format: OutputFormat) -> Result<()> {
    match (outcome, format) {
        (Outcome::Nothing | Outcome::Quit, _) => {}
        (Outcome::Cell { key, cell }, OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&cell_json(*key, cell))?);
        }
        (Outcome::Cell { key, cell }, OutputFormat::Table) => {
            println!("{}", format_cell(*key, cell));
        }
        (Outcome::Value(value), OutputFormat::Json) => {
            println!("{}", serde_json::to_string(value)?);
        }
        (Outcome::Value(value), OutputFormat::Table) => {
            println!("{}", format_value(value));
        }
        (Outcome::Recomputed(report), OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&report_json(report))?);
        }
        (Outcome::Recomputed(report), OutputFormat::Table) => {
            println!("{}", format_report(report));
        }
        (Outcome::Message(text), _) => println!("{text}"),
        (Outcome::Json(json), _) => println!("{}", serde_json::to_string_pretty(json)?),
    }
    Ok(())
}

fn address(key: CellKey) -> String {
    format_spreadsheet(key).unwrap_or_else(|_| key.to_string())
}

/// Format a value for display, errors in red.
fn format_value(value: &Value) -> String {
    match value {
        Value::Empty => "(empty)".dimmed().to_string(),
        Value::Error(_) => value.to_string().red().to_string(),
        Value::Number(_) | Value::Text(_) => value.to_string(),
    }
}

fn format_cell(key: CellKey, cell: &Cell) -> String {
    let mut line = format!("{} = {}", address(key).cyan(), format_value(&cell.value));
    if let Some(shown) = cell.meta.display_text() {
        line.push_str(&format!("  {} {:?}", "shown as".dimmed(), shown));
    }
    if let Some(formula) = &cell.formula {
        line.push_str(&format!("  {}", formula.dimmed()));
    }
    if let Some(emitter) = cell.meta.emitter() {
        line.push_str(&format!("  {} {}", "from".dimmed(), address(emitter.key())));
    }
    line
}

fn format_report(report: &RecomputeReport) -> String {
    let mut text = format!(
        "{} evaluated in {} pass(es)",
        report.evaluated.len(),
        report.passes
    );
    if !report.cycles.is_empty() {
        text.push_str(&format!(", {} in cycles", report.cycles.len()).red().to_string());
    }
    if report.truncated {
        text.push_str(&", truncated".yellow().to_string());
    }
    text
}

fn cell_json(key: CellKey, cell: &Cell) -> serde_json::Value {
    serde_json::json!({
        "address": address(key),
        "key": key.to_string(),
        "value": cell.value,
        "formula": cell.formula,
        "meta": cell.meta,
    })
}

fn report_json(report: &RecomputeReport) -> serde_json::Value {
    let keys = |anchors: &[voxcel_core::Anchor]| -> Vec<String> {
        anchors.iter().map(|a| address(a.key())).collect()
    };
    serde_json::json!({
        "evaluated": keys(&report.evaluated),
        "cycles": keys(&report.cycles),
        "passes": report.passes,
        "truncated": report.truncated,
    })
}

/// Print REPL help.
fn print_help() {
    println!("{}", "voxcel REPL Commands:".cyan().bold());
    println!("  {}    Show this help", ":help, :h, :?".yellow());
    println!("  {}  Exit the REPL", ":quit, :q, :exit".yellow());
    println!("  {}          Clear the screen", ":clear".yellow());
    println!("  {}    Step through history", ":undo, :redo".yellow());
    println!("  {}  Group edits into one step", ":begin, :end, :abort".yellow());
    println!("  {}  List arrays, switch the current one", ":arrays, :use <id>".yellow());
    println!("  {}  Create or delete an array", ":new [name], :delete <id>".yellow());
    println!("  {}  Inspect a cell", ":show <addr>".yellow());
    println!("  {}  Run a cell's bound action", ":click|:hold|:touch|:land <addr>".yellow());
    println!("  {}  Run on-select hooks", ":select <addr>".yellow());
    println!("  {}          Run pending repairs", ":tasks".yellow());
    println!("  {}  Show globals or the world document", ":globals, :dump".yellow());
    println!("  {}  Save or load a world", ":save [file], :load <file>".yellow());
    println!();
    println!("{}", "Lines:".cyan().bold());
    println!("  {}      Write a value", "B2 = 5".yellow());
    println!("  {}  Write a formula", "C1 = =B2*2".yellow());
    println!("  {}  Evaluate once at A1", "=ADD(A1:C1)".yellow());
    println!("  {}    Inspect (A1^2 is array 2)", "B2β".yellow());
}
