//! Rendering of daemon replies for the terminal.
//!
//! `--output` (or `output` in the config file) picks the format: rounded
//! `tabled` tables, JSON, compact JSON, YAML, or bare ids for scripting.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

/// Resolved presentation settings for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

impl Printer {
    /// Render a list: `to_row` for tables, `id_fn` for plain output.
    pub fn list<T, R>(
        &self,
        data: &[T],
        to_row: impl Fn(&T) -> R,
        id_fn: impl Fn(&T) -> String,
    ) -> Result<(), CliError>
    where
        T: Serialize,
        R: Tabled,
    {
        let out = match self.format {
            OutputFormat::Table => {
                let rows: Vec<R> = data.iter().map(to_row).collect();
                render_table(&rows)
            }
            OutputFormat::Plain => data.iter().map(id_fn).collect::<Vec<_>>().join("\n"),
            format => render_structured(format, data)?,
        };
        self.print(&out);
        Ok(())
    }

    /// Render one item: `detail_fn` for tables, `id_fn` for plain output.
    pub fn single<T: Serialize>(
        &self,
        data: &T,
        detail_fn: impl Fn(&T) -> String,
        id_fn: impl Fn(&T) -> String,
    ) -> Result<(), CliError> {
        let out = match self.format {
            OutputFormat::Table => detail_fn(data),
            OutputFormat::Plain => id_fn(data),
            format => render_structured(format, data)?,
        };
        self.print(&out);
        Ok(())
    }

    /// Render an untyped RPC result. Tables fall back to pretty JSON.
    pub fn value(&self, data: &serde_json::Value) -> Result<(), CliError> {
        let out = match self.format {
            OutputFormat::Table | OutputFormat::Json => render_structured(OutputFormat::Json, data)?,
            OutputFormat::Plain => match data {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            },
            format => render_structured(format, data)?,
        };
        self.print(&out);
        Ok(())
    }

    /// A one-line confirmation on stderr, e.g. "Device forgotten".
    pub fn done(&self, message: &str) {
        if self.quiet {
            return;
        }
        if self.color {
            eprintln!("{} {message}", "✓".green());
        } else {
            eprintln!("{message}");
        }
    }

    fn print(&self, output: &str) {
        if self.quiet || output.is_empty() {
            return;
        }
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{output}");
    }
}

/// `auto` colors only on a terminal without `NO_COLOR` set.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn render_structured<T: Serialize + ?Sized>(
    format: OutputFormat,
    data: &T,
) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data).map_err(|e| CliError::Validation {
            field: "output".into(),
            reason: format!("YAML rendering failed: {e}"),
        })?,
        _ => serde_json::to_string_pretty(data)?,
    })
}

/// `-` for empty strings in table cells.
pub fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".into()
    } else {
        value.to_owned()
    }
}
