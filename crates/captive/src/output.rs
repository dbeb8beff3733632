//! Output formatting: table, JSON, YAML, plain.
//!
//! Table uses `tabled`, structured formats use serde, plain emits one
//! identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use captive_core::{Criticality, ProvisionReport, StepStatus};

use crate::cli::{ColorMode, OutputFormat};

pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of items in the chosen format.
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    }
}

/// Render a single item; tables use a pre-formatted detail view.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => id_fn(data),
    }
}

pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Provision report ─────────────────────────────────────────────────

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Per-step table, with outcomes colored when `color` is set.
pub fn render_report(format: &OutputFormat, report: &ProvisionReport, color: bool) -> String {
    render_single(
        format,
        report,
        |r| {
            let rows: Vec<StepRow> = r
                .steps
                .iter()
                .map(|s| StepRow {
                    step: s.step.to_string(),
                    kind: match s.criticality {
                        Criticality::Critical => "critical".into(),
                        Criticality::Advisory => "advisory".into(),
                    },
                    outcome: paint_status(&s.status, color),
                })
                .collect();
            format!(
                "{}\n{} step(s) changed {}",
                render_table(&rows),
                r.changed(),
                r.device
            )
        },
        |r| {
            r.steps
                .iter()
                .map(|s| format!("{} {}", s.step, s.status))
                .collect::<Vec<_>>()
                .join("\n")
        },
    )
}

fn paint_status(status: &StepStatus, color: bool) -> String {
    let text = status.to_string();
    if !color {
        return text;
    }
    match status {
        StepStatus::Created | StepStatus::Updated => text.green().to_string(),
        StepStatus::Failed(_) => text.red().to_string(),
        StepStatus::Skipped => text.yellow().to_string(),
        StepStatus::Unchanged => text.dimmed().to_string(),
    }
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_yaml::to_string(data).unwrap_or_else(|e| format!("error: {e}"))
}
