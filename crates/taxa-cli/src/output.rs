//! Rendering of tabular results as a terminal table or CSV.

use std::io::IsTerminal;

use comfy_table::{ContentArrangement, Table};
use serde_json::Value;
use taxa_db::QueryResults;

use crate::config::OutputFormat;

impl OutputFormat {
    /// The explicit choice, or table on a terminal and CSV when piped.
    pub fn resolve(explicit: Option<OutputFormat>) -> OutputFormat {
        explicit.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                OutputFormat::Table
            } else {
                OutputFormat::Csv
            }
        })
    }
}

/// Renders `results` in `format`, without a trailing newline.
pub fn render(results: &QueryResults, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => render_table(results),
        OutputFormat::Csv => render_csv(results),
    }
}

fn render_table(results: &QueryResults) -> String {
    if results.columns.is_empty() {
        return "(empty result set)".to_string();
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(&results.columns);

    for row in &results.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|value| match value {
                Value::Null => "NULL".to_string(),
                other => cell_text(other),
            })
            .collect();
        table.add_row(cells);
    }

    table.to_string()
}

fn render_csv(results: &QueryResults) -> String {
    let mut lines = Vec::with_capacity(results.rows.len() + 1);
    lines.push(
        results
            .columns
            .iter()
            .map(|c| csv_escape(c))
            .collect::<Vec<_>>()
            .join(","),
    );

    for row in &results.rows {
        let cells: Vec<String> = row.iter().map(|v| csv_escape(&cell_text(v))).collect();
        lines.push(cells.join(","));
    }

    lines.join("\n")
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape a value for CSV output.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
