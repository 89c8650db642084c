use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::NormalizedRecord;

/// Column-aligned view over normalized records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecordTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RecordTable {
    /// Columns are the union of record keys in first-seen order; missing cells are `null`.
    #[must_use]
    pub fn from_records(records: &[NormalizedRecord]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render an aligned plain-text table, truncating cells wider than `max_width`.
    #[must_use]
    pub fn render_text(&self, max_width: usize) -> String {
        let header = self.columns.iter().map(|column| truncate(column, max_width)).collect::<Vec<_>>();
        let body = self
            .rows
            .iter()
            .map(|row| row.iter().map(|cell| truncate(&cell_text(cell), max_width)).collect())
            .collect::<Vec<Vec<String>>>();

        let mut widths = header.iter().map(|cell| cell.chars().count()).collect::<Vec<_>>();
        for row in &body {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut lines = Vec::with_capacity(body.len() + 2);
        lines.push(render_line(&header, &widths));
        lines.push(widths.iter().map(|width| "-".repeat(*width)).collect::<Vec<_>>().join("  "));
        for row in &body {
            lines.push(render_line(row, &widths));
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn render_line(cells: &[String], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}", width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max_width: usize) -> String {
    if text.chars().count() <= max_width {
        return text.to_string();
    }
    if max_width < 4 {
        return text.chars().take(max_width).collect();
    }
    let mut out = text.chars().take(max_width - 3).collect::<String>();
    out.push_str("...");
    out
}
