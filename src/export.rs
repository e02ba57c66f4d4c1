//! Flat tabular results and their delimited-text / JSON renderings.

use std::fmt::Write as _;

use rusqlite::types::Value;
use serde::Serialize;

use crate::model::types::{ModelerRole, SearchResult};

/// A single cell as read from SQLite.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// Blobs are reported by size only.
    #[serde(serialize_with = "serialize_blob")]
    Blob(usize),
}

fn serialize_blob<S: serde::Serializer>(len: &usize, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("<blob {len} bytes>"))
}

impl From<Value> for CellValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => CellValue::Null,
            Value::Integer(i) => CellValue::Integer(i),
            Value::Real(f) => CellValue::Real(f),
            Value::Text(s) => CellValue::Text(s),
            Value::Blob(b) => CellValue::Blob(b.len()),
        }
    }
}

impl From<Option<String>> for CellValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(CellValue::Null, CellValue::Text)
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Real(r) => write!(f, "{r}"),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Blob(len) => write!(f, "<blob {len} bytes>"),
        }
    }
}

/// Ordered column names plus ordered rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// Set when the row cap stopped reading before the statement was exhausted.
    pub truncated: bool,
}

impl TabularResult {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            truncated: false,
        }
    }

    /// Zero matched rows: a normal outcome, not an error.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Render with `delimiter`, quoting fields that contain it, quotes, or line breaks.
    pub fn to_delimited(&self, delimiter: char) -> String {
        let mut out = String::new();
        write_record(&mut out, self.columns.iter().map(String::as_str), delimiter);
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            write_record(&mut out, cells.iter().map(String::as_str), delimiter);
        }
        out
    }

    pub fn to_csv(&self) -> String {
        self.to_delimited(',')
    }

    pub fn to_tsv(&self) -> String {
        self.to_delimited('\t')
    }

    /// Fixed-width text table for terminals; long cells are clipped to `max_width` chars.
    pub fn to_text_table(&self, max_width: usize) -> String {
        let clip = |s: String| -> String {
            let flat = s.replace(['\n', '\r'], " ");
            if flat.chars().count() > max_width {
                let mut clipped: String = flat.chars().take(max_width.saturating_sub(3)).collect();
                clipped.push_str("...");
                clipped
            } else {
                flat
            }
        };
        let header: Vec<String> = self.columns.iter().cloned().map(&clip).collect();
        let body: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(|c| clip(c.to_string())).collect())
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
        for row in &body {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        let line = |out: &mut String, cells: &[String]| {
            let padded: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(c, &w)| format!("{c:<w$}"))
                .collect();
            let _ = writeln!(out, "{}", padded.join("  ").trim_end());
        };
        line(&mut out, header.as_slice());
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        line(&mut out, rule.as_slice());
        for row in &body {
            line(&mut out, row.as_slice());
        }
        out
    }
}

fn write_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>, delimiter: char) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(delimiter);
        }
        first = false;
        let needs_quotes = field.contains(delimiter)
            || field.contains('"')
            || field.contains('\n')
            || field.contains('\r');
        if needs_quotes {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Flatten search results; modelers are joined with `; `.
impl From<&[SearchResult]> for TabularResult {
    fn from(results: &[SearchResult]) -> Self {
        let mut table = TabularResult::new(
            [
                "bps_model_id",
                "bps_name",
                "vegetation_type",
                "map_zones",
                "modelers",
                "reviewers",
                "document",
                "matched_columns",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        );
        for r in results {
            let people = |role: ModelerRole| -> CellValue {
                let names: Vec<&str> = r
                    .modelers
                    .iter()
                    .filter(|m| m.role == role)
                    .map(|m| m.name.as_str())
                    .collect();
                if names.is_empty() {
                    CellValue::Null
                } else {
                    CellValue::Text(names.join("; "))
                }
            };
            table.rows.push(vec![
                CellValue::Text(r.model.model_id.clone()),
                r.model.bps_name.clone().into(),
                r.model.vegetation_type.clone().into(),
                r.model.map_zones.clone().into(),
                people(ModelerRole::Modeler),
                people(ModelerRole::Reviewer),
                r.document.clone().into(),
                CellValue::Text(r.matched_columns.join(", ")),
            ]);
        }
        table
    }
}
