//! Core domain model for roadmap sync: sheet cells, task records, tracker items.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod dates;

pub use dates::DateParser;

pub const CRATE_NAME: &str = "roadmap-core";

/// One raw spreadsheet cell as delivered by a table source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl CellValue {
    /// Map a JSON cell from a sheet export onto a typed cell.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Bool(b) => CellValue::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or_default(),
            JsonValue::String(s) if s.trim().is_empty() => CellValue::Empty,
            JsonValue::String(s) => CellValue::Text(s.clone()),
            JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => CellValue::Empty,
        }
    }

    /// Trimmed display text for free-text fields.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            CellValue::Bool(b) => b.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::DateTime(dt) => dt.to_rfc3339(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.as_text().is_empty()
    }
}

/// Canonical task derived from one spreadsheet row.
///
/// Only constructed for rows with a non-empty activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskRecord {
    pub row_number: usize,
    pub phase: String,
    pub activity: String,
    pub task_detail: String,
    pub principle: String,
    pub deliverable: String,
    pub owner: String,
    pub quarter: String,
    pub start_date: String,
    pub end_date: String,
    pub status: String,
}

/// Existing issue on the remote tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub number: u64,
    pub title: String,
}

/// Categorical tag with a hex color (no leading `#`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: String,
}

impl Label {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Named date-typed custom field on a project board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleField {
    pub id: String,
    pub name: String,
}

/// Header keywords per task field. Matching is a case-insensitive substring test;
/// keywords are tried in order and the first header containing one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnKeywords {
    pub phase: Vec<String>,
    pub activity: Vec<String>,
    pub task_detail: Vec<String>,
    pub principle: Vec<String>,
    pub deliverable: Vec<String>,
    pub owner: Vec<String>,
    pub quarter: Vec<String>,
    pub start_date: Vec<String>,
    pub end_date: Vec<String>,
    pub status: Vec<String>,
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnKeywords {
    fn default() -> Self {
        Self {
            phase: words(&["phase"]),
            activity: words(&["activity"]),
            task_detail: words(&["task detail"]),
            principle: words(&["pt1 principle", "principle"]),
            deliverable: words(&["deliverable"]),
            owner: words(&["owner"]),
            quarter: words(&["quarter"]),
            start_date: words(&["start date", "start"]),
            end_date: words(&["end date", "end"]),
            status: words(&["status"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(CellValue::Number(3.0).as_text(), "3");
        assert_eq!(CellValue::Number(2.5).as_text(), "2.5");
        assert_eq!(CellValue::Text("  Owner A ".into()).as_text(), "Owner A");
    }

    #[test]
    fn json_cells_map_onto_typed_cells() {
        assert_eq!(CellValue::from_json(&serde_json::json!(45931)), CellValue::Number(45931.0));
        assert_eq!(CellValue::from_json(&serde_json::json!("  ")), CellValue::Empty);
        assert_eq!(CellValue::from_json(&serde_json::json!(null)), CellValue::Empty);
        assert_eq!(
            CellValue::from_json(&serde_json::json!("Kickoff")),
            CellValue::Text("Kickoff".into())
        );
    }

    #[test]
    fn blank_text_cells_are_blank() {
        assert!(CellValue::Text("   ".into()).is_blank());
        assert!(CellValue::Empty.is_blank());
        assert!(!CellValue::Bool(false).is_blank());
    }

    #[test]
    fn default_keywords_prefer_specific_date_headers() {
        let kw = ColumnKeywords::default();
        assert_eq!(kw.start_date.first().map(String::as_str), Some("start date"));
        assert_eq!(kw.principle, vec!["pt1 principle".to_string(), "principle".to_string()]);
    }
}
