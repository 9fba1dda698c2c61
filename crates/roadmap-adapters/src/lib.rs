//! Table source contracts + the row normalizer that turns sheet rows into tasks.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use roadmap_core::{CellValue, ColumnKeywords, DateParser, TaskRecord};
use roadmap_storage::{ApiClient, ApiClientConfig, ApiError, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "roadmap-adapters";

pub const DEFAULT_SHEETS_API_URL: &str = "https://sheets.googleapis.com";

/// Header row plus data rows, exactly as the sheet delivered them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawTable {
    /// First row becomes the header row; an empty export is an empty table.
    pub fn from_values(values: &[Vec<JsonValue>]) -> Self {
        let Some((header, rows)) = values.split_first() else {
            return Self::default();
        };
        Self {
            headers: header
                .iter()
                .map(|v| CellValue::from_json(v).as_text())
                .collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(CellValue::from_json).collect())
                .collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait TableSource: Send + Sync {
    /// Human-readable name used in logs and issue footers.
    fn describe(&self) -> String;

    async fn fetch_table(&self) -> Result<RawTable, AdapterError>;
}

/// Google Sheets `values` response shape. A bare array of rows is accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SheetExport {
    Range {
        #[serde(default)]
        values: Vec<Vec<JsonValue>>,
    },
    Rows(Vec<Vec<JsonValue>>),
}

impl SheetExport {
    fn into_values(self) -> Vec<Vec<JsonValue>> {
        match self {
            SheetExport::Range { values } => values,
            SheetExport::Rows(rows) => rows,
        }
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Sheet exported to a local JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TableSource for JsonFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch_table(&self) -> Result<RawTable, AdapterError> {
        let export: SheetExport = read_json_file(&self.path)?;
        Ok(RawTable::from_values(&export.into_values()))
    }
}

/// Live sheet read through the Sheets `values` endpoint. Unformatted values with
/// serial-number dates keep the date parser on its most precise path.
#[derive(Debug, Clone)]
pub struct SheetsApiSource {
    client: ApiClient,
    spreadsheet_id: String,
    range: String,
    api_key: Option<String>,
}

impl SheetsApiSource {
    pub fn new(
        client: ApiClient,
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            api_key,
        }
    }
}

#[async_trait]
impl TableSource for SheetsApiSource {
    fn describe(&self) -> String {
        format!("Google Sheets {} ({})", self.spreadsheet_id, self.range)
    }

    async fn fetch_table(&self) -> Result<RawTable, AdapterError> {
        let mut url = self.client.endpoint(&[
            "v4",
            "spreadsheets",
            &self.spreadsheet_id,
            "values",
            &self.range,
        ])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("valueRenderOption", "UNFORMATTED_VALUE");
            query.append_pair("dateTimeRenderOption", "SERIAL_NUMBER");
            if let Some(key) = &self.api_key {
                query.append_pair("key", key);
            }
        }
        let export: SheetExport = self.client.get_json(url).await?;
        Ok(RawTable::from_values(&export.into_values()))
    }
}

/// Any URL that answers with a `values`-shaped JSON document.
#[derive(Debug, Clone)]
pub struct ValuesUrlSource {
    client: ApiClient,
    url: String,
}

impl ValuesUrlSource {
    pub fn new(client: ApiClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TableSource for ValuesUrlSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch_table(&self) -> Result<RawTable, AdapterError> {
        let url: Url = self
            .url
            .parse()
            .map_err(|e| AdapterError::Message(format!("invalid source url {}: {e}", self.url)))?;
        let export: SheetExport = self.client.get_json(url).await?;
        Ok(RawTable::from_values(&export.into_values()))
    }
}

/// Where the roadmap table lives, parsed from a single source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    File(PathBuf),
    Sheets {
        spreadsheet_id: String,
        range: String,
    },
    Url(String),
}

impl SourceSpec {
    /// `http(s)://…` is a URL, `sheets:<id>/<range>` a Sheets reference, anything
    /// else a file path.
    pub fn parse(raw: &str) -> Result<Self, AdapterError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AdapterError::Message("empty source".to_string()));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(SourceSpec::Url(raw.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("sheets:") {
            let (id, range) = rest.split_once('/').ok_or_else(|| {
                AdapterError::Message(format!("expected sheets:<id>/<range>, got {raw}"))
            })?;
            if id.is_empty() || range.is_empty() {
                return Err(AdapterError::Message(format!(
                    "expected sheets:<id>/<range>, got {raw}"
                )));
            }
            return Ok(SourceSpec::Sheets {
                spreadsheet_id: id.to_string(),
                range: range.to_string(),
            });
        }
        Ok(SourceSpec::File(PathBuf::from(raw)))
    }
}

#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub sheets_api_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            sheets_api_url: DEFAULT_SHEETS_API_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

pub fn source_for_spec(spec: &SourceSpec, options: &SourceOptions) -> Result<Box<dyn TableSource>> {
    let client = || {
        ApiClient::new(ApiClientConfig {
            base_url: options.sheets_api_url.clone(),
            token: None,
            timeout: options.timeout,
            user_agent: options.user_agent.clone(),
        })
    };
    Ok(match spec {
        SourceSpec::File(path) => Box::new(JsonFileSource::new(path.clone())),
        SourceSpec::Sheets {
            spreadsheet_id,
            range,
        } => Box::new(SheetsApiSource::new(
            client()?,
            spreadsheet_id.clone(),
            range.clone(),
            options.api_key.clone(),
        )),
        SourceSpec::Url(url) => Box::new(ValuesUrlSource::new(client()?, url.clone())),
    })
}

/// Column index per task field, resolved from header text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub phase: Option<usize>,
    pub activity: Option<usize>,
    pub task_detail: Option<usize>,
    pub principle: Option<usize>,
    pub deliverable: Option<usize>,
    pub owner: Option<usize>,
    pub quarter: Option<usize>,
    pub start_date: Option<usize>,
    pub end_date: Option<usize>,
    pub status: Option<usize>,
}

fn find_column(headers: &[String], keywords: &[String]) -> Option<usize> {
    keywords.iter().find_map(|keyword| {
        let keyword = keyword.to_lowercase();
        headers
            .iter()
            .position(|h| h.to_lowercase().contains(&keyword))
    })
}

impl ColumnMap {
    pub fn resolve(headers: &[String], keywords: &ColumnKeywords) -> Self {
        Self {
            phase: find_column(headers, &keywords.phase),
            activity: find_column(headers, &keywords.activity),
            task_detail: find_column(headers, &keywords.task_detail),
            principle: find_column(headers, &keywords.principle),
            deliverable: find_column(headers, &keywords.deliverable),
            owner: find_column(headers, &keywords.owner),
            quarter: find_column(headers, &keywords.quarter),
            start_date: find_column(headers, &keywords.start_date),
            end_date: find_column(headers, &keywords.end_date),
            status: find_column(headers, &keywords.status),
        }
    }
}

/// One data row after normalisation; `task` is `None` when the row has no activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRow {
    pub row_number: usize,
    pub task: Option<TaskRecord>,
}

#[derive(Debug, Clone)]
pub struct RowNormalizer {
    columns: ColumnMap,
    dates: DateParser,
}

impl RowNormalizer {
    pub fn new(headers: &[String], keywords: &ColumnKeywords, dates: DateParser) -> Self {
        let columns = ColumnMap::resolve(headers, keywords);
        if columns.activity.is_none() {
            warn!(?headers, "no activity column found; every row will be skipped");
        }
        debug!(?columns, "resolved sheet columns");
        Self { columns, dates }
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    fn cell<'a>(row: &'a [CellValue], idx: Option<usize>) -> Option<&'a CellValue> {
        idx.and_then(|i| row.get(i))
    }

    fn text(row: &[CellValue], idx: Option<usize>) -> String {
        Self::cell(row, idx).map(CellValue::as_text).unwrap_or_default()
    }

    fn date(&self, row: &[CellValue], idx: Option<usize>) -> String {
        Self::cell(row, idx)
            .map(|c| self.dates.parse_cell(c))
            .unwrap_or_default()
    }

    /// `row_number` is the 1-based sheet row (the header is row 1).
    pub fn normalize(&self, row_number: usize, row: &[CellValue]) -> Option<TaskRecord> {
        let activity = Self::text(row, self.columns.activity);
        if activity.is_empty() {
            return None;
        }
        Some(TaskRecord {
            row_number,
            phase: Self::text(row, self.columns.phase),
            activity,
            task_detail: Self::text(row, self.columns.task_detail),
            principle: Self::text(row, self.columns.principle),
            deliverable: Self::text(row, self.columns.deliverable),
            owner: Self::text(row, self.columns.owner),
            quarter: Self::text(row, self.columns.quarter),
            start_date: self.date(row, self.columns.start_date),
            end_date: self.date(row, self.columns.end_date),
            status: Self::text(row, self.columns.status),
        })
    }
}

pub fn normalize_table(
    table: &RawTable,
    keywords: &ColumnKeywords,
    dates: DateParser,
) -> Vec<SourceRow> {
    let normalizer = RowNormalizer::new(&table.headers, keywords, dates);
    table
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let row_number = idx + 2;
            SourceRow {
                row_number,
                task: normalizer.normalize(row_number, row),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn headers_resolve_by_keyword_regardless_of_position_or_case() {
        let map = ColumnMap::resolve(
            &headers(&[
                "STATUS",
                "End",
                "Key Activity",
                "pt1 principle",
                "Phase",
                "Start Date",
                "Owner(s)",
            ]),
            &ColumnKeywords::default(),
        );
        assert_eq!(map.status, Some(0));
        assert_eq!(map.end_date, Some(1));
        assert_eq!(map.activity, Some(2));
        assert_eq!(map.principle, Some(3));
        assert_eq!(map.phase, Some(4));
        assert_eq!(map.start_date, Some(5));
        assert_eq!(map.owner, Some(6));
        assert_eq!(map.quarter, None);
    }

    #[test]
    fn specific_keywords_win_over_generic_ones() {
        let map = ColumnMap::resolve(
            &headers(&["Start", "Start Date", "Principle", "PT1 Principle"]),
            &ColumnKeywords::default(),
        );
        assert_eq!(map.start_date, Some(1));
        assert_eq!(map.principle, Some(3));
    }

    #[test]
    fn rows_without_activity_are_not_tasks() {
        let normalizer = RowNormalizer::new(
            &headers(&["Phase", "Activity", "Start Date"]),
            &ColumnKeywords::default(),
            DateParser::default(),
        );
        let row = vec![
            CellValue::Text("Phase 1".into()),
            CellValue::Text("   ".into()),
            CellValue::Number(45931.0),
        ];
        assert!(normalizer.normalize(2, &row).is_none());
        assert!(normalizer.normalize(3, &[]).is_none());
    }

    #[test]
    fn rows_normalise_text_and_dates() {
        let normalizer = RowNormalizer::new(
            &headers(&["Phase", "Activity", "Owner", "Start Date", "End Date", "Status"]),
            &ColumnKeywords::default(),
            DateParser::default(),
        );
        let row = vec![
            CellValue::Text("Phase 1: Setup".into()),
            CellValue::Text(" Kickoff ".into()),
            CellValue::Empty,
            CellValue::Number(45931.0),
            CellValue::Text("TBD".into()),
        ];
        let task = normalizer.normalize(2, &row).expect("task");
        assert_eq!(task.row_number, 2);
        assert_eq!(task.activity, "Kickoff");
        assert_eq!(task.phase, "Phase 1: Setup");
        assert_eq!(task.owner, "");
        assert_eq!(task.start_date, "2025-10-01");
        assert_eq!(task.end_date, "");
        assert_eq!(task.status, "");
    }

    #[test]
    fn empty_export_is_an_empty_table() {
        let table = RawTable::from_values(&[]);
        assert!(table.headers.is_empty());
        assert!(normalize_table(&table, &ColumnKeywords::default(), DateParser::default()).is_empty());
    }

    #[test]
    fn source_spec_parsing() {
        assert_eq!(
            SourceSpec::parse("https://example.test/values.json").unwrap(),
            SourceSpec::Url("https://example.test/values.json".into())
        );
        assert_eq!(
            SourceSpec::parse("sheets:abc123/Roadmap!A1:J200").unwrap(),
            SourceSpec::Sheets {
                spreadsheet_id: "abc123".into(),
                range: "Roadmap!A1:J200".into()
            }
        );
        assert_eq!(
            SourceSpec::parse("fixtures/roadmap.json").unwrap(),
            SourceSpec::File(PathBuf::from("fixtures/roadmap.json"))
        );
        assert!(SourceSpec::parse("sheets:missing-range").is_err());
        assert!(SourceSpec::parse("  ").is_err());
    }

    #[tokio::test]
    async fn json_file_source_accepts_value_range_and_bare_rows() {
        let dir = tempdir().expect("tempdir");
        let range_path = dir.path().join("range.json");
        let rows_path = dir.path().join("rows.json");
        std::fs::write(
            &range_path,
            json!({"range": "Sheet1!A1:B2", "values": [["Activity", "Start"], ["Kickoff", 45931]]})
                .to_string(),
        )
        .unwrap();
        std::fs::write(&rows_path, json!([["Activity"], ["Kickoff"]]).to_string()).unwrap();

        let from_range = JsonFileSource::new(&range_path).fetch_table().await.unwrap();
        assert_eq!(from_range.headers, vec!["Activity", "Start"]);
        assert_eq!(from_range.rows[0][1], CellValue::Number(45931.0));

        let from_rows = JsonFileSource::new(&rows_path).fetch_table().await.unwrap();
        assert_eq!(from_rows.rows.len(), 1);
    }

    #[tokio::test]
    async fn sheets_source_requests_unformatted_serial_values() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/v4/spreadsheets/sheet-1/values/.*".into()))
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("valueRenderOption".into(), "UNFORMATTED_VALUE".into()),
                mockito::Matcher::UrlEncoded("dateTimeRenderOption".into(), "SERIAL_NUMBER".into()),
                mockito::Matcher::UrlEncoded("key".into(), "k".into()),
            ]))
            .with_status(200)
            .with_body(json!({"values": [["Activity"], ["Kickoff"], ["Review"]]}).to_string())
            .create_async()
            .await;

        let source = source_for_spec(
            &SourceSpec::Sheets {
                spreadsheet_id: "sheet-1".into(),
                range: "Roadmap!A1:J".into(),
            },
            &SourceOptions {
                sheets_api_url: server.url(),
                api_key: Some("k".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let table = source.fetch_table().await.unwrap();
        assert_eq!(table.rows.len(), 2);
        mock.assert_async().await;
    }
}
