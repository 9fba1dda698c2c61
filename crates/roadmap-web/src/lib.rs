//! Axum + Askama read-only dashboard over the roadmap sheet.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use roadmap_adapters::{normalize_table, TableSource};
use roadmap_core::TaskRecord;
use roadmap_storage::StateStore;
use roadmap_sync::labels::phase_label;
use roadmap_sync::{build_title, read_last_sync, LastSync, ReconcileConfig, SyncConfig};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "roadmap-web";

const SNAPSHOT_NAME: &str = "dashboard_snapshot";
const UNASSIGNED_PHASE: &str = "Unassigned";

#[derive(Clone)]
pub struct AppState {
    pub workspace_root: PathBuf,
    store: StateStore,
    source: Arc<dyn TableSource>,
    reconcile: ReconcileConfig,
}

impl AppState {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        store: StateStore,
        source: Box<dyn TableSource>,
        reconcile: ReconcileConfig,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            store,
            source: Arc::from(source),
            reconcile,
        }
    }

    pub async fn from_config(config: &SyncConfig, workspace_root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let reconcile = ReconcileConfig::load(&config.config_path).await?;
        Ok(Self::new(
            workspace_root,
            config.state_store(),
            config.table_source()?,
            reconcile,
        ))
    }
}

/// Normalised sheet contents as last loaded; cached under the state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub tasks: Vec<TaskRecord>,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
struct DashboardData {
    snapshot: DashboardSnapshot,
    stale: bool,
    last_sync: Option<LastSync>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StatusBucket {
    Completed,
    InProgress,
    NotStarted,
    Other,
}

fn status_bucket(status: &str) -> StatusBucket {
    match status.trim().to_ascii_lowercase().as_str() {
        "completed" | "done" => StatusBucket::Completed,
        "in progress" | "started" => StatusBucket::InProgress,
        "" | "not started" => StatusBucket::NotStarted,
        _ => StatusBucket::Other,
    }
}

fn phase_key(task: &TaskRecord) -> String {
    phase_label(&task.phase).unwrap_or_else(|| {
        let raw = task.phase.trim();
        if raw.is_empty() {
            UNASSIGNED_PHASE.to_string()
        } else {
            raw.to_string()
        }
    })
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 * 1000.0 / whole as f64).round() / 10.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseProgress {
    pub phase: String,
    pub total: usize,
    pub completed: usize,
    pub percent_complete: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub other: usize,
    pub skipped_rows: usize,
    pub percent_complete: f64,
    pub phases: Vec<PhaseProgress>,
    pub last_sync: Option<LastSync>,
}

fn summarize(data: &DashboardData) -> ProgressSummary {
    let tasks = &data.snapshot.tasks;
    let mut completed = 0;
    let mut in_progress = 0;
    let mut not_started = 0;
    let mut other = 0;
    let mut phases: BTreeMap<String, (usize, usize)> = BTreeMap::new();

    for task in tasks {
        let bucket = status_bucket(&task.status);
        match bucket {
            StatusBucket::Completed => completed += 1,
            StatusBucket::InProgress => in_progress += 1,
            StatusBucket::NotStarted => not_started += 1,
            StatusBucket::Other => other += 1,
        }
        let entry = phases.entry(phase_key(task)).or_default();
        entry.0 += 1;
        if bucket == StatusBucket::Completed {
            entry.1 += 1;
        }
    }

    ProgressSummary {
        source: data.snapshot.source.clone(),
        fetched_at: data.snapshot.fetched_at,
        stale: data.stale,
        total: tasks.len(),
        completed,
        in_progress,
        not_started,
        other,
        skipped_rows: data.snapshot.skipped,
        percent_complete: percent(completed, tasks.len()),
        phases: phases
            .into_iter()
            .map(|(phase, (total, done))| PhaseProgress {
                phase,
                total,
                completed: done,
                percent_complete: percent(done, total),
            })
            .collect(),
        last_sync: data.last_sync.clone(),
    }
}

#[derive(Debug, Clone)]
struct TaskRow {
    row_number: usize,
    title: String,
    phase: String,
    owner: String,
    quarter: String,
    start_date: String,
    end_date: String,
    status: String,
}

impl TaskRow {
    fn from_task(task: &TaskRecord) -> Self {
        let or_dash = |s: &str| if s.is_empty() { "-".to_string() } else { s.to_string() };
        Self {
            row_number: task.row_number,
            title: build_title(task),
            phase: phase_key(task),
            owner: or_dash(&task.owner),
            quarter: or_dash(&task.quarter),
            start_date: or_dash(&task.start_date),
            end_date: or_dash(&task.end_date),
            status: if task.status.is_empty() {
                "Not Started".to_string()
            } else {
                task.status.clone()
            },
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TasksQuery {
    phase: Option<String>,
    status: Option<String>,
    page: Option<usize>,
    per_page: Option<usize>,
}

#[derive(Debug, Clone)]
struct FacetCountRow {
    value: String,
    count: usize,
    selected: bool,
}

struct TaskPage {
    rows: Vec<TaskRow>,
    phases: Vec<FacetCountRow>,
    statuses: Vec<FacetCountRow>,
    selected_phase: String,
    selected_status: String,
    page: usize,
    total_pages: usize,
    matching: usize,
}

fn facet_counts<'a>(values: impl Iterator<Item = &'a str>, selected: &str) -> Vec<FacetCountRow> {
    let mut counts = BTreeMap::<String, usize>::new();
    for value in values {
        *counts.entry(value.to_string()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(value, count)| FacetCountRow {
            selected: !selected.is_empty() && selected == value,
            value,
            count,
        })
        .collect()
}

fn filtered_paginated_tasks(all: &[TaskRecord], query: &TasksQuery) -> TaskPage {
    let rows = all.iter().map(TaskRow::from_task).collect::<Vec<_>>();
    let selected_phase = query.phase.clone().unwrap_or_default();
    let selected_status = query.status.clone().unwrap_or_default();

    let phases = facet_counts(rows.iter().map(|r| r.phase.as_str()), &selected_phase);
    let statuses = facet_counts(rows.iter().map(|r| r.status.as_str()), &selected_status);

    let filtered = rows
        .into_iter()
        .filter(|r| selected_phase.is_empty() || r.phase == selected_phase)
        .filter(|r| selected_status.is_empty() || r.status.eq_ignore_ascii_case(&selected_status))
        .collect::<Vec<_>>();
    let matching = filtered.len();

    let per_page = query.per_page.unwrap_or(20).max(1);
    let total_pages = filtered.len().max(1).div_ceil(per_page);
    let page = query.page.unwrap_or(1).clamp(1, total_pages);
    let start = (page - 1) * per_page;

    TaskPage {
        rows: filtered.into_iter().skip(start).take(per_page).collect(),
        phases,
        statuses,
        selected_phase,
        selected_status,
        page,
        total_pages,
        matching,
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    summary: ProgressSummary,
    fetched_at_text: String,
    last_sync_text: String,
}

#[derive(Template)]
#[template(path = "tasks.html")]
struct TasksPageTemplate {
    phases: Vec<FacetCountRow>,
    statuses: Vec<FacetCountRow>,
    selected_phase: String,
    selected_status: String,
    stale: bool,
    fetched_at_text: String,
}

#[derive(Template)]
#[template(path = "tasks_table_partial.html")]
struct TasksTablePartialTemplate {
    tasks: Vec<TaskRow>,
    selected_phase: String,
    selected_status: String,
    matching: usize,
    page: usize,
    total_pages: usize,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/tasks", get(tasks_page_handler))
        .route("/tasks/table", get(tasks_table_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/chart", get(chart_handler))
        .route("/assets/static/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

/// Serves the dashboard on `port`, falling back to `ROADMAP_WEB_PORT` (default 8000).
pub async fn serve_from_env(port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or_else(|| {
        std::env::var("ROADMAP_WEB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8000)
    });
    let config = SyncConfig::from_env();
    let state = AppState::from_config(&config, ".").await?;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, source = %config.source, "dashboard listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_dashboard_data(&state).await {
        Ok(data) => {
            let summary = summarize(&data);
            let last_sync_text = match &summary.last_sync {
                Some(last) => format!(
                    "{} (created {}, updated {}, skipped {})",
                    last.finished_at.format("%Y-%m-%d %H:%M UTC"),
                    last.created,
                    last.updated,
                    last.skipped
                ),
                None => "never".to_string(),
            };
            render_html(IndexTemplate {
                fetched_at_text: fetched_at_text(&summary.fetched_at),
                summary,
                last_sync_text,
            })
        }
        Err(err) => server_error(err),
    }
}

async fn tasks_page_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TasksQuery>,
) -> Response {
    match load_dashboard_data(&state).await {
        Ok(data) => {
            let page = filtered_paginated_tasks(&data.snapshot.tasks, &query);
            render_html(TasksPageTemplate {
                phases: page.phases,
                statuses: page.statuses,
                selected_phase: page.selected_phase,
                selected_status: page.selected_status,
                stale: data.stale,
                fetched_at_text: fetched_at_text(&data.snapshot.fetched_at),
            })
        }
        Err(err) => server_error(err),
    }
}

async fn tasks_table_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TasksQuery>,
) -> Response {
    match load_dashboard_data(&state).await {
        Ok(data) => {
            let page = filtered_paginated_tasks(&data.snapshot.tasks, &query);
            let mut resp = render_html(TasksTablePartialTemplate {
                tasks: page.rows,
                selected_phase: page.selected_phase,
                selected_status: page.selected_status,
                matching: page.matching,
                page: page.page,
                total_pages: page.total_pages,
            });
            resp.headers_mut().insert(
                header::HeaderName::from_static("hx-trigger"),
                header::HeaderValue::from_static("tasksTableLoaded"),
            );
            resp
        }
        Err(err) => server_error(err),
    }
}

async fn summary_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_dashboard_data(&state).await {
        Ok(data) => Json(summarize(&data)).into_response(),
        Err(err) => server_error(err),
    }
}

async fn chart_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_dashboard_data(&state).await {
        Ok(data) => {
            let summary = summarize(&data);
            let x = ["Completed", "In Progress", "Not Started", "Other"];
            let y = [
                summary.completed,
                summary.in_progress,
                summary.not_started,
                summary.other,
            ];
            Json(serde_json::json!({
                "data": [{
                    "type": "bar",
                    "x": x,
                    "y": y,
                    "marker": {"color": ["#16a34a", "#0ea5e9", "#a78bfa", "#94a3b8"]}
                }],
                "layout": {
                    "title": "Tasks Per Status",
                    "paper_bgcolor": "#ffffff",
                    "plot_bgcolor": "#f8fafc"
                }
            }))
            .into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn app_css_handler(State(state): State<Arc<AppState>>) -> Response {
    let css_path = state.workspace_root.join("assets/static/app.css");
    match tokio::fs::read_to_string(&css_path).await {
        Ok(css) => ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], css).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, Html("/* missing app.css */".to_string())).into_response(),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn fetched_at_text(fetched_at: &DateTime<Utc>) -> String {
    fetched_at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err:#}")),
    )
        .into_response()
}

async fn load_fresh_snapshot(state: &AppState) -> anyhow::Result<DashboardSnapshot> {
    let table = state.source.fetch_table().await?;
    let rows = normalize_table(&table, &state.reconcile.columns, state.reconcile.date_parser());
    let mut tasks = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        match row.task {
            Some(task) => tasks.push(task),
            None => skipped += 1,
        }
    }
    Ok(DashboardSnapshot {
        source: state.source.describe(),
        fetched_at: Utc::now(),
        tasks,
        skipped,
    })
}

/// Live sheet contents, or the cached snapshot marked stale when the sheet
/// cannot be loaded.
async fn load_dashboard_data(state: &AppState) -> anyhow::Result<DashboardData> {
    let last_sync = match read_last_sync(&state.store).await {
        Ok(last) => last,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "ignoring unreadable last sync notation");
            None
        }
    };

    match load_fresh_snapshot(state).await {
        Ok(snapshot) => {
            if let Err(err) = state.store.store_snapshot(SNAPSHOT_NAME, &snapshot).await {
                warn!(error = %format!("{err:#}"), "failed to cache dashboard snapshot");
            }
            Ok(DashboardData {
                snapshot,
                stale: false,
                last_sync,
            })
        }
        Err(err) => {
            let cached: Option<DashboardSnapshot> = state
                .store
                .read_json(Path::new(&format!("{SNAPSHOT_NAME}.json")))
                .await?;
            match cached {
                Some(snapshot) => {
                    warn!(error = %format!("{err:#}"), "source unavailable; serving cached snapshot");
                    Ok(DashboardData {
                        snapshot,
                        stale: true,
                        last_sync,
                    })
                }
                None => Err(err.context("loading roadmap source (no cached snapshot)")),
            }
        }
    }
}
