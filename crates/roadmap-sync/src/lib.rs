//! Spreadsheet → issue tracker sync orchestration.

pub mod github;
pub mod labels;
pub mod memory;
pub mod reconcile;
pub mod schedule;
pub mod tracker;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use roadmap_adapters::{normalize_table, source_for_spec, SourceOptions, SourceSpec, TableSource};
use roadmap_core::{ColumnKeywords, DateParser};
use roadmap_storage::{ApiClient, ApiClientConfig, StateStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use github::{GithubBoard, GithubTracker, RepoRef};
pub use labels::{LabelEnsurer, LabelPalette};
pub use reconcile::{apply_plan, build_body, build_title, plan_task, ItemSnapshot, PlannedAction, PLANNED_ITEM_NUMBER, SyncAction, TaskPlan};
pub use schedule::{ScheduleFieldUpdater, ScheduleOutcome};
pub use tracker::{Board, NewItem, Tracker, TrackerError};

pub const CRATE_NAME: &str = "roadmap-sync";

pub const LAST_SYNC_FILE: &str = "last_sync.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "no GitHub token found: export GITHUB_TOKEN (or GH_TOKEN) with a token that has `repo` and `project` scopes"
    )]
    MissingToken,
    #[error("ROADMAP_REPO is not set: export it as owner/name")]
    MissingRepository,
    #[error("invalid repository {0:?}: expected owner/name")]
    InvalidRepository(String),
    #[error("invalid ROADMAP_PROJECT_NUMBER {0:?}: expected a positive integer")]
    InvalidProjectNumber(String),
}

/// Runtime configuration, read from the environment with defaults.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub github_token: Option<String>,
    pub repository: Option<String>,
    pub project_owner: Option<String>,
    pub project_number: Option<String>,
    pub source: String,
    pub source_name: Option<String>,
    pub sheets_api_key: Option<String>,
    pub sheets_api_url: String,
    pub github_api_url: String,
    pub row_delay_ms: u64,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            github_token: get("GITHUB_TOKEN").or_else(|| get("GH_TOKEN")),
            repository: get("ROADMAP_REPO"),
            project_owner: get("ROADMAP_PROJECT_OWNER"),
            project_number: get("ROADMAP_PROJECT_NUMBER"),
            source: get("ROADMAP_SOURCE").unwrap_or_else(|| "roadmap.json".to_string()),
            source_name: get("ROADMAP_SOURCE_NAME"),
            sheets_api_key: get("ROADMAP_SHEETS_API_KEY"),
            sheets_api_url: get("ROADMAP_SHEETS_API_URL")
                .unwrap_or_else(|| roadmap_adapters::DEFAULT_SHEETS_API_URL.to_string()),
            github_api_url: get("GITHUB_API_URL")
                .unwrap_or_else(|| "https://api.github.com".to_string()),
            row_delay_ms: get("ROADMAP_ROW_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            state_dir: get("ROADMAP_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./.roadmap")),
            config_path: get("ROADMAP_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("roadmap.yaml")),
            http_timeout_secs: get("ROADMAP_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: get("ROADMAP_USER_AGENT")
                .unwrap_or_else(|| "roadmap-sync/0.1".to_string()),
            scheduler_enabled: get("ROADMAP_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: get("ROADMAP_SYNC_CRON").unwrap_or_else(|| "0 0 6 * * *".to_string()),
        }
    }

    /// Checks credentials and targets before any remote call.
    pub fn target(&self) -> Result<SyncTarget, ConfigError> {
        let token = self.github_token.clone().ok_or(ConfigError::MissingToken)?;
        let repo = RepoRef::parse(
            self.repository
                .as_deref()
                .ok_or(ConfigError::MissingRepository)?,
        )?;
        let project = match &self.project_number {
            None => None,
            Some(raw) => {
                let number = raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ConfigError::InvalidProjectNumber(raw.clone()))?;
                let owner = self
                    .project_owner
                    .clone()
                    .unwrap_or_else(|| repo.owner.clone());
                Some(ProjectRef { owner, number })
            }
        };
        Ok(SyncTarget {
            token,
            repo,
            project,
        })
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            sheets_api_url: self.sheets_api_url.clone(),
            api_key: self.sheets_api_key.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn table_source(&self) -> Result<Box<dyn TableSource>> {
        let spec = SourceSpec::parse(&self.source)
            .with_context(|| format!("parsing source {}", self.source))?;
        source_for_spec(&spec, &self.source_options())
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(self.state_dir.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    pub owner: String,
    pub number: u64,
}

/// Validated remote coordinates.
#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub token: String,
    pub repo: RepoRef,
    pub project: Option<ProjectRef>,
}

/// Tables that drive label colors and header lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub labels: LabelPalette,
    pub columns: ColumnKeywords,
    /// Offset applied to date-time cells before taking the calendar day.
    pub utc_offset_hours: i32,
}

impl ReconcileConfig {
    /// Reads the YAML file at `path`; a missing file yields the built-in tables.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(text) => serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no reconcile config file; using built-in tables");
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn date_parser(&self) -> DateParser {
        DateParser::with_offset_seconds(self.utc_offset_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Apply,
    DryRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowOutcome {
    pub row_number: usize,
    pub title: String,
    pub action: SyncAction,
    /// `None` for items a dry run would create.
    pub item_number: Option<u64>,
    pub labels: Vec<String>,
    pub schedule: Option<ScheduleOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub snapshot_fetched_at: DateTime<Utc>,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub labels_created: usize,
    pub rows: Vec<RowOutcome>,
    pub reports_dir: Option<String>,
}

/// Last completed non-dry run, kept under the state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSync {
    pub run_id: String,
    pub source: String,
    pub finished_at: DateTime<Utc>,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub reconcile: ReconcileConfig,
    pub row_delay: Duration,
    pub source_name: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            reconcile: ReconcileConfig::default(),
            row_delay: Duration::from_millis(500),
            source_name: None,
        }
    }
}

pub struct SyncPipeline {
    source: Box<dyn TableSource>,
    tracker: Box<dyn Tracker>,
    board: Option<Box<dyn Board>>,
    store: Option<StateStore>,
    options: PipelineOptions,
}

impl SyncPipeline {
    pub fn new(
        source: Box<dyn TableSource>,
        tracker: Box<dyn Tracker>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            tracker,
            board: None,
            store: None,
            options,
        }
    }

    pub fn with_board(mut self, board: Box<dyn Board>) -> Self {
        self.board = Some(board);
        self
    }

    pub fn with_state_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let target = config.target()?;
        let reconcile = ReconcileConfig::load(&config.config_path).await?;
        let source = config.table_source()?;

        let api = ApiClient::new(ApiClientConfig {
            base_url: config.github_api_url.clone(),
            token: Some(target.token.clone()),
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;

        let mut pipeline = Self::new(
            source,
            Box::new(GithubTracker::new(api.clone(), target.repo.clone())),
            PipelineOptions {
                reconcile,
                row_delay: Duration::from_millis(config.row_delay_ms),
                source_name: config.source_name.clone(),
            },
        )
        .with_state_store(config.state_store());

        match target.project {
            Some(project) => {
                pipeline = pipeline.with_board(Box::new(GithubBoard::new(
                    api,
                    target.repo,
                    project.owner,
                    project.number,
                )));
            }
            None => warn!("ROADMAP_PROJECT_NUMBER is not set; board registration and dates are skipped"),
        }
        Ok(pipeline)
    }

    fn source_name(&self) -> String {
        self.options
            .source_name
            .clone()
            .unwrap_or_else(|| self.source.describe())
    }

    pub async fn run_once(&self, mode: RunMode) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, ?mode);
        self.run_inner(run_id, mode).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, mode: RunMode) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let source_name = self.source_name();
        let reconcile = &self.options.reconcile;

        let table = self
            .source
            .fetch_table()
            .await
            .with_context(|| format!("loading table from {}", self.source.describe()))?;
        let rows = normalize_table(&table, &reconcile.columns, reconcile.date_parser());
        info!(rows = rows.len(), source = %source_name, "loaded source table");

        let tracker = self.tracker.as_ref();
        let board = self.board.as_deref();
        let mut snapshot = ItemSnapshot::fetch(tracker)
            .await
            .context("listing existing tracker items")?;
        info!(items = snapshot.len(), "fetched remote item snapshot");

        let mut labels = LabelEnsurer::new();
        let mut schedule = ScheduleFieldUpdater::new();
        let mut outcomes = Vec::new();
        let (mut created, mut updated, mut skipped) = (0usize, 0usize, 0usize);

        for row in rows {
            let Some(task) = row.task else {
                skipped += 1;
                info!(row = row.row_number, "skipping row without activity");
                continue;
            };

            let plan = plan_task(&task, &snapshot, &reconcile.labels, &source_name, Utc::now());

            let (item_number, action, schedule_outcome) = match mode {
                RunMode::DryRun => {
                    let number = match plan.action {
                        PlannedAction::Update { number } => {
                            Some(number).filter(|n| *n != PLANNED_ITEM_NUMBER)
                        }
                        PlannedAction::Create => {
                            snapshot.record_planned(&plan.title);
                            None
                        }
                    };
                    (number, plan.action.sync_action(), None)
                }
                RunMode::Apply => {
                    labels
                        .ensure_all(tracker, &plan.labels)
                        .await
                        .with_context(|| format!("row {}: ensuring labels for {:?}", task.row_number, plan.title))?;
                    let (number, action) = apply_plan(&plan, tracker, board, &mut snapshot)
                        .await
                        .with_context(|| format!("row {}: writing {:?}", task.row_number, plan.title))?;
                    let schedule_outcome = match board {
                        Some(board) => Some(
                            schedule
                                .apply(board, number, &task.start_date, &task.end_date)
                                .await
                                .with_context(|| format!("row {}: setting dates on #{number}", task.row_number))?,
                        ),
                        None => None,
                    };
                    (Some(number), action, schedule_outcome)
                }
            };

            match action {
                SyncAction::Created => created += 1,
                SyncAction::Updated => updated += 1,
            }
            info!(
                row = task.row_number,
                number = ?item_number,
                action = action.as_str(),
                title = %plan.title,
                "processed row"
            );
            outcomes.push(RowOutcome {
                row_number: task.row_number,
                title: plan.title.clone(),
                action,
                item_number,
                labels: plan.label_names(),
                schedule: schedule_outcome,
            });

            if mode == RunMode::Apply && !self.options.row_delay.is_zero() {
                tokio::time::sleep(self.options.row_delay).await;
            }
        }

        let mut summary = SyncRunSummary {
            run_id,
            mode,
            source: source_name,
            started_at,
            finished_at: Utc::now(),
            snapshot_fetched_at: snapshot.fetched_at(),
            created,
            updated,
            skipped,
            labels_created: labels.created(),
            rows: outcomes,
            reports_dir: None,
        };
        info!(created, updated, skipped, "sync run finished");

        if mode == RunMode::Apply {
            if let Some(store) = &self.store {
                let dir = write_reports(store, &summary).await?;
                summary.reports_dir = Some(dir.display().to_string());
            }
        }
        Ok(summary)
    }
}

async fn write_reports(store: &StateStore, summary: &SyncRunSummary) -> Result<PathBuf> {
    let run_id = summary.run_id.to_string();
    let relative = store.report_dir(&run_id);

    store
        .write_json(&relative.join("sync_summary.json"), summary)
        .await
        .context("writing sync_summary.json")?;
    store
        .write_atomic(&relative.join("sync_summary.md"), summary_markdown(summary).as_bytes())
        .await
        .context("writing sync_summary.md")?;

    let last = LastSync {
        run_id,
        source: summary.source.clone(),
        finished_at: summary.finished_at,
        created: summary.created,
        updated: summary.updated,
        skipped: summary.skipped,
    };
    store
        .write_json(Path::new(LAST_SYNC_FILE), &last)
        .await
        .context("writing last_sync.json")?;
    Ok(store.root().join(relative))
}

pub fn summary_markdown(summary: &SyncRunSummary) -> String {
    let rows = summary
        .rows
        .iter()
        .map(|r| {
            let number = r
                .item_number
                .map(|n| format!("#{n}"))
                .unwrap_or_else(|| "new".to_string());
            format!("- row {}: {} {} `{}`", r.row_number, r.action.as_str(), number, r.title)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "# Roadmap Sync Summary\n\n- Run ID: `{}`\n- Source: {}\n- Started: {}\n- Finished: {}\n- Created: {}\n- Updated: {}\n- Skipped: {}\n- Labels created: {}\n\n## Rows\n{}\n",
        summary.run_id,
        summary.source,
        summary.started_at,
        summary.finished_at,
        summary.created,
        summary.updated,
        summary.skipped,
        summary.labels_created,
        rows
    )
}

pub async fn read_last_sync(store: &StateStore) -> Result<Option<LastSync>> {
    store.read_json(Path::new(LAST_SYNC_FILE)).await
}

pub async fn run_sync_once(config: &SyncConfig, mode: RunMode) -> Result<SyncRunSummary> {
    let pipeline = SyncPipeline::from_config(config).await?;
    pipeline.run_once(mode).await
}

/// Cron-driven sync job. Each tick builds a fresh pipeline from `config`.
pub async fn build_scheduler(config: &SyncConfig) -> Result<JobScheduler> {
    config.target()?;
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job_config = config.clone();
    let job = Job::new_async(config.sync_cron.as_str(), move |_uuid, _l| {
        let config = job_config.clone();
        Box::pin(async move {
            match run_sync_once(&config, RunMode::Apply).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    created = summary.created,
                    updated = summary.updated,
                    skipped = summary.skipped,
                    "scheduled sync finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {}", config.sync_cron))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

pub async fn maybe_build_scheduler(config: &SyncConfig) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    build_scheduler(config).await.map(Some)
}

/// Markdown digest of the most recent run reports under the state directory.
pub fn report_recent_runs(runs: usize, state_dir: &Path) -> Result<String> {
    let reports_root = state_dir.join("reports");
    let mut dirs = std::fs::read_dir(&reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Roadmap Sync Reports".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let summary_path = dir.path().join("sync_summary.json");
        let value: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&summary_path)
                .with_context(|| format!("reading {}", summary_path.display()))?,
        )
        .with_context(|| format!("parsing {}", summary_path.display()))?;
        let count = |key: &str| value.get(key).and_then(|v| v.as_u64()).unwrap_or(0);

        lines.push(format!("## Run `{}`", dir.file_name().to_string_lossy()));
        lines.push(format!(
            "- finished: {}",
            value.get("finished_at").and_then(|v| v.as_str()).unwrap_or("unknown")
        ));
        lines.push(format!(
            "- created {} / updated {} / skipped {}",
            count("created"),
            count("updated"),
            count("skipped")
        ));
        lines.push(format!("- summary: `{}`", summary_path.display()));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTracker;
    use async_trait::async_trait;
    use roadmap_adapters::{AdapterError, RawTable};
    use roadmap_core::CellValue;
    use std::collections::HashMap;

    struct StaticSource(RawTable);

    #[async_trait]
    impl TableSource for StaticSource {
        fn describe(&self) -> String {
            "static".to_string()
        }

        async fn fetch_table(&self) -> std::result::Result<RawTable, AdapterError> {
            Ok(self.0.clone())
        }
    }

    fn text(s: &str) -> CellValue {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s.to_string())
        }
    }

    fn table(rows: &[[&str; 5]]) -> RawTable {
        RawTable {
            headers: ["Phase", "Activity", "Status", "Start Date", "End Date"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows: rows.iter().map(|r| r.iter().map(|c| text(c)).collect()).collect(),
        }
    }

    fn pipeline(table: RawTable, tracker: &MemoryTracker) -> SyncPipeline {
        SyncPipeline::new(
            Box::new(StaticSource(table)),
            Box::new(tracker.clone()),
            PipelineOptions {
                row_delay: Duration::ZERO,
                source_name: Some("Roadmap".into()),
                ..Default::default()
            },
        )
        .with_board(Box::new(tracker.clone()))
    }

    fn config(pairs: &[(&str, &str)]) -> SyncConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn config_defaults_and_token_fallback() {
        let cfg = config(&[("GH_TOKEN", "t"), ("ROADMAP_REPO", "acme/roadmap")]);
        assert_eq!(cfg.github_token.as_deref(), Some("t"));
        assert_eq!(cfg.row_delay_ms, 500);
        assert_eq!(cfg.state_dir, PathBuf::from("./.roadmap"));
        assert_eq!(cfg.sync_cron, "0 0 6 * * *");
        let target = cfg.target().unwrap();
        assert_eq!(target.repo.to_string(), "acme/roadmap");
        assert!(target.project.is_none());
    }

    #[test]
    fn missing_token_is_reported_first() {
        let err = config(&[("GITHUB_TOKEN", "  "), ("ROADMAP_REPO", "acme/roadmap")])
            .target()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }

    #[test]
    fn project_owner_defaults_to_repo_owner() {
        let cfg = config(&[
            ("GITHUB_TOKEN", "t"),
            ("ROADMAP_REPO", "acme/roadmap"),
            ("ROADMAP_PROJECT_NUMBER", "4"),
        ]);
        assert_eq!(
            cfg.target().unwrap().project,
            Some(ProjectRef {
                owner: "acme".into(),
                number: 4
            })
        );

        let bad = config(&[
            ("GITHUB_TOKEN", "t"),
            ("ROADMAP_REPO", "acme/roadmap"),
            ("ROADMAP_PROJECT_NUMBER", "four"),
        ]);
        assert!(matches!(bad.target(), Err(ConfigError::InvalidProjectNumber(_))));
    }

    #[tokio::test]
    async fn reconcile_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ReconcileConfig::load(&dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(cfg, ReconcileConfig::default());

        let path = dir.path().join("roadmap.yaml");
        std::fs::write(&path, "columns:\n  owner: [\"lead\"]\nutc_offset_hours: 2\n").unwrap();
        let cfg = ReconcileConfig::load(&path).await.unwrap();
        assert_eq!(cfg.columns.owner, vec!["lead".to_string()]);
        assert_eq!(cfg.columns.phase, vec!["phase".to_string()]);
        assert_eq!(cfg.date_parser().reference_zone().local_minus_utc(), 7200);
    }

    #[tokio::test]
    async fn rows_without_activity_make_no_remote_calls() {
        let tracker = MemoryTracker::new();
        let summary = pipeline(table(&[["Phase 1", "", "Completed", "2025-01-01", ""]]), &tracker)
            .run_once(RunMode::Apply)
            .await
            .unwrap();
        assert_eq!((summary.created, summary.updated, summary.skipped), (0, 0, 1));
        // Only the snapshot listing.
        assert_eq!(tracker.state().calls, 1);
    }

    #[tokio::test]
    async fn rows_flow_through_labels_reconcile_and_dates() {
        let tracker = MemoryTracker::new();
        let summary = pipeline(
            table(&[["Phase 1: Setup", "Kickoff", "Completed", "01-Oct-2025", "2025-10-15"]]),
            &tracker,
        )
        .run_once(RunMode::Apply)
        .await
        .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.labels_created, 2);
        let state = tracker.state();
        let item = state.item(1).unwrap();
        assert_eq!(item.title, "[Phase 1] Kickoff");
        assert_eq!(item.labels, vec!["Phase 1".to_string(), "Completed".to_string()]);
        assert!(item.body.contains("_Synced from Roadmap on "));
        assert_eq!(state.date(1, schedule::START_FIELD), Some("2025-10-01"));
        assert_eq!(state.date(1, schedule::END_FIELD), Some("2025-10-15"));
        assert_eq!(
            summary.rows[0].schedule,
            Some(ScheduleOutcome::Updated { fields: 2 })
        );
    }

    #[tokio::test]
    async fn fatal_row_error_stops_the_batch() {
        let tracker = MemoryTracker::new();
        tracker.fail_label_lookup("Phase 2");
        let err = pipeline(
            table(&[
                ["Phase 1", "Kickoff", "", "", ""],
                ["Phase 2", "Build", "", "", ""],
                ["Phase 3", "Launch", "", "", ""],
            ]),
            &tracker,
        )
        .run_once(RunMode::Apply)
        .await
        .unwrap_err();

        assert!(format!("{err:#}").contains("row 3"));
        let state = tracker.state();
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].title, "[Phase 1] Kickoff");
    }

    #[tokio::test]
    async fn dry_run_plans_without_writes() {
        let tracker = MemoryTracker::new();
        tracker.seed_item("[Phase 1] Kickoff");
        let store_dir = tempfile::tempdir().unwrap();
        let summary = pipeline(
            table(&[
                ["Phase 1", "Kickoff", "Started", "", ""],
                ["Phase 2", "Build", "", "", ""],
            ]),
            &tracker,
        )
        .with_state_store(StateStore::new(store_dir.path()))
        .run_once(RunMode::DryRun)
        .await
        .unwrap();

        assert_eq!((summary.created, summary.updated), (1, 1));
        assert_eq!(summary.rows[0].item_number, Some(1));
        assert_eq!(summary.rows[1].item_number, None);
        assert!(summary.reports_dir.is_none());
        let state = tracker.state();
        assert_eq!(state.calls, 1);
        assert_eq!(state.items.len(), 1);
        assert!(!store_dir.path().join(LAST_SYNC_FILE).exists());
    }

    #[tokio::test]
    async fn dry_run_matches_rows_against_items_it_would_create() {
        let rows = [
            ["Phase 1", "Kickoff Meeting", "", "", ""],
            ["Phase 1", "Kickoff", "", "", ""],
        ];

        let tracker = MemoryTracker::new();
        let plan = pipeline(table(&rows), &tracker)
            .run_once(RunMode::DryRun)
            .await
            .unwrap();
        assert_eq!((plan.created, plan.updated), (1, 1));
        assert_eq!(plan.rows[1].item_number, None);
        assert!(tracker.state().items.is_empty());

        let applied = pipeline(table(&rows), &tracker)
            .run_once(RunMode::Apply)
            .await
            .unwrap();
        assert_eq!((applied.created, applied.updated), (plan.created, plan.updated));
        assert_eq!(applied.rows[1].item_number, Some(1));
    }

    #[tokio::test]
    async fn apply_run_writes_reports_and_last_sync() {
        let tracker = MemoryTracker::new();
        let store_dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(store_dir.path());
        let summary = pipeline(table(&[["", "Retrospective", "", "", ""]]), &tracker)
            .with_state_store(store.clone())
            .run_once(RunMode::Apply)
            .await
            .unwrap();

        let reports_dir = PathBuf::from(summary.reports_dir.clone().unwrap());
        assert!(reports_dir.join("sync_summary.json").exists());
        let md = std::fs::read_to_string(reports_dir.join("sync_summary.md")).unwrap();
        assert!(md.contains("created #1 `[Task] Retrospective`"));

        let last = read_last_sync(&store).await.unwrap().unwrap();
        assert_eq!(last.run_id, summary.run_id.to_string());
        assert_eq!(last.created, 1);

        let digest = report_recent_runs(5, store_dir.path()).unwrap();
        assert!(digest.contains("created 1 / updated 0 / skipped 0"));
    }
}
