//! Create-or-update decisions for tasks against the remote item snapshot.

use chrono::{DateTime, Utc};
use roadmap_core::{Label, RemoteItem, TaskRecord};
use serde::Serialize;
use tracing::{debug, info};

use crate::labels::{phase_label, LabelPalette};
use crate::tracker::{Board, NewItem, Tracker, TrackerError};

/// Number carried by items that only exist in a dry-run plan.
pub const PLANNED_ITEM_NUMBER: u64 = 0;

pub const UNPHASED_PREFIX: &str = "Task";

/// `[Phase N] <activity>`, or `[Task] <activity>` when no phase is recognised.
pub fn build_title(task: &TaskRecord) -> String {
    let prefix = phase_label(&task.phase).unwrap_or_else(|| UNPHASED_PREFIX.to_string());
    format!("[{prefix}] {}", task.activity)
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

pub fn build_body(task: &TaskRecord, source_name: &str, synced_at: DateTime<Utc>) -> String {
    let mut body = String::new();
    body.push_str("## Task Overview\n\n");
    body.push_str("| Field | Value |\n|---|---|\n");
    body.push_str(&format!("| Status | {} |\n", or_default(&task.status, "Not Started")));
    body.push_str(&format!("| Phase | {} |\n", or_default(&task.phase, "N/A")));
    body.push_str(&format!("| Owner | {} |\n", or_default(&task.owner, "TBD")));

    body.push_str("\n## Timeline\n\n");
    body.push_str("| Field | Value |\n|---|---|\n");
    body.push_str(&format!("| Start Date | {} |\n", or_default(&task.start_date, "TBD")));
    body.push_str(&format!("| End Date | {} |\n", or_default(&task.end_date, "TBD")));
    body.push_str(&format!("| Quarter | {} |\n", or_default(&task.quarter, "TBD")));

    for (heading, text) in [
        ("Task Detail", &task.task_detail),
        ("Guiding Principle", &task.principle),
        ("Deliverable", &task.deliverable),
    ] {
        if !text.trim().is_empty() {
            body.push_str(&format!("\n## {heading}\n\n{}\n", text.trim()));
        }
    }

    body.push_str(&format!(
        "\n---\n_Synced from {} on {}_\n",
        source_name,
        synced_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    body
}

/// Remote items as fetched once at the start of a run, plus items created
/// during the run.
#[derive(Debug, Clone)]
pub struct ItemSnapshot {
    items: Vec<RemoteItem>,
    fetched_at: DateTime<Utc>,
}

impl ItemSnapshot {
    pub fn new(items: Vec<RemoteItem>, fetched_at: DateTime<Utc>) -> Self {
        Self { items, fetched_at }
    }

    pub async fn fetch(tracker: &dyn Tracker) -> Result<Self, TrackerError> {
        let items = tracker.list_items().await?;
        Ok(Self::new(items, Utc::now()))
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First item whose title equals `title` or contains `activity`.
    pub fn find_match(&self, title: &str, activity: &str) -> Option<&RemoteItem> {
        self.items
            .iter()
            .find(|item| item.title == title || (!activity.is_empty() && item.title.contains(activity)))
    }

    pub fn record_created(&mut self, item: RemoteItem) {
        self.items.push(item);
    }

    /// Records an item a dry run would create. It carries number 0 since
    /// nothing was written.
    pub fn record_planned(&mut self, title: &str) {
        self.items.push(RemoteItem {
            number: PLANNED_ITEM_NUMBER,
            title: title.to_string(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::Created => "created",
            SyncAction::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Create,
    Update { number: u64 },
}

impl PlannedAction {
    pub fn sync_action(self) -> SyncAction {
        match self {
            PlannedAction::Create => SyncAction::Created,
            PlannedAction::Update { .. } => SyncAction::Updated,
        }
    }
}

/// Everything needed to write one task, decided without any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPlan {
    pub row_number: usize,
    pub title: String,
    pub body: String,
    pub labels: Vec<Label>,
    pub action: PlannedAction,
}

impl TaskPlan {
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }
}

pub fn plan_task(
    task: &TaskRecord,
    snapshot: &ItemSnapshot,
    palette: &LabelPalette,
    source_name: &str,
    synced_at: DateTime<Utc>,
) -> TaskPlan {
    let title = build_title(task);
    let action = match snapshot.find_match(&title, &task.activity) {
        Some(existing) => {
            debug!(row = task.row_number, number = existing.number, existing = %existing.title, "matched existing item");
            PlannedAction::Update {
                number: existing.number,
            }
        }
        None => PlannedAction::Create,
    };
    TaskPlan {
        row_number: task.row_number,
        body: build_body(task, source_name, synced_at),
        labels: palette.derive(task),
        title,
        action,
    }
}

/// Writes a plan. New items are recorded in the snapshot and attached to the
/// board when one is configured.
pub async fn apply_plan(
    plan: &TaskPlan,
    tracker: &dyn Tracker,
    board: Option<&dyn Board>,
    snapshot: &mut ItemSnapshot,
) -> Result<(u64, SyncAction), TrackerError> {
    let labels = plan.label_names();
    match plan.action {
        PlannedAction::Update { number } => {
            tracker.update_item(number, &plan.body, &labels).await?;
            Ok((number, SyncAction::Updated))
        }
        PlannedAction::Create => {
            let created = tracker
                .create_item(&NewItem {
                    title: plan.title.clone(),
                    body: plan.body.clone(),
                    labels,
                })
                .await?;
            let number = created.number;
            snapshot.record_created(created);
            if let Some(board) = board {
                board.add_item(number).await?;
                info!(number, "attached item to project board");
            }
            Ok((number, SyncAction::Created))
        }
    }
}
