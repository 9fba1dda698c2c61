//! Start/end date fields on the project board.

use roadmap_core::ScheduleField;
use serde::Serialize;
use tracing::{info, warn};

use crate::tracker::{Board, TrackerError};

pub const START_FIELD: &str = "Start Date";
pub const END_FIELD: &str = "End Date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleOutcome {
    NoDates,
    NotOnBoard,
    Updated { fields: usize },
}

#[derive(Debug, Clone)]
struct ScheduleFields {
    start: ScheduleField,
    end: ScheduleField,
}

/// Resolves the two date fields once and reuses them for the rest of the run.
#[derive(Debug, Default)]
pub struct ScheduleFieldUpdater {
    fields: Option<ScheduleFields>,
}

impl ScheduleFieldUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    async fn fields(&mut self, board: &dyn Board) -> Result<&ScheduleFields, TrackerError> {
        if self.fields.is_none() {
            let existing = board.date_fields().await?;
            let start = ensure_field(board, &existing, START_FIELD).await?;
            let end = ensure_field(board, &existing, END_FIELD).await?;
            self.fields = Some(ScheduleFields { start, end });
        }
        self.fields
            .as_ref()
            .ok_or_else(|| TrackerError::Message("schedule fields unresolved".to_string()))
    }

    /// Sets whichever of `start` / `end` is non-empty. Empty dates never clear a
    /// stored value.
    pub async fn apply(
        &mut self,
        board: &dyn Board,
        number: u64,
        start: &str,
        end: &str,
    ) -> Result<ScheduleOutcome, TrackerError> {
        if start.is_empty() && end.is_empty() {
            return Ok(ScheduleOutcome::NoDates);
        }

        let Some(entry_id) = board.find_entry(number).await? else {
            warn!(number, "item is not on the project board; skipping dates");
            return Ok(ScheduleOutcome::NotOnBoard);
        };

        let fields = self.fields(board).await?.clone();
        let mut written = 0;
        for (field, date) in [(&fields.start, start), (&fields.end, end)] {
            if date.is_empty() {
                continue;
            }
            board.set_date(&entry_id, field, date).await?;
            written += 1;
        }
        info!(number, start, end, "updated schedule fields");
        Ok(ScheduleOutcome::Updated { fields: written })
    }
}

async fn ensure_field(
    board: &dyn Board,
    existing: &[ScheduleField],
    name: &str,
) -> Result<ScheduleField, TrackerError> {
    if let Some(field) = existing.iter().find(|f| f.name == name) {
        return Ok(field.clone());
    }
    let field = board.create_date_field(name).await?;
    info!(field = %field.name, "created board date field");
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTracker;

    #[tokio::test]
    async fn creates_fields_once_and_reuses_them() {
        let board = MemoryTracker::new();
        board.attach(1);
        board.attach(2);
        let mut updater = ScheduleFieldUpdater::new();

        updater.apply(&board, 1, "2025-10-01", "2025-12-31").await.unwrap();
        updater.apply(&board, 2, "2026-01-05", "").await.unwrap();

        let state = board.state();
        assert_eq!(state.field_creates, 2);
        assert_eq!(state.date(1, END_FIELD), Some("2025-12-31"));
        assert_eq!(state.date(2, START_FIELD), Some("2026-01-05"));

        let mut next_run = ScheduleFieldUpdater::new();
        next_run.apply(&board, 1, "2025-10-02", "").await.unwrap();
        assert_eq!(board.state().field_creates, 2);
    }

    #[tokio::test]
    async fn start_only_leaves_end_untouched() {
        let board = MemoryTracker::new();
        board.attach(7);
        let mut updater = ScheduleFieldUpdater::new();
        updater.apply(&board, 7, "2025-01-01", "2025-03-31").await.unwrap();
        board.reset_counters();

        let outcome = updater.apply(&board, 7, "2025-02-01", "").await.unwrap();

        assert_eq!(outcome, ScheduleOutcome::Updated { fields: 1 });
        let state = board.state();
        assert_eq!(state.date_writes, 1);
        assert_eq!(state.date(7, START_FIELD), Some("2025-02-01"));
        assert_eq!(state.date(7, END_FIELD), Some("2025-03-31"));
    }

    #[tokio::test]
    async fn missing_board_entry_is_not_an_error() {
        let board = MemoryTracker::new();
        let mut updater = ScheduleFieldUpdater::new();
        let outcome = updater.apply(&board, 3, "2025-01-01", "").await.unwrap();
        assert_eq!(outcome, ScheduleOutcome::NotOnBoard);
        assert_eq!(board.state().date_writes, 0);
    }

    #[tokio::test]
    async fn no_dates_touches_nothing() {
        let board = MemoryTracker::new();
        board.attach(3);
        let mut updater = ScheduleFieldUpdater::new();
        assert_eq!(
            updater.apply(&board, 3, "", "").await.unwrap(),
            ScheduleOutcome::NoDates
        );
        assert_eq!(board.state().calls, 0);
    }
}
