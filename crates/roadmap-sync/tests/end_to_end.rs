use std::time::Duration;

use roadmap_adapters::JsonFileSource;
use roadmap_storage::StateStore;
use roadmap_sync::memory::MemoryTracker;
use roadmap_sync::schedule::{END_FIELD, START_FIELD};
use roadmap_sync::{read_last_sync, PipelineOptions, RunMode, SyncPipeline};
use serde_json::json;

fn write_table(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("roadmap.json");
    let export = json!({
        "range": "Roadmap!A1:F4",
        "majorDimension": "ROWS",
        "values": [
            ["Phase", "Activity", "Owner", "Start Date", "End Date", "Status"],
            ["Phase 1: Setup", "Kickoff", "Dana", "01-Oct-2025", 45945, "Completed"],
            ["Phase 1: Setup", "", "Dana", "", "", ""],
            ["Phase 2: Build", "Data pipeline", "", "2025-11-03", "", "In Progress"]
        ]
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&export).unwrap()).unwrap();
    path
}

fn pipeline(path: &std::path::Path, tracker: &MemoryTracker, state: &StateStore) -> SyncPipeline {
    SyncPipeline::new(
        Box::new(JsonFileSource::new(path)),
        Box::new(tracker.clone()),
        PipelineOptions {
            row_delay: Duration::from_millis(1),
            source_name: Some("Roadmap Sheet".to_string()),
            ..Default::default()
        },
    )
    .with_board(Box::new(tracker.clone()))
    .with_state_store(state.clone())
}

#[tokio::test]
async fn first_run_creates_and_rerun_converges() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path());
    let state = StateStore::new(dir.path().join("state"));
    let tracker = MemoryTracker::new();

    let first = pipeline(&table, &tracker, &state)
        .run_once(RunMode::Apply)
        .await
        .unwrap();
    assert_eq!((first.created, first.updated, first.skipped), (2, 0, 1));

    let snapshot = tracker.state();
    assert_eq!(snapshot.items.len(), 2);
    assert_eq!(snapshot.items[0].title, "[Phase 1] Kickoff");
    assert_eq!(snapshot.items[1].title, "[Phase 2] Data pipeline");
    assert_eq!(snapshot.date(1, START_FIELD), Some("2025-10-01"));
    assert_eq!(snapshot.date(1, END_FIELD), Some("2025-10-15"));
    assert_eq!(snapshot.date(2, END_FIELD), None);
    assert_eq!(snapshot.field_creates, 2);

    let second = pipeline(&table, &tracker, &state)
        .run_once(RunMode::Apply)
        .await
        .unwrap();
    assert_eq!((second.created, second.updated, second.skipped), (0, 2, 1));

    let snapshot = tracker.state();
    assert_eq!(snapshot.items.len(), 2);
    assert_eq!(snapshot.label_creates, 4);
    assert_eq!(snapshot.field_creates, 2);

    let last = read_last_sync(&state).await.unwrap().unwrap();
    assert_eq!(last.run_id, second.run_id.to_string());
    assert_eq!((last.created, last.updated, last.skipped), (0, 2, 1));
}

#[tokio::test]
async fn renamed_phase_still_updates_the_same_item() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path());
    let state = StateStore::new(dir.path().join("state"));
    let tracker = MemoryTracker::new();
    tracker.seed_item("[Phase 0] Kickoff");
    tracker.seed_item("[Phase 2] Data pipeline");

    let summary = pipeline(&table, &tracker, &state)
        .run_once(RunMode::Apply)
        .await
        .unwrap();

    assert_eq!((summary.created, summary.updated, summary.skipped), (0, 2, 1));
    let snapshot = tracker.state();
    assert_eq!(snapshot.items[0].labels, vec!["Phase 1", "Completed"]);
    // Seeded items were never put on the board.
    assert!(snapshot.board.is_empty());
}
