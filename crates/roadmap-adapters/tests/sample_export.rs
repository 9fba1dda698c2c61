use std::path::Path;

use roadmap_adapters::{normalize_table, JsonFileSource, TableSource};
use roadmap_core::{ColumnKeywords, DateParser};

#[tokio::test]
async fn sample_export_normalises_into_tasks() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let source = JsonFileSource::new(root.join("fixtures/roadmap_sample.json"));
    let table = source.fetch_table().await.expect("fixture loads");
    let rows = normalize_table(&table, &ColumnKeywords::default(), DateParser::default());

    assert_eq!(rows.len(), 4);
    assert_eq!(rows.iter().filter(|r| r.task.is_none()).count(), 1);
    assert_eq!(rows[2].row_number, 4);

    let kickoff = rows[0].task.as_ref().expect("kickoff task");
    assert_eq!(kickoff.start_date, "2025-08-01");
    assert_eq!(kickoff.end_date, "2025-09-15");
    assert_eq!(kickoff.principle, "Transparency");

    let pipeline = rows[1].task.as_ref().expect("pipeline task");
    assert_eq!(pipeline.start_date, "2025-10-01");
    assert_eq!(pipeline.end_date, "");
    assert_eq!(pipeline.quarter, "Q4 2025 - Q1 2026");
}
