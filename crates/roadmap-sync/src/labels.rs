//! Label derivation from task fields, and run-local label provisioning.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use roadmap_core::{Label, TaskRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tracker::{Tracker, TrackerError};

fn phase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)phase\s*(\d)").expect("phase pattern compiles"))
}

fn quarter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)q(\d)\s+(\d{4})\b").expect("quarter pattern compiles"))
}

/// `Phase <d>` taken from free phase text such as `Phase 1: Setup`.
pub fn phase_label(phase: &str) -> Option<String> {
    phase_re()
        .captures(phase)
        .map(|caps| format!("Phase {}", &caps[1]))
}

/// First `Q<d> <yyyy>` in the quarter text, upper-cased.
pub fn quarter_label(quarter: &str) -> Option<String> {
    quarter_re()
        .captures(quarter)
        .map(|caps| format!("Q{} {}", &caps[1], &caps[2]))
}

pub fn status_label(status: &str) -> Option<String> {
    let status = status.trim();
    (!status.is_empty()).then(|| status.to_string())
}

/// Color tables for derived labels. Colors are hex without the leading `#`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelPalette {
    pub phase: BTreeMap<u32, String>,
    pub quarter: BTreeMap<String, String>,
    pub status: BTreeMap<String, String>,
    pub phase_fallback: String,
    pub quarter_fallback: String,
    pub status_fallback: String,
}

fn table<K: Ord + Clone>(entries: &[(K, &str)]) -> BTreeMap<K, String> {
    entries
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect()
}

impl Default for LabelPalette {
    fn default() -> Self {
        let quarters: Vec<(String, &str)> = [
            ("Q1 2025", "C2E0C6"),
            ("Q2 2025", "BFDADC"),
            ("Q3 2025", "C5DEF5"),
            ("Q4 2025", "D4C5F9"),
            ("Q1 2026", "FEF2C0"),
            ("Q2 2026", "F9D0C4"),
            ("Q3 2026", "E99695"),
            ("Q4 2026", "BFE5BF"),
            ("Q1 2027", "C2E0C6"),
            ("Q2 2027", "BFDADC"),
            ("Q3 2027", "C5DEF5"),
            ("Q4 2027", "D4C5F9"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            phase: table(&[
                (1, "0E8A16"),
                (2, "1D76DB"),
                (3, "5319E7"),
                (4, "FBCA04"),
                (5, "D93F0B"),
            ]),
            quarter: table(&quarters),
            status: table(&[
                ("Started".to_string(), "FBCA04"),
                ("Not Started".to_string(), "D4C5F9"),
                ("In Progress".to_string(), "0075CA"),
                ("Completed".to_string(), "0E8A16"),
            ]),
            phase_fallback: "CCCCCC".to_string(),
            quarter_fallback: "BFD4F2".to_string(),
            status_fallback: "EDEDED".to_string(),
        }
    }
}

impl LabelPalette {
    /// Labels for a task in phase, quarter, status order, without duplicates.
    pub fn derive(&self, task: &TaskRecord) -> Vec<Label> {
        let mut labels: Vec<Label> = Vec::with_capacity(3);

        if let Some(name) = phase_label(&task.phase) {
            let color = name
                .trim_start_matches("Phase ")
                .parse::<u32>()
                .ok()
                .and_then(|digit| self.phase.get(&digit))
                .unwrap_or(&self.phase_fallback)
                .clone();
            labels.push(Label::new(name, color));
        }

        if let Some(name) = quarter_label(&task.quarter) {
            let color = self
                .quarter
                .get(&name)
                .unwrap_or(&self.quarter_fallback)
                .clone();
            labels.push(Label::new(name, color));
        }

        if let Some(name) = status_label(&task.status) {
            let color = self
                .status
                .get(&name)
                .unwrap_or(&self.status_fallback)
                .clone();
            labels.push(Label::new(name, color));
        }

        let mut seen = HashSet::new();
        labels.retain(|label| seen.insert(label.name.clone()));
        labels
    }
}

/// Makes sure labels exist on the tracker. Names already ensured by this value
/// are not looked up again.
#[derive(Debug, Default)]
pub struct LabelEnsurer {
    ensured: HashSet<String>,
    created: usize,
}

impl LabelEnsurer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels created remotely by this ensurer so far.
    pub fn created(&self) -> usize {
        self.created
    }

    pub async fn ensure(
        &mut self,
        tracker: &dyn Tracker,
        label: &Label,
    ) -> Result<(), TrackerError> {
        if self.ensured.contains(&label.name) {
            return Ok(());
        }
        match tracker.find_label(&label.name).await? {
            Some(existing) => {
                debug!(label = %existing.name, "label already present");
            }
            None => {
                tracker.create_label(label).await?;
                self.created += 1;
                info!(label = %label.name, color = %label.color, "created label");
            }
        }
        self.ensured.insert(label.name.clone());
        Ok(())
    }

    pub async fn ensure_all(
        &mut self,
        tracker: &dyn Tracker,
        labels: &[Label],
    ) -> Result<(), TrackerError> {
        for label in labels {
            self.ensure(tracker, label).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTracker;

    fn task(phase: &str, quarter: &str, status: &str) -> TaskRecord {
        TaskRecord {
            activity: "Kickoff".into(),
            phase: phase.into(),
            quarter: quarter.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    #[test]
    fn phase_quarter_and_status_are_extracted() {
        assert_eq!(phase_label("Phase 1: Setup").as_deref(), Some("Phase 1"));
        assert_eq!(phase_label("pre-PHASE3 work").as_deref(), Some("Phase 3"));
        assert_eq!(phase_label("Foundations"), None);
        assert_eq!(
            quarter_label("q3 2026 - Q4 2026").as_deref(),
            Some("Q3 2026")
        );
        assert_eq!(quarter_label("FYQ3 2026").as_deref(), Some("Q3 2026"));
        assert_eq!(quarter_label("late 2026"), None);
        assert_eq!(status_label("  In Progress "), Some("In Progress".into()));
        assert_eq!(status_label("   "), None);
    }

    #[test]
    fn derived_labels_use_tables_then_fallbacks() {
        let palette = LabelPalette::default();
        let labels = palette.derive(&task("Phase 2: Build", "Q4 2025", "Completed"));
        assert_eq!(
            labels,
            vec![
                Label::new("Phase 2", "1D76DB"),
                Label::new("Q4 2025", "D4C5F9"),
                Label::new("Completed", "0E8A16"),
            ]
        );

        let labels = palette.derive(&task("Phase 7", "Q2 2031", "Blocked"));
        assert_eq!(
            labels,
            vec![
                Label::new("Phase 7", "CCCCCC"),
                Label::new("Q2 2031", "BFD4F2"),
                Label::new("Blocked", "EDEDED"),
            ]
        );
    }

    #[test]
    fn blank_fields_produce_no_labels() {
        assert!(LabelPalette::default().derive(&task("", "", "")).is_empty());
    }

    #[test]
    fn palette_overrides_from_yaml_keep_defaults_for_missing_tables() {
        let palette: LabelPalette =
            serde_yaml::from_str("phase:\n  1: \"000000\"\nstatus_fallback: \"111111\"\n").unwrap();
        assert_eq!(palette.phase.get(&1).map(String::as_str), Some("000000"));
        assert_eq!(palette.phase.get(&2), None);
        assert_eq!(palette.status_fallback, "111111");
        assert_eq!(palette.quarter, LabelPalette::default().quarter);
    }

    #[tokio::test]
    async fn ensuring_twice_creates_once() {
        let tracker = MemoryTracker::default();
        let label = Label::new("Phase 1", "0E8A16");

        let mut first_run = LabelEnsurer::new();
        first_run.ensure(&tracker, &label).await.unwrap();
        first_run.ensure(&tracker, &label).await.unwrap();

        let mut second_run = LabelEnsurer::new();
        second_run.ensure(&tracker, &label).await.unwrap();

        let state = tracker.state();
        assert_eq!(state.label_creates, 1);
        assert_eq!(state.label_lookups, 2);
        assert_eq!(first_run.created(), 1);
        assert_eq!(second_run.created(), 0);
    }

    #[tokio::test]
    async fn lookup_failure_propagates_without_create() {
        let tracker = MemoryTracker::default();
        tracker.fail_label_lookup("Completed");
        let mut ensurer = LabelEnsurer::new();
        assert!(ensurer
            .ensure(&tracker, &Label::new("Completed", "0E8A16"))
            .await
            .is_err());
        assert_eq!(tracker.state().label_creates, 0);
    }
}
