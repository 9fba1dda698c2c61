//! In-memory tracker and board backing the reconciliation and batch tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use roadmap_core::{Label, RemoteItem, ScheduleField};

use crate::tracker::{Board, NewItem, Tracker, TrackerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryItem {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryEntry {
    pub id: String,
    /// Date values keyed by field id.
    pub dates: BTreeMap<String, String>,
}

/// Remote state plus call counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub items: Vec<MemoryItem>,
    pub labels: BTreeMap<String, String>,
    pub fields: Vec<ScheduleField>,
    pub board: BTreeMap<u64, MemoryEntry>,
    pub calls: usize,
    pub label_lookups: usize,
    pub label_creates: usize,
    pub item_creates: usize,
    pub item_updates: usize,
    pub field_creates: usize,
    pub date_writes: usize,
    failing_labels: HashSet<String>,
    fail_item_writes: bool,
}

impl MemoryState {
    pub fn item(&self, number: u64) -> Option<&MemoryItem> {
        self.items.iter().find(|i| i.number == number)
    }

    /// Date stored for an item under the named board field.
    pub fn date(&self, number: u64, field_name: &str) -> Option<&str> {
        let field = self.fields.iter().find(|f| f.name == field_name)?;
        self.board
            .get(&number)?
            .dates
            .get(&field.id)
            .map(String::as_str)
    }
}

/// Cloning shares the underlying state, so a test can keep a handle while the
/// pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> MemoryState {
        self.lock().clone()
    }

    /// Adds an existing item that is not attached to the board.
    pub fn seed_item(&self, title: impl Into<String>) -> u64 {
        let mut state = self.lock();
        let number = state.items.len() as u64 + 1;
        state.items.push(MemoryItem {
            number,
            title: title.into(),
            body: String::new(),
            labels: Vec::new(),
        });
        number
    }

    pub fn attach(&self, number: u64) {
        let mut state = self.lock();
        state.board.entry(number).or_insert_with(|| MemoryEntry {
            id: format!("entry-{number}"),
            ..Default::default()
        });
    }

    pub fn fail_label_lookup(&self, name: &str) {
        self.lock().failing_labels.insert(name.to_string());
    }

    pub fn fail_item_writes(&self) {
        self.lock().fail_item_writes = true;
    }

    /// Drops the call counters, keeping remote state.
    pub fn reset_counters(&self) {
        let mut state = self.lock();
        state.calls = 0;
        state.label_lookups = 0;
        state.label_creates = 0;
        state.item_creates = 0;
        state.item_updates = 0;
        state.field_creates = 0;
        state.date_writes = 0;
    }
}

#[async_trait]
impl Tracker for MemoryTracker {
    async fn list_items(&self) -> Result<Vec<RemoteItem>, TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        Ok(state
            .items
            .iter()
            .map(|i| RemoteItem {
                number: i.number,
                title: i.title.clone(),
            })
            .collect())
    }

    async fn find_label(&self, name: &str) -> Result<Option<Label>, TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        state.label_lookups += 1;
        if state.failing_labels.contains(name) {
            return Err(TrackerError::Message(format!("label lookup failed for {name}")));
        }
        Ok(state
            .labels
            .get(name)
            .map(|color| Label::new(name, color.clone())))
    }

    async fn create_label(&self, label: &Label) -> Result<(), TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        state.label_creates += 1;
        state.labels.insert(label.name.clone(), label.color.clone());
        Ok(())
    }

    async fn create_item(&self, item: &NewItem) -> Result<RemoteItem, TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.fail_item_writes {
            return Err(TrackerError::Message("item create rejected".to_string()));
        }
        state.item_creates += 1;
        let number = state.items.len() as u64 + 1;
        state.items.push(MemoryItem {
            number,
            title: item.title.clone(),
            body: item.body.clone(),
            labels: item.labels.clone(),
        });
        Ok(RemoteItem {
            number,
            title: item.title.clone(),
        })
    }

    async fn update_item(
        &self,
        number: u64,
        body: &str,
        labels: &[String],
    ) -> Result<(), TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.fail_item_writes {
            return Err(TrackerError::Message(format!("update of #{number} rejected")));
        }
        state.item_updates += 1;
        let item = state
            .items
            .iter_mut()
            .find(|i| i.number == number)
            .ok_or_else(|| TrackerError::Message(format!("no item #{number}")))?;
        item.body = body.to_string();
        item.labels = labels.to_vec();
        Ok(())
    }
}

#[async_trait]
impl Board for MemoryTracker {
    async fn add_item(&self, number: u64) -> Result<(), TrackerError> {
        self.lock().calls += 1;
        self.attach(number);
        Ok(())
    }

    async fn date_fields(&self) -> Result<Vec<ScheduleField>, TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        Ok(state.fields.clone())
    }

    async fn create_date_field(&self, name: &str) -> Result<ScheduleField, TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        state.field_creates += 1;
        let field = ScheduleField {
            id: format!("field-{}", state.fields.len() + 1),
            name: name.to_string(),
        };
        state.fields.push(field.clone());
        Ok(field)
    }

    async fn find_entry(&self, number: u64) -> Result<Option<String>, TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        Ok(state.board.get(&number).map(|e| e.id.clone()))
    }

    async fn set_date(
        &self,
        entry_id: &str,
        field: &ScheduleField,
        date: &str,
    ) -> Result<(), TrackerError> {
        let mut state = self.lock();
        state.calls += 1;
        state.date_writes += 1;
        let entry = state
            .board
            .values_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| TrackerError::Message(format!("no board entry {entry_id}")))?;
        entry.dates.insert(field.id.clone(), date.to_string());
        Ok(())
    }
}
