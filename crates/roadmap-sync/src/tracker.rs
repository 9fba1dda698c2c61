//! Remote tracker seams. The batch driver only talks to these traits; the GitHub
//! implementations live in [`crate::github`].

use async_trait::async_trait;
use roadmap_core::{Label, RemoteItem, ScheduleField};
use roadmap_storage::ApiError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{0}")]
    Message(String),
}

/// Payload for a new tracker item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewItem {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Issue-level operations (REST surface).
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Every item in the repository regardless of state.
    async fn list_items(&self) -> Result<Vec<RemoteItem>, TrackerError>;

    /// `Ok(None)` when no label with that exact name exists.
    async fn find_label(&self, name: &str) -> Result<Option<Label>, TrackerError>;

    async fn create_label(&self, label: &Label) -> Result<(), TrackerError>;

    async fn create_item(&self, item: &NewItem) -> Result<RemoteItem, TrackerError>;

    /// Replaces the body and the full label set of an existing item.
    async fn update_item(
        &self,
        number: u64,
        body: &str,
        labels: &[String],
    ) -> Result<(), TrackerError>;
}

/// Project board operations (GraphQL surface).
#[async_trait]
pub trait Board: Send + Sync {
    /// Attach an existing tracker item to the board.
    async fn add_item(&self, number: u64) -> Result<(), TrackerError>;

    async fn date_fields(&self) -> Result<Vec<ScheduleField>, TrackerError>;

    async fn create_date_field(&self, name: &str) -> Result<ScheduleField, TrackerError>;

    /// Board entry id for a tracker item, `Ok(None)` when it is not on the board.
    async fn find_entry(&self, number: u64) -> Result<Option<String>, TrackerError>;

    async fn set_date(
        &self,
        entry_id: &str,
        field: &ScheduleField,
        date: &str,
    ) -> Result<(), TrackerError>;
}
