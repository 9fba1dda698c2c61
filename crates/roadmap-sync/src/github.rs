//! GitHub issues (REST) and Projects v2 board (GraphQL) clients.

use std::fmt;

use async_trait::async_trait;
use roadmap_core::{Label, RemoteItem, ScheduleField};
use roadmap_storage::{ApiClient, Method};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::tracker::{Board, NewItem, Tracker, TrackerError};
use crate::ConfigError;

const PAGE_SIZE: usize = 100;

/// `owner/name` repository coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        match raw.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ConfigError::InvalidRepository(raw.to_string())),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct IssueEntry {
    number: u64,
    title: String,
    #[serde(default)]
    pull_request: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct LabelEntry {
    name: String,
    color: String,
}

#[derive(Debug, Clone)]
pub struct GithubTracker {
    api: ApiClient,
    repo: RepoRef,
}

impl GithubTracker {
    pub fn new(api: ApiClient, repo: RepoRef) -> Self {
        Self { api, repo }
    }

    fn repo_endpoint(&self, rest: &[&str]) -> Result<roadmap_storage::Url, TrackerError> {
        let mut segments = vec!["repos", self.repo.owner.as_str(), self.repo.name.as_str()];
        segments.extend_from_slice(rest);
        Ok(self.api.endpoint(&segments)?)
    }
}

#[async_trait]
impl Tracker for GithubTracker {
    async fn list_items(&self) -> Result<Vec<RemoteItem>, TrackerError> {
        let mut items = Vec::new();
        for page in 1.. {
            let mut url = self.repo_endpoint(&["issues"])?;
            url.query_pairs_mut()
                .append_pair("state", "all")
                .append_pair("per_page", &PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());
            let entries: Vec<IssueEntry> = self.api.get_json(url).await?;
            let page_len = entries.len();
            items.extend(
                entries
                    .into_iter()
                    .filter(|e| e.pull_request.is_none())
                    .map(|e| RemoteItem {
                        number: e.number,
                        title: e.title,
                    }),
            );
            debug!(page, page_len, "fetched issue page");
            if page_len < PAGE_SIZE {
                break;
            }
        }
        Ok(items)
    }

    async fn find_label(&self, name: &str) -> Result<Option<Label>, TrackerError> {
        let url = self.repo_endpoint(&["labels", name])?;
        let entry: Option<LabelEntry> = self.api.get_json_opt(url).await?;
        Ok(entry.map(|e| Label::new(e.name, e.color)))
    }

    async fn create_label(&self, label: &Label) -> Result<(), TrackerError> {
        let url = self.repo_endpoint(&["labels"])?;
        let _: JsonValue = self
            .api
            .send_json(
                Method::POST,
                url,
                &json!({ "name": label.name, "color": label.color }),
            )
            .await?;
        Ok(())
    }

    async fn create_item(&self, item: &NewItem) -> Result<RemoteItem, TrackerError> {
        let url = self.repo_endpoint(&["issues"])?;
        let created: IssueEntry = self.api.send_json(Method::POST, url, item).await?;
        Ok(RemoteItem {
            number: created.number,
            title: created.title,
        })
    }

    async fn update_item(
        &self,
        number: u64,
        body: &str,
        labels: &[String],
    ) -> Result<(), TrackerError> {
        let number = number.to_string();
        let url = self.repo_endpoint(&["issues", &number])?;
        let _: JsonValue = self
            .api
            .send_json(Method::PATCH, url, &json!({ "body": body, "labels": labels }))
            .await?;
        Ok(())
    }
}

const PROJECT_ID_QUERY: &str = r#"
query($owner: String!, $number: Int!) {
  repositoryOwner(login: $owner) {
    ... on User { projectV2(number: $number) { id } }
    ... on Organization { projectV2(number: $number) { id } }
  }
}"#;

const ISSUE_ID_QUERY: &str = r#"
query($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    issue(number: $number) { id }
  }
}"#;

const ADD_ITEM_MUTATION: &str = r#"
mutation($project: ID!, $content: ID!) {
  addProjectV2ItemById(input: {projectId: $project, contentId: $content}) {
    item { id }
  }
}"#;

const FIELDS_QUERY: &str = r#"
query($project: ID!) {
  node(id: $project) {
    ... on ProjectV2 {
      fields(first: 100) {
        nodes { ... on ProjectV2Field { id name dataType } }
      }
    }
  }
}"#;

const CREATE_DATE_FIELD_MUTATION: &str = r#"
mutation($project: ID!, $name: String!) {
  createProjectV2Field(input: {projectId: $project, dataType: DATE, name: $name}) {
    projectV2Field { ... on ProjectV2Field { id name } }
  }
}"#;

const ITEMS_QUERY: &str = r#"
query($project: ID!, $cursor: String) {
  node(id: $project) {
    ... on ProjectV2 {
      items(first: 100, after: $cursor) {
        pageInfo { hasNextPage endCursor }
        nodes {
          id
          content { ... on Issue { number repository { nameWithOwner } } }
        }
      }
    }
  }
}"#;

const SET_DATE_MUTATION: &str = r#"
mutation($project: ID!, $item: ID!, $field: ID!, $date: Date!) {
  updateProjectV2ItemFieldValue(
    input: {projectId: $project, itemId: $item, fieldId: $field, value: {date: $date}}
  ) {
    projectV2Item { id }
  }
}"#;

#[derive(Debug, Deserialize)]
struct IdNode {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectOwnerData {
    repository_owner: Option<ProjectOwner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectOwner {
    #[serde(default)]
    project_v2: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
struct IssueIdData {
    repository: Option<IssueIdRepository>,
}

#[derive(Debug, Deserialize)]
struct IssueIdRepository {
    issue: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
struct NodeData<T> {
    node: Option<T>,
}

#[derive(Debug, Deserialize)]
struct FieldsNode {
    fields: Option<Connection<FieldNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldNode {
    id: Option<String>,
    name: Option<String>,
    data_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    #[serde(default)]
    page_info: Option<PageInfo>,
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemsNode {
    items: Option<Connection<BoardItemNode>>,
}

#[derive(Debug, Deserialize)]
struct BoardItemNode {
    id: String,
    content: Option<BoardItemContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoardItemContent {
    number: Option<u64>,
    repository: Option<NameWithOwner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameWithOwner {
    name_with_owner: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFieldData {
    create_project_v2_field: CreateFieldPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFieldPayload {
    project_v2_field: FieldNode,
}

/// Projects v2 board owned by a user or organization. The board id is resolved
/// on first use and reused for the rest of the run.
#[derive(Debug)]
pub struct GithubBoard {
    api: ApiClient,
    repo: RepoRef,
    owner: String,
    number: u64,
    project_id: OnceCell<String>,
}

impl GithubBoard {
    pub fn new(api: ApiClient, repo: RepoRef, owner: impl Into<String>, number: u64) -> Self {
        Self {
            api,
            repo,
            owner: owner.into(),
            number,
            project_id: OnceCell::new(),
        }
    }

    async fn project_id(&self) -> Result<&str, TrackerError> {
        let id = self
            .project_id
            .get_or_try_init(|| async {
                let data: ProjectOwnerData = self
                    .api
                    .graphql(
                        PROJECT_ID_QUERY,
                        json!({ "owner": self.owner, "number": self.number }),
                    )
                    .await?;
                data.repository_owner
                    .and_then(|o| o.project_v2)
                    .map(|p| p.id)
                    .ok_or_else(|| {
                        TrackerError::Message(format!(
                            "project {} not found for owner {}",
                            self.number, self.owner
                        ))
                    })
            })
            .await?;
        Ok(id.as_str())
    }

    async fn issue_node_id(&self, number: u64) -> Result<String, TrackerError> {
        let data: IssueIdData = self
            .api
            .graphql(
                ISSUE_ID_QUERY,
                json!({ "owner": self.repo.owner, "name": self.repo.name, "number": number }),
            )
            .await?;
        data.repository
            .and_then(|r| r.issue)
            .map(|i| i.id)
            .ok_or_else(|| TrackerError::Message(format!("issue #{number} not found in {}", self.repo)))
    }
}

#[async_trait]
impl Board for GithubBoard {
    async fn add_item(&self, number: u64) -> Result<(), TrackerError> {
        let content = self.issue_node_id(number).await?;
        let project = self.project_id().await?;
        let _: JsonValue = self
            .api
            .graphql(
                ADD_ITEM_MUTATION,
                json!({ "project": project, "content": content }),
            )
            .await?;
        Ok(())
    }

    async fn date_fields(&self) -> Result<Vec<ScheduleField>, TrackerError> {
        let project = self.project_id().await?;
        let data: NodeData<FieldsNode> = self
            .api
            .graphql(FIELDS_QUERY, json!({ "project": project }))
            .await?;
        let nodes = data
            .node
            .and_then(|n| n.fields)
            .map(|c| c.nodes)
            .unwrap_or_default();
        Ok(nodes
            .into_iter()
            .filter(|f| f.data_type.as_deref() == Some("DATE"))
            .filter_map(|f| {
                Some(ScheduleField {
                    id: f.id?,
                    name: f.name?,
                })
            })
            .collect())
    }

    async fn create_date_field(&self, name: &str) -> Result<ScheduleField, TrackerError> {
        let project = self.project_id().await?;
        let data: CreateFieldData = self
            .api
            .graphql(
                CREATE_DATE_FIELD_MUTATION,
                json!({ "project": project, "name": name }),
            )
            .await?;
        let field = data.create_project_v2_field.project_v2_field;
        Ok(ScheduleField {
            id: field
                .id
                .ok_or_else(|| TrackerError::Message(format!("field {name} created without id")))?,
            name: field.name.unwrap_or_else(|| name.to_string()),
        })
    }

    async fn find_entry(&self, number: u64) -> Result<Option<String>, TrackerError> {
        let project = self.project_id().await?.to_string();
        let repo = self.repo.to_string();
        let mut cursor: Option<String> = None;
        loop {
            let data: NodeData<ItemsNode> = self
                .api
                .graphql(ITEMS_QUERY, json!({ "project": project, "cursor": cursor }))
                .await?;
            let Some(items) = data.node.and_then(|n| n.items) else {
                return Ok(None);
            };
            let found = items.nodes.into_iter().find(|node| {
                node.content.as_ref().is_some_and(|c| {
                    c.number == Some(number)
                        && c.repository
                            .as_ref()
                            .is_some_and(|r| r.name_with_owner.eq_ignore_ascii_case(&repo))
                })
            });
            if let Some(node) = found {
                return Ok(Some(node.id));
            }
            match items.page_info {
                Some(PageInfo {
                    has_next_page: true,
                    end_cursor: Some(next),
                }) => cursor = Some(next),
                _ => return Ok(None),
            }
        }
    }

    async fn set_date(
        &self,
        entry_id: &str,
        field: &ScheduleField,
        date: &str,
    ) -> Result<(), TrackerError> {
        let project = self.project_id().await?;
        let _: JsonValue = self
            .api
            .graphql(
                SET_DATE_MUTATION,
                json!({
                    "project": project,
                    "item": entry_id,
                    "field": field.id,
                    "date": date,
                }),
            )
            .await?;
        Ok(())
    }
}
