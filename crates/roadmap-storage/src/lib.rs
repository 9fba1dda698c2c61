//! Local state storage + authenticated JSON/GraphQL HTTP client for roadmap sync.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub use reqwest::{Method, Url};

pub const CRATE_NAME: &str = "roadmap-storage";

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Directory holding the optional files a run leaves behind: last-sync notation,
/// per-run reports and the dashboard's cached snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Report directory for a run, relative to the root.
    pub fn report_dir(&self, run_id: &str) -> PathBuf {
        PathBuf::from("reports").join(run_id)
    }

    /// Write bytes via a temp file in the same directory followed by a rename, so
    /// readers never observe a half-written file.
    pub async fn write_atomic(
        &self,
        relative_path: impl AsRef<Path>,
        bytes: &[u8],
    ) -> anyhow::Result<StoredFile> {
        let relative_path = relative_path.as_ref().to_path_buf();
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating state directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp state file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp state file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp state file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp state file {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredFile {
            content_hash: Self::sha256_hex(bytes),
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: false,
        })
    }

    pub async fn write_json<T: Serialize>(
        &self,
        relative_path: impl AsRef<Path>,
        value: &T,
    ) -> anyhow::Result<StoredFile> {
        let relative_path = relative_path.as_ref();
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing {}", relative_path.display()))?;
        self.write_atomic(relative_path, &bytes).await
    }

    /// Read a JSON state file; a missing file is `Ok(None)`.
    pub async fn read_json<T: DeserializeOwned>(
        &self,
        relative_path: impl AsRef<Path>,
    ) -> anyhow::Result<Option<T>> {
        let path = self.root.join(relative_path.as_ref());
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }

    /// Store a JSON snapshot, skipping the write when the content hash matches the
    /// hash recorded alongside the previous snapshot.
    pub async fn store_snapshot<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> anyhow::Result<StoredFile> {
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing snapshot {name}"))?;
        let content_hash = Self::sha256_hex(&bytes);
        let relative_path = PathBuf::from(format!("{name}.json"));
        let hash_path = PathBuf::from(format!("{name}.sha256"));

        let previous_hash = fs::read_to_string(self.root.join(&hash_path)).await.ok();
        if previous_hash.as_deref().map(str::trim) == Some(content_hash.as_str())
            && fs::try_exists(self.root.join(&relative_path))
                .await
                .unwrap_or(false)
        {
            return Ok(StoredFile {
                content_hash,
                absolute_path: self.root.join(&relative_path),
                relative_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        let stored = self.write_atomic(&relative_path, &bytes).await?;
        self.write_atomic(&hash_path, content_hash.as_bytes()).await?;
        Ok(stored)
    }
}

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: None,
            timeout: Duration::from_secs(20),
            user_agent: Some("roadmap-sync/0.1".to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {method} {url}: {message}")]
    HttpStatus {
        status: u16,
        method: String,
        url: String,
        message: String,
    },
    #[error("invalid endpoint {0}")]
    InvalidUrl(String),
    #[error("graphql error: {0}")]
    GraphQl(String),
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::HttpStatus { status: 404, .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            ApiError::HttpStatus { status: 429, .. } => true,
            ApiError::HttpStatus {
                status: 403,
                message,
                ..
            } => message.to_ascii_lowercase().contains("rate limit"),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

/// JSON REST + GraphQL client. Every request carries the bearer token when one is
/// configured. Requests are sent once; failures are returned, never retried.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .with_context(|| format!("parsing api base url {}", config.base_url))?;
        Ok(Self {
            client,
            base_url,
            token: config.token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL joined with percent-encoded path segments.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        self.execute(Method::GET, url, None).await
    }

    /// GET that maps a 404 onto `Ok(None)`.
    pub async fn get_json_opt<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, ApiError> {
        match self.execute(Method::GET, url, None).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })?;
        self.execute(method, url, Some(body)).await
    }

    pub async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: JsonValue,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(&["graphql"])?;
        let body = serde_json::json!({ "query": query, "variables": variables });
        let response: GraphQlResponse<T> = self.execute(Method::POST, url, Some(body)).await?;
        if !response.errors.is_empty() {
            let messages = response
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ApiError::GraphQl(messages));
        }
        response
            .data
            .ok_or_else(|| ApiError::GraphQl("response carried no data".to_string()))
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<JsonValue>,
    ) -> Result<T, ApiError> {
        let span = info_span!("api_request", %method, url = %url);
        async move {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(reqwest::header::ACCEPT, "application/json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            let resp = request.send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            let bytes = resp.bytes().await?;

            if !status.is_success() {
                let err = ApiError::HttpStatus {
                    status: status.as_u16(),
                    method: method.to_string(),
                    url: final_url,
                    message: error_message(&bytes),
                };
                if err.is_rate_limited() {
                    warn!(status = status.as_u16(), "remote api reported rate limiting");
                }
                return Err(err);
            }

            let slice: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
            serde_json::from_slice(slice).map_err(|source| ApiError::Decode {
                url: final_url,
                source,
            })
        }
        .instrument(span)
        .await
    }
}

fn error_message(bytes: &[u8]) -> String {
    serde_json::from_slice::<JsonValue>(bytes)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).chars().take(200).collect())
}
