//! Retrieval of resource collections from local fixtures or the cluster API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Certificate, Client};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ApiConfig, DEFAULT_CA_PATH, DEFAULT_TOKEN_PATH};
use crate::tasks::Task;

/// Errors that abort the collection cycle.
///
/// Timeouts and HTTP error statuses are not errors; they are reported as
/// [`FetchOutcome::Failed`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to read fixture {}: {source}", path.display())]
    FixtureRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture {}: {source}", path.display())]
    FixtureParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read service account token {}: {source}", path.display())]
    Token {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read CA certificate {}: {source}", path.display())]
    CaRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CA certificate {}: {source}", path.display())]
    CaParse {
        path: PathBuf,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid JSON body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Result of fetching one task's collection.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Document read from a local fixture.
    Fixture(Value),
    /// Document returned by the API.
    Document { status: u16, body: Value },
    /// Timed out (`code == -1`) or answered with an HTTP error status.
    Failed { code: i64 },
}

impl FetchOutcome {
    /// Sentinel code recorded for timeouts.
    pub const TIMEOUT_CODE: i64 = -1;

    /// HTTP code to record, if the outcome came from the network.
    pub fn http_code(&self) -> Option<i64> {
        match self {
            FetchOutcome::Fixture(_) => None,
            FetchOutcome::Document { status, .. } => Some(i64::from(*status)),
            FetchOutcome::Failed { code } => Some(*code),
        }
    }

    /// The fetched document, if any.
    pub fn into_document(self) -> Option<Value> {
        match self {
            FetchOutcome::Fixture(body) | FetchOutcome::Document { body, .. } => Some(body),
            FetchOutcome::Failed { .. } => None,
        }
    }
}

/// Fetches resource collections for tasks.
#[derive(Debug, Clone)]
pub struct ResourceFetcher {
    base_url: String,
    timeout: Duration,
    user_agent: Option<String>,
    token_path: PathBuf,
    ca_path: PathBuf,
}

impl ResourceFetcher {
    /// Create a fetcher using the in-cluster credential paths.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            user_agent: None,
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            ca_path: PathBuf::from(DEFAULT_CA_PATH),
        }
    }

    /// Create a fetcher from the API settings.
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            base_url: config.url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            user_agent: config.user_agent.clone().filter(|ua| !ua.is_empty()),
            token_path: config.token_path.clone(),
            ca_path: config.ca_path.clone(),
        }
    }

    /// Set the User-Agent header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Override the token and CA file locations.
    pub fn with_credentials(
        mut self,
        token_path: impl Into<PathBuf>,
        ca_path: impl Into<PathBuf>,
    ) -> Self {
        self.token_path = token_path.into();
        self.ca_path = ca_path.into();
        self
    }

    /// Fetch the collection for a task.
    pub async fn fetch(&self, task: &Task) -> Result<FetchOutcome, FetchError> {
        match &task.fixture {
            Some(path) => {
                debug!(task = task.name(), path = %path.display(), "Test mode, reading fixture");
                read_fixture(path).await.map(FetchOutcome::Fixture)
            }
            None => self.fetch_remote(task.name(), task.api_path()).await,
        }
    }

    /// Issue a single GET for `base_url + path`.
    pub async fn fetch_remote(&self, task: &str, path: &str) -> Result<FetchOutcome, FetchError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let token = self.read_token().await?;
        let client = self.build_client().await?;

        debug!(task, url = %url, "Fetching resources");

        let response = match client.get(&url).bearer_auth(token).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(task, url = %url, "Request timed out");
                return Ok(FetchOutcome::Failed {
                    code: FetchOutcome::TIMEOUT_CODE,
                });
            }
            Err(source) => return Err(FetchError::Request { url, source }),
        };

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            warn!(task, url = %url, status = status.as_u16(), "API returned error status");
            return Ok(FetchOutcome::Failed {
                code: i64::from(status.as_u16()),
            });
        }

        match response.json::<Value>().await {
            Ok(body) => Ok(FetchOutcome::Document {
                status: status.as_u16(),
                body,
            }),
            Err(e) if e.is_timeout() => {
                warn!(task, url = %url, "Timed out reading response body");
                Ok(FetchOutcome::Failed {
                    code: FetchOutcome::TIMEOUT_CODE,
                })
            }
            Err(source) => Err(FetchError::Body { url, source }),
        }
    }

    async fn read_token(&self) -> Result<String, FetchError> {
        let token = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|source| FetchError::Token {
                path: self.token_path.clone(),
                source,
            })?;
        Ok(token.trim().to_string())
    }

    async fn build_client(&self) -> Result<Client, FetchError> {
        let mut builder = Client::builder().timeout(self.timeout);

        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        // The CA bundle only matters for TLS endpoints
        if self.base_url.starts_with("https://") {
            let pem = tokio::fs::read(&self.ca_path)
                .await
                .map_err(|source| FetchError::CaRead {
                    path: self.ca_path.clone(),
                    source,
                })?;
            let certificate = Certificate::from_pem(&pem).map_err(|source| FetchError::CaParse {
                path: self.ca_path.clone(),
                source,
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        builder.build().map_err(FetchError::Client)
    }
}

/// Load and parse a fixture file.
pub async fn read_fixture(path: &Path) -> Result<Value, FetchError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| FetchError::FixtureRead {
            path: path.to_path_buf(),
            source,
        })?;

    serde_json::from_str(&content).map_err(|source| FetchError::FixtureParse {
        path: path.to_path_buf(),
        source,
    })
}
