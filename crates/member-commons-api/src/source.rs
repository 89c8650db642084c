use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Supplies the raw payload of a backend list endpoint.
pub trait RecordSource {
    /// Stable key used to file snapshots of this source.
    fn source_key(&self) -> String;

    /// Fetch the raw, not yet normalized payload.
    ///
    /// # Errors
    /// Returns an error when the payload cannot be read or is not JSON.
    fn fetch_records(&self) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl RecordSource for FileSource {
    fn source_key(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn fetch_records(&self) -> Result<Value> {
        let body = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read records file {}", self.path.display()))?;
        serde_json::from_str(&body)
            .with_context(|| format!("records file {} is not valid JSON", self.path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

impl SourceConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), api_token: None, timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS) }
    }

    #[must_use]
    pub fn with_token(mut self, api_token: Option<String>) -> Self {
        self.api_token = api_token.filter(|token| !token.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Blocking GET against a JSON list endpoint such as `/projects`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    config: SourceConfig,
}

impl HttpSource {
    #[must_use]
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

impl RecordSource for HttpSource {
    fn source_key(&self) -> String {
        self.config.url.clone()
    }

    fn fetch_records(&self) -> Result<Value> {
        let url = &self.config.url;
        let agent = ureq::AgentBuilder::new().timeout(self.config.timeout).build();
        let mut request = agent.get(url).set("Accept", "application/json");
        if let Some(token) = &self.config.api_token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }

        tracing::debug!(%url, "fetching records");
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                return Err(anyhow!(
                    "upstream {url} returned HTTP {code} {}",
                    response.status_text()
                ));
            }
            Err(err) => return Err(anyhow!("failed to fetch {url}: {err}")),
        };

        response
            .into_json::<Value>()
            .with_context(|| format!("upstream {url} returned a body that is not JSON"))
    }
}
