use std::env;
use std::time::Duration;

use anyhow::Context;
use reqwest::{Method, Url};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::RemoteError;

/// GitLab's credential header. Not `Authorization`.
pub const TOKEN_HEADER: &str = "PRIVATE-TOKEN";
/// The only wiki format this tool writes.
pub const WIKI_FORMAT: &str = "markdown";
pub const DEFAULT_USER_AGENT: &str = "wikisync/0.2";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const SECURE_SCHEME: &str = "https://";

/// List-view entry; never carries the page body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub slug: String,
    pub title: String,
    pub format: String,
    pub content: String,
}

impl Page {
    pub fn summary(&self) -> PageSummary {
        PageSummary {
            slug: self.slug.clone(),
            title: self.title.clone(),
            format: self.format.clone(),
        }
    }
}

/// Remote wiki operations. Every call receives the connection it should use.
pub trait WikiApi {
    fn list_pages(&mut self, config: &ConnectionConfig) -> Result<Vec<PageSummary>, RemoteError>;
    fn get_page(&mut self, config: &ConnectionConfig, slug: &str) -> Result<Page, RemoteError>;
    fn create_page(
        &mut self,
        config: &ConnectionConfig,
        title: &str,
        content: &str,
    ) -> Result<Page, RemoteError>;
    fn update_page(
        &mut self,
        config: &ConnectionConfig,
        slug: &str,
        title: &str,
        content: &str,
    ) -> Result<Page, RemoteError>;
    fn delete_page(&mut self, config: &ConnectionConfig, slug: &str) -> Result<(), RemoteError>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct GitLabClientConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl GitLabClientConfig {
    pub fn from_env() -> Self {
        Self {
            user_agent: env_value("WIKISYNC_USER_AGENT", DEFAULT_USER_AGENT),
            timeout_ms: env_value_u64("WIKISYNC_HTTP_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Blocking GitLab wiki client. Holds only the HTTP connection pool; no
/// connection settings survive between calls and nothing is retried.
pub struct GitLabClient {
    client: Client,
    request_count: usize,
}

impl GitLabClient {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(&GitLabClientConfig::from_env())
    }

    pub fn new(settings: &GitLabClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .user_agent(settings.user_agent.clone())
            .build()
            .context("failed to build GitLab HTTP client")?;
        Ok(Self {
            client,
            request_count: 0,
        })
    }

    // Reads carry only the token: a content-type on a simple GET makes some
    // relays issue a preflight.
    fn read_request(&self, method: Method, url: Url, config: &ConnectionConfig) -> RequestBuilder {
        debug!(%method, %url, "GitLab API request");
        self.client
            .request(method, url)
            .header(TOKEN_HEADER, config.token.as_str())
    }

    fn write_request(
        &self,
        method: Method,
        url: Url,
        config: &ConnectionConfig,
        payload: &WritePagePayload<'_>,
    ) -> RequestBuilder {
        self.read_request(method, url, config)
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
    }

    fn send(
        &mut self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, RemoteError> {
        self.request_count += 1;
        request.send().map_err(|error| {
            warn!(operation, %error, "GitLab API error");
            RemoteError::Transport(error)
        })
    }
}

impl WikiApi for GitLabClient {
    fn list_pages(&mut self, config: &ConnectionConfig) -> Result<Vec<PageSummary>, RemoteError> {
        if !config.is_configured() {
            debug!("connection not configured; skipping page list");
            return Ok(Vec::new());
        }
        let url = parse_url(list_url(config))?;
        let request = self.read_request(Method::GET, url, config);
        let response = self.send("list", request)?;
        let response = ensure_success("list", response, true)?;
        decode("list", response)
    }

    fn get_page(&mut self, config: &ConnectionConfig, slug: &str) -> Result<Page, RemoteError> {
        let url = parse_url(api_url(config, Some(slug)))?;
        let request = self.read_request(Method::GET, url, config);
        let response = self.send("page", request)?;
        let response = ensure_success("page", response, false)?;
        let page: PageResponse = decode("page", response)?;
        Ok(page.into_page(""))
    }

    fn create_page(
        &mut self,
        config: &ConnectionConfig,
        title: &str,
        content: &str,
    ) -> Result<Page, RemoteError> {
        let url = parse_url(api_url(config, None))?;
        let payload = WritePagePayload::new(title, content);
        let request = self.write_request(Method::POST, url, config, &payload);
        let response = self.send("create", request)?;
        let response = ensure_success("create", response, false)?;
        let page: PageResponse = decode("create", response)?;
        Ok(page.into_page(content))
    }

    fn update_page(
        &mut self,
        config: &ConnectionConfig,
        slug: &str,
        title: &str,
        content: &str,
    ) -> Result<Page, RemoteError> {
        let url = parse_url(api_url(config, Some(slug)))?;
        let payload = WritePagePayload::new(title, content);
        let request = self.write_request(Method::PUT, url, config, &payload);
        let response = self.send("update", request)?;
        let response = ensure_success("update", response, false)?;
        let page: PageResponse = decode("update", response)?;
        Ok(page.into_page(content))
    }

    fn delete_page(&mut self, config: &ConnectionConfig, slug: &str) -> Result<(), RemoteError> {
        let url = parse_url(api_url(config, Some(slug)))?;
        let request = self.read_request(Method::DELETE, url, config);
        let response = self.send("delete", request)?;
        ensure_success("delete", response, false)?;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Trim, drop trailing slashes, and default to `https://` when no scheme is given.
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if has_network_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("{SECURE_SCHEME}{trimmed}")
    }
}

/// Component escaping for project ids and slugs (`/` becomes `%2F`).
pub fn encode_segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Absolute GitLab URL for the wiki collection or one page, ignoring any relay.
pub fn target_url(config: &ConnectionConfig, slug: Option<&str>) -> String {
    let mut url = format!(
        "{}/api/v4/projects/{}/wikis",
        normalize_base_url(&config.base_url),
        encode_segment(config.project_id.trim())
    );
    if let Some(slug) = slug {
        url.push('/');
        url.push_str(&encode_segment(slug));
    }
    url
}

/// Request URL, routed through the relay when one is active.
///
/// The relay receives the full absolute target as its own path:
/// `http://localhost:8080/https://gitlab.com/api/v4/projects/7/wikis`.
pub fn api_url(config: &ConnectionConfig, slug: Option<&str>) -> String {
    let target = target_url(config, slug);
    match config.active_relay() {
        Some(relay) => format!("{}/{target}", relay.trim_end_matches('/')),
        None => target,
    }
}

/// Collection URL with page bodies suppressed.
pub fn list_url(config: &ConnectionConfig) -> String {
    format!("{}?with_content=0", api_url(config, None))
}

/// Human-readable detail from a JSON error body: `message`, then `error`.
pub fn error_detail(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| match payload.get(*key)? {
            Value::Null | Value::Bool(false) => None,
            Value::String(text) if text.is_empty() => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        })
}

fn parse_url(url: String) -> Result<Url, RemoteError> {
    Url::parse(&url).map_err(|error| RemoteError::InvalidUrl(format!("{url}: {error}")))
}

fn has_network_scheme(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

fn ensure_success(
    operation: &'static str,
    response: Response,
    with_detail: bool,
) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = if with_detail {
        response.text().ok().and_then(|body| error_detail(&body))
    } else {
        None
    };
    let error = RemoteError::HttpStatus {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
        detail,
    };
    warn!(operation, %error, "GitLab API error");
    Err(error)
}

fn decode<T: DeserializeOwned>(
    context: &'static str,
    response: Response,
) -> Result<T, RemoteError> {
    let body = response.text()?;
    serde_json::from_str(&body).map_err(|source| {
        warn!(operation = context, %source, "GitLab API response did not decode");
        RemoteError::Decode { context, source }
    })
}

#[derive(Debug, Serialize)]
struct WritePagePayload<'a> {
    title: &'a str,
    content: &'a str,
    format: &'static str,
}

impl<'a> WritePagePayload<'a> {
    fn new(title: &'a str, content: &'a str) -> Self {
        Self {
            title,
            content,
            format: WIKI_FORMAT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    slug: String,
    title: String,
    #[serde(default)]
    format: String,
    content: Option<String>,
}

impl PageResponse {
    fn into_page(self, sent_content: &str) -> Page {
        Page {
            slug: self.slug,
            title: self.title,
            format: self.format,
            content: self.content.unwrap_or_else(|| sent_content.to_string()),
        }
    }
}

fn env_value(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
