//! HTTP adapter for the remote JSON API.
//!
//! [`ApiClient`] owns one pooled `reqwest` client plus the credential, and
//! hands out the two request shapes the harvester uses:
//! - [`PagedEndpoint`] - `GET <base>/<endpoint>?k=<key>&since=<cursor>`
//! - [`EntityEndpoint`] - `GET <base>/<endpoint>?k=<key>&u=<id>&m=<mode>&limit=<n>`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::{FetchError, ItemSource, PageSource};
use crate::cursor::Cursor;

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/harvester";

/// Connect and whole-request timeouts for HTTP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// TCP/TLS connect timeout.
    pub connect: Duration,
    /// Budget for the complete request including the body.
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Default User-Agent for API and enrichment requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvester/{version} (+{PROJECT_UA_URL})")
}

/// Builds a pooled HTTP client with the given timeouts.
pub(crate) fn build_client(timeouts: HttpTimeouts) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request)
        .gzip(true)
        .user_agent(default_user_agent())
        .build()
}

/// Returns the URL without its query string, for logs and error messages.
pub(crate) fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// Sends a GET request and decodes the JSON body.
pub(crate) async fn get_json(client: &Client, url: Url) -> Result<Value, FetchError> {
    let target = redacted(&url);
    debug!(target = %target, "sending request");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::network(&target, e.without_url()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::http_status(&target, status.as_u16()));
    }

    response.json::<Value>().await.map_err(|e| {
        if e.is_decode() {
            FetchError::malformed(&target, e.without_url().to_string())
        } else {
            FetchError::network(&target, e.without_url())
        }
    })
}

/// Interprets a decoded body as a page: an array of records, or a source error.
pub(crate) fn into_records(target: &str, body: Value) -> Result<Vec<Value>, FetchError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(map) if map.contains_key("error") => {
            let message = match &map["error"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Err(FetchError::remote(target, message))
        }
        other => Err(FetchError::malformed(
            target,
            format!("expected a JSON array, got {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// HTTP client for the remote API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    credential: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("credential", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates an API client for `base_url` authenticating with `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if the base URL does not parse, or
    /// [`FetchError::Network`] if the HTTP client cannot be built.
    #[instrument(level = "debug", skip(credential))]
    pub fn new(
        base_url: &str,
        credential: impl Into<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, FetchError> {
        // Endpoints are joined onto the base, which needs a trailing slash.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|_| FetchError::invalid_url(base_url))?;
        let client = build_client(timeouts).map_err(|e| FetchError::network(base_url.as_str(), e))?;

        Ok(Self {
            client,
            base_url,
            credential: credential.into(),
        })
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns a page source for a "since cursor" endpoint.
    #[must_use]
    pub fn paged(&self, endpoint: &str, mode: Option<u8>) -> PagedEndpoint {
        PagedEndpoint {
            api: self.clone(),
            endpoint: endpoint.to_string(),
            mode,
        }
    }

    /// Returns an item source for a per-entity endpoint.
    #[must_use]
    pub fn entity(&self, endpoint: &str, mode: u8, limit: u32) -> EntityEndpoint {
        EntityEndpoint {
            api: self.clone(),
            endpoint: endpoint.to_string(),
            mode,
            limit,
        }
    }

    fn endpoint_url(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(endpoint)
            .map_err(|_| FetchError::invalid_url(format!("{}{endpoint}", self.base_url)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("k", &self.credential);
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }
}

/// Paged "records since cursor" endpoint.
#[derive(Debug, Clone)]
pub struct PagedEndpoint {
    api: ApiClient,
    endpoint: String,
    mode: Option<u8>,
}

#[async_trait]
impl PageSource for PagedEndpoint {
    #[instrument(skip(self, cursor), fields(endpoint = %self.endpoint, cursor = %cursor))]
    async fn fetch_page(&self, cursor: &Cursor) -> Result<Vec<Value>, FetchError> {
        let mut params = vec![("since", cursor.as_str().to_string())];
        if let Some(mode) = self.mode {
            params.push(("m", mode.to_string()));
        }
        let url = self.api.endpoint_url(&self.endpoint, &params)?;
        let target = redacted(&url);
        let body = get_json(&self.api.client, url).await?;
        into_records(&target, body)
    }
}

/// Per-entity endpoint returning the records of one entity id.
#[derive(Debug, Clone)]
pub struct EntityEndpoint {
    api: ApiClient,
    endpoint: String,
    mode: u8,
    limit: u32,
}

#[async_trait]
impl ItemSource for EntityEndpoint {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch_item(&self, entity_id: &str) -> Result<Vec<Value>, FetchError> {
        let params = [
            ("u", entity_id.to_string()),
            ("type", "id".to_string()),
            ("m", self.mode.to_string()),
            ("limit", self.limit.to_string()),
        ];
        let url = self.api.endpoint_url(&self.endpoint, &params)?;
        let target = format!("{} (entity {entity_id})", redacted(&url));
        let body = get_json(&self.api.client, url).await?;
        into_records(&target, body)
    }
}
