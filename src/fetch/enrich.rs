//! Enrichment from auxiliary HTML pages.
//!
//! Some fields are only published on the human-facing page of a group (for
//! example the submission date of a beatmap set). Those pages embed their data
//! as JSON inside a `<script id="...">` element; [`HtmlScriptEnricher`] fetches
//! `<base>/<group key>`, extracts that JSON and returns one field of it.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::client::{HttpTimeouts, build_client, redacted};
use super::{Enricher, FetchError};

/// Fetches one value per group key from embedded page JSON.
#[derive(Debug, Clone)]
pub struct HtmlScriptEnricher {
    client: Client,
    base_url: Url,
    field: String,
    script: Regex,
}

impl HtmlScriptEnricher {
    /// Creates an enricher reading `field` from `<script id="{script_id}">`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if the base URL does not parse, or
    /// [`FetchError::Network`] if the HTTP client cannot be built.
    #[instrument(level = "debug")]
    pub fn new(
        base_url: &str,
        script_id: &str,
        field: &str,
        timeouts: HttpTimeouts,
    ) -> Result<Self, FetchError> {
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|_| FetchError::invalid_url(base_url))?;
        let client = build_client(timeouts).map_err(|e| FetchError::network(base_url.as_str(), e))?;
        let pattern = format!(
            r#"(?s)<script[^>]*\bid=["']{}["'][^>]*>(.*?)</script>"#,
            regex::escape(script_id)
        );
        // The pattern is built from an escaped literal, so it always compiles.
        let script = Regex::new(&pattern).map_err(|e| FetchError::malformed(script_id, e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            field: field.to_string(),
            script,
        })
    }

    /// Returns the field this enricher reads.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Extracts the configured field from a page body.
    fn extract(&self, target: &str, html: &str) -> Result<Value, FetchError> {
        let embedded = self
            .script
            .captures(html)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| FetchError::malformed(target, "embedded JSON script not found"))?;

        let document: Value = serde_json::from_str(embedded.as_str().trim())
            .map_err(|e| FetchError::malformed(target, format!("embedded JSON invalid: {e}")))?;

        match document.get(&self.field) {
            Some(Value::Null) | None => Err(FetchError::malformed(
                target,
                format!("embedded JSON has no '{}'", self.field),
            )),
            Some(value) => Ok(value.clone()),
        }
    }
}

#[async_trait]
impl Enricher for HtmlScriptEnricher {
    #[instrument(skip(self), fields(field = %self.field))]
    async fn fetch_aux(&self, key: &str) -> Result<Value, FetchError> {
        let url = self
            .base_url
            .join(key)
            .map_err(|_| FetchError::invalid_url(format!("{}{key}", self.base_url)))?;
        let target = redacted(&url);
        debug!(target = %target, "fetching enrichment page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(&target, e.without_url()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(&target, status.as_u16()));
        }
        let html = response
            .text()
            .await
            .map_err(|e| FetchError::network(&target, e.without_url()))?;

        self.extract(&target, &html)
    }
}
