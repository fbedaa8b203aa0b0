//! Interfaces to the remote source, plus their HTTP implementations.
//!
//! The harvesting core only sees three narrow seams:
//! - [`PageSource`] - one page of records since a cursor
//! - [`ItemSource`] - all records of one entity id
//! - [`Enricher`] - one supplementary value per group key
//!
//! [`ApiClient`] and [`HtmlScriptEnricher`] implement them over HTTP.

mod client;
pub mod constants;
mod enrich;
mod error;

pub use client::{ApiClient, EntityEndpoint, HttpTimeouts, PagedEndpoint};
pub use enrich::HtmlScriptEnricher;
pub use error::FetchError;

use async_trait::async_trait;
use serde_json::Value;

use crate::cursor::Cursor;

/// Source of cursor-paged records.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches the page of records at or after `cursor`, in source order.
    ///
    /// An empty vector means the source has no more data.
    async fn fetch_page(&self, cursor: &Cursor) -> Result<Vec<Value>, FetchError>;
}

/// Source of per-entity records.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetches every record belonging to `entity_id`.
    async fn fetch_item(&self, entity_id: &str) -> Result<Vec<Value>, FetchError>;
}

/// Source of supplementary per-group values.
///
/// Values are assumed idempotent and cacheable indefinitely.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Fetches the supplementary value for one group key.
    async fn fetch_aux(&self, key: &str) -> Result<Value, FetchError>;
}
