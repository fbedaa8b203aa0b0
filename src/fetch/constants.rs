//! Constants for the fetch adapters (timeouts, default endpoints).

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout (30 seconds; pages are at most a few hundred KB).
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default API base URL.
pub const DEFAULT_API_BASE: &str = "https://osu.ppy.sh/api";

/// Paged endpoint (records since a cursor).
pub const DEFAULT_PAGE_ENDPOINT: &str = "get_beatmaps";

/// Per-entity endpoint (records of one entity id).
pub const DEFAULT_ENTITY_ENDPOINT: &str = "get_user_best";

/// Base URL of the auxiliary pages used for enrichment.
pub const DEFAULT_ENRICH_BASE: &str = "https://osu.ppy.sh/beatmapsets";

/// Id of the `<script>` element holding the enrichment JSON.
pub const DEFAULT_ENRICH_SCRIPT_ID: &str = "json-beatmapset";

/// Field read from the enrichment JSON (also the column added to records).
pub const DEFAULT_ENRICH_FIELD: &str = "submitted_date";
