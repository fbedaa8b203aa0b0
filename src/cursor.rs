//! Pagination cursor values.
//!
//! The remote source is paged by a "since" timestamp in MySQL format
//! (`YYYY-MM-DD HH:MM:SS`). A [`Cursor`] keeps the exact text that was
//! reported by the source, so persisting and re-sending it never loses
//! precision, while ordering is done on the parsed timestamp.
//!
//! # Example
//!
//! ```
//! use harvester_core::Cursor;
//!
//! let cursor = Cursor::parse("2020-01-02 10:00:00").unwrap();
//! assert_eq!(cursor.rewind_one_unit().unwrap().as_str(), "2020-01-02 09:59:59");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp format used by the remote source.
pub const CURSOR_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date-only format accepted for configured start values (midnight).
const DATE_ONLY_FORMAT: &str = "%Y-%m-%d";

/// Errors produced while parsing or moving a cursor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CursorError {
    /// The value is not a `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` timestamp.
    #[error("invalid cursor value '{value}': expected YYYY-MM-DD HH:MM:SS")]
    Invalid {
        /// The rejected text.
        value: String,
    },

    /// Rewinding would leave the representable timestamp range.
    #[error("cursor '{value}' cannot be rewound")]
    Underflow {
        /// The cursor that could not be rewound.
        value: String,
    },
}

/// An ordered position in the remote source.
///
/// Equality, ordering and hashing use the parsed timestamp only, so
/// `2020-01-01` and `2020-01-01 00:00:00` are the same position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cursor {
    raw: String,
    at: NaiveDateTime,
}

impl Cursor {
    /// Parses a cursor from its textual form, keeping the text verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Invalid`] if the text is not a supported timestamp.
    pub fn parse(value: &str) -> Result<Self, CursorError> {
        let trimmed = value.trim();
        let at = NaiveDateTime::parse_from_str(trimmed, CURSOR_FORMAT)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(trimmed, DATE_ONLY_FORMAT)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(|| CursorError::Invalid {
                value: value.to_string(),
            })?;

        Ok(Self {
            raw: trimmed.to_string(),
            at,
        })
    }

    /// Returns the exact text of this cursor.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed timestamp.
    #[must_use]
    pub fn timestamp(&self) -> NaiveDateTime {
        self.at
    }

    /// Returns the cursor one unit (one second) earlier.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Underflow`] at the start of the representable range.
    pub fn rewind_one_unit(&self) -> Result<Self, CursorError> {
        let at = self
            .at
            .checked_sub_signed(TimeDelta::seconds(1))
            .ok_or_else(|| CursorError::Underflow {
                value: self.raw.clone(),
            })?;
        Ok(Self {
            raw: at.format(CURSOR_FORMAT).to_string(),
            at,
        })
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for Cursor {}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at)
    }
}

impl Hash for Cursor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.at.hash(state);
    }
}

impl TryFrom<String> for Cursor {
    type Error = CursorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        cursor.raw
    }
}
