//! Typed view over the opaque records returned by the remote source.
//!
//! A [`Record`] keeps every source field untouched in an open JSON object and
//! additionally exposes the two fields the harvesting core needs: a unique
//! identifier and a cursor-producing timestamp. Which source fields play those
//! roles is described by a [`RecordSchema`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::cursor::{Cursor, CursorError};

/// Default identifier field of paged records.
pub const DEFAULT_ID_FIELD: &str = "beatmap_id";

/// Default cursor field of paged records.
pub const DEFAULT_CURSOR_FIELD: &str = "approved_date";

/// Default grouping field used for enrichment.
pub const DEFAULT_GROUP_FIELD: &str = "beatmapset_id";

/// Errors raised when a source object cannot be read as a [`Record`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The source value is not a JSON object.
    #[error("record is not a JSON object")]
    NotAnObject,

    /// A declared field is absent.
    #[error("record is missing field '{field}'")]
    MissingField {
        /// The missing field name.
        field: String,
    },

    /// The identifier is neither a string nor an integer.
    #[error("record field '{field}' is not a usable identifier")]
    InvalidIdentifier {
        /// The identifier field name.
        field: String,
    },

    /// The cursor field does not hold a timestamp.
    #[error("record field '{field}' holds an invalid cursor: {source}")]
    InvalidCursor {
        /// The cursor field name.
        field: String,
        /// Why the value was rejected.
        #[source]
        source: CursorError,
    },
}

/// Names of the fields the core reads from otherwise opaque records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    /// Field holding the unique identifier.
    pub id_field: String,
    /// Field holding the cursor-ordering timestamp.
    pub cursor_field: String,
    /// Field holding the enrichment group key, if any.
    pub group_field: Option<String>,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            id_field: DEFAULT_ID_FIELD.to_string(),
            cursor_field: DEFAULT_CURSOR_FIELD.to_string(),
            group_field: Some(DEFAULT_GROUP_FIELD.to_string()),
        }
    }
}

impl RecordSchema {
    /// Creates a schema without a grouping field.
    #[must_use]
    pub fn new(id_field: impl Into<String>, cursor_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            cursor_field: cursor_field.into(),
            group_field: None,
        }
    }

    /// Sets the grouping field used for enrichment.
    #[must_use]
    pub fn with_group_field(mut self, group_field: impl Into<String>) -> Self {
        self.group_field = Some(group_field.into());
        self
    }

    /// Reads the identifier of a raw source object, if present and usable.
    #[must_use]
    pub fn identifier_of(&self, fields: &Map<String, Value>) -> Option<String> {
        fields.get(&self.id_field).and_then(scalar_key)
    }
}

/// One record of a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: String,
    cursor: Cursor,
    fields: Map<String, Value>,
}

impl Record {
    /// Reads a record out of a raw source value.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordError`] if the value is not an object or the
    /// identifier or cursor field is missing or unusable.
    pub fn from_value(value: Value, schema: &RecordSchema) -> Result<Self, RecordError> {
        let Value::Object(fields) = value else {
            return Err(RecordError::NotAnObject);
        };

        let raw_id = fields
            .get(&schema.id_field)
            .ok_or_else(|| RecordError::MissingField {
                field: schema.id_field.clone(),
            })?;
        let id = scalar_key(raw_id).ok_or_else(|| RecordError::InvalidIdentifier {
            field: schema.id_field.clone(),
        })?;

        let raw_cursor = fields
            .get(&schema.cursor_field)
            .and_then(Value::as_str)
            .ok_or_else(|| RecordError::MissingField {
                field: schema.cursor_field.clone(),
            })?;
        let cursor = Cursor::parse(raw_cursor).map_err(|source| RecordError::InvalidCursor {
            field: schema.cursor_field.clone(),
            source,
        })?;

        Ok(Self { id, cursor, fields })
    }

    /// Returns the unique identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the cursor-ordering timestamp.
    #[must_use]
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Returns all fields, including the identifier and cursor fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns one field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the enrichment group key, if the schema declares one and it is set.
    #[must_use]
    pub fn group_key(&self, schema: &RecordSchema) -> Option<String> {
        schema
            .group_field
            .as_deref()
            .and_then(|field| self.fields.get(field))
            .and_then(scalar_key)
    }

    /// Adds or replaces a field.
    pub fn insert_field(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Returns the record as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Normalises a scalar JSON value into a textual key.
///
/// The source is inconsistent about quoting numeric identifiers, so `"42"`
/// and `42` map to the same key.
pub(crate) fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}
