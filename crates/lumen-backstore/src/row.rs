//! Rows and the row codec.
//!
//! A [`Row`] is a row id plus a structured payload. Crossing the store
//! boundary always goes through the codec, so the in-memory row and the
//! persisted one never alias:
//!
//! ```text
//! Row { id: 7, payload: {...} }  <->  {"id": 7, "value": {...}}  <->  bytes
//! ```

use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};

/// Identifier of a row. User rows are numbered from 1.
pub type RowId = u64;

/// Field holding the row id in the transport form.
const ID_FIELD: &str = "id";

/// Field holding the payload in the transport form.
const VALUE_FIELD: &str = "value";

/// A logical record: row id plus structured payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: RowId,
    payload: Value,
}

impl Row {
    /// Create a row.
    #[must_use]
    pub fn new(id: RowId, payload: Value) -> Self {
        Self { id, payload }
    }

    /// The row id.
    #[must_use]
    pub fn id(&self) -> RowId {
        self.id
    }

    /// The row payload.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Consume the row, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Encode into the transport form `{"id": .., "value": ..}`.
    #[must_use]
    pub fn encode(&self) -> Value {
        let mut obj = Map::with_capacity(2);
        obj.insert(ID_FIELD.to_owned(), Value::from(self.id));
        obj.insert(VALUE_FIELD.to_owned(), self.payload.clone());
        Value::Object(obj)
    }

    /// Decode from the transport form.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if either field is missing or the id
    /// is not a non-negative integer.
    pub fn decode(value: &Value) -> StorageResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| StorageError::Decode("row is not an object".into()))?;
        let id = obj
            .get(ID_FIELD)
            .ok_or_else(|| StorageError::Decode("row has no id".into()))?
            .as_u64()
            .ok_or_else(|| StorageError::Decode("row id is not a non-negative integer".into()))?;
        let payload = obj
            .get(VALUE_FIELD)
            .ok_or_else(|| StorageError::Decode(format!("row {id} has no value")))?
            .clone();
        Ok(Self { id, payload })
    }

    /// Encode into the byte form written by substrates.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(&self.encode()).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Decode from the byte form written by substrates.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if the bytes are not a valid row.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))?;
        Self::decode(&value)
    }
}
