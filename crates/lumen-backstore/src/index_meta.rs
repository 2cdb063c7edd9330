//! Persisted index metadata.
//!
//! Every persisted-index container holds one metadata row at the reserved
//! id [`INDEX_METADATA_ROW_ID`] whose payload names the index kind:
//!
//! ```json
//! {"id": 0, "value": {"type": "BTREE"}}
//! ```
//!
//! The reserved id is part of the on-disk format. User row ids start at 1,
//! so it never collides with user data.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::row::{Row, RowId};
use crate::schema::IndexKind;

/// Reserved row id of the metadata row in a persisted-index container.
pub const INDEX_METADATA_ROW_ID: RowId = 0;

/// Physical kind recorded in an index container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// B-tree over one or more columns.
    #[serde(rename = "BTREE")]
    BTree,
    /// Index over the table's row ids.
    #[serde(rename = "ROW_ID")]
    RowId,
}

impl IndexType {
    /// The kind a container must record for an index of `kind`.
    #[must_use]
    pub fn expected_for(kind: IndexKind) -> Self {
        match kind {
            IndexKind::BTree => Self::BTree,
            IndexKind::RowId => Self::RowId,
        }
    }
}

impl std::fmt::Display for IndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BTree => f.write_str("BTREE"),
            Self::RowId => f.write_str("ROW_ID"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataPayload {
    #[serde(rename = "type")]
    index_type: IndexType,
}

/// The metadata row of one persisted-index container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMetadataRow {
    index_type: IndexType,
}

impl IndexMetadataRow {
    /// Metadata row for an index of the given physical kind.
    #[must_use]
    pub fn new(index_type: IndexType) -> Self {
        Self { index_type }
    }

    /// Metadata row matching a schema-declared index kind.
    #[must_use]
    pub fn for_kind(kind: IndexKind) -> Self {
        Self::new(IndexType::expected_for(kind))
    }

    /// The recorded index kind.
    #[must_use]
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Read the metadata back out of a stored row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if the row does not sit at the
    /// reserved id or its payload has no recognizable `type`.
    pub fn from_row(row: &Row) -> StorageResult<Self> {
        if row.id() != INDEX_METADATA_ROW_ID {
            return Err(StorageError::Decode(format!(
                "row {} is not an index metadata row",
                row.id()
            )));
        }
        let payload: MetadataPayload = serde_json::from_value(row.payload().clone())
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        Ok(Self::new(payload.index_type))
    }
}

impl From<IndexMetadataRow> for Row {
    fn from(meta: IndexMetadataRow) -> Self {
        let payload = match meta.index_type {
            IndexType::BTree => serde_json::json!({"type": "BTREE"}),
            IndexType::RowId => serde_json::json!({"type": "ROW_ID"}),
        };
        Row::new(INDEX_METADATA_ROW_ID, payload)
    }
}
