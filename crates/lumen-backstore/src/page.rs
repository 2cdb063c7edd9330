//! Pages for bundled mode.
//!
//! In bundled mode a table container stores pages instead of rows. Page
//! `p` holds every row whose id satisfies `id >> BUNDLE_EXPONENT == p` and is
//! stored at key `p` as:
//!
//! ```json
//! {"id": p, "value": {"<row id>": <payload>, ...}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::row::{Row, RowId};

/// Rows per page, as a power of two (512 rows).
pub const BUNDLE_EXPONENT: u32 = 9;

/// Page holding the given row.
#[must_use]
pub fn page_id(row_id: RowId) -> u64 {
    row_id.wrapping_shr(BUNDLE_EXPONENT)
}

/// A group of up to 512 rows stored as one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    id: u64,
    #[serde(rename = "value")]
    rows: BTreeMap<RowId, Value>,
}

impl Page {
    /// An empty page.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            rows: BTreeMap::new(),
        }
    }

    /// The page id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the page holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy out one row.
    #[must_use]
    pub fn row(&self, id: RowId) -> Option<Row> {
        self.rows.get(&id).map(|payload| Row::new(id, payload.clone()))
    }

    /// Copy out every row, in ascending id order.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|(id, payload)| Row::new(*id, payload.clone()))
            .collect()
    }

    /// Highest row id on the page.
    #[must_use]
    pub fn last_row_id(&self) -> Option<RowId> {
        self.rows.keys().next_back().copied()
    }

    /// Insert or replace a row.
    pub fn put(&mut self, row: &Row) {
        self.rows.insert(row.id(), row.payload().clone());
    }

    /// Remove a row if present.
    pub fn remove(&mut self, id: RowId) {
        self.rows.remove(&id);
    }

    /// Encode into the byte form written by substrates.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Decode from the byte form written by substrates.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if the bytes are not a valid page.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))
    }
}

/// Group row ids by the page that holds them.
#[must_use]
pub fn group_by_page(ids: impl IntoIterator<Item = RowId>) -> BTreeMap<u64, Vec<RowId>> {
    let mut pages: BTreeMap<u64, Vec<RowId>> = BTreeMap::new();
    for id in ids {
        pages.entry(page_id(id)).or_default().push(id);
    }
    pages
}
