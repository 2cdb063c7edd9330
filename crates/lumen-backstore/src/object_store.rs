//! Object store adapter: rows in and out of one container.
//!
//! An [`ObjectStore`] is borrowed from a [`Transaction`] and holds no
//! transaction state of its own. Rows cross the boundary through the row
//! codec, so callers always get copies.
//!
//! Table containers in bundled mode go through [`Page`]s; every other
//! container stores one record per row id.

use std::collections::BTreeMap;

use crate::error::{StorageError, StorageResult};
use crate::index_meta::INDEX_METADATA_ROW_ID;
use crate::layout::ContainerRole;
use crate::page::{Page, group_by_page, page_id};
use crate::row::{Row, RowId};
use crate::transaction::Transaction;

/// How rows map onto container records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One record per row, keyed by row id.
    Flat,
    /// One record per page of rows, keyed by page id.
    Bundled,
}

/// One container viewed through a transaction.
#[derive(Debug)]
pub struct ObjectStore<'a> {
    tx: &'a Transaction,
    name: String,
    role: ContainerRole,
    layout: Layout,
}

impl<'a> ObjectStore<'a> {
    pub(crate) fn new(
        tx: &'a Transaction,
        name: &str,
        role: ContainerRole,
        layout: Layout,
    ) -> Self {
        Self {
            tx,
            name: name.to_owned(),
            role,
            layout,
        }
    }

    /// The container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The record layout.
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Read rows by id, or every row when `ids` is empty.
    ///
    /// Ids that do not exist are skipped. Reading the whole container
    /// returns rows in ascending id order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if a stored record is corrupt. This
    /// does not abort the transaction.
    pub async fn get(&self, ids: &[RowId]) -> StorageResult<Vec<Row>> {
        match self.layout {
            Layout::Flat => self.get_flat(ids).await,
            Layout::Bundled => self.get_bundled(ids).await,
        }
    }

    /// Insert or replace rows by id.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidKey`] if a table row uses the reserved id
    ///   [`INDEX_METADATA_ROW_ID`]. Nothing is written and the transaction
    ///   stays usable.
    /// - [`StorageError::TransactionAbort`] if the write fails. The
    ///   transaction is poisoned and its commit will discard every write.
    pub async fn put(&self, rows: &[Row]) -> StorageResult<()> {
        self.tx.check_writable(&self.name)?;
        if self.role == ContainerRole::Table
            && rows.iter().any(|row| row.id() == INDEX_METADATA_ROW_ID)
        {
            return Err(StorageError::InvalidKey(format!(
                "row id {INDEX_METADATA_ROW_ID} is reserved and cannot be stored in '{}'",
                self.name
            )));
        }
        let result = match self.layout {
            Layout::Flat => self.put_flat(rows).await,
            Layout::Bundled => self.put_bundled(rows).await,
        };
        result.map_err(|e| self.tx.poison(e))
    }

    /// Remove rows by id, or every row when `ids` is empty.
    ///
    /// Removing an id that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TransactionAbort`] if the write fails.
    pub async fn remove(&self, ids: &[RowId]) -> StorageResult<()> {
        self.tx.check_writable(&self.name)?;
        let result = match self.layout {
            Layout::Flat => self.remove_flat(ids).await,
            Layout::Bundled => self.remove_bundled(ids).await,
        };
        result.map_err(|e| self.tx.poison(e))
    }

    // -- Flat layout --

    async fn get_flat(&self, ids: &[RowId]) -> StorageResult<Vec<Row>> {
        let raw = self.tx.raw();
        if ids.is_empty() {
            return raw
                .scan(&self.name)
                .await?
                .iter()
                .map(|(_, bytes)| Row::from_bytes(bytes))
                .collect();
        }

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bytes) = raw.get(&self.name, *id).await? {
                rows.push(Row::from_bytes(&bytes)?);
            }
        }
        Ok(rows)
    }

    async fn put_flat(&self, rows: &[Row]) -> StorageResult<()> {
        let raw = self.tx.raw();
        for row in rows {
            raw.put(&self.name, row.id(), row.to_bytes()?).await?;
        }
        Ok(())
    }

    async fn remove_flat(&self, ids: &[RowId]) -> StorageResult<()> {
        let raw = self.tx.raw();
        let ids: Vec<RowId> = if ids.is_empty() {
            raw.scan(&self.name)
                .await?
                .into_iter()
                .map(|(id, _)| id)
                .collect()
        } else {
            ids.to_vec()
        };
        for id in ids {
            raw.delete(&self.name, id).await?;
        }
        Ok(())
    }

    // -- Bundled layout --

    async fn load_page(&self, page: u64) -> StorageResult<Option<Page>> {
        self.tx
            .raw()
            .get(&self.name, page)
            .await?
            .map(|bytes| Page::from_bytes(&bytes))
            .transpose()
    }

    async fn all_pages(&self) -> StorageResult<Vec<Page>> {
        self.tx
            .raw()
            .scan(&self.name)
            .await?
            .iter()
            .map(|(_, bytes)| Page::from_bytes(bytes))
            .collect()
    }

    async fn get_bundled(&self, ids: &[RowId]) -> StorageResult<Vec<Row>> {
        if ids.is_empty() {
            return Ok(self.all_pages().await?.iter().flat_map(Page::rows).collect());
        }

        let mut pages: BTreeMap<u64, Option<Page>> = BTreeMap::new();
        for page in group_by_page(ids.iter().copied()).into_keys() {
            pages.insert(page, self.load_page(page).await?);
        }
        Ok(ids
            .iter()
            .filter_map(|id| {
                pages
                    .get(&page_id(*id))
                    .and_then(Option::as_ref)
                    .and_then(|p| p.row(*id))
            })
            .collect())
    }

    async fn put_bundled(&self, rows: &[Row]) -> StorageResult<()> {
        let mut by_page: BTreeMap<u64, Vec<&Row>> = BTreeMap::new();
        for row in rows {
            by_page.entry(page_id(row.id())).or_default().push(row);
        }

        let raw = self.tx.raw();
        for (id, rows) in by_page {
            let mut page = self.load_page(id).await?.unwrap_or_else(|| Page::new(id));
            for row in rows {
                page.put(row);
            }
            raw.put(&self.name, id, page.to_bytes()?).await?;
        }
        Ok(())
    }

    async fn remove_bundled(&self, ids: &[RowId]) -> StorageResult<()> {
        let raw = self.tx.raw();
        if ids.is_empty() {
            for page in self.all_pages().await? {
                raw.delete(&self.name, page.id()).await?;
            }
            return Ok(());
        }

        for (id, ids) in group_by_page(ids.iter().copied()) {
            let Some(mut page) = self.load_page(id).await? else {
                continue;
            };
            for row_id in ids {
                page.remove(row_id);
            }
            if page.is_empty() {
                raw.delete(&self.name, id).await?;
            } else {
                raw.put(&self.name, id, page.to_bytes()?).await?;
            }
        }
        Ok(())
    }
}
