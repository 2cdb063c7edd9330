//! Store handle and schema-driven initialization.
//!
//! [`Backstore`] owns one substrate and the container set derived from one
//! schema. [`Backstore::init`] brings the substrate in line with the schema:
//!
//! 1. Open the substrate and read which containers already exist.
//! 2. Diff against the required set.
//! 3. In one upgrade transaction, create every missing container and write
//!    the metadata row of every index container it just created.
//! 4. Verify the metadata row of every persisted-index container.
//! 5. Seed the row id counter from the highest stored row id.
//!
//! Step 3 commits as a unit. When it fails, no container it would have
//! created is visible and `init` can be retried.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use lumen_config::{Backend, StorageConfig};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::index_meta::{INDEX_METADATA_ROW_ID, IndexMetadataRow, IndexType};
use crate::layout::{ContainerRole, ContainerSet};
use crate::memory::MemorySubstrate;
use crate::page::Page;
use crate::row::{Row, RowId};
use crate::schema::Schema;
use crate::substrate::{Substrate, TransactionMode};
use crate::transaction::Transaction;

/// Outcome of a successful [`Backstore::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    /// Containers created by this call, in schema order.
    pub created: Vec<String>,
    /// Whether a structural upgrade ran.
    pub upgraded: bool,
    /// Schema version the store is now at.
    pub version: u32,
}

/// Handle onto one initialized backing store.
pub struct Backstore {
    schema: Arc<Schema>,
    substrate: Arc<dyn Substrate>,
    containers: Arc<ContainerSet>,
    bundled: bool,
    initialized: AtomicBool,
    next_row_id: AtomicU64,
}

impl std::fmt::Debug for Backstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backstore")
            .field("schema", &self.schema.name())
            .field("substrate", &self.substrate.kind())
            .field("bundled", &self.bundled)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl Backstore {
    /// Handle over an arbitrary substrate. Nothing is opened until
    /// [`init`](Self::init).
    #[must_use]
    pub fn new(schema: Schema, substrate: Arc<dyn Substrate>) -> Self {
        let containers = Arc::new(ContainerSet::derive(&schema));
        Self {
            schema: Arc::new(schema),
            substrate,
            containers,
            bundled: false,
            initialized: AtomicBool::new(false),
            next_row_id: AtomicU64::new(1),
        }
    }

    /// Handle over a fresh in-memory substrate.
    #[must_use]
    pub fn memory(schema: Schema) -> Self {
        Self::new(schema, Arc::new(MemorySubstrate::new()))
    }

    /// Handle over a `SurrealKV` tree at `{dir}/{schema name}`.
    #[cfg(feature = "durable")]
    #[must_use]
    pub fn durable(schema: Schema, dir: impl AsRef<std::path::Path>) -> Self {
        let path = dir.as_ref().join(schema.name());
        Self::new(
            schema,
            Arc::new(crate::durable::SurrealKvSubstrate::new(path)),
        )
    }

    /// Store table rows in 512-row pages instead of one record per row.
    #[must_use]
    pub fn with_bundled_mode(mut self, bundled: bool) -> Self {
        self.bundled = bundled;
        self
    }

    /// The schema this store serves.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The containers the schema requires.
    #[must_use]
    pub fn required_containers(&self) -> &ContainerSet {
        &self.containers
    }

    /// Whether table rows are stored in pages.
    #[must_use]
    pub fn is_bundled(&self) -> bool {
        self.bundled
    }

    /// Whether [`init`](Self::init) has succeeded and the store is not closed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Open the substrate and bring it in line with the schema.
    ///
    /// Calling `init` on an already-initialized store changes nothing.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Init`] if the substrate cannot be opened, holds a
    ///   newer schema version, or the structural upgrade fails to commit.
    /// - [`StorageError::MetadataMismatch`] if a persisted-index container
    ///   records the wrong kind or no kind at all.
    pub async fn init(&self) -> StorageResult<InitReport> {
        let schema = self.schema.name();
        let version = self.schema.version();
        let catalog = self.substrate.open().await.map_err(into_init)?;
        debug!(
            schema,
            substrate = self.substrate.kind(),
            existing = catalog.containers.len(),
            "opened backing store"
        );

        if let Some(stored) = catalog.version
            && stored > version
        {
            return Err(StorageError::Init(format!(
                "store '{schema}' is at version {stored}, newer than schema version {version}"
            )));
        }

        let missing: Vec<String> = self
            .containers
            .names()
            .filter(|name| !catalog.containers.contains(*name))
            .map(str::to_owned)
            .collect();
        let upgraded = !missing.is_empty() || catalog.version != Some(version);
        if upgraded {
            self.upgrade(&missing).await?;
            info!(
                schema,
                from = ?catalog.version,
                to = version,
                created = missing.len(),
                "upgraded backing store"
            );
        }

        self.verify_metadata().await?;
        let max = self.max_row_id().await.map_err(into_init)?;
        // 0 is never a user row id, so it marks an exhausted counter.
        let next = max.checked_add(1).unwrap_or(EXHAUSTED);
        self.next_row_id.store(next, Ordering::Release);
        self.initialized.store(true, Ordering::Release);

        info!(schema, version, next_row_id = next, "backing store ready");
        Ok(InitReport {
            created: missing,
            upgraded,
            version,
        })
    }

    /// Create `missing` and seed their metadata in one upgrade transaction.
    async fn upgrade(&self, missing: &[String]) -> StorageResult<()> {
        let raw = self
            .substrate
            .begin_upgrade(self.schema.version())
            .await
            .map_err(into_init)?;
        for name in missing {
            if let Err(e) = raw.create_container(name).await {
                raw.abort().await?;
                return Err(into_init(e));
            }
            debug!(container = %name, "created container");
        }

        let tx = Transaction::new(raw, Arc::clone(&self.containers), &[], self.bundled)?;
        let nested = tx.nested();
        let mut failure = None;
        for name in missing {
            let Some(ContainerRole::Index(index_type)) = self.containers.role(name) else {
                continue;
            };
            let row = Row::from(IndexMetadataRow::new(index_type));
            let written = match nested.table(name) {
                Ok(store) => store.put(&[row]).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                failure = Some(e);
                break;
            }
            debug!(container = %name, %index_type, "wrote index metadata");
        }
        let enlisted = match failure {
            Some(e) => {
                let reason = match e {
                    StorageError::TransactionAbort(inner) => inner,
                    other => other.to_string(),
                };
                nested.abort(&reason);
                Err(StorageError::TransactionAbort(reason))
            },
            None => nested.commit(),
        };

        match enlisted {
            Ok(()) => tx.commit().await.map_err(|e| {
                warn!(schema = self.schema.name(), error = %e, "structural upgrade aborted");
                into_init(e)
            }),
            Err(e) => {
                warn!(schema = self.schema.name(), error = %e, "structural upgrade aborted");
                tx.abort().await?;
                Err(into_init(e))
            },
        }
    }

    /// Check the metadata row of every persisted-index container.
    async fn verify_metadata(&self) -> StorageResult<()> {
        for (container, found) in self.read_index_metadata().await? {
            let expected = match self.containers.role(&container) {
                Some(ContainerRole::Index(t)) => t,
                _ => continue,
            };
            if found != Some(expected) {
                warn!(
                    container = %container,
                    %expected,
                    found = ?found,
                    "index metadata mismatch"
                );
                return Err(StorageError::MetadataMismatch {
                    container,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Read the metadata row of every persisted-index container.
    async fn read_index_metadata(&self) -> StorageResult<Vec<(String, Option<IndexType>)>> {
        let raw = self.substrate.begin(TransactionMode::ReadOnly).await?;
        let tx = Transaction::new(raw, Arc::clone(&self.containers), &[], self.bundled)?;
        let mut out = Vec::new();
        for (name, _) in self.containers.indices() {
            let rows = tx.table(name)?.get(&[INDEX_METADATA_ROW_ID]).await?;
            let found = match rows.first() {
                Some(row) => Some(IndexMetadataRow::from_row(row)?.index_type()),
                None => None,
            };
            out.push((name.to_owned(), found));
        }
        tx.abort().await?;
        Ok(out)
    }

    /// Highest row id stored in any table, read from keys alone.
    ///
    /// In bundled mode the last key is a page id, so only that page is
    /// decoded.
    async fn max_row_id(&self) -> StorageResult<RowId> {
        let raw = self.substrate.begin(TransactionMode::ReadOnly).await?;
        let mut max = 0;
        for name in self.containers.tables() {
            let Some(last) = raw.last_key(name).await? else {
                continue;
            };
            let id = if self.bundled {
                match raw.get(name, last).await? {
                    Some(bytes) => Page::from_bytes(&bytes)?.last_row_id().unwrap_or(0),
                    None => 0,
                }
            } else {
                last
            };
            max = max.max(id);
        }
        raw.abort().await?;
        Ok(max)
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    /// Open a transaction over `scope`, or over every container when
    /// `scope` is empty.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotInitialized`] before a successful `init`.
    /// - [`StorageError::NotFound`] if `scope` names an unknown container.
    pub async fn create_tx(
        &self,
        mode: TransactionMode,
        scope: &[&str],
    ) -> StorageResult<Transaction> {
        self.ensure_initialized()?;
        let raw = self.substrate.begin(mode).await?;
        Transaction::new(raw, Arc::clone(&self.containers), scope, self.bundled)
    }

    /// Names of the containers that currently exist in the substrate.
    ///
    /// This includes containers the schema no longer requires.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot list its containers.
    pub async fn containers(&self) -> StorageResult<BTreeSet<String>> {
        self.substrate.containers().await
    }

    /// Kind recorded in every persisted-index container, in schema order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before `init`, or
    /// [`StorageError::MetadataMismatch`] if a container has no metadata row.
    pub async fn index_metadata(&self) -> StorageResult<Vec<(String, IndexType)>> {
        self.ensure_initialized()?;
        let mut out = Vec::new();
        for (container, found) in self.read_index_metadata().await? {
            let expected = match self.containers.role(&container) {
                Some(ContainerRole::Index(t)) => t,
                _ => continue,
            };
            let index_type = found.ok_or(StorageError::MetadataMismatch {
                container: container.clone(),
                expected,
                found: None,
            })?;
            out.push((container, index_type));
        }
        Ok(out)
    }

    /// Hand out the next unused row id. Never returns 0.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotInitialized`] before `init`.
    /// - [`StorageError::InvalidKey`] once `u64::MAX` has been handed out.
    pub fn next_row_id(&self) -> StorageResult<RowId> {
        self.ensure_initialized()?;
        self.next_row_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next != EXHAUSTED).then(|| next.checked_add(1).unwrap_or(EXHAUSTED))
            })
            .map_err(|_| StorageError::InvalidKey("row ids are exhausted".into()))
    }

    /// Release the substrate. The handle must be re-initialized before use.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate fails to close cleanly.
    pub async fn close(&self) -> StorageResult<()> {
        self.initialized.store(false, Ordering::Release);
        self.substrate.close().await?;
        info!(schema = self.schema.name(), "closed backing store");
        Ok(())
    }
}

/// Counter value once every row id has been handed out.
const EXHAUSTED: RowId = 0;

fn into_init(e: StorageError) -> StorageError {
    match e {
        StorageError::Init(_) => e,
        other => StorageError::Init(other.to_string()),
    }
}

/// Build the store described by `config` and initialize it.
///
/// # Errors
///
/// Returns [`StorageError::Init`] if the durable backend is selected
/// without a data directory or without the `durable` feature, plus any
/// error from [`Backstore::init`].
pub async fn init_store(schema: Schema, config: &StorageConfig) -> StorageResult<Backstore> {
    let store = match config.backend {
        Backend::Memory => Backstore::memory(schema),
        Backend::Durable => durable_store(schema, config)?,
    };
    let store = store.with_bundled_mode(config.bundled);
    store.init().await?;
    Ok(store)
}

#[cfg(feature = "durable")]
fn durable_store(schema: Schema, config: &StorageConfig) -> StorageResult<Backstore> {
    let dir = config
        .data_dir
        .as_deref()
        .ok_or_else(|| StorageError::Init("durable backend needs a data directory".into()))?;
    Ok(Backstore::durable(schema, dir))
}

#[cfg(not(feature = "durable"))]
fn durable_store(_schema: Schema, _config: &StorageConfig) -> StorageResult<Backstore> {
    Err(StorageError::Init(
        "durable backend is not compiled in; enable the `durable` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::TableSchema;

    fn schema() -> Schema {
        Schema::builder("unit", 1)
            .table(
                TableSchema::new("Job")
                    .with_index("idx_salary", &["salary"])
                    .with_persistent_index(true),
            )
            .table(TableSchema::new("Note"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_tx_before_init() {
        let store = Backstore::memory(schema());
        assert!(matches!(
            store.create_tx(TransactionMode::ReadOnly, &[]).await,
            Err(StorageError::NotInitialized)
        ));
        assert!(store.next_row_id().is_err());
    }

    #[tokio::test]
    async fn test_init_report() {
        let store = Backstore::memory(schema());
        let report = store.init().await.unwrap();
        assert!(report.upgraded);
        assert_eq!(report.version, 1);
        assert_eq!(report.created, ["Job", "idx_salary", "Job_RowId", "Note"]);

        let again = store.init().await.unwrap();
        assert!(!again.upgraded);
        assert!(again.created.is_empty());
    }

    #[tokio::test]
    async fn test_index_metadata() {
        let store = Backstore::memory(schema());
        store.init().await.unwrap();
        assert_eq!(
            store.index_metadata().await.unwrap(),
            vec![
                ("idx_salary".to_owned(), IndexType::BTree),
                ("Job_RowId".to_owned(), IndexType::RowId),
            ]
        );
    }

    #[tokio::test]
    async fn test_row_ids_continue_after_stored_rows() {
        let substrate = Arc::new(MemorySubstrate::new());
        let store = Backstore::new(schema(), substrate.clone());
        store.init().await.unwrap();
        assert_eq!(store.next_row_id().unwrap(), 1);

        let tx = store.create_tx(TransactionMode::ReadWrite, &["Note"]).await.unwrap();
        tx.table("Note")
            .unwrap()
            .put(&[Row::new(41, json!({})), Row::new(7, json!({}))])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let reopened = Backstore::new(schema(), substrate);
        reopened.init().await.unwrap();
        assert_eq!(reopened.next_row_id().unwrap(), 42);
        assert_eq!(reopened.next_row_id().unwrap(), 43);
    }

    async fn store_notes(substrate: &Arc<MemorySubstrate>, bundled: bool, rows: &[Row]) {
        let store = Backstore::new(schema(), substrate.clone()).with_bundled_mode(bundled);
        store.init().await.unwrap();
        let tx = store.create_tx(TransactionMode::ReadWrite, &["Note"]).await.unwrap();
        tx.table("Note").unwrap().put(rows).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_row_ids_stop_at_max() {
        let substrate = Arc::new(MemorySubstrate::new());
        store_notes(&substrate, false, &[Row::new(u64::MAX.saturating_sub(1), json!({}))]).await;

        let store = Backstore::new(schema(), substrate);
        store.init().await.unwrap();
        assert_eq!(store.next_row_id().unwrap(), u64::MAX);
        assert!(matches!(
            store.next_row_id(),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(store.next_row_id().is_err());
    }

    #[tokio::test]
    async fn test_max_row_id_stored_leaves_no_ids() {
        let substrate = Arc::new(MemorySubstrate::new());
        store_notes(&substrate, false, &[Row::new(u64::MAX, json!({}))]).await;

        let store = Backstore::new(schema(), substrate);
        store.init().await.unwrap();
        assert!(matches!(
            store.next_row_id(),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_row_does_not_block_init() {
        let substrate = Arc::new(MemorySubstrate::new());
        store_notes(&substrate, false, &[Row::new(3, json!({}))]).await;
        let raw = substrate.begin(TransactionMode::ReadWrite).await.unwrap();
        raw.put("Note", 9, b"not json".to_vec()).await.unwrap();
        raw.commit().await.unwrap();

        let store = Backstore::new(schema(), substrate);
        store.init().await.unwrap();
        assert_eq!(store.next_row_id().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_bundled_row_ids_from_last_page() {
        let substrate = Arc::new(MemorySubstrate::new());
        store_notes(
            &substrate,
            true,
            &[Row::new(3, json!({})), Row::new(1500, json!({})), Row::new(1030, json!({}))],
        )
        .await;

        let store = Backstore::new(schema(), substrate).with_bundled_mode(true);
        store.init().await.unwrap();
        assert_eq!(store.next_row_id().unwrap(), 1501);
    }

    #[tokio::test]
    async fn test_newer_store_version_rejected() {
        let substrate = Arc::new(MemorySubstrate::new());
        let newer = Schema::builder("unit", 2)
            .table(TableSchema::new("Note"))
            .build()
            .unwrap();
        Backstore::new(newer, substrate.clone()).init().await.unwrap();

        let older = Backstore::new(schema(), substrate);
        assert!(matches!(older.init().await, Err(StorageError::Init(_))));
        assert!(!older.is_initialized());
    }

    #[tokio::test]
    async fn test_metadata_mismatch_not_overwritten() {
        let substrate = Arc::new(MemorySubstrate::new());
        let store = Backstore::new(schema(), substrate.clone());
        store.init().await.unwrap();

        let tx = store.create_tx(TransactionMode::ReadWrite, &[]).await.unwrap();
        tx.table("idx_salary")
            .unwrap()
            .put(&[Row::from(IndexMetadataRow::new(IndexType::RowId))])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let reopened = Backstore::new(schema(), substrate.clone());
        let err = reopened.init().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::MetadataMismatch {
                expected: IndexType::BTree,
                found: Some(IndexType::RowId),
                ..
            }
        ));

        let raw = substrate.begin(TransactionMode::ReadOnly).await.unwrap();
        let rows = raw.scan("idx_salary").await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_close_requires_reinit() {
        let store = Backstore::memory(schema());
        store.init().await.unwrap();
        store.close().await.unwrap();
        assert!(!store.is_initialized());
        store.init().await.unwrap();
        assert!(store.create_tx(TransactionMode::ReadOnly, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_init_store_from_config() {
        let config = StorageConfig {
            backend: Backend::Memory,
            data_dir: None,
            bundled: true,
        };
        let store = init_store(schema(), &config).await.unwrap();
        assert!(store.is_bundled());
        assert!(store.is_initialized());
    }

    #[cfg(feature = "durable")]
    #[tokio::test]
    async fn test_init_store_durable_needs_dir() {
        let config = StorageConfig {
            backend: Backend::Durable,
            data_dir: None,
            bundled: false,
        };
        assert!(matches!(
            init_store(schema(), &config).await,
            Err(StorageError::Init(_))
        ));
    }
}
