//! Durable substrate backed by `SurrealKV`.
//!
//! One versioned, ACID `SurrealKV` tree holds every container of a store.
//! Containers are key prefixes:
//!
//! | Key | Value |
//! |-----|-------|
//! | `'v'` | schema version, `u32` big-endian |
//! | `'c' ++ container` | empty; marks the container as created |
//! | `'d' ++ container ++ 0x00 ++ row_id` | encoded row, id as `u64` big-endian |
//!
//! Big-endian ids make a container's key range iterate in ascending row id
//! order. A structural upgrade writes catalog entries, metadata rows and the
//! version in a single `SurrealKV` transaction, so it commits entirely or not
//! at all.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::row::RowId;
use crate::substrate::{RawTransaction, StoreCatalog, Substrate, TransactionMode};

const VERSION_KEY: u8 = b'v';
const CATALOG_PREFIX: u8 = b'c';
const DATA_PREFIX: u8 = b'd';

/// Length of an encoded row id.
const ID_LEN: usize = 8;

fn version_key() -> Vec<u8> {
    vec![VERSION_KEY]
}

fn catalog_key(container: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(container.len().saturating_add(1));
    buf.push(CATALOG_PREFIX);
    buf.extend_from_slice(container.as_bytes());
    buf
}

/// Start of a container's data range (inclusive): `'d' ++ container ++ 0x00`.
fn data_range_start(container: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(container.len().saturating_add(2));
    buf.push(DATA_PREFIX);
    buf.extend_from_slice(container.as_bytes());
    buf.push(0);
    buf
}

/// End of a container's data range (exclusive): `'d' ++ container ++ 0x01`.
///
/// Container names never contain `\0`, so this range holds exactly the
/// container's rows.
fn data_range_end(container: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(container.len().saturating_add(2));
    buf.push(DATA_PREFIX);
    buf.extend_from_slice(container.as_bytes());
    buf.push(1);
    buf
}

fn data_key(container: &str, id: RowId) -> Vec<u8> {
    let mut buf = data_range_start(container);
    buf.extend_from_slice(&id.to_be_bytes());
    buf
}

fn map_kv_err(e: &surrealkv::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

fn lock_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Internal(e.to_string())
}

/// Persistent substrate: one `SurrealKV` tree per store directory.
///
/// The tree is opened lazily by [`Substrate::open`] and stays open until
/// [`Substrate::close`].
pub struct SurrealKvSubstrate {
    path: PathBuf,
    tree: RwLock<Option<Arc<surrealkv::Tree>>>,
}

impl std::fmt::Debug for SurrealKvSubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealKvSubstrate")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SurrealKvSubstrate {
    /// Substrate storing its tree in `path`. Nothing is opened yet.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            tree: RwLock::new(None),
        }
    }

    /// Directory holding the tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tree(&self) -> StorageResult<Arc<surrealkv::Tree>> {
        self.tree
            .read()
            .map_err(lock_err)?
            .clone()
            .ok_or_else(|| StorageError::Internal("durable substrate is not open".into()))
    }

    fn open_tree(&self) -> StorageResult<Arc<surrealkv::Tree>> {
        let mut slot = self.tree.write().map_err(lock_err)?;
        if let Some(tree) = slot.as_ref() {
            return Ok(Arc::clone(tree));
        }
        let tree = surrealkv::TreeBuilder::new()
            .with_path(self.path.clone())
            .build()
            .map_err(|e| {
                StorageError::Init(format!("cannot open store at {}: {e}", self.path.display()))
            })?;
        let tree = Arc::new(tree);
        *slot = Some(Arc::clone(&tree));
        info!(path = %self.path.display(), "opened durable store");
        Ok(tree)
    }

    fn begin_inner(
        &self,
        mode: TransactionMode,
        upgrade_to: Option<u32>,
    ) -> StorageResult<SurrealKvTransaction> {
        let tree = self.tree()?;
        let tx = match mode {
            TransactionMode::ReadOnly => tree
                .begin_with_mode(surrealkv::Mode::ReadOnly)
                .map_err(|ref e| map_kv_err(e))?,
            TransactionMode::ReadWrite => tree.begin().map_err(|ref e| map_kv_err(e))?,
        };
        Ok(SurrealKvTransaction {
            tx: Mutex::new(tx),
            mode,
            upgrade_to,
        })
    }
}

/// Read the container catalog inside `tx`.
fn read_catalog(tx: &surrealkv::Transaction) -> StorageResult<BTreeSet<String>> {
    let start = vec![CATALOG_PREFIX];
    let end = vec![DATA_PREFIX];
    let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
    iter.seek_first().map_err(|ref e| map_kv_err(e))?;

    let mut names = BTreeSet::new();
    while iter.valid() {
        let raw_key = iter.key();
        if raw_key.len() > 1
            && let Ok(name) = std::str::from_utf8(&raw_key[1..])
        {
            names.insert(name.to_owned());
        }
        iter.next().map_err(|ref e| map_kv_err(e))?;
    }
    Ok(names)
}

fn read_version(tx: &surrealkv::Transaction) -> StorageResult<Option<u32>> {
    let Some(raw) = tx.get(&version_key()).map_err(|ref e| map_kv_err(e))? else {
        return Ok(None);
    };
    let bytes: [u8; 4] = raw
        .as_slice()
        .try_into()
        .map_err(|_| StorageError::Decode(format!("bad version record of {} bytes", raw.len())))?;
    Ok(Some(u32::from_be_bytes(bytes)))
}

#[async_trait]
impl Substrate for SurrealKvSubstrate {
    fn kind(&self) -> &'static str {
        "surrealkv"
    }

    async fn open(&self) -> StorageResult<StoreCatalog> {
        let tree = self.open_tree()?;
        let tx = tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let catalog = StoreCatalog {
            version: read_version(&tx)?,
            containers: read_catalog(&tx)?,
        };
        debug!(
            path = %self.path.display(),
            version = ?catalog.version,
            containers = catalog.containers.len(),
            "read durable catalog"
        );
        Ok(catalog)
    }

    async fn containers(&self) -> StorageResult<BTreeSet<String>> {
        let tree = self.tree()?;
        let tx = tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        read_catalog(&tx)
    }

    async fn begin(&self, mode: TransactionMode) -> StorageResult<Box<dyn RawTransaction>> {
        Ok(Box::new(self.begin_inner(mode, None)?))
    }

    async fn begin_upgrade(&self, version: u32) -> StorageResult<Box<dyn RawTransaction>> {
        Ok(Box::new(
            self.begin_inner(TransactionMode::ReadWrite, Some(version))?,
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        let tree = self.tree.write().map_err(lock_err)?.take();
        if let Some(tree) = tree {
            tree.close().await.map_err(|ref e| map_kv_err(e))?;
            info!(path = %self.path.display(), "closed durable store");
        }
        Ok(())
    }
}

struct SurrealKvTransaction {
    tx: Mutex<surrealkv::Transaction>,
    mode: TransactionMode,
    upgrade_to: Option<u32>,
}

impl SurrealKvTransaction {
    fn check_writable(&self) -> StorageResult<()> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly(
                "write attempted in a readonly transaction".into(),
            ));
        }
        Ok(())
    }

    fn check_container(tx: &surrealkv::Transaction, container: &str) -> StorageResult<()> {
        let exists = tx
            .get(&catalog_key(container))
            .map_err(|ref e| map_kv_err(e))?
            .is_some();
        if exists {
            Ok(())
        } else {
            Err(StorageError::NotFound(format!("container '{container}'")))
        }
    }
}

#[async_trait]
impl RawTransaction for SurrealKvTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn create_container(&self, name: &str) -> StorageResult<()> {
        if self.upgrade_to.is_none() {
            return Err(StorageError::Internal(format!(
                "cannot create container '{name}' outside an upgrade"
            )));
        }
        let mut tx = self.tx.lock().map_err(lock_err)?;
        tx.set(&catalog_key(name), &Vec::<u8>::new())
            .map_err(|ref e| map_kv_err(e))?;
        debug!(container = %name, "staged durable container");
        Ok(())
    }

    async fn get(&self, container: &str, key: RowId) -> StorageResult<Option<Vec<u8>>> {
        let tx = self.tx.lock().map_err(lock_err)?;
        Self::check_container(&tx, container)?;
        tx.get(&data_key(container, key))
            .map_err(|ref e| map_kv_err(e))
    }

    async fn scan(&self, container: &str) -> StorageResult<Vec<(RowId, Vec<u8>)>> {
        let tx = self.tx.lock().map_err(lock_err)?;
        Self::check_container(&tx, container)?;
        let start = data_range_start(container);
        let end = data_range_end(container);
        let prefix_len = start.len();

        // Collect ids first, then read values (the iterator borrows tx).
        let ids = {
            let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
            iter.seek_first().map_err(|ref e| map_kv_err(e))?;
            let mut ids = Vec::new();
            while iter.valid() {
                let raw_key = iter.key();
                if raw_key.len() == prefix_len.saturating_add(ID_LEN)
                    && let Ok(bytes) = <[u8; ID_LEN]>::try_from(&raw_key[prefix_len..])
                {
                    ids.push(RowId::from_be_bytes(bytes));
                }
                iter.next().map_err(|ref e| map_kv_err(e))?;
            }
            ids
        };

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = tx
                .get(&data_key(container, id))
                .map_err(|ref e| map_kv_err(e))?
            {
                rows.push((id, value));
            }
        }
        Ok(rows)
    }

    async fn last_key(&self, container: &str) -> StorageResult<Option<RowId>> {
        let tx = self.tx.lock().map_err(lock_err)?;
        Self::check_container(&tx, container)?;
        let start = data_range_start(container);
        let end = data_range_end(container);
        let prefix_len = start.len();

        let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
        iter.seek_first().map_err(|ref e| map_kv_err(e))?;
        let mut last = None;
        while iter.valid() {
            let raw_key = iter.key();
            if raw_key.len() == prefix_len.saturating_add(ID_LEN)
                && let Ok(bytes) = <[u8; ID_LEN]>::try_from(&raw_key[prefix_len..])
            {
                last = Some(RowId::from_be_bytes(bytes));
            }
            iter.next().map_err(|ref e| map_kv_err(e))?;
        }
        Ok(last)
    }

    async fn put(&self, container: &str, key: RowId, value: Vec<u8>) -> StorageResult<()> {
        self.check_writable()?;
        let mut tx = self.tx.lock().map_err(lock_err)?;
        Self::check_container(&tx, container)?;
        tx.set(&data_key(container, key), &value)
            .map_err(|ref e| map_kv_err(e))
    }

    async fn delete(&self, container: &str, key: RowId) -> StorageResult<()> {
        self.check_writable()?;
        let mut tx = self.tx.lock().map_err(lock_err)?;
        Self::check_container(&tx, container)?;
        let ck = data_key(container, key);
        if tx.get(&ck).map_err(|ref e| map_kv_err(e))?.is_some() {
            tx.delete(&ck).map_err(|ref e| map_kv_err(e))?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        let mut tx = this.tx.into_inner().map_err(lock_err)?;
        if this.mode == TransactionMode::ReadOnly {
            return Ok(());
        }
        if let Some(version) = this.upgrade_to {
            tx.set(&version_key(), &version.to_be_bytes().to_vec())
                .map_err(|ref e| map_kv_err(e))?;
        }
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        // Dropping an uncommitted SurrealKV transaction discards its writes.
        debug!(mode = %self.mode, "discarded durable transaction");
        Ok(())
    }
}
