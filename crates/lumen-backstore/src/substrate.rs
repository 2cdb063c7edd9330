//! Substrate trait: the seam between the store handle and a concrete backend.
//!
//! A substrate stores named containers of `u64`-keyed byte values and hands
//! out transactions over them. Implementations:
//!
//! - **Transient** ([`MemorySubstrate`](crate::memory::MemorySubstrate)):
//!   process memory, always available
//! - **Durable** (`SurrealKvSubstrate`, behind the `durable` feature):
//!   versioned, ACID `SurrealKV` tree on disk
//!
//! Containers are created only inside an upgrade transaction
//! ([`Substrate::begin_upgrade`]), which also records the new schema version
//! when it commits. Everything an upgrade does becomes visible at once or
//! not at all.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::row::RowId;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Reads only. Writes are rejected.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl std::fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("readonly"),
            Self::ReadWrite => f.write_str("readwrite"),
        }
    }
}

/// What an opened substrate already contains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCatalog {
    /// Persisted schema version, `None` for a brand-new store.
    pub version: Option<u32>,
    /// Names of existing containers.
    pub containers: BTreeSet<String>,
}

/// A backend that holds containers.
#[async_trait]
pub trait Substrate: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs.
    fn kind(&self) -> &'static str;

    /// Open the substrate (creating it on first use) and report its contents.
    ///
    /// Opening an already-open substrate only re-reads the catalog.
    async fn open(&self) -> StorageResult<StoreCatalog>;

    /// Names of the containers that currently exist.
    async fn containers(&self) -> StorageResult<BTreeSet<String>>;

    /// Begin a transaction over all containers.
    async fn begin(&self, mode: TransactionMode) -> StorageResult<Box<dyn RawTransaction>>;

    /// Begin a structural upgrade that moves the store to `version`.
    ///
    /// The returned transaction may create containers.
    async fn begin_upgrade(&self, version: u32) -> StorageResult<Box<dyn RawTransaction>>;

    /// Release the substrate.
    async fn close(&self) -> StorageResult<()>;
}

/// One substrate transaction, keyed by `(container, row id)`.
///
/// Writes stay invisible to other transactions until [`commit`](Self::commit)
/// and are discarded by [`abort`](Self::abort) or by dropping the transaction.
#[async_trait]
pub trait RawTransaction: Send + Sync {
    /// Access mode.
    fn mode(&self) -> TransactionMode;

    /// Create a container. Only upgrade transactions may do this.
    async fn create_container(&self, name: &str) -> StorageResult<()>;

    /// Read one value.
    async fn get(&self, container: &str, key: RowId) -> StorageResult<Option<Vec<u8>>>;

    /// Read every value in a container, in ascending key order.
    async fn scan(&self, container: &str) -> StorageResult<Vec<(RowId, Vec<u8>)>>;

    /// Highest key in a container, without decoding any value.
    async fn last_key(&self, container: &str) -> StorageResult<Option<RowId>> {
        Ok(self.scan(container).await?.last().map(|(id, _)| *id))
    }

    /// Insert or replace one value.
    async fn put(&self, container: &str, key: RowId, value: Vec<u8>) -> StorageResult<()>;

    /// Delete one value. Deleting a missing key is not an error.
    async fn delete(&self, container: &str, key: RowId) -> StorageResult<()>;

    /// Make every write of this transaction visible at once.
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discard every write of this transaction.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
