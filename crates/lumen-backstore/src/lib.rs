//! Lumen Backstore — schema-driven persistence layer.
//!
//! Maps a table/index [`Schema`] onto a transactional key-value substrate
//! and keeps the physical container set in line with it across restarts.
//!
//! # Containers
//!
//! Every table gets one container named after it. A table with
//! `persistent_index` also gets one container per declared index and one
//! row-id index container (`{table}_RowId`). Each index container holds a
//! single metadata row at [`INDEX_METADATA_ROW_ID`] recording its kind.
//!
//! # Substrates
//!
//! | Substrate | Backing | Feature |
//! |-----------|---------|---------|
//! | [`MemorySubstrate`] | process memory | always |
//! | `SurrealKvSubstrate` | embedded `SurrealKV` tree | **`durable`** (default) |
//!
//! Both sit behind the [`Substrate`] trait, so [`Backstore::init`] and
//! [`Transaction`] behave the same on either.
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo() -> lumen_backstore::StorageResult<()> {
//! use lumen_backstore::{Backstore, Row, Schema, TableSchema, TransactionMode};
//!
//! let schema = Schema::builder("hr", 1)
//!     .table(TableSchema::new("Job").with_persistent_index(true))
//!     .build()?;
//! let store = Backstore::memory(schema);
//! store.init().await?;
//!
//! let tx = store.create_tx(TransactionMode::ReadWrite, &["Job"]).await?;
//! let id = store.next_row_id()?;
//! tx.table("Job")?
//!     .put(&[Row::new(id, serde_json::json!({"title": "Engineer"}))])
//!     .await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod backstore;
pub mod error;
pub mod index_meta;
pub mod layout;
pub mod memory;
pub mod object_store;
pub mod page;
pub mod row;
pub mod schema;
pub mod substrate;
pub mod transaction;

#[cfg(feature = "durable")]
pub mod durable;

pub use backstore::{Backstore, InitReport, init_store};
pub use error::{StorageError, StorageResult};
pub use index_meta::{INDEX_METADATA_ROW_ID, IndexMetadataRow, IndexType};
pub use layout::{ContainerRole, ContainerSet, ContainerSpec};
pub use memory::MemorySubstrate;
pub use object_store::{Layout, ObjectStore};
pub use page::{BUNDLE_EXPONENT, Page, page_id};
pub use row::{Row, RowId};
pub use schema::{IndexKind, IndexSchema, Schema, SchemaBuilder, TableSchema};
pub use substrate::{RawTransaction, StoreCatalog, Substrate, TransactionMode};
pub use transaction::{NestedTransaction, Transaction};

#[cfg(feature = "durable")]
pub use durable::SurrealKvSubstrate;
