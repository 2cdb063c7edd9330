//! Transaction coordinator.
//!
//! A [`Transaction`] spans a set of containers in one access mode. Every
//! read and write made through the [`ObjectStore`]s it hands out goes into
//! one substrate transaction, so the whole scope commits or rolls back as a
//! unit. The first failed write poisons the transaction: later writes are
//! refused and [`Transaction::commit`] discards everything.
//!
//! Nested scopes ([`Transaction::nested`]) enlist in their parent. Their
//! commit only checks that the parent is still healthy; the parent's commit
//! is the one that reaches the substrate.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::layout::{ContainerRole, ContainerSet};
use crate::object_store::{Layout, ObjectStore};
use crate::substrate::{RawTransaction, TransactionMode};

/// An atomic scope over one or more containers.
pub struct Transaction {
    raw: Box<dyn RawTransaction>,
    mode: TransactionMode,
    // `None` spans every container of the schema.
    scope: Option<BTreeSet<String>>,
    containers: Arc<ContainerSet>,
    bundled: bool,
    abort_reason: Mutex<Option<String>>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.mode)
            .field("scope", &self.scope)
            .field("bundled", &self.bundled)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// Wrap a substrate transaction.
    ///
    /// An empty `scope` spans every container in `containers`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if `scope` names a container the
    /// schema does not require.
    pub(crate) fn new(
        raw: Box<dyn RawTransaction>,
        containers: Arc<ContainerSet>,
        scope: &[&str],
        bundled: bool,
    ) -> StorageResult<Self> {
        let scope = if scope.is_empty() {
            None
        } else {
            let mut names = BTreeSet::new();
            for name in scope {
                if containers.role(name).is_none() {
                    return Err(StorageError::NotFound(format!("container '{name}'")));
                }
                names.insert((*name).to_owned());
            }
            Some(names)
        };
        let mode = raw.mode();
        debug!(%mode, scope = ?scope, "began transaction");
        Ok(Self {
            raw,
            mode,
            scope,
            containers,
            bundled,
            abort_reason: Mutex::new(None),
        })
    }

    /// Access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Open a container inside this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the container is not required
    /// by the schema or lies outside this transaction's scope.
    pub fn table(&self, name: &str) -> StorageResult<ObjectStore<'_>> {
        if let Some(scope) = &self.scope
            && !scope.contains(name)
        {
            return Err(StorageError::NotFound(format!(
                "container '{name}' is outside the transaction scope"
            )));
        }
        let role = self
            .containers
            .role(name)
            .ok_or_else(|| StorageError::NotFound(format!("container '{name}'")))?;
        let layout = match role {
            ContainerRole::Table if self.bundled => Layout::Bundled,
            ContainerRole::Table | ContainerRole::Index(_) => Layout::Flat,
        };
        Ok(ObjectStore::new(self, name, role, layout))
    }

    /// Open a scope that enlists in this transaction.
    #[must_use]
    pub fn nested(&self) -> NestedTransaction<'_> {
        NestedTransaction { outer: self }
    }

    /// Whether a failed write has poisoned this transaction.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort_reason.lock().map(|r| r.is_some()).unwrap_or(true)
    }

    pub(crate) fn raw(&self) -> &dyn RawTransaction {
        self.raw.as_ref()
    }

    /// Refuse writes once the transaction is poisoned or read-only.
    pub(crate) fn check_writable(&self, container: &str) -> StorageResult<()> {
        if let Some(reason) = self.abort_reason() {
            return Err(StorageError::TransactionAbort(reason));
        }
        if self.mode == TransactionMode::ReadOnly {
            return Err(self.poison(StorageError::ReadOnly(format!(
                "cannot write to '{container}'"
            ))));
        }
        Ok(())
    }

    /// Record a failed write and return the abort error for the caller.
    pub(crate) fn poison(&self, err: StorageError) -> StorageError {
        let reason = err.to_string();
        warn!(error = %reason, "write failed, transaction will abort");
        if let Ok(mut slot) = self.abort_reason.lock()
            && slot.is_none()
        {
            *slot = Some(reason.clone());
        }
        StorageError::TransactionAbort(reason)
    }

    fn abort_reason(&self) -> Option<String> {
        match self.abort_reason.lock() {
            Ok(reason) => reason.clone(),
            Err(e) => Some(e.to_string()),
        }
    }

    /// Commit every write of this scope at once.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TransactionAbort`] if a write failed earlier
    /// or the substrate could not commit. Nothing is applied in either case.
    pub async fn commit(self) -> StorageResult<()> {
        if let Some(reason) = self.abort_reason() {
            self.raw.abort().await?;
            return Err(StorageError::TransactionAbort(reason));
        }
        let mode = self.mode;
        self.raw.commit().await.map_err(|e| {
            warn!(error = %e, "commit failed");
            StorageError::TransactionAbort(e.to_string())
        })?;
        debug!(%mode, "committed transaction");
        Ok(())
    }

    /// Discard every write of this scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate fails to release the transaction.
    pub async fn abort(self) -> StorageResult<()> {
        self.raw.abort().await
    }
}

/// A scope enlisted in a parent [`Transaction`].
#[derive(Debug)]
pub struct NestedTransaction<'a> {
    outer: &'a Transaction,
}

impl<'a> NestedTransaction<'a> {
    /// Open a container through the parent transaction.
    ///
    /// # Errors
    ///
    /// See [`Transaction::table`].
    pub fn table(&self, name: &str) -> StorageResult<ObjectStore<'a>> {
        self.outer.table(name)
    }

    /// Hand this scope's writes to the parent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TransactionAbort`] if the parent is poisoned.
    pub fn commit(self) -> StorageResult<()> {
        match self.outer.abort_reason() {
            Some(reason) => Err(StorageError::TransactionAbort(reason)),
            None => Ok(()),
        }
    }

    /// Abort this scope, which poisons the parent.
    pub fn abort(self, reason: &str) {
        self.outer
            .poison(StorageError::TransactionAbort(reason.to_owned()));
    }
}
