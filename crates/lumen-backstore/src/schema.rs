//! Table and index declarations consumed by the store.
//!
//! The store only reads a schema: table names, the `persistent_index` flag,
//! the declared indices with their normalized names and kinds, and the
//! derived row-id index name. [`SchemaBuilder::build`] checks that every
//! container name the schema implies is unique, which the initializer
//! relies on.

use std::collections::BTreeSet;

use crate::error::{StorageError, StorageResult};

/// Suffix appended to a table name to form its row-id index name.
pub const ROW_ID_INDEX_SUFFIX: &str = "_RowId";

/// Kind of an index as declared by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Ordered index over columns.
    BTree,
    /// The implicit index over row ids.
    RowId,
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    name: String,
    normalized_name: String,
    columns: Vec<String>,
    kind: IndexKind,
}

impl IndexSchema {
    /// The declared index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema-unique name, also used as the container name.
    #[must_use]
    pub fn normalized_name(&self) -> &str {
        &self.normalized_name
    }

    /// Indexed columns, in key order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The index kind.
    #[must_use]
    pub fn kind(&self) -> IndexKind {
        self.kind
    }
}

/// A declared table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    columns: Vec<String>,
    indices: Vec<IndexSchema>,
    persistent_index: bool,
}

impl TableSchema {
    /// Start declaring a table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
            persistent_index: false,
        }
    }

    /// Add a column.
    #[must_use]
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    /// Add a B-tree index over `columns`.
    ///
    /// `name` is used as the normalized name and must be unique across the
    /// whole schema.
    #[must_use]
    pub fn with_index(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        let name = name.into();
        self.indices.push(IndexSchema {
            normalized_name: name.clone(),
            name,
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            kind: IndexKind::BTree,
        });
        self
    }

    /// Mirror this table's indices into their own containers.
    #[must_use]
    pub fn with_persistent_index(mut self, enabled: bool) -> Self {
        self.persistent_index = enabled;
        self
    }

    /// The table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared columns.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Declared indices, in declaration order.
    #[must_use]
    pub fn indices(&self) -> &[IndexSchema] {
        &self.indices
    }

    /// Whether indices of this table are persisted.
    #[must_use]
    pub fn persistent_index(&self) -> bool {
        self.persistent_index
    }

    /// Name of the implicit row-id index.
    #[must_use]
    pub fn row_id_index_name(&self) -> String {
        format!("{}{ROW_ID_INDEX_SUFFIX}", self.name)
    }
}

/// A validated database schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    version: u32,
    tables: Vec<TableSchema>,
}

impl Schema {
    /// Start building a schema.
    #[must_use]
    pub fn builder(name: impl Into<String>, version: u32) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            version,
            tables: Vec::new(),
        }
    }

    /// The schema name. Durable stores are opened under this name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// All tables, in declaration order.
    #[must_use]
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Look up a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    version: u32,
    tables: Vec<TableSchema>,
}

impl SchemaBuilder {
    /// Add a table.
    #[must_use]
    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.push(table);
        self
    }

    /// Validate and build the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Schema`] if the schema name is not a single
    /// path component, the version is zero, or a container name is empty,
    /// contains a null byte or is used twice.
    pub fn build(self) -> StorageResult<Schema> {
        validate_store_name(&self.name)?;
        if self.version == 0 {
            return Err(StorageError::Schema("schema version must be at least 1".into()));
        }

        let mut seen = BTreeSet::new();
        for table in &self.tables {
            let mut names = vec![table.name.clone()];
            names.extend(table.indices.iter().map(|i| i.normalized_name.clone()));
            names.push(table.row_id_index_name());
            for name in names {
                validate_name(&name)?;
                if !seen.insert(name.clone()) {
                    return Err(StorageError::Schema(format!(
                        "container name '{name}' is used more than once"
                    )));
                }
            }
        }

        Ok(Schema {
            name: self.name,
            version: self.version,
            tables: self.tables,
        })
    }
}

fn validate_name(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::Schema("name must not be empty".into()));
    }
    if name.contains('\0') {
        return Err(StorageError::Schema(format!(
            "name {name:?} must not contain null bytes"
        )));
    }
    Ok(())
}

/// The schema name doubles as the durable store's directory name.
fn validate_store_name(name: &str) -> StorageResult<()> {
    validate_name(name)?;
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(StorageError::Schema(format!(
            "schema name {name:?} must be a single path component"
        )));
    }
    Ok(())
}
