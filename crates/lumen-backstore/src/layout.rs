//! Physical container set derived from a schema.
//!
//! For each table: one container named after the table. For each table with
//! `persistent_index`: one container per declared index (by normalized name)
//! and one for the row-id index.

use std::collections::BTreeMap;

use crate::index_meta::IndexType;
use crate::schema::{IndexKind, Schema};

/// What a container holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRole {
    /// Rows of a user table.
    Table,
    /// A persisted index of the given kind.
    Index(IndexType),
}

/// One container the schema requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// What it holds.
    pub role: ContainerRole,
}

/// The complete, ordered container set for a schema.
#[derive(Debug, Clone, Default)]
pub struct ContainerSet {
    specs: Vec<ContainerSpec>,
    by_name: BTreeMap<String, ContainerRole>,
}

impl ContainerSet {
    /// Derive the required containers for `schema`.
    #[must_use]
    pub fn derive(schema: &Schema) -> Self {
        let mut specs = Vec::new();
        for table in schema.tables() {
            specs.push(ContainerSpec {
                name: table.name().to_owned(),
                role: ContainerRole::Table,
            });
            if !table.persistent_index() {
                continue;
            }
            for index in table.indices() {
                specs.push(ContainerSpec {
                    name: index.normalized_name().to_owned(),
                    role: ContainerRole::Index(IndexType::expected_for(index.kind())),
                });
            }
            specs.push(ContainerSpec {
                name: table.row_id_index_name(),
                role: ContainerRole::Index(IndexType::expected_for(IndexKind::RowId)),
            });
        }

        let by_name = specs.iter().map(|s| (s.name.clone(), s.role)).collect();
        Self { specs, by_name }
    }

    /// All required containers, tables first within each table group.
    #[must_use]
    pub fn specs(&self) -> &[ContainerSpec] {
        &self.specs
    }

    /// Role of a container, if the schema requires it.
    #[must_use]
    pub fn role(&self, name: &str) -> Option<ContainerRole> {
        self.by_name.get(name).copied()
    }

    /// Names of all required containers.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Persisted-index containers with their expected kind.
    pub fn indices(&self) -> impl Iterator<Item = (&str, IndexType)> {
        self.specs.iter().filter_map(|s| match s.role {
            ContainerRole::Index(t) => Some((s.name.as_str(), t)),
            ContainerRole::Table => None,
        })
    }

    /// Table containers.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.specs
            .iter()
            .filter(|s| s.role == ContainerRole::Table)
            .map(|s| s.name.as_str())
    }

    /// Number of required containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the schema requires no containers at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    #[test]
    fn test_derive_persistent_and_plain_tables() {
        let schema = Schema::builder("hr", 1)
            .table(
                TableSchema::new("Job")
                    .with_index("idx_salary", &["maxSalary"])
                    .with_persistent_index(true),
            )
            .table(TableSchema::new("Employee").with_persistent_index(true))
            .table(
                TableSchema::new("Region")
                    .with_index("idx_region_a", &["a"])
                    .with_index("idx_region_b", &["b"]),
            )
            .build()
            .unwrap();

        let set = ContainerSet::derive(&schema);
        let names: Vec<&str> = set.names().collect();
        assert_eq!(
            names,
            [
                "Job",
                "idx_salary",
                "Job_RowId",
                "Employee",
                "Employee_RowId",
                "Region"
            ]
        );
        assert_eq!(set.role("idx_salary"), Some(ContainerRole::Index(IndexType::BTree)));
        assert_eq!(set.role("Job_RowId"), Some(ContainerRole::Index(IndexType::RowId)));
        assert_eq!(set.role("Region"), Some(ContainerRole::Table));
        assert_eq!(set.role("idx_region_a"), None);
        assert_eq!(set.tables().count(), 3);
        assert_eq!(set.indices().count(), 3);
    }

    #[test]
    fn test_empty_schema() {
        let schema = Schema::builder("empty", 1).build().unwrap();
        assert!(ContainerSet::derive(&schema).is_empty());
    }
}
