//! Test fixtures for schemas and rows.

use lumen_backstore::{Row, RowId, Schema, TableSchema};
use serde_json::json;
use uuid::Uuid;

/// A schema name no other test uses, e.g. `hr_3f2a…`.
#[must_use]
pub fn unique_schema_name(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// The `Job`/`Employee` schema at version 1.
///
/// - `Job`: persistent indices, one declared index `idx_salary`.
/// - `Employee`: persistent indices, no declared indices.
///
/// Required containers: `Job`, `idx_salary`, `Job_RowId`, `Employee`,
/// `Employee_RowId`.
///
/// # Panics
///
/// Panics if `name` is empty.
#[must_use]
pub fn hr_schema(name: &str) -> Schema {
    hr_schema_at(name, 1)
}

/// [`hr_schema`] at an explicit version.
///
/// # Panics
///
/// Panics if `name` is empty or `version` is 0.
#[must_use]
pub fn hr_schema_at(name: &str, version: u32) -> Schema {
    Schema::builder(name, version)
        .table(job_table())
        .table(employee_table())
        .build()
        .unwrap_or_else(|e| panic!("hr schema: {e}"))
}

/// [`hr_schema`] plus a `Holiday` table at version 2.
///
/// # Panics
///
/// Panics if `name` is empty.
#[must_use]
pub fn hr_schema_v2(name: &str) -> Schema {
    Schema::builder(name, 2)
        .table(job_table())
        .table(employee_table())
        .table(
            TableSchema::new("Holiday")
                .with_column("name")
                .with_index("idx_holiday_name", &["name"])
                .with_persistent_index(true),
        )
        .build()
        .unwrap_or_else(|e| panic!("hr schema v2: {e}"))
}

/// A schema whose only table has two declared indices but no persistent
/// indices.
///
/// # Panics
///
/// Panics if `name` is empty.
#[must_use]
pub fn transient_index_schema(name: &str) -> Schema {
    Schema::builder(name, 1)
        .table(
            TableSchema::new("Region")
                .with_column("id")
                .with_column("name")
                .with_index("idx_region_id", &["id"])
                .with_index("idx_region_name", &["name"]),
        )
        .build()
        .unwrap_or_else(|e| panic!("transient index schema: {e}"))
}

fn job_table() -> TableSchema {
    TableSchema::new("Job")
        .with_column("title")
        .with_column("salary")
        .with_index("idx_salary", &["salary"])
        .with_persistent_index(true)
}

fn employee_table() -> TableSchema {
    TableSchema::new("Employee")
        .with_column("name")
        .with_column("job_id")
        .with_persistent_index(true)
}

/// A `Job` row.
#[must_use]
pub fn job_row(id: RowId, title: &str, salary: u64) -> Row {
    Row::new(id, json!({"title": title, "salary": salary}))
}

/// `count` `Job` rows with ids `first..first + count`.
#[must_use]
pub fn job_rows(first: RowId, count: u64) -> Vec<Row> {
    (0..count)
        .map(|i| {
            let id = first.saturating_add(i);
            job_row(id, &format!("job-{id}"), i.saturating_mul(1000))
        })
        .collect()
}
