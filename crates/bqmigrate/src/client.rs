//! The seam between the migration engine and the warehouse API.
//!
//! Wire-level HTTP, auth, and credential resolution live behind
//! [`WarehouseClient`]; the engine only sees schemas, jobs, and rows. Every
//! call blocks until response or error — the core is synchronous by design.

use crate::error::Result;
use crate::table_data::Row;
use bqmigrate_schema::Schema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dataset-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        TableRef {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Policy controlling whether a job's output overwrites or appends to its
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteDisposition {
    #[serde(rename = "WRITE_TRUNCATE")]
    Truncate,
    #[serde(rename = "WRITE_APPEND")]
    Append,
    #[serde(rename = "WRITE_EMPTY")]
    Empty,
}

/// Table creation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_partitioning: Option<TimePartitioning>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clustering_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePartitioning {
    #[serde(rename = "type")]
    pub partition_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_ms: Option<i64>,
}

impl TimePartitioning {
    pub fn day() -> Self {
        TimePartitioning {
            partition_type: "DAY".to_string(),
            expiration_ms: None,
        }
    }
}

/// Handle to an asynchronous warehouse operation, tracked by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Done,
}

/// One entry of a job's error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub message: String,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{reason}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Point-in-time status of a job. A populated `errors` list on a DONE job
/// means the job failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub errors: Vec<JobError>,
}

impl JobStatus {
    pub fn done() -> Self {
        JobStatus {
            state: JobState::Done,
            errors: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }
}

/// One page of raw table data.
#[derive(Debug, Clone, Default)]
pub struct TableDataPage {
    pub total_rows: u64,
    pub rows: Vec<Row>,
}

/// Synchronous warehouse API surface consumed by the engine.
///
/// Implementations own retries at the transport level and the idempotency
/// contract: "already exists" on create calls and "not found" on delete
/// calls are swallowed and reported as success. A missing table on
/// [`get_table_schema`](Self::get_table_schema) is `Ok(None)`, not an error.
pub trait WarehouseClient {
    /// Current schema of the table, or `None` if the table does not exist.
    fn get_table_schema(&self, table: &TableRef) -> Result<Option<Schema>>;

    fn create_dataset(&self, dataset: &str) -> Result<()>;

    fn create_table(&self, table: &TableRef, schema: &Schema, options: &TableOptions)
    -> Result<()>;

    fn patch_table(&self, table: &TableRef, schema: &Schema) -> Result<()>;

    fn delete_table(&self, table: &TableRef) -> Result<()>;

    fn copy_table(
        &self,
        source: &TableRef,
        dest: &TableRef,
        disposition: WriteDisposition,
    ) -> Result<Job>;

    /// Run `query` as a destructive query job writing into `dest`.
    fn run_query(&self, query: &str, dest: &TableRef, disposition: WriteDisposition)
    -> Result<Job>;

    fn get_job(&self, job_id: &str) -> Result<JobStatus>;

    fn list_tables(&self, dataset: &str) -> Result<Vec<String>>;

    fn list_table_data(&self, table: &TableRef, max_results: usize) -> Result<TableDataPage>;

    /// Streaming-insert JSON rows.
    fn insert_rows(&self, table: &TableRef, rows: &[serde_json::Value]) -> Result<()>;
}
