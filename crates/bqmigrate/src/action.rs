//! Typed action dispatch.
//!
//! Each supported action is a variant carrying its own config, validated
//! at parse time; dispatch is a pattern match. Every action produces the
//! structured result envelope consumed by the caller's output layer.

use crate::client::{TableOptions, TableRef, WarehouseClient, WriteDisposition};
use crate::error::{Error, Result};
use crate::job::JobWaiter;
use crate::migrate::{MigrateTableRequest, MigrationOrchestrator};
use crate::purge::{PurgeRequest, TablePurger};
use crate::table_data::TableData;
use bqmigrate_schema::{Column, Schema};
use serde::Deserialize;
use serde_json::{Value as Json, json};
use std::path::{Path, PathBuf};

/// The closed set of supported actions, tagged by `action` in config.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    CreateDataset {
        dataset: String,
    },
    CreateTable {
        dataset: String,
        table: String,
        columns: Vec<Column>,
        #[serde(default)]
        options: TableOptions,
    },
    DeleteTable {
        dataset: String,
        table: String,
    },
    PatchTable {
        dataset: String,
        table: String,
        #[serde(default)]
        columns: Option<Vec<Column>>,
        #[serde(default)]
        add_columns: Option<Vec<Column>>,
    },
    MigrateTable {
        dataset: String,
        table: String,
        #[serde(default)]
        columns: Option<Vec<Column>>,
        #[serde(default)]
        schema_file: Option<PathBuf>,
        #[serde(default)]
        backup_dataset: Option<String>,
        #[serde(default)]
        backup_table: Option<String>,
    },
    MigratePartitionedTable {
        dataset: String,
        table: String,
        #[serde(default)]
        columns: Option<Vec<Column>>,
        #[serde(default)]
        schema_file: Option<PathBuf>,
        #[serde(default)]
        options: TableOptions,
    },
    Insert {
        dataset: String,
        table: String,
        rows: Vec<Json>,
    },
    Preview {
        dataset: String,
        table: String,
        #[serde(default)]
        max_results: Option<usize>,
    },
    InsertSelect {
        query: String,
        destination_dataset: String,
        destination_table: String,
        #[serde(default)]
        write_disposition: Option<WriteDisposition>,
    },
    CopyTable {
        source_dataset: String,
        source_table: String,
        destination_dataset: String,
        destination_table: String,
        #[serde(default)]
        write_disposition: Option<WriteDisposition>,
    },
    PurgeTables {
        dataset: String,
        table_prefix: String,
        suffix_format: String,
        purge_before: String,
        #[serde(default)]
        timezone: Option<String>,
    },
}

/// Runs actions and wraps every outcome in the result envelope.
pub struct ActionRunner<'a, C: WarehouseClient + ?Sized> {
    client: &'a C,
    waiter: JobWaiter,
    dry_run: bool,
}

impl<'a, C: WarehouseClient + ?Sized> ActionRunner<'a, C> {
    pub fn new(client: &'a C) -> Self {
        ActionRunner {
            client,
            waiter: JobWaiter::default(),
            dry_run: false,
        }
    }

    pub fn with_waiter(mut self, waiter: JobWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run one action. Never returns `Err`: failures become a
    /// `success: false` envelope carrying the message and error class.
    pub fn run(&self, action: &Action) -> (bool, Json) {
        match self.dispatch(action) {
            Ok(mut result) => {
                if let Some(object) = result.as_object_mut() {
                    object.insert("success".to_string(), Json::Bool(true));
                }
                (true, result)
            }
            Err(e) => (
                false,
                json!({
                    "success": false,
                    "error": e.to_string(),
                    "error_class": e.class_name(),
                }),
            ),
        }
    }

    fn dispatch(&self, action: &Action) -> Result<Json> {
        match action {
            Action::CreateDataset { dataset } => {
                if !self.dry_run {
                    self.client.create_dataset(dataset)?;
                }
                Ok(json!({}))
            }
            Action::CreateTable {
                dataset,
                table,
                columns,
                options,
            } => {
                let schema = Schema::new(columns.clone())?;
                if !self.dry_run {
                    self.client
                        .create_table(&TableRef::new(dataset, table), &schema, options)?;
                }
                Ok(json!({}))
            }
            Action::DeleteTable { dataset, table } => {
                if !self.dry_run {
                    self.client.delete_table(&TableRef::new(dataset, table))?;
                }
                Ok(json!({}))
            }
            Action::PatchTable {
                dataset,
                table,
                columns,
                add_columns,
            } => {
                let report = self.orchestrator().patch_table(
                    &TableRef::new(dataset, table),
                    columns.as_deref(),
                    add_columns.as_deref(),
                )?;
                to_json(&report)
            }
            Action::MigrateTable {
                dataset,
                table,
                columns,
                schema_file,
                backup_dataset,
                backup_table,
            } => {
                let request = MigrateTableRequest {
                    table: TableRef::new(dataset, table),
                    target: load_target(columns.as_deref(), schema_file.as_deref())?,
                    backup_dataset: backup_dataset.clone(),
                    backup_table: backup_table.clone(),
                };
                let report = self.orchestrator().migrate_table(&request)?;
                to_json(&report)
            }
            Action::MigratePartitionedTable {
                dataset,
                table,
                columns,
                schema_file,
                options,
            } => {
                let request = MigrateTableRequest {
                    table: TableRef::new(dataset, table),
                    target: load_target(columns.as_deref(), schema_file.as_deref())?,
                    backup_dataset: None,
                    backup_table: None,
                };
                let report = self
                    .orchestrator()
                    .migrate_partitioned_table(&request, options)?;
                to_json(&report)
            }
            Action::Insert {
                dataset,
                table,
                rows,
            } => {
                if !self.dry_run {
                    self.client
                        .insert_rows(&TableRef::new(dataset, table), rows)?;
                }
                Ok(json!({}))
            }
            Action::Preview {
                dataset,
                table,
                max_results,
            } => self.preview(
                &TableRef::new(dataset, table),
                max_results.unwrap_or(100),
            ),
            Action::InsertSelect {
                query,
                destination_dataset,
                destination_table,
                write_disposition,
            } => {
                let dest = TableRef::new(destination_dataset, destination_table);
                let disposition = write_disposition.unwrap_or(WriteDisposition::Truncate);
                if !self.dry_run {
                    let job = self.client.run_query(query, &dest, disposition)?;
                    self.waiter.wait(self.client, &job)?;
                }
                Ok(json!({}))
            }
            Action::CopyTable {
                source_dataset,
                source_table,
                destination_dataset,
                destination_table,
                write_disposition,
            } => {
                let source = TableRef::new(source_dataset, source_table);
                let dest = TableRef::new(destination_dataset, destination_table);
                let disposition = write_disposition.unwrap_or(WriteDisposition::Truncate);
                if !self.dry_run {
                    let job = self.client.copy_table(&source, &dest, disposition)?;
                    self.waiter.wait(self.client, &job)?;
                }
                Ok(json!({}))
            }
            Action::PurgeTables {
                dataset,
                table_prefix,
                suffix_format,
                purge_before,
                timezone,
            } => {
                let report = TablePurger::new(self.client)
                    .dry_run(self.dry_run)
                    .purge_tables(&PurgeRequest {
                        dataset: dataset.clone(),
                        table_prefix: table_prefix.clone(),
                        suffix_format: suffix_format.clone(),
                        purge_before: purge_before.clone(),
                        timezone: timezone.clone(),
                    })?;
                to_json(&report)
            }
        }
    }

    fn preview(&self, table: &TableRef, max_results: usize) -> Result<Json> {
        let schema = self
            .client
            .get_table_schema(table)?
            .ok_or_else(|| Error::NotFound(format!("table {table} is not found")))?;
        let page = self.client.list_table_data(table, max_results)?;
        let columns: Vec<Json> = schema
            .flattened()
            .iter()
            .map(|(name, flat)| {
                json!({"name": name, "type": flat.field_type, "mode": flat.mode})
            })
            .collect();
        let values = TableData::new(&schema.columns, page.rows).values();
        Ok(json!({
            "total_rows": page.total_rows,
            "columns": columns,
            "values": values,
        }))
    }

    fn orchestrator(&self) -> MigrationOrchestrator<'a, C> {
        MigrationOrchestrator::new(self.client)
            .with_waiter(self.waiter.clone())
            .dry_run(self.dry_run)
    }
}

/// Target schema from inline `columns` or a JSON `schema_file`.
fn load_target(columns: Option<&[Column]>, schema_file: Option<&Path>) -> Result<Schema> {
    let columns = match (columns, schema_file) {
        (Some(columns), _) => columns.to_vec(),
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("cannot read schema file {}: {e}", path.display()))
            })?;
            serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!("cannot parse schema file {}: {e}", path.display()))
            })?
        }
        (None, None) => {
            return Err(Error::Config(
                "`columns` or `schema_file` is required".to_string(),
            ));
        }
    };
    Ok(Schema::new(columns)?)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Json> {
    serde_json::to_value(value).map_err(|e| Error::Client(format!("cannot serialize result: {e}")))
}
