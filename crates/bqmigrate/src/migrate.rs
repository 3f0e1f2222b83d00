//! Per-table migration state machine.
//!
//! Given the live schema and a target schema, decides between CREATE,
//! PATCH, and DROP_REWRITE and sequences the warehouse calls for each.
//! Nothing here retries or rolls back: a failure mid-rewrite leaves the
//! table patched and backed up for manual recovery, and the error
//! propagates to the caller.

use crate::client::{TableOptions, TableRef, TimePartitioning, WarehouseClient, WriteDisposition};
use crate::diff::{
    build_query_fields, diff_columns, diff_columns_by_name, reverse_merge,
    validate_permitted_operations,
};
use crate::error::{Error, Result};
use crate::job::JobWaiter;
use bqmigrate_schema::{Column, Schema, make_nullable, validate_columns};
use serde::Serialize;

/// What a migration decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationKind {
    Create,
    Patch,
    DropRewrite,
    Noop,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub kind: MigrationKind,
    pub before_columns: Vec<Column>,
    pub after_columns: Vec<Column>,
}

#[derive(Debug, Clone)]
pub struct MigrateTableRequest {
    pub table: TableRef,
    pub target: Schema,
    /// Defaults to the live table's dataset.
    pub backup_dataset: Option<String>,
    /// No backup copy is taken when unset.
    pub backup_table: Option<String>,
}

/// Sequences schema migrations against one table at a time.
///
/// Runs against the same table must be externally serialized; a second
/// rewrite can race the first's. In dry-run mode every mutating call is
/// skipped while decisions and validation still run.
pub struct MigrationOrchestrator<'a, C: WarehouseClient + ?Sized> {
    client: &'a C,
    waiter: JobWaiter,
    dry_run: bool,
}

impl<'a, C: WarehouseClient + ?Sized> MigrationOrchestrator<'a, C> {
    pub fn new(client: &'a C) -> Self {
        MigrationOrchestrator {
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

    /// Bring `table` to the target schema: create it when absent, patch
    /// when only adding, rewrite when columns must go away.
    pub fn migrate_table(&self, request: &MigrateTableRequest) -> Result<MigrationReport> {
        let span = tracing::debug_span!("migrate_table", table = %request.table);
        let _guard = span.enter();

        let (kind, before_columns) = match self.client.get_table_schema(&request.table)? {
            None => {
                tracing::info!(table = %request.table, "table absent, creating");
                if !self.dry_run {
                    self.client.create_table(
                        &request.table,
                        &request.target,
                        &TableOptions::default(),
                    )?;
                }
                (MigrationKind::Create, Vec::new())
            }
            Some(before) => {
                let add = diff_columns(&before.columns, &request.target.columns);
                let drop = diff_columns(&request.target.columns, &before.columns);
                // drop always takes precedence over pure add
                if !drop.is_empty() {
                    self.drop_rewrite(request, &before)?;
                    (MigrationKind::DropRewrite, before.columns)
                } else if !add.is_empty() {
                    let patched = reverse_merge(&before.columns, &add);
                    validate_permitted_operations(&before.columns, &patched)?;
                    tracing::info!(table = %request.table, added = add.len(), "patching table");
                    if !self.dry_run {
                        self.client
                            .patch_table(&request.table, &Schema::new(patched)?)?;
                    }
                    (MigrationKind::Patch, before.columns)
                } else {
                    (MigrationKind::Noop, before.columns)
                }
            }
        };

        self.finish(&request.table, kind, before_columns)
    }

    /// Partitioned variant: never issues a rewrite query, since a rewrite
    /// would scan every partition. Dropped columns are demoted to NULLABLE
    /// and merged with the additions into a single patch; readers
    /// null-coalesce instead.
    pub fn migrate_partitioned_table(
        &self,
        request: &MigrateTableRequest,
        options: &TableOptions,
    ) -> Result<MigrationReport> {
        let span = tracing::debug_span!("migrate_partitioned_table", table = %request.table);
        let _guard = span.enter();

        let mut options = options.clone();
        if options.time_partitioning.is_none() {
            options.time_partitioning = Some(TimePartitioning::day());
        }

        let (kind, before_columns) = match self.client.get_table_schema(&request.table)? {
            None => {
                tracing::info!(table = %request.table, "table absent, creating partitioned");
                if !self.dry_run {
                    self.client
                        .create_table(&request.table, &request.target, &options)?;
                }
                (MigrationKind::Create, Vec::new())
            }
            Some(before) => {
                let add = diff_columns(&before.columns, &request.target.columns);
                let drop = diff_columns(&request.target.columns, &before.columns);
                if add.is_empty() && drop.is_empty() {
                    (MigrationKind::Noop, before.columns)
                } else {
                    let nullable_drop = make_nullable(&drop);
                    let merged = reverse_merge(&request.target.columns, &nullable_drop);
                    let patched = reverse_merge(&merged, &add);
                    validate_permitted_operations(&before.columns, &patched)?;
                    tracing::info!(
                        table = %request.table,
                        added = add.len(),
                        demoted = drop.len(),
                        "patching partitioned table"
                    );
                    if !self.dry_run {
                        self.client
                            .patch_table(&request.table, &Schema::new(patched)?)?;
                    }
                    (MigrationKind::Patch, before.columns)
                }
            }
        };

        self.finish(&request.table, kind, before_columns)
    }

    /// Patch `table` to `columns`, or to `reverseMerge(before, add_columns)`
    /// when only additions are given.
    pub fn patch_table(
        &self,
        table: &TableRef,
        columns: Option<&[Column]>,
        add_columns: Option<&[Column]>,
    ) -> Result<MigrationReport> {
        let before = self.get_columns(table)?;
        let patched = match (columns, add_columns) {
            (Some(columns), _) => Schema::new(columns.to_vec())?.columns,
            (None, Some(add)) => {
                // keep unset modes unset here so the merge can inherit
                // them from the live schema
                validate_columns(add)?;
                reverse_merge(&before, add)
            }
            (None, None) => {
                return Err(Error::Config(
                    "patch_table: `columns` or `add_columns` is required".to_string(),
                ));
            }
        };
        validate_permitted_operations(&before, &patched)?;
        tracing::info!(table = %table, "patching table");
        if !self.dry_run {
            self.client.patch_table(table, &Schema::new(patched)?)?;
        }
        let after = self.get_columns(table)?;
        Ok(MigrationReport {
            kind: MigrationKind::Patch,
            before_columns: before,
            after_columns: after,
        })
    }

    /// Backup, patch new columns on, then overwrite the table with a query
    /// that selects only the target's leaves.
    ///
    /// The patch must land before the rewrite: new columns are selected
    /// bare by the query and have to exist on the live table already.
    fn drop_rewrite(&self, request: &MigrateTableRequest, before: &Schema) -> Result<()> {
        let target = &request.target;
        if target.is_empty() && !self.dry_run {
            return Err(Error::EmptySchema(format!(
                "no column would remain on {}",
                request.table
            )));
        }
        validate_permitted_operations(&before.columns, &target.columns)?;

        let backup_dataset = request
            .backup_dataset
            .as_deref()
            .unwrap_or(&request.table.dataset);
        if backup_dataset != request.table.dataset && !self.dry_run {
            self.client.create_dataset(backup_dataset)?;
        }
        if let Some(backup_table) = &request.backup_table {
            let backup = TableRef::new(backup_dataset, backup_table);
            tracing::info!(
                table = %request.table,
                backup = %backup,
                "backing up before rewrite"
            );
            if !self.dry_run {
                let job =
                    self.client
                        .copy_table(&request.table, &backup, WriteDisposition::Truncate)?;
                self.waiter.wait(self.client, &job)?;
            }
        }

        let new_by_name = diff_columns_by_name(&before.columns, &target.columns);
        if !new_by_name.is_empty() {
            let patched = reverse_merge(&before.columns, &new_by_name);
            validate_permitted_operations(&before.columns, &patched)?;
            if !self.dry_run {
                self.client
                    .patch_table(&request.table, &Schema::new(patched)?)?;
            }
        }

        let fields = build_query_fields(&before.columns, &target.columns);
        let query = format!("SELECT {} FROM [{}]", fields.join(","), request.table);
        tracing::info!(table = %request.table, query = %query, "rewriting table");
        if !self.dry_run {
            let job =
                self.client
                    .run_query(&query, &request.table, WriteDisposition::Truncate)?;
            self.waiter.wait(self.client, &job)?;
        }
        Ok(())
    }

    fn finish(
        &self,
        table: &TableRef,
        kind: MigrationKind,
        before_columns: Vec<Column>,
    ) -> Result<MigrationReport> {
        let after_columns = self.get_columns(table)?;
        if after_columns.is_empty() && !self.dry_run {
            return Err(Error::EmptySchema(format!(
                "table {table} has no columns after migration"
            )));
        }
        Ok(MigrationReport {
            kind,
            before_columns,
            after_columns,
        })
    }

    fn get_columns(&self, table: &TableRef) -> Result<Vec<Column>> {
        Ok(self
            .client
            .get_table_schema(table)?
            .map(|schema| schema.columns)
            .unwrap_or_default())
    }
}
