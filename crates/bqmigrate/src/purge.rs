//! Deletes date-suffixed tables older than a cutoff.

use crate::client::{TableRef, WarehouseClient};
use crate::error::Result;
use crate::time_zone::{format_with_zone, strptime_with_zone};
use serde::Serialize;
use std::thread;
use std::time::Duration;

/// Selection criteria for a purge run.
#[derive(Debug, Clone)]
pub struct PurgeRequest {
    pub dataset: String,
    /// Fixed table-name prefix; the remainder is the timestamp suffix.
    pub table_prefix: String,
    /// strftime-style format the suffix must match exactly.
    pub suffix_format: String,
    /// Inclusive cutoff, in `suffix_format`.
    pub purge_before: String,
    /// Defaults to UTC when unset.
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PurgeReport {
    pub delete_tables: Vec<String>,
}

/// Selects stale tables by parsed timestamp suffix and deletes them.
///
/// The delete loop is serial with a pause between calls to stay under the
/// warehouse's request-rate limits.
pub struct TablePurger<'a, C: WarehouseClient + ?Sized> {
    client: &'a C,
    delete_delay: Duration,
    dry_run: bool,
}

impl<'a, C: WarehouseClient + ?Sized> TablePurger<'a, C> {
    pub fn new(client: &'a C) -> Self {
        TablePurger {
            client,
            delete_delay: Duration::from_secs(1),
            dry_run: false,
        }
    }

    pub fn with_delete_delay(mut self, delay: Duration) -> Self {
        self.delete_delay = delay;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn purge_tables(&self, request: &PurgeRequest) -> Result<PurgeReport> {
        let span = tracing::debug_span!(
            "purge_tables",
            dataset = %request.dataset,
            table_prefix = %request.table_prefix,
        );
        let _guard = span.enter();

        let timezone = request.timezone.as_deref().unwrap_or("UTC");
        let cutoff = strptime_with_zone(&request.purge_before, &request.suffix_format, timezone)?;

        let tables = self.client.list_tables(&request.dataset)?;
        let mut delete_tables = Vec::new();
        for table in tables {
            let Some(suffix) = table.strip_prefix(&request.table_prefix) else {
                continue;
            };
            let Ok(parsed) = strptime_with_zone(suffix, &request.suffix_format, timezone) else {
                continue;
            };
            // a parse that does not round-trip matched a different format
            if format_with_zone(&parsed, &request.suffix_format)? != suffix {
                continue;
            }
            if parsed <= cutoff {
                delete_tables.push(table);
            }
        }

        tracing::info!(
            count = delete_tables.len(),
            dry_run = self.dry_run,
            "purging stale tables"
        );
        if !self.dry_run {
            for (i, table) in delete_tables.iter().enumerate() {
                self.client
                    .delete_table(&TableRef::new(&request.dataset, table))?;
                if i + 1 < delete_tables.len() {
                    thread::sleep(self.delete_delay);
                }
            }
        }
        Ok(PurgeReport { delete_tables })
    }
}
