//! Schema migration engine for a columnar warehouse.
//!
//! This crate provides:
//! - Schema diffing and merging with permitted-transition validation
//! - A per-table migration state machine (create / patch / drop-rewrite)
//! - Nested-row denormalization for table previews
//! - A blocking poller for asynchronous warehouse jobs
//! - Purging of date-suffixed tables past a retention cutoff
//!
//! The engine is entirely synchronous and single-threaded. Every warehouse
//! call goes through the [`WarehouseClient`] trait; wire-level HTTP, auth,
//! and credential handling live in the implementation behind it.
//!
//! The typical entrypoint is [`ActionRunner`], which dispatches a typed
//! [`Action`] and wraps the outcome in a structured result envelope:
//!
//! ```ignore
//! let runner = ActionRunner::new(&client).dry_run(false);
//! let (success, result) = runner.run(&action);
//! ```
//!
//! Finer-grained control is available one level down via
//! [`MigrationOrchestrator`], [`TablePurger`], and [`JobWaiter`].

pub mod action;
pub mod client;
pub mod diff;
pub mod error;
pub mod job;
pub mod migrate;
pub mod purge;
pub mod table_data;
pub mod time_zone;

pub use action::{Action, ActionRunner};
pub use client::{
    Job, JobError, JobState, JobStatus, TableDataPage, TableOptions, TableRef, TimePartitioning,
    WarehouseClient, WriteDisposition,
};
pub use error::{Error, Result};
pub use job::JobWaiter;
pub use migrate::{MigrateTableRequest, MigrationKind, MigrationOrchestrator, MigrationReport};
pub use purge::{PurgeReport, PurgeRequest, TablePurger};
pub use table_data::{Cell, FlatRow, Row, TableData, Value};

pub use bqmigrate_schema::{Column, FieldMode, FieldType, Schema, SchemaError};
