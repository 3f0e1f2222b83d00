use crate::client::JobError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid required config; raised before any remote call.
    #[error("config error: {0}")]
    Config(String),

    /// Invalid column shape or a disallowed schema transition; raised
    /// before mutating anything remote.
    #[error(transparent)]
    Schema(#[from] bqmigrate_schema::SchemaError),

    /// A dataset/table was missing on an explicit read path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Polling exceeded the configured maximum.
    #[error("job `{job_id}` timed out after {:.1}s", .elapsed.as_secs_f64())]
    JobTimeout { job_id: String, elapsed: Duration },

    /// The job reached DONE with a populated error list.
    #[error("job `{job_id}` failed: {}", .errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    JobFailed {
        job_id: String,
        errors: Vec<JobError>,
    },

    /// A migration would leave (or left) the table without any column.
    #[error("schema has no columns: {0}")]
    EmptySchema(String),

    /// Unexpected transport failure, annotated with the failing call.
    #[error("warehouse client error: {0}")]
    Client(String),

    /// Invalid timezone or timestamp format input.
    #[error("time error: {0}")]
    Time(String),
}

impl Error {
    /// The class name reported in the structured result envelope.
    pub fn class_name(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Schema(_) => "SchemaError",
            Error::NotFound(_) => "NotFoundError",
            Error::JobTimeout { .. } => "JobTimeoutError",
            Error::JobFailed { .. } => "JobFailedError",
            Error::EmptySchema(_) => "Error",
            Error::Client(_) => "Error",
            Error::Time(_) => "ConfigError",
        }
    }
}

/// Result type for bqmigrate operations.
pub type Result<T> = std::result::Result<T, Error>;
