//! Blocking poll loop for asynchronous warehouse jobs.

use crate::client::{Job, JobStatus, WarehouseClient};
use crate::error::{Error, Result};
use std::thread;
use std::time::{Duration, Instant};

/// Polls a job to completion or timeout.
///
/// Transport errors from `get_job` propagate immediately, no retry.
/// Cancellation is cooperative only: the loop can be stopped between polls
/// by the process, never mid-sleep.
#[derive(Debug, Clone)]
pub struct JobWaiter {
    pub poll_interval: Duration,
    pub max_polling_time: Duration,
}

impl Default for JobWaiter {
    fn default() -> Self {
        JobWaiter {
            poll_interval: Duration::from_secs(5),
            max_polling_time: Duration::from_secs(3600),
        }
    }
}

impl JobWaiter {
    pub fn new(poll_interval: Duration, max_polling_time: Duration) -> Self {
        JobWaiter {
            poll_interval,
            max_polling_time,
        }
    }

    /// Block until `job` reaches DONE, then surface its error list if any.
    pub fn wait<C: WarehouseClient + ?Sized>(&self, client: &C, job: &Job) -> Result<JobStatus> {
        let span = tracing::debug_span!("wait_job", job_id = %job.id);
        let _guard = span.enter();

        let started = Instant::now();
        loop {
            let status = client.get_job(&job.id)?;
            let elapsed = started.elapsed();
            if status.is_done() {
                tracing::info!(
                    job_id = %job.id,
                    elapsed_s = elapsed.as_secs_f64(),
                    "job completed"
                );
                if !status.errors.is_empty() {
                    return Err(Error::JobFailed {
                        job_id: job.id.clone(),
                        errors: status.errors,
                    });
                }
                return Ok(status);
            }
            if elapsed > self.max_polling_time {
                return Err(Error::JobTimeout {
                    job_id: job.id.clone(),
                    elapsed,
                });
            }
            tracing::debug!(
                job_id = %job.id,
                state = ?status.state,
                elapsed_s = elapsed.as_secs_f64(),
                "job still running"
            );
            thread::sleep(self.poll_interval);
        }
    }
}
