//! Resolution of asynchronous management jobs.
//!
//! Methods that classify as job-pending hand back a job reference
//! instead of a final outcome. The waiter polls that job until it
//! settles or the timeout passes; a timed-out job surfaces through the
//! same failure path as any other classified failure.

use std::time::{Duration, Instant};

use crate::error::{Error, JobState, Result};
use crate::wmi::{WbemClassObjectExt, WmiSession, VIRTUALIZATION_NAMESPACE};

/// Default polling interval for job status.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default job timeout for device-assignment operations.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for job waiting.
#[derive(Debug, Clone)]
pub struct JobWaitConfig {
    /// Maximum time to wait for job completion.
    pub timeout: Duration,
    /// Polling interval for job status.
    pub poll_interval: Duration,
}

impl Default for JobWaitConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_JOB_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl JobWaitConfig {
    /// Create a configuration with the given timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Set the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Polls an asynchronous job until it settles.
pub struct JobWaiter<'a> {
    session: &'a WmiSession,
    config: JobWaitConfig,
}

impl<'a> JobWaiter<'a> {
    /// Create a waiter with default configuration.
    pub fn new(session: &'a WmiSession) -> Self {
        Self {
            session,
            config: JobWaitConfig::default(),
        }
    }

    /// Create a waiter with custom configuration.
    pub fn with_config(session: &'a WmiSession, config: JobWaitConfig) -> Self {
        Self { session, config }
    }

    /// Block until the job completes, fails, or times out.
    pub fn wait_for_job(&self, job_path: &str, operation: &'static str) -> Result<()> {
        let start = Instant::now();
        let mut last_state = JobState::Unknown;

        loop {
            if start.elapsed() > self.config.timeout {
                return Err(Error::JobTimeout {
                    operation,
                    job_path: job_path.to_string(),
                    timeout: self.config.timeout,
                    last_state,
                });
            }

            let job = self
                .session
                .get_object(VIRTUALIZATION_NAMESPACE, job_path)?;
            let state = JobState::from(job.get_u16("JobState")?.unwrap_or(0));

            if state.is_completed() {
                return Ok(());
            }
            if state.is_failed() {
                return Err(Error::JobFailed {
                    operation,
                    error_code: job.get_u32("ErrorCode")?.unwrap_or(0),
                    description: job
                        .get_string_prop("ErrorDescription")?
                        .unwrap_or_else(|| "Unknown error".to_string()),
                    job_state: state,
                });
            }

            last_state = state;
            std::thread::sleep(self.config.poll_interval);
        }
    }
}
