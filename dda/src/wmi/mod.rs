//! WMI transport: session, property access, and job resolution.

mod connection;
mod job;
mod variant;

pub use connection::{
    Credentials, SessionConfig, WbemClassObjectExt, WmiSession, CIMV2_NAMESPACE,
    VIRTUALIZATION_NAMESPACE,
};
pub use job::{JobWaitConfig, JobWaiter, DEFAULT_JOB_TIMEOUT, DEFAULT_POLL_INTERVAL};
