//! Error types for device-assignment operations.

use std::time::Duration;

use thiserror::Error;

use crate::classify::ReturnCode;
use crate::device::DeviceId;

/// State of an asynchronous management job (CIM_ConcreteJob.JobState).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum JobState {
    /// Job is queued.
    New = 2,
    /// Job is starting.
    Starting = 3,
    /// Job is running.
    Running = 4,
    /// Job is suspended.
    Suspended = 5,
    /// Job is shutting down.
    ShuttingDown = 6,
    /// Job completed successfully.
    Completed = 7,
    /// Job was terminated.
    Terminated = 8,
    /// Job was killed.
    Killed = 9,
    /// Job failed with exception.
    Exception = 10,
    /// Job is in service mode.
    Service = 11,
    /// Unknown state.
    Unknown = 0,
}

impl From<u16> for JobState {
    fn from(value: u16) -> Self {
        match value {
            2 => JobState::New,
            3 => JobState::Starting,
            4 => JobState::Running,
            5 => JobState::Suspended,
            6 => JobState::ShuttingDown,
            7 => JobState::Completed,
            8 => JobState::Terminated,
            9 => JobState::Killed,
            10 => JobState::Exception,
            11 => JobState::Service,
            _ => JobState::Unknown,
        }
    }
}

impl JobState {
    /// Check if the job is still making progress.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            JobState::New
                | JobState::Starting
                | JobState::Running
                | JobState::Suspended
                | JobState::ShuttingDown
        )
    }

    /// Check if the job completed successfully.
    pub fn is_completed(&self) -> bool {
        *self == JobState::Completed
    }

    /// Check if the job ended in failure.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            JobState::Terminated | JobState::Killed | JobState::Exception
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::New => "New",
            JobState::Starting => "Starting",
            JobState::Running => "Running",
            JobState::Suspended => "Suspended",
            JobState::ShuttingDown => "ShuttingDown",
            JobState::Completed => "Completed",
            JobState::Terminated => "Terminated",
            JobState::Killed => "Killed",
            JobState::Exception => "Exception",
            JobState::Service => "Service",
            JobState::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Device-assignment errors with typed context.
#[derive(Error, Debug)]
pub enum Error {
    /// The management endpoint could not be reached.
    #[error("failed to reach '{machine}': {message}")]
    Connection { machine: String, message: String },

    /// The management endpoint rejected the supplied credentials.
    #[error("authentication rejected for '{username}' on '{machine}': {message}")]
    AuthenticationRejected {
        machine: String,
        username: String,
        message: String,
    },

    /// A management query failed at the transport layer.
    #[cfg(windows)]
    #[error("WMI query failed: {query}: {source}")]
    Query {
        query: String,
        #[source]
        source: windows::core::Error,
    },

    /// A management method invocation failed at the transport layer.
    #[cfg(windows)]
    #[error("WMI method {class}.{method} failed: {source}")]
    Method {
        class: String,
        method: String,
        #[source]
        source: windows::core::Error,
    },

    /// A required management service class has no instance on the host.
    #[error("management service '{0}' is not running on the host")]
    ServiceUnavailable(&'static str),

    /// Enabling or disabling a host-visible device failed.
    #[error("could not set host device '{device}' enabled={enabled}: {code}")]
    DeviceToggle {
        device: DeviceId,
        enabled: bool,
        code: ReturnCode,
    },

    /// Moving a device across the host/pool boundary failed.
    #[error("{operation} failed for device '{device}': {code}")]
    Reparent {
        device: DeviceId,
        operation: &'static str,
        code: ReturnCode,
    },

    /// Binding a pooled device to a VM failed.
    #[error("attaching device '{device}' to VM '{vm}' failed: {code}")]
    Attach {
        vm: String,
        device: DeviceId,
        code: ReturnCode,
    },

    /// Removing a device binding from a VM failed.
    #[error("detaching assignment '{binding_id}' failed: {code}")]
    Detach { binding_id: String, code: ReturnCode },

    /// Rewriting a VM's system settings failed.
    #[error("modifying settings of VM '{vm}' failed: {code}")]
    ModifySettings { vm: String, code: ReturnCode },

    /// No live (non-definition) settings object matches the VM name.
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// The device is not present in the assignable-device pool.
    #[error("device '{0}' is not in the assignable device pool")]
    DeviceNotInPool(DeviceId),

    /// The binding identifier no longer resolves to a resource setting.
    #[error("assignment '{0}' no longer exists")]
    AssignmentNotFound(String),

    /// Another flow already holds the device or VM.
    #[error("another flow is already in progress for {target}")]
    FlowInProgress { target: String },

    /// A caller-supplied value failed validation.
    #[error("validation failed for '{field}': {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// An asynchronous job ended in failure.
    #[error("job for '{operation}' failed in state {job_state} (code {error_code}): {description}")]
    JobFailed {
        operation: &'static str,
        error_code: u32,
        description: String,
        job_state: JobState,
    },

    /// An asynchronous job did not finish within the configured timeout.
    #[error("job '{job_path}' for '{operation}' timed out after {timeout:?} in state {last_state}")]
    JobTimeout {
        operation: &'static str,
        job_path: String,
        timeout: Duration,
        last_state: JobState,
    },

    /// A required record property was absent.
    #[error("required property missing: {0}")]
    MissingProperty(&'static str),

    /// A record property could not be converted to the expected type.
    #[error("cannot convert property '{property}' to {expected}")]
    PropertyType {
        property: &'static str,
        expected: &'static str,
    },

    /// IO error (worker spawning, file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classified category of this error, if it carries one.
    pub fn return_code(&self) -> Option<ReturnCode> {
        match self {
            Error::DeviceToggle { code, .. }
            | Error::Reparent { code, .. }
            | Error::Attach { code, .. }
            | Error::Detach { code, .. }
            | Error::ModifySettings { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for device-assignment operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_from_u16() {
        assert_eq!(JobState::from(2), JobState::New);
        assert_eq!(JobState::from(7), JobState::Completed);
        assert_eq!(JobState::from(10), JobState::Exception);
        assert_eq!(JobState::from(1), JobState::Unknown);
        assert_eq!(JobState::from(99), JobState::Unknown);
    }

    #[test]
    fn test_job_state_predicates() {
        assert!(JobState::Running.is_running());
        assert!(JobState::ShuttingDown.is_running());
        assert!(!JobState::Completed.is_running());
        assert!(JobState::Completed.is_completed());
        assert!(JobState::Terminated.is_failed());
        assert!(JobState::Killed.is_failed());
        assert!(!JobState::Running.is_failed());
    }

    #[test]
    fn test_error_return_code() {
        let err = Error::Detach {
            binding_id: "id".into(),
            code: ReturnCode::AccessDenied,
        };
        assert_eq!(err.return_code(), Some(ReturnCode::AccessDenied));
        assert_eq!(Error::VmNotFound("vm".into()).return_code(), None);
    }
}
