//! Return-code classification for management method invocations.
//!
//! Every method call against the management endpoint yields a numeric
//! outcome. The meaning of a code depends on which family of methods
//! produced it: the assignable-device service, the resource-settings
//! methods, and the system-settings methods use overlapping but not
//! identical tables. A code absent from its family's table is `Unknown`
//! and must be treated as a hard failure, never as success.

use core::fmt;

/// Family of management methods sharing one return-code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodFamily {
    /// `DismountAssignableDevice` / `MountAssignableDevice` on the
    /// assignable-device service.
    AssignableDevice,
    /// `AddResourceSettings` / `RemoveResourceSettings` on the virtual
    /// system management service.
    ResourceSettings,
    /// `ModifySystemSettings` on the virtual system management service.
    SystemSettings,
    /// `Enable` / `Disable` on a host PnP entity.
    PnpEntity,
}

impl fmt::Display for MethodFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MethodFamily::AssignableDevice => "AssignableDevice",
            MethodFamily::ResourceSettings => "ResourceSettings",
            MethodFamily::SystemSettings => "SystemSettings",
            MethodFamily::PnpEntity => "PnpEntity",
        };
        write!(f, "{}", s)
    }
}

/// Classified outcome of a management method invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// The operation completed.
    Success,
    /// The method is not supported by the target object.
    NotSupported,
    /// The operation ran and failed.
    OperationFailed,
    /// The operation timed out.
    Timeout,
    /// A supplied parameter was invalid.
    InvalidParameter,
    /// The target is in a state that does not permit the operation.
    InvalidState,
    /// The supplied parameters are incompatible with each other.
    IncompatibleParameters,
    /// The caller lacks the required privileges.
    AccessDenied,
    /// The target is in use.
    SystemBusy,
    /// The target system is not available.
    SystemUnavailable,
    /// The host ran out of a required resource.
    ResourceExhausted,
    /// The referenced object was not found.
    NotFound,
    /// The method parameters were accepted and an asynchronous job was
    /// started; the outcome is not yet resolved.
    JobPending,
    /// The code is not in this family's table. Hard failure.
    Unknown(u32),
}

impl ReturnCode {
    /// Check for a completed, successful outcome.
    pub fn is_success(&self) -> bool {
        *self == ReturnCode::Success
    }

    /// Check whether an asynchronous job must still be resolved.
    pub fn is_job_pending(&self) -> bool {
        *self == ReturnCode::JobPending
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnCode::Success => write!(f, "Success"),
            ReturnCode::NotSupported => write!(f, "Not Supported"),
            ReturnCode::OperationFailed => write!(f, "Failed"),
            ReturnCode::Timeout => write!(f, "Timed Out"),
            ReturnCode::InvalidParameter => write!(f, "Invalid Parameter"),
            ReturnCode::InvalidState => write!(f, "Invalid State"),
            ReturnCode::IncompatibleParameters => write!(f, "Incompatible Parameters"),
            ReturnCode::AccessDenied => write!(f, "Access Denied"),
            ReturnCode::SystemBusy => write!(f, "System In Use"),
            ReturnCode::SystemUnavailable => write!(f, "System Not Available"),
            ReturnCode::ResourceExhausted => write!(f, "Out Of Memory"),
            ReturnCode::NotFound => write!(f, "Not Found"),
            ReturnCode::JobPending => write!(f, "Job Started"),
            ReturnCode::Unknown(code) => write!(f, "Unknown ({})", code),
        }
    }
}

/// Classify a numeric outcome for the given method family.
pub fn classify(family: MethodFamily, code: u32) -> ReturnCode {
    match family {
        MethodFamily::AssignableDevice => classify_assignable_device(code),
        MethodFamily::ResourceSettings => classify_resource_settings(code),
        MethodFamily::SystemSettings => classify_system_settings(code),
        MethodFamily::PnpEntity => classify_pnp_entity(code),
    }
}

fn classify_assignable_device(code: u32) -> ReturnCode {
    match code {
        0 => ReturnCode::Success,
        4096 => ReturnCode::JobPending,
        32768 => ReturnCode::OperationFailed,
        32769 => ReturnCode::AccessDenied,
        32770 => ReturnCode::NotSupported,
        // "Status is unknown": the service could not determine the result.
        32771 => ReturnCode::OperationFailed,
        32772 => ReturnCode::Timeout,
        32773 => ReturnCode::InvalidParameter,
        32774 => ReturnCode::SystemBusy,
        32775 => ReturnCode::InvalidState,
        32776 => ReturnCode::IncompatibleParameters,
        32777 => ReturnCode::SystemUnavailable,
        32778 => ReturnCode::ResourceExhausted,
        32779 => ReturnCode::NotFound,
        other => ReturnCode::Unknown(other),
    }
}

fn classify_resource_settings(code: u32) -> ReturnCode {
    match code {
        0 => ReturnCode::Success,
        1 => ReturnCode::NotSupported,
        2 => ReturnCode::OperationFailed,
        3 => ReturnCode::Timeout,
        4 => ReturnCode::InvalidParameter,
        5 => ReturnCode::InvalidState,
        6 => ReturnCode::IncompatibleParameters,
        4096 => ReturnCode::JobPending,
        // Reserved for vendor extension; callers may not invoke it.
        4097 => ReturnCode::NotSupported,
        32768 => ReturnCode::OperationFailed,
        32769 => ReturnCode::AccessDenied,
        other => ReturnCode::Unknown(other),
    }
}

fn classify_system_settings(code: u32) -> ReturnCode {
    match code {
        0 => ReturnCode::Success,
        1 => ReturnCode::NotSupported,
        2 => ReturnCode::OperationFailed,
        3 => ReturnCode::Timeout,
        4 => ReturnCode::InvalidParameter,
        5 => ReturnCode::InvalidState,
        6 => ReturnCode::IncompatibleParameters,
        4096 => ReturnCode::JobPending,
        other => ReturnCode::Unknown(other),
    }
}

fn classify_pnp_entity(code: u32) -> ReturnCode {
    match code {
        0 => ReturnCode::Success,
        other => ReturnCode::Unknown(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_FAMILIES: [MethodFamily; 4] = [
        MethodFamily::AssignableDevice,
        MethodFamily::ResourceSettings,
        MethodFamily::SystemSettings,
        MethodFamily::PnpEntity,
    ];

    #[test]
    fn test_zero_is_success_for_every_family() {
        for family in ALL_FAMILIES {
            assert_eq!(classify(family, 0), ReturnCode::Success, "{}", family);
        }
    }

    #[test]
    fn test_unlisted_code_is_never_success() {
        for family in ALL_FAMILIES {
            assert_eq!(
                classify(family, 999_999),
                ReturnCode::Unknown(999_999),
                "{}",
                family
            );
        }
    }

    #[test]
    fn test_not_found_only_in_assignable_device_family() {
        assert_eq!(
            classify(MethodFamily::AssignableDevice, 32779),
            ReturnCode::NotFound
        );
        assert_eq!(
            classify(MethodFamily::ResourceSettings, 32779),
            ReturnCode::Unknown(32779)
        );
        assert_eq!(
            classify(MethodFamily::SystemSettings, 32779),
            ReturnCode::Unknown(32779)
        );
    }

    #[test]
    fn test_access_denied_absent_from_system_settings() {
        assert_eq!(
            classify(MethodFamily::ResourceSettings, 32769),
            ReturnCode::AccessDenied
        );
        assert_eq!(
            classify(MethodFamily::AssignableDevice, 32769),
            ReturnCode::AccessDenied
        );
        assert_eq!(
            classify(MethodFamily::SystemSettings, 32769),
            ReturnCode::Unknown(32769)
        );
    }

    #[test]
    fn test_not_supported_shared_across_settings_families() {
        assert_eq!(
            classify(MethodFamily::ResourceSettings, 1),
            ReturnCode::NotSupported
        );
        assert_eq!(
            classify(MethodFamily::SystemSettings, 1),
            ReturnCode::NotSupported
        );
    }

    #[test]
    fn test_assignable_device_table() {
        assert_eq!(
            classify(MethodFamily::AssignableDevice, 4096),
            ReturnCode::JobPending
        );
        assert_eq!(
            classify(MethodFamily::AssignableDevice, 32772),
            ReturnCode::Timeout
        );
        assert_eq!(
            classify(MethodFamily::AssignableDevice, 32774),
            ReturnCode::SystemBusy
        );
        assert_eq!(
            classify(MethodFamily::AssignableDevice, 32777),
            ReturnCode::SystemUnavailable
        );
        assert_eq!(
            classify(MethodFamily::AssignableDevice, 32778),
            ReturnCode::ResourceExhausted
        );
    }

    #[test]
    fn test_job_pending_predicate() {
        assert!(classify(MethodFamily::SystemSettings, 4096).is_job_pending());
        assert!(!classify(MethodFamily::SystemSettings, 0).is_job_pending());
        assert!(classify(MethodFamily::SystemSettings, 0).is_success());
    }
}
