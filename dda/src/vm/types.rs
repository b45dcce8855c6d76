//! Virtual machine descriptors, states, and assignment records.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceId;

/// A virtual machine known to the management endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDescriptor {
    /// Stable instance key (Msvm_ComputerSystem.Name, a GUID).
    pub id: String,
    /// Human-readable name (ElementName).
    pub name: String,
}

impl VmDescriptor {
    /// Create a descriptor from its instance key and display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for VmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// VM enabled state (Msvm_ComputerSystem.EnabledState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum VmState {
    /// Unknown state.
    Unknown = 0,
    /// Other, unmapped state.
    Other = 1,
    /// VM is running.
    Running = 2,
    /// VM is stopped.
    Stopped = 3,
    /// VM is shutting down.
    ShuttingDown = 4,
    /// Not applicable.
    NotApplicable = 5,
    /// VM is enabled but offline.
    EnabledOffline = 6,
    /// VM is in test.
    InTest = 7,
    /// VM is degraded.
    Degraded = 8,
    /// VM is quiescing.
    Quiesce = 9,
    /// VM is starting.
    Starting = 10,
}

impl From<u16> for VmState {
    fn from(value: u16) -> Self {
        match value {
            1 => VmState::Other,
            2 => VmState::Running,
            3 => VmState::Stopped,
            4 => VmState::ShuttingDown,
            5 => VmState::NotApplicable,
            6 => VmState::EnabledOffline,
            7 => VmState::InTest,
            8 => VmState::Degraded,
            9 => VmState::Quiesce,
            10 => VmState::Starting,
            _ => VmState::Unknown,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Unknown => "Unknown",
            VmState::Other => "Other",
            VmState::Running => "Running",
            VmState::Stopped => "Stopped",
            VmState::ShuttingDown => "Shutting down",
            VmState::NotApplicable => "Not applicable",
            VmState::EnabledOffline => "Enabled but Offline",
            VmState::InTest => "In Test",
            VmState::Degraded => "Degraded",
            VmState::Quiesce => "Quiesce",
            VmState::Starting => "Starting",
        };
        write!(f, "{}", s)
    }
}

/// One device bound to one VM.
///
/// Created only by a successful attach, destroyed only by a successful
/// detach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    /// Binding identifier generated at attach time; doubles as the
    /// resource setting's instance key on the endpoint.
    pub binding_id: String,
    /// Device identifier in pool-namespace form.
    pub device: DeviceId,
    /// Instance key of the owning VM.
    pub vm_id: String,
}

/// Generate a fresh binding identifier under a VM settings instance.
///
/// The binding lives in the settings object's key space, so it is the
/// settings instance id followed by a new uppercase GUID.
pub fn new_binding_id(vssd_instance_id: &str) -> String {
    format!(
        "{}\\{}",
        vssd_instance_id,
        Uuid::new_v4().to_string().to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_state_labels_match_enabled_state_values() {
        assert_eq!(VmState::from(0).to_string(), "Unknown");
        assert_eq!(VmState::from(2).to_string(), "Running");
        assert_eq!(VmState::from(3).to_string(), "Stopped");
        assert_eq!(VmState::from(4).to_string(), "Shutting down");
        assert_eq!(VmState::from(6).to_string(), "Enabled but Offline");
        assert_eq!(VmState::from(9).to_string(), "Quiesce");
        assert_eq!(VmState::from(10).to_string(), "Starting");
    }

    #[test]
    fn test_vm_state_out_of_range_is_unknown() {
        assert_eq!(VmState::from(11), VmState::Unknown);
        assert_eq!(VmState::from(32768), VmState::Unknown);
    }

    #[test]
    fn test_binding_id_shape() {
        let id = new_binding_id("Microsoft:0AC2...:ABCD");
        let (prefix, guid) = id.rsplit_once('\\').unwrap();
        assert_eq!(prefix, "Microsoft:0AC2...:ABCD");
        assert_eq!(guid.len(), 36);
        assert_eq!(guid, guid.to_uppercase());
        assert!(Uuid::parse_str(guid).is_ok());
    }

    #[test]
    fn test_binding_ids_are_unique() {
        assert_ne!(new_binding_id("a"), new_binding_id("a"));
    }
}
