//! Host capability checks for device assignment.

use serde::{Deserialize, Serialize};

/// First Windows build with assignable-device support.
pub const MIN_DDA_BUILD: u32 = 14393;

/// Services that make up the Hyper-V role on a host.
pub const HYPERV_SERVICES: [&str; 12] = [
    "HvHost",
    "vmickvpexchange",
    "gcs",
    "vmicguestinterface",
    "vmicshutdown",
    "vmicheartbeat",
    "vmcompute",
    "vmicvmsession",
    "vmicrdv",
    "vmictimesync",
    "vmms",
    "vmicvss",
];

/// Whether a host OS can run device assignment at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCompatibility {
    /// OS display name.
    pub os_name: String,
    /// OS build number.
    pub build_number: u32,
    /// Build is recent enough for assignable devices.
    pub build_supported: bool,
    /// Host runs a Server SKU; client SKUs do not carry the feature.
    pub server_sku: bool,
}

impl HostCompatibility {
    /// Evaluate an OS caption and build number.
    pub fn evaluate(os_caption: &str, build_number: u32) -> Self {
        Self {
            os_name: os_caption.trim().to_string(),
            build_number,
            build_supported: build_number >= MIN_DDA_BUILD,
            server_sku: os_caption.trim().to_lowercase().contains("server"),
        }
    }

    /// Check that nothing rules device assignment out.
    pub fn is_supported(&self) -> bool {
        self.build_supported && self.server_sku
    }

    /// Operator-facing reasons the host may not support assignment.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.build_supported {
            warnings.push(format!(
                "host build {} is older than {}, which introduced assignable devices",
                self.build_number, MIN_DDA_BUILD
            ));
        }
        if !self.server_sku {
            warnings.push("host is not a Server SKU; device assignment may be unavailable".into());
        }
        warnings
    }
}

/// State of one Hyper-V service on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    /// Service name ("vmms", ...).
    pub name: String,
    /// Display name.
    pub caption: String,
    /// Raw state string ("Running", "Stopped", ...).
    pub state: String,
}

impl ServiceState {
    /// Check whether the service is running.
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_sku_on_supported_build() {
        let compat = HostCompatibility::evaluate("Microsoft Windows Server 2022 Datacenter", 20348);
        assert!(compat.build_supported);
        assert!(compat.server_sku);
        assert!(compat.is_supported());
        assert!(compat.warnings().is_empty());
    }

    #[test]
    fn test_old_build_is_flagged() {
        let compat = HostCompatibility::evaluate("Microsoft Windows Server 2012 R2", 9600);
        assert!(!compat.build_supported);
        assert!(!compat.is_supported());
        assert_eq!(compat.warnings().len(), 1);
    }

    #[test]
    fn test_client_sku_is_flagged() {
        let compat = HostCompatibility::evaluate("Microsoft Windows 11 Pro", 22631);
        assert!(compat.build_supported);
        assert!(!compat.server_sku);
        assert!(!compat.is_supported());
        assert_eq!(compat.warnings().len(), 1);
    }

    #[test]
    fn test_service_running_predicate() {
        let svc = ServiceState {
            name: "vmms".into(),
            caption: "Hyper-V Virtual Machine Management".into(),
            state: "Running".into(),
        };
        assert!(svc.is_running());

        let stopped = ServiceState {
            state: "Stopped".into(),
            ..svc
        };
        assert!(!stopped.is_running());
    }
}
