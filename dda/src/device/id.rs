//! Device identifiers and their two ownership namespaces.
//!
//! The same physical PCI device is named differently depending on who
//! owns it: `PCI\...` while it is visible to the host plug-and-play
//! subsystem, `PCIP\...` while it is parked in the hypervisor's
//! assignable-device pool. Conversion is a prefix substitution and is
//! invertible; applying a conversion to an identifier already in the
//! target namespace is a no-op.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Instance-path prefix while the host OS owns the device.
pub const HOST_PREFIX: &str = "PCI\\";

/// Instance-path prefix while the assignable-device pool owns the device.
pub const POOL_PREFIX: &str = "PCIP\\";

/// Normalized instance path of a physical PCI device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a raw device instance path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The underlying instance path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the identifier is in the pool namespace.
    pub fn in_pool_namespace(&self) -> bool {
        self.0.starts_with(POOL_PREFIX)
    }

    /// Check whether the identifier is in the host namespace.
    pub fn in_host_namespace(&self) -> bool {
        self.0.starts_with(HOST_PREFIX)
    }

    /// The pool-namespace form of this identifier.
    pub fn to_pool(&self) -> DeviceId {
        if let Some(rest) = self.0.strip_prefix(HOST_PREFIX) {
            DeviceId(format!("{}{}", POOL_PREFIX, rest))
        } else {
            self.clone()
        }
    }

    /// The host-namespace form of this identifier.
    pub fn to_host(&self) -> DeviceId {
        if let Some(rest) = self.0.strip_prefix(POOL_PREFIX) {
            DeviceId(format!("{}{}", HOST_PREFIX, rest))
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(path: &str) -> Self {
        DeviceId::new(path)
    }
}

impl From<String> for DeviceId {
    fn from(path: String) -> Self {
        DeviceId::new(path)
    }
}

/// Opaque location path needed to re-attach a pooled device to the host.
///
/// Only obtainable while the device is pool-resident; capture it
/// immediately before the mount call that consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceLocation(String);

impl DeviceLocation {
    /// Wrap a raw location path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The underlying location path.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_to_pool_round_trip() {
        let host = DeviceId::new("PCI\\VEN_10DE&DEV_1EB8\\4&2C34A,0");
        let pool = host.to_pool();
        assert_eq!(pool.as_str(), "PCIP\\VEN_10DE&DEV_1EB8\\4&2C34A,0");
        assert_eq!(pool.to_host(), host);
    }

    #[test]
    fn test_conversion_is_idempotent_after_first_application() {
        let d = DeviceId::new("PCI\\VEN_1,dev1");
        let pooled = d.to_pool();
        assert_eq!(pooled.to_host().to_pool(), pooled);
        assert_eq!(pooled.to_pool(), pooled);
        assert_eq!(d.to_host(), d);
    }

    #[test]
    fn test_namespace_predicates() {
        let host = DeviceId::new("PCI\\VEN_1,dev1");
        assert!(host.in_host_namespace());
        assert!(!host.in_pool_namespace());

        let pool = host.to_pool();
        assert!(pool.in_pool_namespace());
        assert!(!pool.in_host_namespace());
    }

    #[test]
    fn test_pool_prefix_is_not_mistaken_for_host_prefix() {
        // "PCIP\" must never match the "PCI\" branch.
        let pool = DeviceId::new("PCIP\\VEN_1,dev1");
        assert_eq!(pool.to_pool(), pool);
        assert_eq!(pool.to_host().as_str(), "PCI\\VEN_1,dev1");
    }

    #[test]
    fn test_foreign_identifiers_pass_through() {
        let other = DeviceId::new("USB\\VID_046D&PID_C52B");
        assert_eq!(other.to_pool(), other);
        assert_eq!(other.to_host(), other);
        assert!(!other.in_host_namespace());
        assert!(!other.in_pool_namespace());
    }
}
