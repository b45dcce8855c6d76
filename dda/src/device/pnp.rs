//! Enable/disable control over host-visible PnP devices.

use serde::{Deserialize, Serialize};

use crate::classify::{classify, MethodFamily, ReturnCode};
use crate::device::DeviceId;

#[cfg(windows)]
use crate::error::{Error, Result};
#[cfg(windows)]
use crate::wmi::{WbemClassObjectExt, WmiSession, CIMV2_NAMESPACE};

/// One host-visible PnP device, as enumerated for device pickers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnpDeviceInfo {
    /// Device instance path.
    pub device: DeviceId,
    /// Friendly device name.
    pub name: String,
    /// PnP device class ("Display", "Net", ...).
    pub class: String,
    /// Raw device status string ("OK", "Error", ...).
    pub status: String,
}

/// Classify the raw outcome of a PnP `Enable`/`Disable` call.
///
/// The native call sometimes completes without producing a readable
/// `ReturnValue` at all; that artifact is a success, not an error, so a
/// missing value maps to `Success` here instead of being suppressed at
/// the call site.
pub fn classify_toggle(raw: Option<u32>) -> ReturnCode {
    match raw {
        None => ReturnCode::Success,
        Some(code) => classify(MethodFamily::PnpEntity, code),
    }
}

/// Enable/disable operations on devices in the host PnP namespace.
#[cfg(windows)]
pub struct PnpDevices<'a> {
    session: &'a WmiSession,
}

#[cfg(windows)]
impl<'a> PnpDevices<'a> {
    /// Create PnP operations over an established session.
    pub fn new(session: &'a WmiSession) -> Self {
        Self { session }
    }

    /// Set a host-visible device's enabled state.
    ///
    /// A device absent from the host namespace is a no-op success:
    /// disabling runs early in the attach flow where the device is
    /// expected to be present, but re-enabling during rollback may
    /// legitimately target a device that has already left the host view.
    pub fn set_enabled(&self, device: &DeviceId, enabled: bool) -> Result<()> {
        let entities = self
            .session
            .query(CIMV2_NAMESPACE, "Win32_PnPEntity", &["DeviceID"])?;

        let mut target = None;
        for entity in entities {
            if let Some(id) = entity.get_string_prop("DeviceID")? {
                if id == device.as_str() {
                    target = Some(entity);
                    break;
                }
            }
        }

        let Some(entity) = target else {
            tracing::debug!(device = %device, enabled, "device not host-visible, toggle is a no-op");
            return Ok(());
        };

        let method = if enabled { "Enable" } else { "Disable" };
        let path = entity.get_path()?;
        let out = self
            .session
            .exec_method(CIMV2_NAMESPACE, &path, method, None)?;

        match classify_toggle(out.get_u32("ReturnValue")?) {
            ReturnCode::Success => {
                tracing::debug!(device = %device, enabled, "host device toggled");
                Ok(())
            }
            code => Err(Error::DeviceToggle {
                device: device.clone(),
                enabled,
                code,
            }),
        }
    }

    /// Enumerate PCI devices in the host namespace.
    pub fn list(&self) -> Result<Vec<PnpDeviceInfo>> {
        let entities = self.session.query(
            CIMV2_NAMESPACE,
            "Win32_PnPEntity",
            &["Status", "PNPClass", "Name", "DeviceID"],
        )?;

        let mut devices = Vec::new();
        for entity in entities {
            let Some(id) = entity.get_string_prop("DeviceID")? else {
                continue;
            };
            if !id.starts_with("PCI") {
                continue;
            }
            devices.push(PnpDeviceInfo {
                device: DeviceId::new(id),
                name: entity
                    .get_string_prop("Name")?
                    .unwrap_or_else(|| "Unknown".to_string()),
                class: entity
                    .get_string_prop("PNPClass")?
                    .unwrap_or_else(|| "Unknown".to_string()),
                status: entity
                    .get_string_prop("Status")?
                    .unwrap_or_else(|| "Unknown".to_string()),
            });
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_return_value_is_success() {
        assert_eq!(classify_toggle(None), ReturnCode::Success);
    }

    #[test]
    fn test_zero_is_success() {
        assert_eq!(classify_toggle(Some(0)), ReturnCode::Success);
    }

    #[test]
    fn test_nonzero_is_a_hard_failure() {
        assert_eq!(classify_toggle(Some(5)), ReturnCode::Unknown(5));
        assert_eq!(classify_toggle(Some(32768)), ReturnCode::Unknown(32768));
    }
}
