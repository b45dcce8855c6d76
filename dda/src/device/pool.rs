//! Re-parenting devices across the host/pool boundary.
//!
//! Dismounting hands a host PnP device over to the hypervisor's
//! assignable-device pool; mounting reverses it. Both run through the
//! `Msvm_AssignableDeviceService` singleton in the virtualization
//! namespace.

#[cfg(windows)]
use crate::classify::{classify, MethodFamily, ReturnCode};
#[cfg(windows)]
use crate::device::{DeviceId, DeviceLocation};
#[cfg(windows)]
use crate::error::{Error, Result};
#[cfg(windows)]
use crate::wmi::{JobWaiter, WbemClassObjectExt, WmiSession, VIRTUALIZATION_NAMESPACE};

#[cfg(windows)]
const SERVICE_CLASS: &str = "Msvm_AssignableDeviceService";

/// Operations that move a device between host and pool ownership.
#[cfg(windows)]
pub struct DevicePool<'a> {
    session: &'a WmiSession,
}

#[cfg(windows)]
impl<'a> DevicePool<'a> {
    /// Create pool operations over an established session.
    pub fn new(session: &'a WmiSession) -> Self {
        Self { session }
    }

    /// Dismount a host device into the assignable-device pool.
    ///
    /// Takes the host-namespace identifier; on success the device is
    /// pool-unbound and visible only under the pool namespace.
    pub fn dismount_to_pool(&self, device: &DeviceId) -> Result<()> {
        let setting = self.session.spawn_instance(
            VIRTUALIZATION_NAMESPACE,
            "Msvm_AssignableDeviceDismountSettingData",
        )?;
        setting.put_string("DeviceInstancePath", device.as_str())?;
        setting.put_string("DeviceLocationPath", "")?;
        setting.put_bool("RequireAcsSupport", false)?;
        setting.put_bool("RequireDeviceMitigations", false)?;
        let setting_text = setting.get_text()?;

        let service_path = self.service_path()?;
        let in_params = self.session.get_method_params(
            VIRTUALIZATION_NAMESPACE,
            SERVICE_CLASS,
            "DismountAssignableDevice",
        )?;
        in_params.put_string("DismountSettingData", &setting_text)?;

        let out = self.session.exec_method(
            VIRTUALIZATION_NAMESPACE,
            &service_path,
            "DismountAssignableDevice",
            Some(&in_params),
        )?;

        self.finish(device, "DismountAssignableDevice", &out)?;
        tracing::info!(device = %device, "device dismounted into assignable pool");
        Ok(())
    }

    /// Mount a pooled device back into the host namespace.
    ///
    /// Takes the pool-namespace identifier and the location path
    /// captured from the pool. The device comes back disabled; enabling
    /// it again is the caller's step, not this one.
    pub fn mount_back_to_host(&self, device: &DeviceId, location: &DeviceLocation) -> Result<()> {
        let service_path = self.service_path()?;
        let in_params = self.session.get_method_params(
            VIRTUALIZATION_NAMESPACE,
            SERVICE_CLASS,
            "MountAssignableDevice",
        )?;
        in_params.put_string("DeviceInstancePath", device.as_str())?;
        in_params.put_string("DeviceLocationPath", location.as_str())?;

        let out = self.session.exec_method(
            VIRTUALIZATION_NAMESPACE,
            &service_path,
            "MountAssignableDevice",
            Some(&in_params),
        )?;

        self.finish(device, "MountAssignableDevice", &out)?;
        tracing::info!(device = %device, "device mounted back to host");
        Ok(())
    }

    /// Location path of a pool-resident device.
    ///
    /// The result feeds `mount_back_to_host` and must be captured right
    /// before it is consumed; a stale path from before a pool refresh is
    /// not usable. An absent device is fatal here.
    pub fn location_of(&self, device: &DeviceId) -> Result<DeviceLocation> {
        let records = self.session.query(
            VIRTUALIZATION_NAMESPACE,
            "Msvm_PciExpress",
            &["DeviceInstancePath", "LocationPath"],
        )?;

        for record in records {
            if let Some(path) = record.get_string_prop("DeviceInstancePath")? {
                if path == device.as_str() {
                    let location = record
                        .get_string_prop("LocationPath")?
                        .ok_or(Error::MissingProperty("LocationPath"))?;
                    return Ok(DeviceLocation::new(location));
                }
            }
        }
        Err(Error::DeviceNotInPool(device.clone()))
    }

    /// Enumerate the pool-resident devices.
    pub fn devices(&self) -> Result<Vec<DeviceId>> {
        let records = self.session.query(
            VIRTUALIZATION_NAMESPACE,
            "Msvm_PciExpress",
            &["DeviceInstancePath"],
        )?;

        let mut devices = Vec::new();
        for record in records {
            if let Some(path) = record.get_string_prop("DeviceInstancePath")? {
                devices.push(DeviceId::new(path));
            }
        }
        Ok(devices)
    }

    fn service_path(&self) -> Result<String> {
        let service = self
            .session
            .singleton(VIRTUALIZATION_NAMESPACE, SERVICE_CLASS)?
            .ok_or(Error::ServiceUnavailable(SERVICE_CLASS))?;
        service.get_path()
    }

    fn finish(
        &self,
        device: &DeviceId,
        operation: &'static str,
        out: &windows::Win32::System::Wmi::IWbemClassObject,
    ) -> Result<()> {
        let raw = out.get_u32("ReturnValue")?.unwrap_or(0);
        match classify(MethodFamily::AssignableDevice, raw) {
            ReturnCode::Success => Ok(()),
            ReturnCode::JobPending => {
                let job_path = out
                    .get_string_prop("Job")?
                    .ok_or(Error::MissingProperty("Job"))?;
                JobWaiter::new(self.session).wait_for_job(&job_path, operation)?;
                Ok(())
            }
            code => Err(Error::Reparent {
                device: device.clone(),
                operation,
                code,
            }),
        }
    }
}
