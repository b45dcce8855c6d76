use std::sync::Arc;

use crate::device::survey::{survey_devices, DeviceSurvey};
use crate::device::{DeviceId, DeviceLocation, DevicePool, PnpDeviceInfo, PnpDevices};
use crate::error::Result;
use crate::host::{HostCompatibility, ServiceState, HYPERV_SERVICES};
use crate::orchestrator::AssignmentOps;
use crate::vm::{AssignmentRecord, ResourceBinder, VmDescriptor, VmState};
use crate::wmi::{
    Credentials, SessionConfig, WbemClassObjectExt, WmiSession, CIMV2_NAMESPACE,
    VIRTUALIZATION_NAMESPACE,
};

/// Entry point for device-assignment operations against one host.
///
/// Owns the management session and hands out the device and VM
/// components bound to it. Implements [`AssignmentOps`], so it plugs
/// straight into an [`Orchestrator`](crate::Orchestrator):
///
/// ```no_run
/// use windows_dda::{DdaHost, Orchestrator};
///
/// # fn main() -> windows_dda::Result<()> {
/// let orchestrator = Orchestrator::new(DdaHost::connect()?);
/// # Ok(())
/// # }
/// ```
pub struct DdaHost {
    session: Arc<WmiSession>,
}

impl DdaHost {
    /// Connect to the local host.
    pub fn connect() -> Result<Self> {
        Ok(Self {
            session: Arc::new(WmiSession::connect_local()?),
        })
    }

    /// Connect to a remote host with credentials.
    pub fn connect_remote(
        machine_name: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self> {
        Ok(Self {
            session: Arc::new(WmiSession::connect_remote(machine_name, credentials)?),
        })
    }

    /// Connect with full session configuration.
    pub fn with_config(config: SessionConfig) -> Result<Self> {
        Ok(Self {
            session: Arc::new(WmiSession::with_config(config)?),
        })
    }

    /// The underlying management session.
    pub fn session(&self) -> &WmiSession {
        &self.session
    }

    /// PnP toggle operations.
    pub fn pnp(&self) -> PnpDevices<'_> {
        PnpDevices::new(&self.session)
    }

    /// Assignable-device pool operations.
    pub fn pool(&self) -> DevicePool<'_> {
        DevicePool::new(&self.session)
    }

    /// VM resource-binding operations.
    pub fn binder(&self) -> ResourceBinder<'_> {
        ResourceBinder::new(&self.session)
    }

    /// Enumerate PCI devices visible in the host namespace.
    pub fn host_devices(&self) -> Result<Vec<PnpDeviceInfo>> {
        self.pnp().list()
    }

    /// Enumerate VMs with their display states.
    pub fn vms_with_state(&self) -> Result<Vec<(VmDescriptor, VmState)>> {
        let records = self.session.query(
            VIRTUALIZATION_NAMESPACE,
            "Msvm_ComputerSystem",
            &["Caption", "ElementName", "Name", "EnabledState"],
        )?;

        let mut vms = Vec::new();
        for record in records {
            let caption = record.get_string_prop("Caption")?.unwrap_or_default();
            if caption != "Virtual Machine" {
                continue;
            }
            let Some(id) = record.get_string_prop("Name")? else {
                continue;
            };
            let name = record
                .get_string_prop("ElementName")?
                .unwrap_or_else(|| id.clone());
            let state = VmState::from(record.get_u16("EnabledState")?.unwrap_or(0));
            vms.push((VmDescriptor::new(id, name), state));
        }
        Ok(vms)
    }

    /// Check the host OS for device-assignment support.
    pub fn check_host(&self) -> Result<HostCompatibility> {
        let records = self.session.query(
            CIMV2_NAMESPACE,
            "Win32_OperatingSystem",
            &["BuildNumber", "Caption"],
        )?;

        let mut compat = HostCompatibility::evaluate("", 0);
        for record in records {
            let caption = record.get_string_prop("Caption")?.unwrap_or_default();
            let build = record
                .get_string_prop("BuildNumber")?
                .and_then(|b| b.parse::<u32>().ok())
                .unwrap_or(0);
            compat = HostCompatibility::evaluate(&caption, build);
        }
        Ok(compat)
    }

    /// State of the Hyper-V services on the host.
    pub fn services(&self) -> Result<Vec<ServiceState>> {
        let records = self.session.query(
            CIMV2_NAMESPACE,
            "Win32_Service",
            &["Name", "Caption", "State"],
        )?;

        let mut services = Vec::new();
        for record in records {
            let Some(name) = record.get_string_prop("Name")? else {
                continue;
            };
            if !HYPERV_SERVICES.contains(&name.as_str()) {
                continue;
            }
            services.push(ServiceState {
                caption: record
                    .get_string_prop("Caption")?
                    .unwrap_or_else(|| name.clone()),
                state: record
                    .get_string_prop("State")?
                    .unwrap_or_else(|| "Unknown".to_string()),
                name,
            });
        }
        Ok(services)
    }

    /// Survey host PCI devices for assignability.
    pub fn survey_devices(&self) -> Result<Vec<DeviceSurvey>> {
        survey_devices(&self.session)
    }
}

impl AssignmentOps for DdaHost {
    fn set_device_enabled(&self, device: &DeviceId, enabled: bool) -> Result<()> {
        self.pnp().set_enabled(device, enabled)
    }

    fn dismount_to_pool(&self, device: &DeviceId) -> Result<()> {
        self.pool().dismount_to_pool(device)
    }

    fn device_location(&self, device: &DeviceId) -> Result<DeviceLocation> {
        self.pool().location_of(device)
    }

    fn mount_back_to_host(&self, device: &DeviceId, location: &DeviceLocation) -> Result<()> {
        self.pool().mount_back_to_host(device, location)
    }

    fn attach_to_vm(&self, vm: &VmDescriptor, device: &DeviceId) -> Result<AssignmentRecord> {
        self.binder().attach(vm, device)
    }

    fn detach_from_vm(&self, record: &AssignmentRecord) -> Result<()> {
        self.binder().detach(record)
    }

    fn assignments(&self, vm: &VmDescriptor) -> Result<Vec<AssignmentRecord>> {
        self.binder().assignments(vm)
    }

    fn virtual_machines(&self) -> Result<Vec<VmDescriptor>> {
        Ok(self.vms_with_state()?.into_iter().map(|(vm, _)| vm).collect())
    }

    fn pool_devices(&self) -> Result<Vec<DeviceId>> {
        self.pool().devices()
    }
}
