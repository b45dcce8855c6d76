//! Binding pooled devices to virtual machines.
//!
//! An attach builds a PCI Express resource setting that references the
//! pooled device and adds it to the VM's live settings object; a detach
//! removes that setting again. The binding identifier generated at
//! attach time is the setting's instance key and the only durable
//! handle to the assignment.

use crate::device::DeviceId;

#[cfg(windows)]
use crate::classify::{classify, MethodFamily, ReturnCode};
#[cfg(windows)]
use crate::error::{Error, Result};
#[cfg(windows)]
use crate::vm::settings::MmioGap;
#[cfg(windows)]
use crate::vm::types::{new_binding_id, AssignmentRecord, VmDescriptor};
#[cfg(windows)]
use crate::wmi::{JobWaiter, WbemClassObjectExt, WmiSession, VIRTUALIZATION_NAMESPACE};

#[cfg(windows)]
const MANAGEMENT_SERVICE: &str = "Msvm_VirtualSystemManagementService";

/// Build the host-resource reference for a pooled PCI Express device.
///
/// The reference names the device by its escaped `DeviceID` key on the
/// owning host; the endpoint resolves it when the resource setting is
/// added.
pub fn host_resource_reference(system_name: &str, device_key: &str) -> String {
    let escaped = device_key.replace('\\', "\\\\");
    format!(
        "\\\\{system}\\root\\virtualization\\v2:Msvm_PciExpress.CreationClassName=\"Msvm_PciExpress\",DeviceID=\"{escaped}\",SystemCreationClassName=\"Msvm_ComputerSystem\",SystemName=\"{system}\"",
        system = system_name,
        escaped = escaped,
    )
}

/// Extract the unescaped `DeviceID` key out of a host-resource reference.
pub fn device_key_from_host_resource(reference: &str) -> Option<String> {
    let start = reference.find("DeviceID=\"")? + "DeviceID=\"".len();
    let end = reference[start..].find('"')? + start;
    Some(reference[start..end].replace("\\\\", "\\"))
}

/// Identifier of a device referenced by a resource setting.
///
/// Falls back to the raw key when it already looks like an instance
/// path.
pub fn device_id_from_host_resource(reference: &str) -> Option<DeviceId> {
    device_key_from_host_resource(reference).map(DeviceId::new)
}

/// Attach/detach operations over a VM's device resource settings.
#[cfg(windows)]
pub struct ResourceBinder<'a> {
    session: &'a WmiSession,
}

#[cfg(windows)]
impl<'a> ResourceBinder<'a> {
    /// Create binder operations over an established session.
    pub fn new(session: &'a WmiSession) -> Self {
        Self { session }
    }

    /// Attach a pooled device to a VM.
    ///
    /// Takes the pool-namespace identifier. The returned record is the
    /// only handle that can later detach the device.
    pub fn attach(&self, vm: &VmDescriptor, device: &DeviceId) -> Result<AssignmentRecord> {
        let pool_id = device.to_pool();

        // Resolve the device's host-resource reference while it sits in
        // the pool.
        let pci_records = self.session.query(
            VIRTUALIZATION_NAMESPACE,
            "Msvm_PciExpress",
            &["DeviceInstancePath", "SystemName", "DeviceID"],
        )?;
        let mut host_resource = None;
        for record in pci_records {
            if let Some(path) = record.get_string_prop("DeviceInstancePath")? {
                if path.contains(pool_id.as_str()) {
                    let system_name = record
                        .get_string_prop("SystemName")?
                        .ok_or(Error::MissingProperty("SystemName"))?;
                    let device_key = record
                        .get_string_prop("DeviceID")?
                        .ok_or(Error::MissingProperty("DeviceID"))?;
                    host_resource = Some(host_resource_reference(&system_name, &device_key));
                    break;
                }
            }
        }
        let host_resource = host_resource.ok_or_else(|| Error::DeviceNotInPool(pool_id.clone()))?;

        let vssd = self.live_vssd(&vm.name)?;
        let binding_id = new_binding_id(&vssd.instance_id);

        let setting = self
            .session
            .spawn_instance(VIRTUALIZATION_NAMESPACE, "Msvm_PciExpressSettingData")?;
        setting.put_string("Address", "")?;
        setting.put_string("AddressOnParent", "")?;
        setting.put_string("AllocationUnits", "count")?;
        setting.put_bool_array("AllowDirectTranslatedP2P", &[false])?;
        setting.put_bool("AutomaticAllocation", true)?;
        setting.put_bool("AutomaticDeallocation", true)?;
        setting.put_string("Caption", "PCI Express Port")?;
        setting.put_u16("ConsumerVisibility", 3)?;
        setting.put_string("Description", "Microsoft Virtual PCI Express Port Setting Data")?;
        setting.put_string("ElementName", "PCI Express Port")?;
        setting.put_string_array("HostResource", &[&host_resource])?;
        setting.put_string("InstanceID", &binding_id)?;
        setting.put_u64("Limit", 1)?;
        setting.put_string("PoolID", "")?;
        setting.put_u64("Reservation", 1)?;
        setting.put_string("ResourceSubType", "Microsoft:Hyper-V:Virtual Pci Express Port")?;
        setting.put_u16("ResourceType", 32769)?;
        setting.put_u32("TargetVtl", 0)?;
        setting.put_u16_array("VirtualFunctions", &[0])?;
        setting.put_u64("VirtualQuantity", 1)?;
        setting.put_string("VirtualQuantityUnits", "count")?;
        setting.put_string_array(
            "VirtualSystemIdentifiers",
            &[&format!("{{{}}}", uuid::Uuid::new_v4())],
        )?;
        setting.put_u32("Weight", 0)?;
        let setting_text = setting.get_text()?;

        let service_path = self.service_path()?;
        let in_params = self.session.get_method_params(
            VIRTUALIZATION_NAMESPACE,
            MANAGEMENT_SERVICE,
            "AddResourceSettings",
        )?;
        in_params.put_string("AffectedConfiguration", &vssd.path)?;
        in_params.put_string_array("ResourceSettings", &[&setting_text])?;

        let out = self.session.exec_method(
            VIRTUALIZATION_NAMESPACE,
            &service_path,
            "AddResourceSettings",
            Some(&in_params),
        )?;

        match self.resolve(&out, MethodFamily::ResourceSettings, "AddResourceSettings")? {
            ReturnCode::Success => {
                tracing::info!(vm = %vm.name, device = %pool_id, binding = %binding_id, "device attached to VM");
                Ok(AssignmentRecord {
                    binding_id,
                    device: pool_id,
                    vm_id: vm.id.clone(),
                })
            }
            code => Err(Error::Attach {
                vm: vm.name.clone(),
                device: pool_id,
                code,
            }),
        }
    }

    /// Detach a previously attached device from its VM.
    pub fn detach(&self, record: &AssignmentRecord) -> Result<()> {
        let settings = self.session.query(
            VIRTUALIZATION_NAMESPACE,
            "Msvm_PciExpressSettingData",
            &["InstanceID"],
        )?;

        let mut setting_path = None;
        for setting in settings {
            if let Some(id) = setting.get_string_prop("InstanceID")? {
                if id == record.binding_id {
                    setting_path = Some(setting.get_path()?);
                    break;
                }
            }
        }
        let setting_path =
            setting_path.ok_or_else(|| Error::AssignmentNotFound(record.binding_id.clone()))?;

        let service_path = self.service_path()?;
        let in_params = self.session.get_method_params(
            VIRTUALIZATION_NAMESPACE,
            MANAGEMENT_SERVICE,
            "RemoveResourceSettings",
        )?;
        in_params.put_string_array("ResourceSettings", &[&setting_path])?;

        let out = self.session.exec_method(
            VIRTUALIZATION_NAMESPACE,
            &service_path,
            "RemoveResourceSettings",
            Some(&in_params),
        )?;

        match self.resolve(&out, MethodFamily::ResourceSettings, "RemoveResourceSettings")? {
            ReturnCode::Success => {
                tracing::info!(binding = %record.binding_id, "device detached from VM");
                Ok(())
            }
            code => Err(Error::Detach {
                binding_id: record.binding_id.clone(),
                code,
            }),
        }
    }

    /// Enumerate the device assignments of a VM. Read-only.
    pub fn assignments(&self, vm: &VmDescriptor) -> Result<Vec<AssignmentRecord>> {
        let vssd = self.live_vssd(&vm.name)?;
        let binding_prefix = format!("{}\\", vssd.instance_id);

        // Device keys referenced from resource settings resolve back to
        // pool instance paths through the pool's device table.
        let pci_records = self.session.query(
            VIRTUALIZATION_NAMESPACE,
            "Msvm_PciExpress",
            &["DeviceInstancePath", "DeviceID"],
        )?;
        let mut instance_paths = std::collections::HashMap::new();
        for record in pci_records {
            if let (Some(key), Some(path)) = (
                record.get_string_prop("DeviceID")?,
                record.get_string_prop("DeviceInstancePath")?,
            ) {
                instance_paths.insert(key, path);
            }
        }

        let settings = self.session.query(
            VIRTUALIZATION_NAMESPACE,
            "Msvm_PciExpressSettingData",
            &["InstanceID", "HostResource"],
        )?;

        let mut records = Vec::new();
        for setting in settings {
            let Some(binding_id) = setting.get_string_prop("InstanceID")? else {
                continue;
            };
            if !binding_id.starts_with(&binding_prefix) {
                continue;
            }
            let device = setting
                .get_string_array("HostResource")?
                .and_then(|refs| refs.first().cloned())
                .and_then(|r| device_key_from_host_resource(&r))
                .map(|key| {
                    instance_paths
                        .get(&key)
                        .map(|path| DeviceId::new(path.clone()))
                        .unwrap_or_else(|| DeviceId::new(key))
                });
            let Some(device) = device else {
                continue;
            };
            records.push(AssignmentRecord {
                binding_id,
                device,
                vm_id: vm.id.clone(),
            });
        }
        Ok(records)
    }

    /// Reserve low/high MMIO gaps on a VM for large-BAR devices.
    pub fn set_mmio_gap(&self, vm: &VmDescriptor, gap: &MmioGap) -> Result<()> {
        gap.validate()?;
        let vssd = self.live_vssd(&vm.name)?;
        vssd.object.put_u64("LowMmioGapSize", gap.low_mb)?;
        vssd.object.put_u64("HighMmioGapSize", gap.high_mb)?;
        self.modify_system_settings(&vssd, "MMIO gap")
    }

    /// Let the guest control device cache types.
    pub fn set_guest_controlled_cache(&self, vm: &VmDescriptor, enabled: bool) -> Result<()> {
        let vssd = self.live_vssd(&vm.name)?;
        vssd.object.put_bool("GuestControlledCacheTypes", enabled)?;
        self.modify_system_settings(&vssd, "guest cache control")
    }

    fn modify_system_settings(&self, vssd: &LiveVssd, what: &str) -> Result<()> {
        let settings_text = vssd.object.get_text()?;
        let service_path = self.service_path()?;
        let in_params = self.session.get_method_params(
            VIRTUALIZATION_NAMESPACE,
            MANAGEMENT_SERVICE,
            "ModifySystemSettings",
        )?;
        in_params.put_string("SystemSettings", &settings_text)?;

        let out = self.session.exec_method(
            VIRTUALIZATION_NAMESPACE,
            &service_path,
            "ModifySystemSettings",
            Some(&in_params),
        )?;

        match self.resolve(&out, MethodFamily::SystemSettings, "ModifySystemSettings")? {
            ReturnCode::Success => {
                tracing::info!(vm = %vssd.name, "updated {}", what);
                Ok(())
            }
            code => Err(Error::ModifySettings {
                vm: vssd.name.clone(),
                code,
            }),
        }
    }

    /// Find the live (non-definition) settings object for a VM by name.
    fn live_vssd(&self, vm_name: &str) -> Result<LiveVssd> {
        let settings = self.session.query(
            VIRTUALIZATION_NAMESPACE,
            "Msvm_VirtualSystemSettingData",
            &[],
        )?;

        for setting in settings {
            let caption = setting.get_string_prop("Caption")?.unwrap_or_default();
            if caption != "Virtual Machine Settings" {
                continue;
            }
            let instance_id = setting.get_string_prop("InstanceID")?.unwrap_or_default();
            if instance_id.contains("Microsoft:Definition") {
                continue;
            }
            let Some(name) = setting.get_string_prop("ElementName")? else {
                continue;
            };
            if name.is_empty() || name != vm_name {
                continue;
            }
            let path = setting.get_path()?;
            return Ok(LiveVssd {
                object: setting,
                path,
                instance_id,
                name,
            });
        }
        Err(Error::VmNotFound(vm_name.to_string()))
    }

    fn service_path(&self) -> Result<String> {
        let service = self
            .session
            .singleton(VIRTUALIZATION_NAMESPACE, MANAGEMENT_SERVICE)?
            .ok_or(Error::ServiceUnavailable(MANAGEMENT_SERVICE))?;
        service.get_path()
    }

    fn resolve(
        &self,
        out: &windows::Win32::System::Wmi::IWbemClassObject,
        family: MethodFamily,
        operation: &'static str,
    ) -> Result<ReturnCode> {
        let raw = out.get_u32("ReturnValue")?.unwrap_or(0);
        match classify(family, raw) {
            ReturnCode::JobPending => {
                let job_path = out
                    .get_string_prop("Job")?
                    .ok_or(Error::MissingProperty("Job"))?;
                JobWaiter::new(self.session).wait_for_job(&job_path, operation)?;
                Ok(ReturnCode::Success)
            }
            code => Ok(code),
        }
    }
}

/// Live settings object of a VM, with its resolved identity.
#[cfg(windows)]
struct LiveVssd {
    object: windows::Win32::System::Wmi::IWbemClassObject,
    path: String,
    instance_id: String,
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_resource_reference_escapes_device_key() {
        let r = host_resource_reference("HOST01", "PCIP\\VEN_10DE\\4&2");
        assert!(r.starts_with("\\\\HOST01\\root\\virtualization\\v2:Msvm_PciExpress."));
        assert!(r.contains("DeviceID=\"PCIP\\\\VEN_10DE\\\\4&2\""));
        assert!(r.contains("SystemName=\"HOST01\""));
        assert!(r.contains("CreationClassName=\"Msvm_PciExpress\""));
    }

    #[test]
    fn test_device_key_round_trips_through_reference() {
        let key = "PCIP\\VEN_1,dev1";
        let r = host_resource_reference("HOST01", key);
        assert_eq!(device_key_from_host_resource(&r).as_deref(), Some(key));
    }

    #[test]
    fn test_device_key_from_malformed_reference() {
        assert_eq!(device_key_from_host_resource("no key here"), None);
        assert_eq!(device_key_from_host_resource("DeviceID=\"unterminated"), None);
    }

    #[test]
    fn test_device_id_from_host_resource() {
        let r = host_resource_reference("HOST01", "PCIP\\VEN_1,dev1");
        let id = device_id_from_host_resource(&r).unwrap();
        assert!(id.in_pool_namespace());
        assert_eq!(id.as_str(), "PCIP\\VEN_1,dev1");
    }
}
