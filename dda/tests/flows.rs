//! Flow tests over an in-memory operations backend.
//!
//! The double tracks each device through the ownership states the real
//! endpoint would move it through, so these tests observe the same
//! sequencing, rollback, and bookkeeping the orchestrator applies
//! against a live host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use windows_dda::{
    AssignmentOps, AssignmentRecord, DeviceId, DeviceLocation, Error, FlowStep, Orchestrator,
    Result, ReturnCode, RollbackStatus, VmDescriptor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DevState {
    HostEnabled,
    HostDisabled,
    PoolUnbound,
    PoolBound,
}

#[derive(Default)]
struct Failures {
    disable: bool,
    enable: bool,
    dismount: bool,
    attach_vm_missing: bool,
    mount: bool,
    location: bool,
}

/// In-memory stand-in for a connected host.
#[derive(Default)]
struct FakeHost {
    vms: Vec<VmDescriptor>,
    state: Mutex<HashMap<String, DevState>>,
    records: Mutex<Vec<AssignmentRecord>>,
    calls: Mutex<Vec<String>>,
    failures: Failures,
    /// Fail detach for this binding id only; settable mid-test.
    fail_detach_binding: Mutex<Option<String>>,
    next_binding: AtomicU32,
    /// When set, dismount parks on the first barrier, then the second.
    dismount_gate: Option<Arc<(Barrier, Barrier)>>,
}

impl FakeHost {
    fn new(vms: Vec<VmDescriptor>, devices: &[&str]) -> Self {
        let state = devices
            .iter()
            .map(|d| (d.to_string(), DevState::HostEnabled))
            .collect();
        Self {
            vms,
            state: Mutex::new(state),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn state_of(&self, device: &str) -> DevState {
        self.state.lock().unwrap()[device]
    }

    fn record_call(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn host_key(device: &DeviceId) -> String {
        device.to_host().as_str().to_string()
    }
}

impl AssignmentOps for FakeHost {
    fn set_device_enabled(&self, device: &DeviceId, enabled: bool) -> Result<()> {
        self.record_call(format!("set_enabled:{}:{}", device, enabled));
        if enabled && self.failures.enable {
            return Err(Error::DeviceToggle {
                device: device.clone(),
                enabled,
                code: ReturnCode::Unknown(5),
            });
        }
        if !enabled && self.failures.disable {
            return Err(Error::DeviceToggle {
                device: device.clone(),
                enabled,
                code: ReturnCode::Unknown(5),
            });
        }

        let key = Self::host_key(device);
        let mut state = self.state.lock().unwrap();
        match state.get(&key).copied() {
            Some(DevState::HostEnabled) if !enabled => {
                state.insert(key, DevState::HostDisabled);
            }
            Some(DevState::HostDisabled) if enabled => {
                state.insert(key, DevState::HostEnabled);
            }
            // Absent from the host view (pooled or unknown): no-op
            // success, mirroring the PnP toggle contract.
            _ => {}
        }
        Ok(())
    }

    fn dismount_to_pool(&self, device: &DeviceId) -> Result<()> {
        if let Some(gate) = &self.dismount_gate {
            gate.0.wait();
            gate.1.wait();
        }
        self.record_call(format!("dismount:{}", device));
        if self.failures.dismount {
            return Err(Error::Reparent {
                device: device.clone(),
                operation: "DismountAssignableDevice",
                code: ReturnCode::AccessDenied,
            });
        }

        let key = Self::host_key(device);
        let mut state = self.state.lock().unwrap();
        match state.get(&key).copied() {
            Some(DevState::HostDisabled) => {
                state.insert(key, DevState::PoolUnbound);
                Ok(())
            }
            _ => Err(Error::Reparent {
                device: device.clone(),
                operation: "DismountAssignableDevice",
                code: ReturnCode::InvalidState,
            }),
        }
    }

    fn device_location(&self, device: &DeviceId) -> Result<DeviceLocation> {
        self.record_call(format!("location:{}", device));
        if self.failures.location {
            return Err(Error::DeviceNotInPool(device.clone()));
        }
        let key = Self::host_key(device);
        match self.state.lock().unwrap().get(&key) {
            Some(DevState::PoolUnbound) | Some(DevState::PoolBound) => {
                Ok(DeviceLocation::new(format!("LOC({})", key)))
            }
            _ => Err(Error::DeviceNotInPool(device.clone())),
        }
    }

    fn mount_back_to_host(&self, device: &DeviceId, location: &DeviceLocation) -> Result<()> {
        self.record_call(format!("mount:{}:{}", device, location));
        if self.failures.mount {
            return Err(Error::Reparent {
                device: device.clone(),
                operation: "MountAssignableDevice",
                code: ReturnCode::OperationFailed,
            });
        }

        let key = Self::host_key(device);
        let mut state = self.state.lock().unwrap();
        match state.get(&key).copied() {
            Some(DevState::PoolUnbound) => {
                state.insert(key, DevState::HostDisabled);
                Ok(())
            }
            _ => Err(Error::Reparent {
                device: device.clone(),
                operation: "MountAssignableDevice",
                code: ReturnCode::InvalidState,
            }),
        }
    }

    fn attach_to_vm(&self, vm: &VmDescriptor, device: &DeviceId) -> Result<AssignmentRecord> {
        self.record_call(format!("attach:{}:{}", vm.name, device));
        if self.failures.attach_vm_missing {
            return Err(Error::VmNotFound(vm.name.clone()));
        }

        let key = Self::host_key(device);
        let mut state = self.state.lock().unwrap();
        match state.get(&key).copied() {
            Some(DevState::PoolUnbound) => {
                state.insert(key, DevState::PoolBound);
            }
            _ => {
                return Err(Error::DeviceNotInPool(device.clone()));
            }
        }
        drop(state);

        let record = AssignmentRecord {
            binding_id: format!(
                "{}\\{:08X}",
                vm.id,
                self.next_binding.fetch_add(1, Ordering::SeqCst)
            ),
            device: device.to_pool(),
            vm_id: vm.id.clone(),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    fn detach_from_vm(&self, record: &AssignmentRecord) -> Result<()> {
        self.record_call(format!("detach:{}", record.binding_id));
        let failing = self.fail_detach_binding.lock().unwrap().clone();
        if failing.as_deref() == Some(record.binding_id.as_str()) {
            return Err(Error::Detach {
                binding_id: record.binding_id.clone(),
                code: ReturnCode::SystemBusy,
            });
        }

        let mut records = self.records.lock().unwrap();
        let Some(pos) = records.iter().position(|r| r.binding_id == record.binding_id) else {
            return Err(Error::AssignmentNotFound(record.binding_id.clone()));
        };
        records.remove(pos);

        let key = Self::host_key(&record.device);
        self.state
            .lock()
            .unwrap()
            .insert(key, DevState::PoolUnbound);
        Ok(())
    }

    fn assignments(&self, vm: &VmDescriptor) -> Result<Vec<AssignmentRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.vm_id == vm.id)
            .cloned()
            .collect())
    }

    fn virtual_machines(&self) -> Result<Vec<VmDescriptor>> {
        Ok(self.vms.clone())
    }

    fn pool_devices(&self) -> Result<Vec<DeviceId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| matches!(s, DevState::PoolUnbound | DevState::PoolBound))
            .map(|(d, _)| DeviceId::new(d.clone()).to_pool())
            .collect())
    }
}

fn gpu_vm() -> VmDescriptor {
    VmDescriptor::new("0BAD-F00D", "GPU-VM")
}

const DEV: &str = "PCI\\VEN_1,dev1";

#[test]
fn attach_runs_steps_in_order_and_yields_pool_identifier() {
    let orch = Orchestrator::new(FakeHost::new(vec![gpu_vm()], &[DEV]));
    let record = orch.attach_device(&gpu_vm(), &DeviceId::new(DEV)).unwrap();

    assert_eq!(record.device.as_str(), "PCIP\\VEN_1,dev1");
    assert_eq!(record.vm_id, "0BAD-F00D");
    assert_eq!(
        orch.ops().calls(),
        vec![
            format!("set_enabled:{}:false", DEV),
            format!("dismount:{}", DEV),
            format!("attach:GPU-VM:PCIP\\VEN_1,dev1"),
        ]
    );
    assert_eq!(orch.ops().state_of(DEV), DevState::PoolBound);
}

#[test]
fn attach_failure_at_vm_step_rolls_back_exactly_once() {
    let mut fake = FakeHost::new(vec![gpu_vm()], &[DEV]);
    fake.failures.attach_vm_missing = true;
    let orch = Orchestrator::new(fake);

    let err = orch
        .attach_device(&gpu_vm(), &DeviceId::new(DEV))
        .unwrap_err();

    assert_eq!(err.failed_step, Some(FlowStep::AttachToVm));
    assert!(matches!(err.rollback, RollbackStatus::Completed));
    assert!(matches!(err.source, Error::VmNotFound(_)));

    let enables: Vec<_> = orch
        .ops()
        .calls()
        .into_iter()
        .filter(|c| c == &format!("set_enabled:{}:true", DEV))
        .collect();
    assert_eq!(enables.len(), 1, "rollback must re-enable exactly once");
}

#[test]
fn attach_failure_at_dismount_restores_host_enabled() {
    let mut fake = FakeHost::new(vec![gpu_vm()], &[DEV]);
    fake.failures.dismount = true;
    let orch = Orchestrator::new(fake);

    let err = orch
        .attach_device(&gpu_vm(), &DeviceId::new(DEV))
        .unwrap_err();

    assert_eq!(err.failed_step, Some(FlowStep::DismountToPool));
    assert!(matches!(err.rollback, RollbackStatus::Completed));
    assert_eq!(orch.ops().state_of(DEV), DevState::HostEnabled);
}

#[test]
fn failed_rollback_is_reported_for_manual_intervention() {
    let mut fake = FakeHost::new(vec![gpu_vm()], &[DEV]);
    fake.failures.dismount = true;
    fake.failures.enable = true;
    let orch = Orchestrator::new(fake);

    let err = orch
        .attach_device(&gpu_vm(), &DeviceId::new(DEV))
        .unwrap_err();

    assert_eq!(err.failed_step, Some(FlowStep::DismountToPool));
    assert!(err.rollback_failed());
    let rendered = err.to_string();
    assert!(rendered.contains("dismount to pool"));
    assert!(rendered.contains("manual intervention"));
    // Nothing re-enabled it, so the device stays disabled.
    assert_eq!(orch.ops().state_of(DEV), DevState::HostDisabled);
}

#[test]
fn attach_failure_before_disable_commits_attempts_no_rollback() {
    let mut fake = FakeHost::new(vec![gpu_vm()], &[DEV]);
    fake.failures.disable = true;
    let orch = Orchestrator::new(fake);

    let err = orch
        .attach_device(&gpu_vm(), &DeviceId::new(DEV))
        .unwrap_err();

    assert_eq!(err.failed_step, Some(FlowStep::DisableHostDevice));
    assert!(matches!(err.rollback, RollbackStatus::NotAttempted));
    assert!(!orch
        .ops()
        .calls()
        .contains(&format!("set_enabled:{}:true", DEV)));
}

#[test]
fn teardown_returns_device_to_pre_attach_identifier() {
    let orch = Orchestrator::new(FakeHost::new(vec![gpu_vm()], &[DEV]));
    let record = orch.attach_device(&gpu_vm(), &DeviceId::new(DEV)).unwrap();

    orch.remove_device(&record).unwrap();

    assert_eq!(orch.ops().state_of(DEV), DevState::HostEnabled);
    assert_eq!(record.device.to_host().as_str(), DEV);

    let calls = orch.ops().calls();
    let tail = &calls[calls.len() - 4..];
    assert_eq!(tail[0], format!("location:PCIP\\VEN_1,dev1"));
    assert_eq!(tail[1], format!("detach:{}", record.binding_id));
    assert!(tail[2].starts_with("mount:PCIP\\VEN_1,dev1:LOC("));
    assert_eq!(tail[3], format!("set_enabled:{}:true", DEV));
}

#[test]
fn teardown_detach_failure_changes_nothing() {
    let orch = Orchestrator::new(FakeHost::new(vec![gpu_vm()], &[DEV]));
    let record = orch.attach_device(&gpu_vm(), &DeviceId::new(DEV)).unwrap();

    orch.ops().records.lock().unwrap().clear();
    let err = orch.remove_device(&record).unwrap_err();

    assert_eq!(err.failed_step, Some(FlowStep::DetachFromVm));
    assert!(matches!(err.rollback, RollbackStatus::NotAttempted));
    assert!(matches!(err.source, Error::AssignmentNotFound(_)));
    assert_eq!(orch.ops().state_of(DEV), DevState::PoolBound);
}

#[test]
fn teardown_mount_failure_is_surfaced_without_compensation() {
    let mut fake = FakeHost::new(vec![gpu_vm()], &[DEV]);
    fake.failures.mount = true;
    let orch = Orchestrator::new(fake);
    let record = orch.attach_device(&gpu_vm(), &DeviceId::new(DEV)).unwrap();

    let err = orch.remove_device(&record).unwrap_err();

    assert_eq!(err.failed_step, Some(FlowStep::MountToHost));
    assert!(matches!(err.rollback, RollbackStatus::NotAttempted));
    // Detach committed, mount did not: the device is left pool-unbound.
    assert_eq!(orch.ops().state_of(DEV), DevState::PoolUnbound);
    assert!(!orch
        .ops()
        .calls()
        .contains(&format!("set_enabled:{}:true", DEV)));
}

#[test]
fn second_flow_on_busy_device_is_rejected_then_admitted_after_release() {
    let gate = Arc::new((Barrier::new(2), Barrier::new(2)));
    let mut fake = FakeHost::new(vec![gpu_vm()], &[DEV]);
    fake.dismount_gate = Some(Arc::clone(&gate));
    let orch = Orchestrator::new(fake);

    let handle = orch
        .spawn_attach(gpu_vm(), DeviceId::new(DEV))
        .expect("first flow admitted");

    // Worker is now parked inside its dismount step, claim held.
    gate.0.wait();
    let err = orch
        .attach_device(&gpu_vm(), &DeviceId::new(DEV))
        .unwrap_err();
    assert!(err.failed_step.is_none());
    assert!(matches!(err.source, Error::FlowInProgress { .. }));

    gate.1.wait();
    handle.join().expect("first flow completes");

    // The claim is gone; a new flow gets past admission and fails on
    // real state instead (the device is already pool-bound).
    let err = orch
        .attach_device(&gpu_vm(), &DeviceId::new(DEV))
        .unwrap_err();
    assert!(!matches!(err.source, Error::FlowInProgress { .. }));
    assert_eq!(err.failed_step, Some(FlowStep::DismountToPool));
}

#[test]
fn concurrent_flows_on_same_vm_are_rejected() {
    let gate = Arc::new((Barrier::new(2), Barrier::new(2)));
    let mut fake = FakeHost::new(vec![gpu_vm()], &[DEV, "PCI\\VEN_2,dev2"]);
    fake.dismount_gate = Some(Arc::clone(&gate));
    let orch = Orchestrator::new(fake);

    let handle = orch
        .spawn_attach(gpu_vm(), DeviceId::new(DEV))
        .expect("first flow admitted");
    gate.0.wait();

    // Different device, same VM: still rejected.
    let err = orch
        .attach_device(&gpu_vm(), &DeviceId::new("PCI\\VEN_2,dev2"))
        .unwrap_err();
    assert!(matches!(err.source, Error::FlowInProgress { .. }));

    gate.1.wait();
    handle.join().expect("first flow completes");
}

#[test]
fn bulk_teardown_accounts_for_every_enumerated_record() {
    let vm_a = VmDescriptor::new("VM-A", "alpha");
    let vm_b = VmDescriptor::new("VM-B", "beta");
    let fake = FakeHost::new(
        vec![vm_a.clone(), vm_b.clone()],
        &[DEV, "PCI\\VEN_2,dev2", "PCI\\VEN_3,dev3"],
    );
    let orch = Orchestrator::new(fake);

    let r1 = orch.attach_device(&vm_a, &DeviceId::new(DEV)).unwrap();
    let _r2 = orch
        .attach_device(&vm_a, &DeviceId::new("PCI\\VEN_2,dev2"))
        .unwrap();
    let _r3 = orch
        .attach_device(&vm_b, &DeviceId::new("PCI\\VEN_3,dev3"))
        .unwrap();

    // One detach in the batch fails; the rest proceed.
    *orch.ops().fail_detach_binding.lock().unwrap() = Some(r1.binding_id.clone());

    let report = orch.remove_all_assignments().unwrap();

    assert_eq!(report.assignment_count(), 3);
    assert_eq!(report.total(), report.succeeded() + report.failed());
    assert!(report.skipped_vms.is_empty());
    assert!(report.pool_scan_error.is_none());
    assert!(report.failed() >= 1);
    assert!(!report.is_clean());

    // The two cleanly detached devices made it all the way home.
    assert_eq!(orch.ops().state_of("PCI\\VEN_2,dev2"), DevState::HostEnabled);
    assert_eq!(orch.ops().state_of("PCI\\VEN_3,dev3"), DevState::HostEnabled);
}

#[test]
fn bulk_teardown_on_idle_host_is_clean_and_empty() {
    let orch = Orchestrator::new(FakeHost::new(vec![gpu_vm()], &[DEV]));
    let report = orch.remove_all_assignments().unwrap();
    assert_eq!(report.total(), 0);
    assert!(report.is_clean());
    assert_eq!(report.to_string(), "0 of 0 items succeeded, 0 failed");
}

#[test]
fn spawned_flows_report_through_their_handles() {
    let orch = Orchestrator::new(FakeHost::new(vec![gpu_vm()], &[DEV]));

    let record = orch
        .spawn_attach(gpu_vm(), DeviceId::new(DEV))
        .expect("admitted")
        .join()
        .expect("attach succeeds");
    assert_eq!(record.device.as_str(), "PCIP\\VEN_1,dev1");

    orch.spawn_remove(record)
        .expect("admitted")
        .join()
        .expect("teardown succeeds");
    assert_eq!(orch.ops().state_of(DEV), DevState::HostEnabled);
}
