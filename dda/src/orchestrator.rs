//! Sequencing of device attach and teardown flows.
//!
//! A flow walks one device through its ownership states:
//!
//! ```text
//! HostEnabled -> HostDisabled -> PoolUnbound -> PoolBoundToVm
//! ```
//!
//! and back again for teardown. Steps are strictly sequential; a step
//! only starts once the previous one classified as success. The attach
//! flow is the only place compensation happens: once the device has
//! been disabled, any later failure re-enables it exactly once, and a
//! failed compensation is surfaced as its own condition rather than
//! retried. Teardown never compensates; a partial teardown leaves the
//! device pool-unbound and says so.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::device::{DeviceId, DeviceLocation};
use crate::error::{Error, Result};
use crate::vm::{AssignmentRecord, VmDescriptor};

/// Operations the assignment flows drive.
///
/// Implemented by the connected host on Windows; tests substitute an
/// in-memory double. Device arguments arrive in the namespace the
/// operation works in: host form for PnP and dismount calls, pool form
/// for everything that talks to the assignable-device pool.
pub trait AssignmentOps {
    /// Set a host-visible device's enabled state.
    fn set_device_enabled(&self, device: &DeviceId, enabled: bool) -> Result<()>;

    /// Move a host device into the assignable-device pool.
    fn dismount_to_pool(&self, device: &DeviceId) -> Result<()>;

    /// Location path of a pool-resident device.
    fn device_location(&self, device: &DeviceId) -> Result<DeviceLocation>;

    /// Move a pooled device back into the host namespace.
    fn mount_back_to_host(&self, device: &DeviceId, location: &DeviceLocation) -> Result<()>;

    /// Bind a pooled device to a VM.
    fn attach_to_vm(&self, vm: &VmDescriptor, device: &DeviceId) -> Result<AssignmentRecord>;

    /// Remove a device binding from its VM.
    fn detach_from_vm(&self, record: &AssignmentRecord) -> Result<()>;

    /// Enumerate a VM's device assignments.
    fn assignments(&self, vm: &VmDescriptor) -> Result<Vec<AssignmentRecord>>;

    /// Enumerate the VMs known to the endpoint.
    fn virtual_machines(&self) -> Result<Vec<VmDescriptor>>;

    /// Enumerate pool-resident devices.
    fn pool_devices(&self) -> Result<Vec<DeviceId>>;
}

/// One step of an attach or teardown flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    /// Disable the device in the host PnP namespace.
    DisableHostDevice,
    /// Hand the device over to the assignable-device pool.
    DismountToPool,
    /// Bind the pooled device to the target VM.
    AttachToVm,
    /// Capture the pooled device's location path.
    CaptureLocation,
    /// Remove the device binding from its VM.
    DetachFromVm,
    /// Return the device from the pool to the host namespace.
    MountToHost,
    /// Re-enable the device in the host PnP namespace.
    EnableHostDevice,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowStep::DisableHostDevice => "disable host device",
            FlowStep::DismountToPool => "dismount to pool",
            FlowStep::AttachToVm => "attach to VM",
            FlowStep::CaptureLocation => "capture device location",
            FlowStep::DetachFromVm => "detach from VM",
            FlowStep::MountToHost => "mount back to host",
            FlowStep::EnableHostDevice => "enable host device",
        };
        write!(f, "{}", s)
    }
}

/// What happened to the compensating action after a failed attach step.
#[derive(Debug)]
pub enum RollbackStatus {
    /// No compensation was attempted (nothing had committed yet, or the
    /// flow never compensates).
    NotAttempted,
    /// The device was re-enabled on the host.
    Completed,
    /// Compensation itself failed; the device may be left disabled and
    /// unbound. Requires manual operator intervention.
    Failed(Error),
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackStatus::NotAttempted => write!(f, "no compensation attempted"),
            RollbackStatus::Completed => write!(f, "device re-enabled on the host"),
            RollbackStatus::Failed(e) => write!(
                f,
                "rollback failed, device may be left disabled and unbound; manual intervention required: {}",
                e
            ),
        }
    }
}

/// A failed (or rejected) flow, with enough context for an operator.
#[derive(Debug)]
pub struct FlowError {
    /// Device the flow was working on (host-namespace form).
    pub device: DeviceId,
    /// Target VM, when the flow had one.
    pub vm: Option<String>,
    /// Step that failed; `None` when the flow was rejected before it
    /// started.
    pub failed_step: Option<FlowStep>,
    /// Outcome of the compensating action.
    pub rollback: RollbackStatus,
    /// Underlying error.
    pub source: Error,
}

impl FlowError {
    fn rejected(device: DeviceId, vm: Option<String>, source: Error) -> Self {
        Self {
            device,
            vm,
            failed_step: None,
            rollback: RollbackStatus::NotAttempted,
            source,
        }
    }

    fn failed(
        device: DeviceId,
        vm: Option<String>,
        step: FlowStep,
        rollback: RollbackStatus,
        source: Error,
    ) -> Self {
        Self {
            device,
            vm,
            failed_step: Some(step),
            rollback,
            source,
        }
    }

    /// Check whether compensation itself failed.
    pub fn rollback_failed(&self) -> bool {
        matches!(self.rollback, RollbackStatus::Failed(_))
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failed_step {
            None => write!(
                f,
                "flow for device '{}' was not started: {}",
                self.device, self.source
            ),
            Some(step) => {
                write!(f, "step '{}' failed for device '{}'", step, self.device)?;
                if let Some(ref vm) = self.vm {
                    write!(f, " (VM '{}')", vm)?;
                }
                write!(f, ": {}; {}", self.source, self.rollback)
            }
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Handle to a flow running on a background worker.
///
/// The flow runs to completion whether or not the handle is joined;
/// there is no mid-flow cancellation.
pub struct FlowHandle<T> {
    handle: thread::JoinHandle<std::result::Result<T, FlowError>>,
}

impl<T> FlowHandle<T> {
    /// Check whether the flow has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the flow completes and return its outcome.
    pub fn join(self) -> std::result::Result<T, FlowError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl<T> fmt::Debug for FlowHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowHandle")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

/// Target of one item in a bulk teardown.
#[derive(Debug)]
pub enum BulkTarget {
    /// Detaching one assignment record.
    Assignment {
        /// Name of the owning VM.
        vm: String,
        /// The record that was detached.
        record: AssignmentRecord,
    },
    /// Returning one pool-resident device to the host.
    PoolDevice {
        /// The device being recovered.
        device: DeviceId,
    },
}

impl fmt::Display for BulkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkTarget::Assignment { vm, record } => {
                write!(f, "assignment '{}' on VM '{}'", record.binding_id, vm)
            }
            BulkTarget::PoolDevice { device } => write!(f, "pooled device '{}'", device),
        }
    }
}

/// Outcome of one bulk-teardown item.
#[derive(Debug)]
pub struct BulkItem {
    /// What was processed.
    pub target: BulkTarget,
    /// The failure, if the item failed.
    pub error: Option<Error>,
}

/// Aggregate outcome of a bulk teardown.
///
/// Per-item failures are collected instead of aborting the batch; the
/// operator goal is best-effort recovery of every device.
#[derive(Debug, Default)]
pub struct BulkReport {
    /// One entry per assignment record and per pool device processed.
    pub items: Vec<BulkItem>,
    /// VMs whose assignments could not be enumerated, with the reason.
    pub skipped_vms: Vec<(String, Error)>,
    /// Set when the pool itself could not be enumerated; the recovery
    /// phase was skipped entirely.
    pub pool_scan_error: Option<Error>,
}

impl BulkReport {
    /// Number of items processed.
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Number of items that completed.
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_none()).count()
    }

    /// Number of items that failed.
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_some()).count()
    }

    /// Number of assignment records in the batch.
    pub fn assignment_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.target, BulkTarget::Assignment { .. }))
            .count()
    }

    /// Check that everything was enumerated and processed cleanly.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.skipped_vms.is_empty() && self.pool_scan_error.is_none()
    }
}

impl fmt::Display for BulkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} items succeeded, {} failed",
            self.succeeded(),
            self.total(),
            self.failed()
        )?;
        if !self.skipped_vms.is_empty() {
            write!(f, "; {} VM(s) could not be enumerated", self.skipped_vms.len())?;
        }
        if self.pool_scan_error.is_some() {
            write!(f, "; pool enumeration failed, recovery phase skipped")?;
        }
        Ok(())
    }
}

/// Drives attach and teardown flows against an operations backend.
///
/// Cloning is cheap; clones share the in-flight bookkeeping, so flows
/// started from any clone still exclude each other per device and VM.
pub struct Orchestrator<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    ops: S,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<S> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: AssignmentOps> Orchestrator<S> {
    /// Create an orchestrator over an operations backend.
    pub fn new(ops: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                ops,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
            }),
        }
    }

    /// Access the underlying operations backend.
    pub fn ops(&self) -> &S {
        &self.inner.ops
    }

    /// Attach a device to a VM, blocking until the flow completes.
    ///
    /// Runs disable -> dismount -> attach. On a failure after the
    /// device was disabled, re-enables it exactly once as compensation.
    pub fn attach_device(
        &self,
        vm: &VmDescriptor,
        device: &DeviceId,
    ) -> std::result::Result<AssignmentRecord, FlowError> {
        let _guard = self
            .claim(&[device_key(device), vm_key(&vm.id)])
            .map_err(|e| FlowError::rejected(device.to_host(), Some(vm.name.clone()), e))?;
        self.run_attach(vm, device)
    }

    /// Attach a device to a VM on a background worker.
    ///
    /// The device/VM pair is claimed before the worker starts, so a
    /// competing flow is rejected immediately rather than queued behind
    /// the worker.
    pub fn spawn_attach(
        &self,
        vm: VmDescriptor,
        device: DeviceId,
    ) -> std::result::Result<FlowHandle<AssignmentRecord>, FlowError>
    where
        S: Send + Sync + 'static,
    {
        let guard = self
            .claim(&[device_key(&device), vm_key(&vm.id)])
            .map_err(|e| FlowError::rejected(device.to_host(), Some(vm.name.clone()), e))?;

        let host_id = device.to_host();
        let vm_name = vm.name.clone();
        let this = self.clone();
        let handle = thread::Builder::new()
            .name("dda-attach".to_string())
            .spawn(move || {
                let _guard = guard;
                this.run_attach(&vm, &device)
            })
            .map_err(|e| FlowError::rejected(host_id, Some(vm_name), Error::Io(e)))?;
        Ok(FlowHandle { handle })
    }

    /// Tear an assignment down, blocking until the flow completes.
    ///
    /// Runs capture-location -> detach -> mount -> enable. Teardown
    /// never compensates: a detach failure changes nothing, and a later
    /// failure leaves the device pool-unbound and is surfaced as-is.
    pub fn remove_device(&self, record: &AssignmentRecord) -> std::result::Result<(), FlowError> {
        let _guard = self
            .claim(&[device_key(&record.device), vm_key(&record.vm_id)])
            .map_err(|e| {
                FlowError::rejected(record.device.to_host(), Some(record.vm_id.clone()), e)
            })?;
        self.run_remove(record)
    }

    /// Tear an assignment down on a background worker.
    pub fn spawn_remove(
        &self,
        record: AssignmentRecord,
    ) -> std::result::Result<FlowHandle<()>, FlowError>
    where
        S: Send + Sync + 'static,
    {
        let guard = self
            .claim(&[device_key(&record.device), vm_key(&record.vm_id)])
            .map_err(|e| {
                FlowError::rejected(record.device.to_host(), Some(record.vm_id.clone()), e)
            })?;

        let host_id = record.device.to_host();
        let vm_id = record.vm_id.clone();
        let this = self.clone();
        let handle = thread::Builder::new()
            .name("dda-remove".to_string())
            .spawn(move || {
                let _guard = guard;
                this.run_remove(&record)
            })
            .map_err(|e| FlowError::rejected(host_id, Some(vm_id), Error::Io(e)))?;
        Ok(FlowHandle { handle })
    }

    /// Detach every assignment on every VM, then return every pooled
    /// device to the host, best-effort.
    ///
    /// Item failures never abort the batch; they are collected in the
    /// report. Fails outright only when the VM inventory itself cannot
    /// be enumerated.
    pub fn remove_all_assignments(&self) -> Result<BulkReport> {
        let vms = self.inner.ops.virtual_machines()?;
        let mut report = BulkReport::default();

        let mut batch = Vec::new();
        for vm in &vms {
            match self.inner.ops.assignments(vm) {
                Ok(records) => batch.extend(records.into_iter().map(|r| (vm.clone(), r))),
                Err(e) => {
                    tracing::warn!(vm = %vm.name, error = %e, "could not enumerate assignments");
                    report.skipped_vms.push((vm.name.clone(), e));
                }
            }
        }

        tracing::info!(assignments = batch.len(), "starting bulk teardown");
        for (vm, record) in batch {
            let error = self.detach_one(&vm, &record).err();
            if let Some(ref e) = error {
                tracing::warn!(binding = %record.binding_id, error = %e, "bulk detach failed");
            }
            report.items.push(BulkItem {
                target: BulkTarget::Assignment {
                    vm: vm.name.clone(),
                    record,
                },
                error,
            });
        }

        match self.inner.ops.pool_devices() {
            Ok(devices) => {
                for device in devices {
                    let error = self.recover_one(&device).err();
                    if let Some(ref e) = error {
                        tracing::warn!(device = %device, error = %e, "bulk recovery failed");
                    }
                    report.items.push(BulkItem {
                        target: BulkTarget::PoolDevice { device },
                        error,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not enumerate pooled devices");
                report.pool_scan_error = Some(e);
            }
        }

        tracing::info!(
            total = report.total(),
            failed = report.failed(),
            "bulk teardown finished"
        );
        Ok(report)
    }

    fn run_attach(
        &self,
        vm: &VmDescriptor,
        device: &DeviceId,
    ) -> std::result::Result<AssignmentRecord, FlowError> {
        let host_id = device.to_host();
        let pool_id = device.to_pool();
        tracing::info!(device = %host_id, vm = %vm.name, "starting attach flow");

        if let Err(e) = self.inner.ops.set_device_enabled(&host_id, false) {
            return Err(FlowError::failed(
                host_id,
                Some(vm.name.clone()),
                FlowStep::DisableHostDevice,
                RollbackStatus::NotAttempted,
                e,
            ));
        }

        if let Err(e) = self.inner.ops.dismount_to_pool(&host_id) {
            let rollback = self.reenable(&host_id);
            return Err(FlowError::failed(
                host_id,
                Some(vm.name.clone()),
                FlowStep::DismountToPool,
                rollback,
                e,
            ));
        }

        match self.inner.ops.attach_to_vm(vm, &pool_id) {
            Ok(record) => {
                tracing::info!(device = %pool_id, vm = %vm.name, binding = %record.binding_id, "attach flow completed");
                Ok(record)
            }
            Err(e) => {
                let rollback = self.reenable(&host_id);
                Err(FlowError::failed(
                    host_id,
                    Some(vm.name.clone()),
                    FlowStep::AttachToVm,
                    rollback,
                    e,
                ))
            }
        }
    }

    fn run_remove(&self, record: &AssignmentRecord) -> std::result::Result<(), FlowError> {
        let pool_id = record.device.to_pool();
        let host_id = record.device.to_host();
        tracing::info!(device = %host_id, vm = %record.vm_id, "starting teardown flow");

        // The location is only readable while the device is pooled, and
        // only trustworthy when captured right before it is used.
        let location = self
            .inner
            .ops
            .device_location(&pool_id)
            .map_err(|e| self.teardown_error(record, FlowStep::CaptureLocation, e))?;

        self.inner
            .ops
            .detach_from_vm(record)
            .map_err(|e| self.teardown_error(record, FlowStep::DetachFromVm, e))?;

        self.inner
            .ops
            .mount_back_to_host(&pool_id, &location)
            .map_err(|e| self.teardown_error(record, FlowStep::MountToHost, e))?;

        self.inner
            .ops
            .set_device_enabled(&host_id, true)
            .map_err(|e| self.teardown_error(record, FlowStep::EnableHostDevice, e))?;

        tracing::info!(device = %host_id, "teardown flow completed");
        Ok(())
    }

    fn teardown_error(&self, record: &AssignmentRecord, step: FlowStep, source: Error) -> FlowError {
        FlowError::failed(
            record.device.to_host(),
            Some(record.vm_id.clone()),
            step,
            RollbackStatus::NotAttempted,
            source,
        )
    }

    fn reenable(&self, host_id: &DeviceId) -> RollbackStatus {
        tracing::warn!(device = %host_id, "attach flow failed, re-enabling host device");
        match self.inner.ops.set_device_enabled(host_id, true) {
            Ok(()) => RollbackStatus::Completed,
            Err(e) => {
                tracing::error!(device = %host_id, error = %e, "rollback failed; manual intervention required");
                RollbackStatus::Failed(e)
            }
        }
    }

    fn detach_one(&self, vm: &VmDescriptor, record: &AssignmentRecord) -> Result<()> {
        let _guard = self.claim(&[device_key(&record.device), vm_key(&vm.id)])?;
        self.inner.ops.detach_from_vm(record)
    }

    fn recover_one(&self, device: &DeviceId) -> Result<()> {
        let _guard = self.claim(&[device_key(device)])?;
        let pool_id = device.to_pool();
        let location = self.inner.ops.device_location(&pool_id)?;
        self.inner.ops.mount_back_to_host(&pool_id, &location)?;
        self.inner.ops.set_device_enabled(&device.to_host(), true)
    }

    fn claim(&self, keys: &[String]) -> Result<FlowGuard> {
        let mut held = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(key) = keys.iter().find(|k| held.contains(*k)) {
            return Err(Error::FlowInProgress {
                target: key.clone(),
            });
        }
        for key in keys {
            held.insert(key.clone());
        }
        Ok(FlowGuard {
            keys: keys.to_vec(),
            in_flight: Arc::clone(&self.inner.in_flight),
        })
    }
}

fn device_key(device: &DeviceId) -> String {
    format!("device:{}", device.to_host())
}

fn vm_key(vm_id: &str) -> String {
    format!("vm:{}", vm_id)
}

/// Releases the claimed device/VM keys when the flow ends, on every
/// exit path.
struct FlowGuard {
    keys: Vec<String>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        let mut held = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        for key in &self.keys {
            held.remove(key);
        }
    }
}
