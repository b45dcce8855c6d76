//! # windows-dda
//!
//! Typed Discrete Device Assignment (DDA) orchestration for Hyper-V.
//!
//! This crate moves physical PCI devices between exclusive host-OS
//! control and a virtual machine's address space, over the WMI-based
//! Hyper-V management APIs (`root\virtualization\v2`). The assignment
//! flow is a multi-step, partially reversible transition (disable the
//! host device, dismount it into the assignable-device pool, bind it
//! to a VM) in which every step can fail on its own, so the flows are
//! driven by an orchestrator that applies compensating rollback
//! instead of leaving hardware stranded between owners.
//!
//! ## Features
//!
//! - **Typed flows**: attach and teardown as single operations with
//!   explicit per-step failure reporting
//! - **Compensating rollback**: a failed attach re-enables the host
//!   device, and a failed rollback is reported as needing an operator
//! - **Classified outcomes**: numeric method results mapped to named
//!   categories per method family, unknown codes never pass as success
//! - **Bulk recovery**: best-effort teardown of every assignment on a
//!   host with a per-item report
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn demo() -> windows_dda::Result<()> {
//! use windows_dda::{DdaHost, DeviceId, Orchestrator};
//!
//! let host = DdaHost::connect()?;
//! let vm = host
//!     .vms_with_state()?
//!     .into_iter()
//!     .map(|(vm, _)| vm)
//!     .find(|vm| vm.name == "GPU-VM")
//!     .expect("VM exists");
//!
//! let orchestrator = Orchestrator::new(host);
//! let device = DeviceId::new("PCI\\VEN_10DE&DEV_1EB8\\4&2C34A,0");
//!
//! match orchestrator.attach_device(&vm, &device) {
//!     Ok(record) => println!("attached as {}", record.binding_id),
//!     Err(e) => eprintln!("{e}"),
//! }
//! # Ok(())
//! # }
//! # fn main() {}
//! ```
//!
//! ## Requirements
//!
//! - Windows Server 2016+ (build 14393 introduced assignable devices)
//! - Hyper-V role enabled
//! - Administrator privileges
//!
//! The flow orchestration, return-code classification, and identifier
//! handling are platform-independent; only the WMI transport and the
//! components built directly on it require Windows.

pub mod classify;
#[cfg(windows)]
mod dda;
pub mod device;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod vm;
#[cfg(windows)]
pub mod wmi;

// Re-export main types at crate root
pub use classify::{classify, MethodFamily, ReturnCode};
#[cfg(windows)]
pub use dda::DdaHost;
pub use error::{Error, JobState, Result};

// Device types
pub use device::{DeviceId, DeviceLocation, DeviceSurvey, PnpDeviceInfo};
#[cfg(windows)]
pub use device::{DevicePool, PnpDevices};

// VM types
pub use vm::{AssignmentRecord, MmioGap, VmDescriptor, VmState};
#[cfg(windows)]
pub use vm::ResourceBinder;

// Host inspection types
pub use host::{HostCompatibility, ServiceState, HYPERV_SERVICES, MIN_DDA_BUILD};

// Flow orchestration
pub use orchestrator::{
    AssignmentOps, BulkItem, BulkReport, BulkTarget, FlowError, FlowHandle, FlowStep,
    Orchestrator, RollbackStatus,
};

// WMI types for advanced usage
#[cfg(windows)]
pub use wmi::{
    Credentials, JobWaitConfig, JobWaiter, SessionConfig, WbemClassObjectExt, WmiSession,
    CIMV2_NAMESPACE, VIRTUALIZATION_NAMESPACE,
};
