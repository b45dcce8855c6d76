//! Virtual machine descriptors and device resource bindings.

pub mod binder;
pub mod settings;
mod types;

#[cfg(windows)]
pub use binder::ResourceBinder;
pub use settings::MmioGap;
pub use types::{new_binding_id, AssignmentRecord, VmDescriptor, VmState};
