//! Integration tests against a live Hyper-V host.
//!
//! These tests require:
//! - Windows with the Hyper-V role enabled
//! - Administrator privileges
//! - The `integration` feature enabled
//!
//! Run with: cargo test -p windows-dda --features integration -- --test-threads=1
//!
//! Everything here is read-only; no devices are moved and no VM
//! settings are touched.

#![cfg(all(windows, feature = "integration"))]

use windows_dda::{AssignmentOps, DdaHost};

#[test]
fn connects_to_local_host() {
    let host = DdaHost::connect().expect("local WMI connection");
    assert!(!host.session().is_remote());
    assert_eq!(host.session().machine_label(), "localhost");
}

#[test]
fn reports_host_compatibility() {
    let host = DdaHost::connect().expect("local WMI connection");
    let compat = host.check_host().expect("OS inventory readable");
    assert!(compat.build_number > 0);
    assert!(!compat.os_name.is_empty());
}

#[test]
fn lists_hyperv_services() {
    let host = DdaHost::connect().expect("local WMI connection");
    let services = host.services().expect("service inventory readable");
    // vmms is present wherever the Hyper-V role is installed.
    assert!(services.iter().any(|s| s.name == "vmms"));
}

#[test]
fn lists_host_pci_devices() {
    let host = DdaHost::connect().expect("local WMI connection");
    let devices = host.host_devices().expect("PnP inventory readable");
    assert!(devices.iter().all(|d| d.device.as_str().starts_with("PCI")));
}

#[test]
fn enumerates_vms_and_pool() {
    let host = DdaHost::connect().expect("local WMI connection");
    let vms = host.vms_with_state().expect("VM inventory readable");
    for (vm, _) in &vms {
        assert!(!vm.id.is_empty());
        // Assignments of every VM must be enumerable without error.
        host.assignments(vm).expect("assignments readable");
    }
    host.pool_devices().expect("pool readable");
}

#[test]
fn surveys_devices_without_mutating() {
    let host = DdaHost::connect().expect("local WMI connection");
    let surveys = host.survey_devices().expect("survey completes");
    for survey in surveys {
        if !survey.looks_assignable() {
            assert!(!survey.notes.is_empty(), "ruled-out devices carry a note");
        }
    }
}
