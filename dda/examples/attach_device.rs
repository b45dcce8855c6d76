//! Example: attach a PCI device to a VM.
//!
//! Usage: attach_device <vm-name> <device-instance-path>
//!
//! The device is disabled on the host, dismounted into the
//! assignable-device pool, and bound to the VM. A failure after the
//! disable step re-enables the device; the printed error says which
//! step failed and what the rollback did.

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use windows_dda::{DdaHost, DeviceId, Orchestrator};

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("windows_dda=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (vm_name, device_path) = match (args.get(1), args.get(2)) {
        (Some(vm), Some(dev)) => (vm.clone(), dev.clone()),
        _ => {
            eprintln!("Usage: {} <vm-name> <device-instance-path>", args[0]);
            std::process::exit(1);
        }
    };

    let host = DdaHost::connect()?;
    let vm = host
        .vms_with_state()?
        .into_iter()
        .map(|(vm, _)| vm)
        .find(|vm| vm.name == vm_name)
        .ok_or_else(|| format!("no VM named '{}'", vm_name))?;

    let orchestrator = Orchestrator::new(host);
    match orchestrator.attach_device(&vm, &DeviceId::new(device_path)) {
        Ok(record) => {
            println!("Attached {} to '{}'", record.device, vm.name);
            println!("Binding id: {}", record.binding_id);
        }
        Err(e) => {
            eprintln!("Attach failed: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("This example only runs on Windows with Hyper-V installed.");
}
