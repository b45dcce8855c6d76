//! Example: detach a device from a VM and return it to the host.
//!
//! Usage: remove_device <vm-name> [binding-id]
//!
//! Without a binding id, the VM's assignments are listed. With one, the
//! assignment is torn down: detach, mount back to the host, re-enable.

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use windows_dda::{DdaHost, Orchestrator};

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("windows_dda=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(vm_name) = args.get(1).cloned() else {
        eprintln!("Usage: {} <vm-name> [binding-id]", args[0]);
        std::process::exit(1);
    };

    let host = DdaHost::connect()?;
    let vm = host
        .vms_with_state()?
        .into_iter()
        .map(|(vm, _)| vm)
        .find(|vm| vm.name == vm_name)
        .ok_or_else(|| format!("no VM named '{}'", vm_name))?;

    let assignments = host.binder().assignments(&vm)?;
    let Some(binding_id) = args.get(2) else {
        println!("Assignments of '{}':", vm.name);
        for record in &assignments {
            println!("  {:<40} {}", record.device.to_string(), record.binding_id);
        }
        return Ok(());
    };

    let record = assignments
        .into_iter()
        .find(|r| &r.binding_id == binding_id)
        .ok_or_else(|| format!("no assignment '{}' on '{}'", binding_id, vm.name))?;

    let orchestrator = Orchestrator::new(host);
    match orchestrator.remove_device(&record) {
        Ok(()) => println!("Returned {} to the host", record.device.to_host()),
        Err(e) => {
            eprintln!("Teardown failed: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("This example only runs on Windows with Hyper-V installed.");
}
