//! Example: list host PCI devices and the assignable-device pool.

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use windows_dda::DdaHost;

    let host = DdaHost::connect()?;

    println!("Host PCI devices:");
    for device in host.host_devices()? {
        println!(
            "  {:<10} {:<12} {:<40} {}",
            device.status, device.class, device.name, device.device
        );
    }

    println!("\nAssignable-device pool:");
    let pool = host.pool();
    for device in pool.devices()? {
        println!("  {}", device);
    }
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("This example only runs on Windows with Hyper-V installed.");
}
