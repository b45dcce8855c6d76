//! Example: check host readiness for device assignment.

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use windows_dda::DdaHost;

    let host = DdaHost::connect()?;

    let compat = host.check_host()?;
    println!("{} (build {})", compat.os_name, compat.build_number);
    if compat.is_supported() {
        println!("Host supports discrete device assignment.");
    } else {
        for warning in compat.warnings() {
            println!("WARNING: {}", warning);
        }
    }

    println!("\nHyper-V services:");
    for service in host.services()? {
        println!(
            "  {:<50} {}",
            service.caption,
            if service.is_running() { "Running" } else { service.state.as_str() }
        );
    }
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("This example only runs on Windows with Hyper-V installed.");
}
