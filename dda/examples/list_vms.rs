//! Example: list virtual machines and their states.

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use windows_dda::DdaHost;

    let host = DdaHost::connect()?;

    println!("Virtual machines on {}:", host.session().machine_label());
    for (vm, state) in host.vms_with_state()? {
        println!("  {:<30} {:<20} [{}]", vm.name, state.to_string(), vm.id);
    }
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("This example only runs on Windows with Hyper-V installed.");
}
