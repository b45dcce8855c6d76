//! Example: survey host PCI devices for assignability.
//!
//! Prints a JSON report of every PCI device with its express-endpoint
//! check, enabled state, and estimated MMIO footprint.

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use windows_dda::DdaHost;

    let host = DdaHost::connect()?;
    let surveys = host.survey_devices()?;

    println!("{}", serde_json::to_string_pretty(&surveys)?);

    let assignable = surveys.iter().filter(|s| s.looks_assignable()).count();
    eprintln!("{} of {} devices look assignable", assignable, surveys.len());
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("This example only runs on Windows with Hyper-V installed.");
}
