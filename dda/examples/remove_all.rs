//! Example: best-effort teardown of every device assignment.
//!
//! Detaches every assignment on every VM, then returns every pooled
//! device to host control. Per-item failures are reported without
//! aborting the batch.

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use windows_dda::{DdaHost, Orchestrator};

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("windows_dda=info")),
        )
        .init();

    let orchestrator = Orchestrator::new(DdaHost::connect()?);
    let report = orchestrator.remove_all_assignments()?;

    println!("{}", report);
    for item in &report.items {
        match &item.error {
            None => println!("  ok    {}", item.target),
            Some(e) => println!("  FAIL  {}: {}", item.target, e),
        }
    }
    for (vm, error) in &report.skipped_vms {
        println!("  SKIP  VM '{}': {}", vm, error);
    }
    if let Some(error) = &report.pool_scan_error {
        println!("  SKIP  pool recovery: {}", error);
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("This example only runs on Windows with Hyper-V installed.");
}
