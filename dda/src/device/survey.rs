//! Assignability survey over the host's PCI devices.
//!
//! Estimates, per device, whether it can be handed to the
//! assignable-device pool at all (express-endpoint check, enabled
//! check) and how much MMIO space its memory ranges occupy. The survey
//! is advisory input for operators sizing a VM's MMIO gaps before an
//! assignment; it mutates nothing.

use serde::{Deserialize, Serialize};

use crate::device::DeviceId;

#[cfg(windows)]
use crate::error::Result;
#[cfg(windows)]
use crate::wmi::{WbemClassObjectExt, WmiSession, CIMV2_NAMESPACE};

/// Survey result for one host PCI device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSurvey {
    /// Device instance path (host namespace).
    pub device: DeviceId,
    /// Friendly device name.
    pub name: String,
    /// Whether the device sits on a supported express endpoint.
    pub express_endpoint: bool,
    /// Whether the device is currently enabled on the host.
    pub enabled: bool,
    /// Estimated MMIO space in MiB, when it could be measured.
    pub mmio_estimate_mb: Option<u64>,
    /// Operator-facing notes about why the device may not be assignable.
    pub notes: Vec<String>,
}

impl DeviceSurvey {
    /// Check whether nothing in the survey rules the device out.
    pub fn looks_assignable(&self) -> bool {
        self.express_endpoint && self.enabled
    }
}

/// Sum of memory ranges, each rounded up to whole MiB.
pub fn mmio_span_mb(ranges: &[(u64, u64)]) -> u64 {
    ranges
        .iter()
        .map(|(start, end)| end.saturating_sub(*start).div_ceil(1024 * 1024))
        .sum()
}

/// Extract the key value out of a WMI reference string.
///
/// Allocated-resource associations carry references shaped like
/// `\\HOST\root\cimv2:Win32_DeviceMemoryAddress.StartingAddress="12345"`;
/// the part after the last `=`, unquoted, is the key.
pub fn reference_key(reference: &str) -> Option<&str> {
    let (_, value) = reference.rsplit_once('=')?;
    Some(value.trim_matches('"'))
}

/// Scan every host PCI device and estimate its assignability.
#[cfg(windows)]
pub fn survey_devices(session: &WmiSession) -> Result<Vec<DeviceSurvey>> {
    use std::collections::HashSet;

    let entities = session.query(
        CIMV2_NAMESPACE,
        "Win32_PnPEntity",
        &["DeviceID", "Caption", "Status"],
    )?;

    // One fetch per association class; the per-device loops below only
    // scan these in memory.
    let endpoints = session.query(
        CIMV2_NAMESPACE,
        "Win32_PnPDevice",
        &["SameElement", "SystemElement"],
    )?;
    let allocations = session.query(
        CIMV2_NAMESPACE,
        "Win32_PNPAllocatedResource",
        &["Antecedent", "Dependent"],
    )?;
    let memory_ranges = session.query(
        CIMV2_NAMESPACE,
        "Win32_DeviceMemoryAddress",
        &["StartingAddress", "EndingAddress"],
    )?;

    let mut endpoint_refs = Vec::new();
    for endpoint in &endpoints {
        if let Some(system_element) = endpoint.get_string_prop("SystemElement")? {
            endpoint_refs.push(system_element);
        }
    }

    let mut allocation_refs = Vec::new();
    for allocation in &allocations {
        if let (Some(antecedent), Some(dependent)) = (
            allocation.get_string_prop("Antecedent")?,
            allocation.get_string_prop("Dependent")?,
        ) {
            allocation_refs.push((antecedent, dependent));
        }
    }

    let mut ranges = Vec::new();
    for range in &memory_ranges {
        if let (Some(start), Some(end)) = (
            range.get_string_prop("StartingAddress")?,
            range.get_string_prop("EndingAddress")?,
        ) {
            if let (Ok(start_addr), Ok(end_addr)) = (start.parse::<u64>(), end.parse::<u64>()) {
                // Keyed by the raw string so it matches the allocation
                // references verbatim.
                ranges.push((start, start_addr, end_addr));
            }
        }
    }

    let mut surveys = Vec::new();
    for entity in entities {
        let Some(id) = entity.get_string_prop("DeviceID")? else {
            continue;
        };
        if !id.starts_with("PCI\\") {
            continue;
        }

        let escaped = id.replace('\\', "\\\\");
        let mut notes = Vec::new();

        let express_endpoint = endpoint_refs.iter().any(|r| r.contains(&escaped));
        if !express_endpoint {
            notes.push(
                "device is not an Express Endpoint, Embedded Endpoint, or Legacy Express Endpoint"
                    .to_string(),
            );
        }

        let status = entity.get_string_prop("Status")?.unwrap_or_default();
        let enabled = status.eq_ignore_ascii_case("ok");
        if !enabled {
            notes.push(
                "device is disabled; re-enable it to measure its memory footprint".to_string(),
            );
        }

        let mmio_estimate_mb = if express_endpoint && enabled {
            let starts: HashSet<&str> = allocation_refs
                .iter()
                .filter(|(_, dependent)| dependent.contains(&escaped))
                .filter_map(|(antecedent, _)| reference_key(antecedent))
                .collect();
            let spans: Vec<(u64, u64)> = ranges
                .iter()
                .filter(|(start_key, _, _)| starts.contains(start_key.as_str()))
                .map(|(_, start, end)| (*start, *end))
                .collect();
            Some(mmio_span_mb(&spans))
        } else {
            None
        };

        surveys.push(DeviceSurvey {
            device: DeviceId::new(id),
            name: entity
                .get_string_prop("Caption")?
                .unwrap_or_else(|| "Unknown".to_string()),
            express_endpoint,
            enabled,
            mmio_estimate_mb,
            notes,
        });
    }
    Ok(surveys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmio_span_rounds_each_range_up() {
        // One byte over 1 MiB still costs 2 MiB.
        let one_mib = 1024 * 1024;
        assert_eq!(mmio_span_mb(&[(0, one_mib)]), 1);
        assert_eq!(mmio_span_mb(&[(0, one_mib + 1)]), 2);
        assert_eq!(mmio_span_mb(&[(0, one_mib), (one_mib * 4, one_mib * 6)]), 3);
        assert_eq!(mmio_span_mb(&[]), 0);
    }

    #[test]
    fn test_reference_key_unquotes_last_value() {
        let r = r#"\\HOST\root\cimv2:Win32_DeviceMemoryAddress.StartingAddress="4096""#;
        assert_eq!(reference_key(r), Some("4096"));
        assert_eq!(reference_key("no separator"), None);
    }

    #[test]
    fn test_looks_assignable() {
        let survey = DeviceSurvey {
            device: DeviceId::new("PCI\\VEN_1,dev1"),
            name: "GPU".into(),
            express_endpoint: true,
            enabled: true,
            mmio_estimate_mb: Some(256),
            notes: vec![],
        };
        assert!(survey.looks_assignable());

        let disabled = DeviceSurvey {
            enabled: false,
            ..survey
        };
        assert!(!disabled.looks_assignable());
    }
}
