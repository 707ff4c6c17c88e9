pub mod objects;

pub use objects::{exposure_from_service, service_from_spec, pod_from_spec, workload_from_pod};

use crate::error::{CoreError, Result};
use crate::types::{ExposureSpec, NodeOs, WorkloadSpec};
use std::collections::HashSet;

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    // Must contain only lowercase alphanumeric, '-', or '.'
    // Must start and end with alphanumeric
    let chars: Vec<char> = name.chars().collect();

    if !chars[0].is_ascii_lowercase() && !chars[0].is_ascii_digit() {
        return false;
    }

    if !chars[chars.len() - 1].is_ascii_lowercase() && !chars[chars.len() - 1].is_ascii_digit() {
        return false;
    }

    chars
        .iter()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.')
}

/// Validate a label value (at most 63 chars, alphanumeric at both ends, `-_.` inside)
pub fn is_valid_label_value(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    if value.len() > 63 {
        return false;
    }

    let bytes = value.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return false;
    }

    bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Validate a label key, with an optional DNS subdomain prefix (`prefix/name`)
pub fn is_valid_label_key(key: &str) -> bool {
    let (prefix, name) = match key.rsplit_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if !is_valid_name(prefix) {
            return false;
        }
    }

    !name.is_empty() && is_valid_label_value(name)
}

/// Local checks on an exposure spec before it is submitted
pub fn validate_exposure_spec(spec: &ExposureSpec) -> Result<()> {
    if !is_valid_name(&spec.namespace) {
        return Err(CoreError::invalid_spec(
            "exposure",
            format!("invalid namespace '{}'", spec.namespace),
            "Namespaces must be DNS-1123 subdomains (lowercase alphanumeric, '-', or '.')",
        ));
    }

    if !is_valid_name(&spec.name) {
        return Err(CoreError::invalid_spec(
            "exposure",
            format!("invalid name '{}'", spec.name),
            "Names must be DNS-1123 subdomains (lowercase alphanumeric, '-', or '.')",
        ));
    }

    if spec.ports.is_empty() {
        return Err(CoreError::invalid_spec(
            "exposure",
            format!("{}/{} declares no ports", spec.namespace, spec.name),
            "Add at least one PortSpec",
        ));
    }

    for (key, value) in &spec.selector {
        if !is_valid_label_key(key) || !is_valid_label_value(value) {
            return Err(CoreError::invalid_spec(
                "exposure",
                format!("invalid selector entry '{}={}'", key, value),
                "Selector keys and values must be valid Kubernetes label syntax",
            ));
        }
    }

    let mut seen = HashSet::new();
    for port in &spec.ports {
        if port.port == 0 || port.target_port == 0 {
            return Err(CoreError::invalid_spec(
                "exposure",
                format!("port {} -> {} is out of range", port.port, port.target_port),
                "Ports must be between 1 and 65535",
            ));
        }
        if !seen.insert((port.port, port.protocol)) {
            return Err(CoreError::invalid_spec(
                "exposure",
                format!("port {}/{} is declared twice", port.port, port.protocol),
                "Each (port, protocol) pair may appear only once",
            ));
        }
    }

    if spec.ports.len() > 1 && spec.ports.iter().any(|p| p.name.is_none()) {
        return Err(CoreError::invalid_spec(
            "exposure",
            "multiple ports declared without names",
            "Name every port when declaring more than one",
        ));
    }

    Ok(())
}

/// Local checks on a workload spec before it is submitted
pub fn validate_workload_spec(spec: &WorkloadSpec) -> Result<()> {
    if !is_valid_name(&spec.namespace) || !is_valid_name(&spec.name) {
        return Err(CoreError::invalid_spec(
            "workload",
            format!("invalid identity '{}/{}'", spec.namespace, spec.name),
            "Names must be DNS-1123 subdomains (lowercase alphanumeric, '-', or '.')",
        ));
    }

    if spec.image.trim().is_empty() {
        return Err(CoreError::invalid_spec(
            "workload",
            format!("{}/{} has no image", spec.namespace, spec.name),
            "Set a container image reference",
        ));
    }

    for (key, value) in &spec.labels {
        if !is_valid_label_key(key) || !is_valid_label_value(value) {
            return Err(CoreError::invalid_spec(
                "workload",
                format!("invalid label '{}={}'", key, value),
                "Label keys and values must be valid Kubernetes label syntax",
            ));
        }
    }

    if spec.security.windows_host_process
        && (spec.node_os != Some(NodeOs::Windows) || !spec.host_network)
    {
        return Err(CoreError::invalid_spec(
            "workload",
            format!("{}/{} requests a HostProcess container", spec.namespace, spec.name),
            "HostProcess containers need node OS windows and host networking",
        ));
    }

    Ok(())
}
