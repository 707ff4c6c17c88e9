//! Nodeprobe Core - data model for NodePort reachability verification
//!
//! This crate provides:
//! - Exposure point and workload specs with by-value builders
//! - Conversion to and from Kubernetes `Service`/`Pod` objects
//! - Name and label validation
//! - Error types with miette diagnostics
//! - Serialization helpers

pub mod error;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use resources::objects::NODE_OS_LABEL;
pub use resources::{
    exposure_from_service, is_valid_label_key, is_valid_label_value, is_valid_name,
    pod_from_spec, service_from_spec, validate_exposure_spec, validate_workload_spec,
    workload_from_pod,
};
pub use types::{
    AllocatedPort, ExposurePoint, ExposureSpec, ExposureType, NodeOs, PortSpec, ProbeResult,
    Protocol, RestartPolicy, SecurityProfile, Workload, WorkloadSpec, WINDOWS_SYSTEM_USER,
};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Pod, Service};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Serialize a value to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string_pretty(resource).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}
