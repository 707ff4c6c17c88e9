use miette::Diagnostic;
use thiserror::Error;

/// Error type for reachability verification
#[derive(Error, Debug, Diagnostic)]
pub enum VerifierError {
    /// The control plane rejected the exposure spec
    #[error("Failed to create exposure {namespace}/{name}: {message}")]
    #[diagnostic(
        code(nodeprobe::verifier::exposure_creation_failed),
        help("Check for an existing service with the same name, a NodePort already in use, or an invalid selector")
    )]
    ExposureCreationFailed {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        message: String,
    },

    /// The workload could not be scheduled or started
    #[error("Workload {namespace}/{name} could not be scheduled or started: {message}")]
    #[diagnostic(
        code(nodeprobe::verifier::workload_scheduling_failed),
        help("Verify a Ready node matches the workload's node selector and that the image can be pulled. This harness does not retry")
    )]
    WorkloadSchedulingFailed {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        message: String,
    },

    /// Transport-level failure reaching the exposed address
    #[error("Could not reach {address}:{port}: {message}")]
    #[diagnostic(
        code(nodeprobe::verifier::probe_connection_failed),
        help("The connection timed out, was refused or was reset. Check that the node firewall allows NodePort traffic and that the service proxy programmed rules for this port")
    )]
    ProbeConnectionFailed {
        #[allow(unused)]
        address: String,
        #[allow(unused)]
        port: u16,
        #[allow(unused)]
        message: String,
    },

    /// Transport succeeded but the observed result did not match
    #[error("Unexpected response from {address}:{port}: expected {expected}, observed {observed}")]
    #[diagnostic(
        code(nodeprobe::verifier::probe_assertion_failed),
        help("The port is reachable but the backend answered differently. Check that the workload serves the expected response on its target port")
    )]
    ProbeAssertionFailed {
        #[allow(unused)]
        address: String,
        #[allow(unused)]
        port: u16,
        #[allow(unused)]
        expected: String,
        #[allow(unused)]
        observed: String,
    },

    /// The listen-state poll exhausted its attempt budget
    #[error("Port {port} on {address} was not observed listening after {attempts} attempts")]
    #[diagnostic(
        code(nodeprobe::verifier::listen_state_timeout),
        help("Polled every {interval_ms}ms. The service proxy never bound the node port. Check the proxy logs on the node")
    )]
    ListenStateTimeout {
        #[allow(unused)]
        address: String,
        #[allow(unused)]
        port: u16,
        #[allow(unused)]
        attempts: u32,
        #[allow(unused)]
        interval_ms: u64,
    },

    /// A created exposure does not have the shape that was requested
    #[error("Exposure {namespace}/{name} failed sanity check: {message}")]
    #[diagnostic(
        code(nodeprobe::verifier::sanity_check_failed),
        help("The control plane accepted the exposure but allocated it differently than requested")
    )]
    SanityCheckFailed {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        message: String,
    },

    /// No node address is available for probing
    #[error("No usable node address: {message}")]
    #[diagnostic(
        code(nodeprobe::verifier::no_node_address),
        help("At least one Ready node with an ExternalIP or InternalIP address is required")
    )]
    NoNodeAddress {
        #[allow(unused)]
        message: String,
    },

    /// Object not found on the control plane
    #[error("{kind} not found: {namespace}/{name}")]
    #[diagnostic(
        code(nodeprobe::verifier::resource_not_found),
        help("The object may have been deleted, or the namespace is wrong")
    )]
    ResourceNotFound {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
    },

    /// Object already exists on the control plane
    #[error("{kind} already exists: {namespace}/{name}")]
    #[diagnostic(
        code(nodeprobe::verifier::resource_already_exists),
        help("Delete the existing object or pick a different name")
    )]
    ResourceAlreadyExists {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
    },

    /// Control plane refused the object as invalid
    #[error("{kind} {namespace}/{name} was rejected: {message}")]
    #[diagnostic(
        code(nodeprobe::verifier::resource_rejected),
        help("The control plane validated the object and refused it")
    )]
    ResourceRejected {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        message: String,
    },

    /// API request failed for another reason
    #[error("{method} {path} failed: {message}")]
    #[diagnostic(
        code(nodeprobe::verifier::api_request_failed),
        help("Verify the API server URL and credentials")
    )]
    ApiRequestFailed {
        #[allow(unused)]
        method: String,
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Command execution failed
    #[error("Command '{command}' failed with exit code {exit_code}")]
    #[diagnostic(code(nodeprobe::verifier::command_failed), help("stderr: {stderr}"))]
    CommandFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        exit_code: i32,
        #[allow(unused)]
        stderr: String,
    },

    /// Scenario teardown could not release everything it allocated
    #[error("Failed to release {failures} scenario resource(s)")]
    #[diagnostic(
        code(nodeprobe::verifier::cleanup_failed),
        help("Release these manually: {details}")
    )]
    CleanupFailed {
        #[allow(unused)]
        failures: usize,
        #[allow(unused)]
        details: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(nodeprobe::verifier::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// A scenario body ran past its deadline
    #[error("Scenario '{scenario}' did not finish within {seconds}s")]
    #[diagnostic(
        code(nodeprobe::verifier::deadline_exceeded),
        help("Raise the deadline, or check the log for the step that stalled")
    )]
    DeadlineExceeded {
        #[allow(unused)]
        scenario: String,
        #[allow(unused)]
        seconds: u64,
    },

    /// A scenario body failed; carries the exposure dump taken at failure time
    #[error("Scenario '{scenario}' failed")]
    #[diagnostic(
        code(nodeprobe::verifier::scenario_failed),
        help("Exposures in the namespace at failure time:\n{diagnostics}")
    )]
    ScenarioFailed {
        #[allow(unused)]
        scenario: String,
        #[allow(unused)]
        diagnostics: String,
        #[source]
        source: Box<VerifierError>,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] nodeprobe_core::CoreError),

    /// Internal error
    #[error("Internal verifier error: {message}")]
    #[diagnostic(
        code(nodeprobe::verifier::internal_error),
        help("This is likely a bug in nodeprobe-verifier. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for verifier operations
pub type Result<T> = std::result::Result<T, VerifierError>;

impl VerifierError {
    pub fn exposure_creation_failed(
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ExposureCreationFailed {
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn workload_scheduling_failed(
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::WorkloadSchedulingFailed {
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn probe_connection_failed(
        address: impl Into<String>,
        port: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::ProbeConnectionFailed {
            address: address.into(),
            port,
            message: message.into(),
        }
    }

    pub fn probe_assertion_failed(
        address: impl Into<String>,
        port: u16,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        Self::ProbeAssertionFailed {
            address: address.into(),
            port,
            expected: expected.into(),
            observed: observed.into(),
        }
    }

    pub fn listen_state_timeout(
        address: impl Into<String>,
        port: u16,
        attempts: u32,
        interval: std::time::Duration,
    ) -> Self {
        Self::ListenStateTimeout {
            address: address.into(),
            port,
            attempts,
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn sanity_check_failed(
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SanityCheckFailed {
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn no_node_address(message: impl Into<String>) -> Self {
        Self::NoNodeAddress {
            message: message.into(),
        }
    }

    pub fn resource_not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::ResourceNotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn resource_already_exists(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::ResourceAlreadyExists {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn resource_rejected(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ResourceRejected {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn api_request_failed(
        method: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ApiRequestFailed {
            method: method.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn cleanup_failed(failures: usize, details: impl Into<String>) -> Self {
        Self::CleanupFailed {
            failures,
            details: details.into(),
        }
    }

    pub fn deadline_exceeded(scenario: impl Into<String>, deadline: std::time::Duration) -> Self {
        Self::DeadlineExceeded {
            scenario: scenario.into(),
            seconds: deadline.as_secs(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether this is a not-found answer from the control plane
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }

    /// The innermost error, looking through `ScenarioFailed` wrappers
    pub fn root(&self) -> &VerifierError {
        match self {
            Self::ScenarioFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
