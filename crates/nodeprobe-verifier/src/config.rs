use crate::error::{Result, VerifierError};
use crate::traits::ExecTarget;
use nodeprobe_core::NodeOs;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Default image serving HTTP 200 on its target port
pub const DEFAULT_WORKLOAD_IMAGE: &str = "registry.k8s.io/e2e-test-images/agnhost:2.52";

/// Default NodePort allocation range of the control plane
pub const DEFAULT_NODE_PORT_RANGE: RangeInclusive<u16> = 30000..=32767;

/// A bounded, strictly positive probe timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeout(Duration);

impl ProbeTimeout {
    /// Rejects a zero timeout instead of treating it as unbounded
    pub fn new(timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(VerifierError::invalid_config(
                "probe timeout must be greater than zero",
                "Pass a positive timeout such as 30s",
            ));
        }
        Ok(Self(timeout))
    }

    /// Rejects zero and negative second counts
    pub fn from_secs(secs: i64) -> Result<Self> {
        if secs <= 0 {
            return Err(VerifierError::invalid_config(
                format!("probe timeout must be greater than zero, got {}s", secs),
                "Pass a positive timeout such as 30s",
            ));
        }
        Self::new(Duration::from_secs(secs as u64))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Whole seconds, rounded up, for tools that only take seconds
    pub fn as_secs_ceil(&self) -> u64 {
        let secs = self.0.as_secs();
        if self.0.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

impl Default for ProbeTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(30))
    }
}

/// Container that runs listen-state diagnostics on the probed node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticTarget {
    pub exec: ExecTarget,
    /// OS of the node, selects the socket listing command
    pub os: NodeOs,
}

/// What serving workload `attach_workload` launches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadTemplate {
    pub image: String,
    /// Container args. `None` runs agnhost's `netexec` on the exposure's target port.
    pub args: Option<Vec<String>>,
}

impl Default for WorkloadTemplate {
    fn default() -> Self {
        Self {
            image: DEFAULT_WORKLOAD_IMAGE.to_string(),
            args: None,
        }
    }
}

impl WorkloadTemplate {
    /// Args for a workload serving on `target_port`
    pub fn args_for(&self, target_port: u16) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => vec![
                "netexec".to_string(),
                format!("--http-port={}", target_port),
            ],
        }
    }
}

/// Configuration for the reachability verifier
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Bound on a single HTTP probe
    pub probe_timeout: ProbeTimeout,
    /// Observations made before a port is declared not listening
    pub listen_attempts: u32,
    /// Pause between listen-state observations
    pub listen_interval: Duration,
    /// Status checks made while waiting for a workload to run
    pub workload_ready_attempts: u32,
    pub workload_ready_interval: Duration,
    /// Range allocated node ports must fall in
    pub node_port_range: RangeInclusive<u16>,
    /// Restrict probing and workloads to nodes of this OS
    pub node_os: Option<NodeOs>,
    pub workload: WorkloadTemplate,
    /// Where listen-state commands run, when an existing diagnostic pod is used
    pub diagnostic: Option<DiagnosticTarget>,
    /// Cloud location passed to load-balancer cleanup
    pub region: Option<String>,
    pub zone: Option<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            probe_timeout: ProbeTimeout::default(),
            listen_attempts: 10,
            listen_interval: Duration::from_secs(2),
            workload_ready_attempts: 30,
            workload_ready_interval: Duration::from_secs(2),
            node_port_range: DEFAULT_NODE_PORT_RANGE,
            node_os: None,
            workload: WorkloadTemplate::default(),
            diagnostic: None,
            region: None,
            zone: None,
        }
    }
}

impl VerifierConfig {
    /// Reject budgets that would make a poll loop meaningless
    pub fn validate(&self) -> Result<()> {
        if self.listen_attempts == 0 {
            return Err(VerifierError::invalid_config(
                "listen_attempts must be at least 1",
                "Set listen_attempts to the number of observations to make before giving up",
            ));
        }
        if self.workload_ready_attempts == 0 {
            return Err(VerifierError::invalid_config(
                "workload_ready_attempts must be at least 1",
                "Set workload_ready_attempts to the number of status checks to make",
            ));
        }
        if self.node_port_range.is_empty() || *self.node_port_range.start() == 0 {
            return Err(VerifierError::invalid_config(
                format!(
                    "node port range {}-{} is empty or starts at 0",
                    self.node_port_range.start(),
                    self.node_port_range.end()
                ),
                "Use the control plane's --service-node-port-range, e.g. 30000-32767",
            ));
        }
        if self.workload.image.trim().is_empty() {
            return Err(VerifierError::invalid_config(
                "workload image is empty",
                "Set an image that serves HTTP on the exposure's target port",
            ));
        }
        Ok(())
    }
}
