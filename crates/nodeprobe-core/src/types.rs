use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How an exposure point is reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExposureType {
    /// Reachable only on a cluster-internal virtual IP
    #[default]
    ClusterIP,
    /// Additionally reachable on an allocated port of every node
    NodePort,
    /// NodePort plus an externally provisioned load balancer
    LoadBalancer,
}

impl ExposureType {
    /// Value used in `spec.type` of a Service
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureType::ClusterIP => "ClusterIP",
            ExposureType::NodePort => "NodePort",
            ExposureType::LoadBalancer => "LoadBalancer",
        }
    }

    /// Parse a `spec.type` value. A missing type defaults to ClusterIP.
    pub fn from_service_type(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("ClusterIP") => Some(ExposureType::ClusterIP),
            Some("NodePort") => Some(ExposureType::NodePort),
            Some("LoadBalancer") => Some(ExposureType::LoadBalancer),
            Some(_) => None,
        }
    }

    /// Whether this type gets a per-node port allocated for every declared port
    pub fn allocates_node_ports(&self) -> bool {
        matches!(self, ExposureType::NodePort | ExposureType::LoadBalancer)
    }
}

impl fmt::Display for ExposureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol of a declared port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }

    pub fn from_service_protocol(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("TCP") => Some(Protocol::Tcp),
            Some("UDP") => Some(Protocol::Udp),
            Some("SCTP") => Some(Protocol::Sctp),
            Some(_) => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single declared port of an exposure point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Optional port name, required by the control plane when more than one port is declared
    pub name: Option<String>,
    /// Port the exposure listens on
    pub port: u16,
    /// Port on the workload traffic is forwarded to
    pub target_port: u16,
    pub protocol: Protocol,
    /// Explicitly requested node port. `None` lets the control plane allocate one.
    pub node_port: Option<u16>,
}

impl PortSpec {
    /// TCP port with an allocated node port
    pub fn tcp(port: u16, target_port: u16) -> Self {
        Self {
            name: None,
            port,
            target_port,
            protocol: Protocol::Tcp,
            node_port: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_node_port(mut self, node_port: u16) -> Self {
        self.node_port = Some(node_port);
        self
    }
}

/// Everything needed to request an exposure point.
///
/// Built by value and submitted as a whole; there is no partial mutation
/// of a draft object once it leaves the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureSpec {
    pub namespace: String,
    pub name: String,
    /// Label match criteria for workload membership
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<PortSpec>,
    pub exposure_type: ExposureType,
}

impl ExposureSpec {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            selector: BTreeMap::new(),
            ports: Vec::new(),
            exposure_type: ExposureType::ClusterIP,
        }
    }

    /// Exposure with a single TCP port that selects workloads labelled `name=<name>`
    pub fn tcp(
        namespace: impl Into<String>,
        name: impl Into<String>,
        port: u16,
        target_port: u16,
    ) -> Self {
        let name = name.into();
        Self::new(namespace, name.clone())
            .selector("name", name)
            .port(PortSpec::tcp(port, target_port))
    }

    pub fn selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector.insert(key.into(), value.into());
        self
    }

    pub fn port(mut self, port: PortSpec) -> Self {
        self.ports.push(port);
        self
    }

    pub fn exposure_type(mut self, exposure_type: ExposureType) -> Self {
        self.exposure_type = exposure_type;
        self
    }
}

/// A declared port together with what the control plane allocated for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedPort {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: u16,
    pub protocol: Protocol,
    pub node_port: Option<u16>,
}

/// A created exposure point as observed on the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposurePoint {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<AllocatedPort>,
    pub exposure_type: ExposureType,
    pub cluster_ip: Option<String>,
}

impl ExposurePoint {
    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Node port allocated for the first declared port
    pub fn node_port(&self) -> Option<u16> {
        self.ports.first().and_then(|p| p.node_port)
    }

    /// Node ports of all declared ports, in declaration order
    pub fn node_ports(&self) -> Vec<Option<u16>> {
        self.ports.iter().map(|p| p.node_port).collect()
    }
}

/// Operating system of the nodes a workload targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeOs {
    #[default]
    Linux,
    Windows,
}

impl NodeOs {
    /// Value of the `kubernetes.io/os` node label
    pub fn label_value(&self) -> &'static str {
        match self {
            NodeOs::Linux => "linux",
            NodeOs::Windows => "windows",
        }
    }
}

impl fmt::Display for NodeOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}

impl std::str::FromStr for NodeOs {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(NodeOs::Linux),
            "windows" => Ok(NodeOs::Windows),
            other => Err(format!("unknown node OS '{}', expected linux or windows", other)),
        }
    }
}

/// Pod restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "Always",
            RestartPolicy::OnFailure => "OnFailure",
            RestartPolicy::Never => "Never",
        }
    }
}

/// Account Windows HostProcess containers run as
pub const WINDOWS_SYSTEM_USER: &str = "NT AUTHORITY\\SYSTEM";

/// Container security profile
///
/// The Linux fields and the Windows fields are mutually exclusive in
/// practice: which set reaches the Pod depends on the workload's node OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub privileged: bool,
    pub allow_privilege_escalation: Option<bool>,
    pub run_as_non_root: Option<bool>,
    pub run_as_user: Option<i64>,
    pub read_only_root_filesystem: bool,
    /// Run as a Windows HostProcess container, inside the node's network compartment
    #[serde(default)]
    pub windows_host_process: bool,
    /// Windows account the container runs as
    #[serde(default)]
    pub run_as_user_name: Option<String>,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            privileged: false,
            allow_privilege_escalation: None,
            run_as_non_root: None,
            run_as_user: None,
            read_only_root_filesystem: false,
            windows_host_process: false,
            run_as_user_name: None,
        }
    }
}

impl SecurityProfile {
    /// Privileged Linux container
    pub fn privileged() -> Self {
        Self {
            privileged: true,
            allow_privilege_escalation: Some(true),
            ..Default::default()
        }
    }

    /// Windows HostProcess container running as SYSTEM.
    /// Windows has no privileged containers; this is the equivalent.
    pub fn host_process() -> Self {
        Self {
            windows_host_process: true,
            run_as_user_name: Some(WINDOWS_SYSTEM_USER.to_string()),
            ..Default::default()
        }
    }

    /// Profile for host diagnostic pods that inspect the node's socket table
    pub fn node_diagnostics(os: NodeOs) -> Self {
        match os {
            NodeOs::Linux => Self::privileged(),
            NodeOs::Windows => Self::host_process(),
        }
    }
}

/// Everything needed to launch a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    /// Port the container serves on, if any
    pub container_port: Option<u16>,
    pub restart_policy: RestartPolicy,
    pub security: SecurityProfile,
    /// Pin the workload to nodes of this OS
    pub node_os: Option<NodeOs>,
    /// Pin the workload to one node by name
    pub node_name: Option<String>,
    pub host_network: bool,
}

impl WorkloadSpec {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            namespace: namespace.into(),
            container_name: name.clone(),
            name,
            labels: BTreeMap::new(),
            image: image.into(),
            command: Vec::new(),
            args: Vec::new(),
            container_port: None,
            restart_policy: RestartPolicy::Always,
            security: SecurityProfile::default(),
            node_os: None,
            node_name: None,
            host_network: false,
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn labels(mut self, labels: &BTreeMap<String, String>) -> Self {
        self.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn container_port(mut self, port: u16) -> Self {
        self.container_port = Some(port);
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn security(mut self, security: SecurityProfile) -> Self {
        self.security = security;
        self
    }

    pub fn node_os(mut self, os: NodeOs) -> Self {
        self.node_os = Some(os);
        self
    }

    pub fn node_name(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(node.into());
        self
    }

    pub fn host_network(mut self, enabled: bool) -> Self {
        self.host_network = enabled;
        self
    }
}

/// A launched workload as observed on the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub container_name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub node_name: Option<String>,
    pub pod_ip: Option<String>,
    pub phase: Option<String>,
}

impl Workload {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_running(&self) -> bool {
        self.phase.as_deref() == Some("Running")
    }
}

/// Outcome of a single reachability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub address: String,
    pub port: u16,
    /// Application-layer status, when the probe spoke HTTP
    pub status_code: Option<u16>,
    /// Transport-layer listen confirmation, when the probe inspected sockets
    pub listening: Option<bool>,
    /// Number of observations it took to reach this result
    pub attempts: u32,
    pub duration_ms: u64,
    pub observed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn http(address: impl Into<String>, port: u16, status_code: u16, duration_ms: u64) -> Self {
        Self {
            address: address.into(),
            port,
            status_code: Some(status_code),
            listening: None,
            attempts: 1,
            duration_ms,
            observed_at: Utc::now(),
        }
    }

    pub fn listen(
        address: impl Into<String>,
        port: u16,
        listening: bool,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            address: address.into(),
            port,
            status_code: None,
            listening: Some(listening),
            attempts,
            duration_ms,
            observed_at: Utc::now(),
        }
    }

    /// `address:port`
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
