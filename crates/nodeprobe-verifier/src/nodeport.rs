use crate::config::{
    DiagnosticTarget, ProbeTimeout, VerifierConfig, WorkloadTemplate, DEFAULT_WORKLOAD_IMAGE,
};
use crate::error::{Result, VerifierError};
use crate::scenario::{Scenario, ScenarioContext};
use crate::traits::ExecTarget;
use crate::verifier::{check_status, ReachabilityVerifier};
use nodeprobe_core::{
    ExposurePoint, ExposureSpec, ExposureType, NodeOs, ProbeResult, SecurityProfile, WorkloadSpec,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Images with curl for in-cluster probes
const WINDOWS_CLIENT_IMAGE: &str = "mcr.microsoft.com/windows/nanoserver:ltsc2022";
const LINUX_CLIENT_IMAGE: &str = "curlimages/curl:8.10.1";
/// Image with socket tools for listen-state checks on Linux nodes
const LINUX_DIAGNOSTIC_IMAGE: &str = "nicolaka/netshoot:v0.13";

/// Where the HTTP probe is sent from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeMode {
    /// From this process straight to the node address
    #[default]
    Direct,
    /// With curl from a client pod in the cluster
    InCluster,
}

/// Settings for the NodePort reachability scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScenarioConfig {
    pub namespace: String,
    pub service_name: String,
    pub service_port: u16,
    pub target_port: u16,
    pub node_os: Option<NodeOs>,
    pub workload_image: String,
    pub workload_args: Option<Vec<String>>,
    pub probe_mode: ProbeMode,
    pub expected_status: u16,
    pub probe_timeout_secs: i64,
    pub listen_check: bool,
    pub listen_attempts: u32,
    pub listen_interval_secs: u64,
    pub workload_ready_attempts: u32,
    pub workload_ready_interval_secs: u64,
    pub node_port_range_start: u16,
    pub node_port_range_end: u16,
    /// Existing pod on the probed node to run socket listings in
    pub diagnostic_pod: Option<String>,
    /// Name of the client pod for in-cluster probes
    pub exec_pod_name: String,
    pub region: Option<String>,
    pub zone: Option<String>,
    /// Bound on the whole scenario before teardown is forced; 0 disables it
    pub deadline_secs: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let defaults = VerifierConfig::default();
        Self {
            namespace: "default".to_string(),
            service_name: "nodeport-test".to_string(),
            service_port: 80,
            target_port: 9376,
            node_os: None,
            workload_image: DEFAULT_WORKLOAD_IMAGE.to_string(),
            workload_args: None,
            probe_mode: ProbeMode::Direct,
            expected_status: 200,
            probe_timeout_secs: defaults.probe_timeout.as_duration().as_secs() as i64,
            listen_check: true,
            listen_attempts: defaults.listen_attempts,
            listen_interval_secs: defaults.listen_interval.as_secs(),
            workload_ready_attempts: defaults.workload_ready_attempts,
            workload_ready_interval_secs: defaults.workload_ready_interval.as_secs(),
            node_port_range_start: *defaults.node_port_range.start(),
            node_port_range_end: *defaults.node_port_range.end(),
            diagnostic_pod: None,
            exec_pod_name: "nanotest".to_string(),
            region: None,
            zone: None,
            deadline_secs: 600,
        }
    }
}

impl ScenarioConfig {
    pub fn os(&self) -> NodeOs {
        self.node_os.unwrap_or_default()
    }

    /// Verifier settings this scenario runs with
    pub fn verifier_config(&self) -> Result<VerifierConfig> {
        let config = VerifierConfig {
            probe_timeout: ProbeTimeout::from_secs(self.probe_timeout_secs)?,
            listen_attempts: self.listen_attempts,
            listen_interval: Duration::from_secs(self.listen_interval_secs),
            workload_ready_attempts: self.workload_ready_attempts,
            workload_ready_interval: Duration::from_secs(self.workload_ready_interval_secs),
            node_port_range: self.node_port_range_start..=self.node_port_range_end,
            node_os: self.node_os,
            workload: WorkloadTemplate {
                image: self.workload_image.clone(),
                args: self.workload_args.clone(),
            },
            diagnostic: self.diagnostic_pod.as_ref().map(|pod| DiagnosticTarget {
                exec: ExecTarget::new(&self.namespace, pod, pod),
                os: self.os(),
            }),
            region: self.region.clone(),
            zone: self.zone.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// What the NodePort scenario observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePortReport {
    pub exposure: ExposurePoint,
    pub node_name: String,
    pub node_address: String,
    pub node_port: u16,
    pub http: ProbeResult,
    pub listen: Option<ProbeResult>,
}

/// Create a NodePort exposure backed by a serving workload and verify it is
/// reachable on a node address, then that the node port is bound and stable.
/// Everything created is released afterwards.
pub async fn run_nodeport_scenario(
    verifier: Arc<ReachabilityVerifier>,
    config: &ScenarioConfig,
) -> Result<NodePortReport> {
    let scenario_config = config.clone();

    let mut scenario = Scenario::new("nodeport-reachability", &config.namespace, verifier);
    if config.deadline_secs > 0 {
        scenario = scenario.with_deadline(Duration::from_secs(config.deadline_secs));
    }
    scenario
        .run(|ctx| async move { nodeport_body(ctx, scenario_config).await })
        .await
}

async fn nodeport_body(ctx: ScenarioContext, config: ScenarioConfig) -> Result<NodePortReport> {
    let verifier = ctx.verifier();
    let os = config.os();
    let timeout = verifier.config().probe_timeout.as_duration();

    let node = verifier.resolve_node().await?;

    let spec = ExposureSpec::tcp(
        &config.namespace,
        &config.service_name,
        config.service_port,
        config.target_port,
    )
    .exposure_type(ExposureType::NodePort);
    let exposure = ctx.create_exposure(&spec).await?;
    verifier.sanity_check(&exposure, ExposureType::NodePort)?;
    let node_port = exposure.node_port().ok_or_else(|| {
        VerifierError::internal_error(format!(
            "{} passed sanity check without a node port",
            exposure.key()
        ))
    })?;

    ctx.attach_workload(&exposure).await?;

    let http = match config.probe_mode {
        ProbeMode::Direct => {
            verifier
                .expect_http_status(&node.address, node_port, timeout, config.expected_status)
                .await?
        }
        ProbeMode::InCluster => {
            let client = launch_client_pod(&ctx, &config).await?;
            let result = verifier
                .probe_http_in_cluster(&client, os, &node.address, node_port, timeout)
                .await?;
            check_status(result, config.expected_status)?
        }
    };
    info!(
        "{} answered HTTP {} on {}",
        exposure.key(),
        http.status_code.unwrap_or_default(),
        http.target()
    );

    let listen = if config.listen_check {
        let attempts = verifier.config().listen_attempts;
        let interval = verifier.config().listen_interval;
        let result = match &verifier.config().diagnostic {
            Some(_) => {
                verifier
                    .probe_listen_state(&node.address, node_port, attempts, interval)
                    .await?
            }
            None => {
                let diagnostic = launch_diagnostic_pod(&ctx, &config, &node.name).await?;
                verifier
                    .probe_listen_state_via(
                        &diagnostic,
                        os,
                        &node.address,
                        node_port,
                        attempts,
                        interval,
                    )
                    .await?
            }
        };
        Some(result)
    } else {
        None
    };

    let exposure = verifier.verify_node_ports_stable(&exposure).await?;

    Ok(NodePortReport {
        exposure,
        node_name: node.name,
        node_address: node.address,
        node_port,
        http,
        listen,
    })
}

/// Long-running client pod with curl
async fn launch_client_pod(ctx: &ScenarioContext, config: &ScenarioConfig) -> Result<ExecTarget> {
    let name = &config.exec_pod_name;
    let os = config.os();
    let (image, command): (&str, &[&str]) = match os {
        NodeOs::Windows => (WINDOWS_CLIENT_IMAGE, &["cmd", "/c", "ping -t localhost"]),
        NodeOs::Linux => (LINUX_CLIENT_IMAGE, &["sleep", "3600"]),
    };

    let spec = WorkloadSpec::new(&config.namespace, name, image)
        .label("name", name.as_str())
        .command(command.iter().copied())
        .node_os(os);
    ctx.launch_workload(&spec).await?;

    Ok(ExecTarget::new(&config.namespace, name, name))
}

/// Host-network pod on the probed node whose socket table is the node's.
/// Privileged on Linux, a HostProcess container on Windows.
async fn launch_diagnostic_pod(
    ctx: &ScenarioContext,
    config: &ScenarioConfig,
    node_name: &str,
) -> Result<ExecTarget> {
    let name = format!("{}-diag", config.service_name);
    let os = config.os();
    let (image, command): (&str, &[&str]) = match os {
        NodeOs::Windows => (WINDOWS_CLIENT_IMAGE, &["cmd", "/c", "ping -t localhost"]),
        NodeOs::Linux => (LINUX_DIAGNOSTIC_IMAGE, &["sleep", "3600"]),
    };

    let spec = WorkloadSpec::new(&config.namespace, &name, image)
        .label("name", name.as_str())
        .command(command.iter().copied())
        .node_os(os)
        .node_name(node_name)
        .security(SecurityProfile::node_diagnostics(os))
        .host_network(true);
    ctx.launch_workload(&spec).await?;

    Ok(ExecTarget::new(&config.namespace, &name, &name))
}
