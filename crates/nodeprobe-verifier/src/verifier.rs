use crate::config::{ProbeTimeout, VerifierConfig};
use crate::error::{Result, VerifierError};
use crate::nodes::{pick_node_address, NodeTarget};
use crate::probes::{self, curl_command, parse_curl_output, ListenProber, ListenState};
use crate::traits::{ClusterClient, ExecTarget, RemoteExec, Sleeper, TokioSleeper};
use k8s_openapi::api::core::v1::{Pod, Service};
use nodeprobe_core::{
    exposure_from_service, pod_from_spec, service_from_spec, validate_exposure_spec,
    validate_workload_spec, workload_from_pod, ExposurePoint, ExposureSpec, ExposureType, NodeOs,
    ProbeResult, Workload, WorkloadSpec,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

fn exposure_failed(spec: &ExposureSpec, err: impl std::fmt::Display) -> VerifierError {
    VerifierError::exposure_creation_failed(&spec.namespace, &spec.name, err.to_string())
}

fn workload_failed(spec: &WorkloadSpec, err: impl std::fmt::Display) -> VerifierError {
    VerifierError::workload_scheduling_failed(&spec.namespace, &spec.name, err.to_string())
}

/// Container waiting reasons that will not resolve on their own
const FATAL_WAITING_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
];

/// Drives exposure creation, workload attachment and reachability probes
/// against a control plane
pub struct ReachabilityVerifier {
    cluster: Arc<dyn ClusterClient>,
    exec: Arc<dyn RemoteExec>,
    sleeper: Arc<dyn Sleeper>,
    config: VerifierConfig,
}

impl ReachabilityVerifier {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        exec: Arc<dyn RemoteExec>,
        config: VerifierConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cluster,
            exec,
            sleeper: Arc::new(TokioSleeper),
            config,
        })
    }

    /// Replace the timer used between poll attempts
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterClient> {
        &self.cluster
    }

    // --- Exposures ---

    /// Create an exposure point and return what the control plane allocated.
    ///
    /// Every failure, including a name that is already taken, surfaces as
    /// `ExposureCreationFailed`. Nothing is retried.
    pub async fn create_exposure(&self, spec: &ExposureSpec) -> Result<ExposurePoint> {
        let created = self.submit_exposure(spec).await?;

        match self.created_exposure(spec, &created) {
            Ok(exposure) => Ok(exposure),
            Err(e) => {
                // Do not leave an object behind that the caller never saw
                if let Err(delete_err) = self
                    .cluster
                    .delete_service(&spec.namespace, &spec.name)
                    .await
                {
                    warn!(
                        "Failed to delete unreadable service {}/{}: {}",
                        spec.namespace, spec.name, delete_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Validate and submit the Service for `spec`, returning it as stored
    pub async fn submit_exposure(&self, spec: &ExposureSpec) -> Result<Service> {
        validate_exposure_spec(spec).map_err(|e| exposure_failed(spec, e))?;

        self.cluster
            .create_service(&service_from_spec(spec))
            .await
            .map_err(|e| exposure_failed(spec, e))
    }

    /// Read the exposure point out of a Service returned by `submit_exposure`
    pub fn created_exposure(
        &self,
        spec: &ExposureSpec,
        created: &Service,
    ) -> Result<ExposurePoint> {
        let exposure = exposure_from_service(created).map_err(|e| exposure_failed(spec, e))?;
        info!(
            "Created {} exposure {} (node ports {:?})",
            exposure.exposure_type.as_str(),
            exposure.key(),
            exposure.node_ports()
        );
        Ok(exposure)
    }

    pub async fn get_exposure(&self, namespace: &str, name: &str) -> Result<ExposurePoint> {
        let service = self.cluster.get_service(namespace, name).await?;
        Ok(exposure_from_service(&service)?)
    }

    /// Change an exposure's type in place, keeping its allocated node ports
    pub async fn promote_exposure(
        &self,
        exposure: &ExposurePoint,
        exposure_type: ExposureType,
    ) -> Result<ExposurePoint> {
        let updated = self.submit_promotion(exposure, exposure_type).await?;
        self.promoted_exposure(exposure, &updated)
    }

    /// Read the exposure point out of a Service returned by `submit_promotion`
    pub fn promoted_exposure(
        &self,
        before: &ExposurePoint,
        updated: &Service,
    ) -> Result<ExposurePoint> {
        let promoted = exposure_from_service(updated)?;
        info!(
            "Promoted exposure {} from {} to {}",
            promoted.key(),
            before.exposure_type.as_str(),
            promoted.exposure_type.as_str()
        );
        Ok(promoted)
    }

    /// Write the new type onto the exposure's Service and return it as stored
    pub async fn submit_promotion(
        &self,
        exposure: &ExposurePoint,
        exposure_type: ExposureType,
    ) -> Result<Service> {
        let mut service = self
            .cluster
            .get_service(&exposure.namespace, &exposure.name)
            .await?;
        if let Some(spec) = service.spec.as_mut() {
            spec.type_ = Some(exposure_type.as_str().to_string());
        }

        self.cluster.update_service(&service).await
    }

    /// Check that a created exposure has the requested shape: the right type,
    /// a cluster IP, and node ports inside the configured range exactly when
    /// the type allocates them.
    pub fn sanity_check(&self, exposure: &ExposurePoint, expected: ExposureType) -> Result<()> {
        let fail = |message: String| {
            VerifierError::sanity_check_failed(&exposure.namespace, &exposure.name, message)
        };

        if exposure.exposure_type != expected {
            return Err(fail(format!(
                "type is {}, expected {}",
                exposure.exposure_type.as_str(),
                expected.as_str()
            )));
        }

        if exposure
            .cluster_ip
            .as_deref()
            .is_none_or(|ip| ip.is_empty() || ip == "None")
        {
            return Err(fail("no cluster IP was allocated".to_string()));
        }

        if exposure.ports.is_empty() {
            return Err(fail("exposure has no ports".to_string()));
        }

        let range = &self.config.node_port_range;
        for port in &exposure.ports {
            match (expected.allocates_node_ports(), port.node_port) {
                (true, None) => {
                    return Err(fail(format!("port {} has no node port", port.port)));
                }
                (true, Some(node_port)) if !range.contains(&node_port) => {
                    return Err(fail(format!(
                        "node port {} for port {} is outside {}-{}",
                        node_port,
                        port.port,
                        range.start(),
                        range.end()
                    )));
                }
                (false, Some(node_port)) => {
                    return Err(fail(format!(
                        "port {} unexpectedly has node port {}",
                        port.port, node_port
                    )));
                }
                _ => {}
            }
        }

        debug!("Exposure {} passed sanity check", exposure.key());
        Ok(())
    }

    /// Re-read an exposure and fail if its node ports moved
    pub async fn verify_node_ports_stable(&self, before: &ExposurePoint) -> Result<ExposurePoint> {
        let after = self.get_exposure(&before.namespace, &before.name).await?;

        if after.node_ports() != before.node_ports() {
            return Err(VerifierError::sanity_check_failed(
                &before.namespace,
                &before.name,
                format!(
                    "node ports changed from {:?} to {:?}",
                    before.node_ports(),
                    after.node_ports()
                ),
            ));
        }

        Ok(after)
    }

    // --- Workloads ---

    /// Workload that serves on the exposure's target port and matches its selector
    pub fn workload_for_exposure(&self, exposure: &ExposurePoint) -> Result<WorkloadSpec> {
        if exposure.selector.is_empty() {
            return Err(VerifierError::workload_scheduling_failed(
                &exposure.namespace,
                &exposure.name,
                "exposure has an empty selector, no workload can back it",
            ));
        }

        let target_port = exposure
            .ports
            .first()
            .map(|p| p.target_port)
            .ok_or_else(|| {
                VerifierError::workload_scheduling_failed(
                    &exposure.namespace,
                    &exposure.name,
                    "exposure has no ports",
                )
            })?;

        let template = &self.config.workload;
        let mut spec = WorkloadSpec::new(&exposure.namespace, &exposure.name, &template.image)
            .labels(&exposure.selector)
            .args(template.args_for(target_port))
            .container_port(target_port);
        if let Some(os) = self.config.node_os {
            spec = spec.node_os(os);
        }
        Ok(spec)
    }

    /// Launch a workload selected by the exposure and wait until it runs.
    /// Scheduling failures are reported as `WorkloadSchedulingFailed` and not retried.
    pub async fn attach_workload(&self, exposure: &ExposurePoint) -> Result<Workload> {
        let spec = self.workload_for_exposure(exposure)?;
        self.launch_workload(&spec).await
    }

    pub async fn launch_workload(&self, spec: &WorkloadSpec) -> Result<Workload> {
        self.submit_workload(spec).await?;
        self.wait_for_workload(&spec.namespace, &spec.name).await
    }

    /// Submit a workload without waiting for it to run
    pub async fn submit_workload(&self, spec: &WorkloadSpec) -> Result<Workload> {
        let created = self.submit_pod(spec).await?;

        match workload_from_pod(&created) {
            Ok(workload) => Ok(workload),
            Err(e) => {
                if let Err(delete_err) =
                    self.cluster.delete_pod(&spec.namespace, &spec.name).await
                {
                    warn!(
                        "Failed to delete unreadable pod {}/{}: {}",
                        spec.namespace, spec.name, delete_err
                    );
                }
                Err(workload_failed(spec, e))
            }
        }
    }

    /// Validate and submit the Pod for `spec`, returning it as stored
    pub async fn submit_pod(&self, spec: &WorkloadSpec) -> Result<Pod> {
        validate_workload_spec(spec).map_err(|e| workload_failed(spec, e))?;

        let created = self
            .cluster
            .create_pod(&pod_from_spec(spec))
            .await
            .map_err(|e| workload_failed(spec, e))?;

        info!("Submitted workload {}/{} ({})", spec.namespace, spec.name, spec.image);
        Ok(created)
    }

    /// Read the workload out of a Pod returned by `submit_pod`
    pub fn created_workload(&self, spec: &WorkloadSpec, created: &Pod) -> Result<Workload> {
        workload_from_pod(created).map_err(|e| workload_failed(spec, e))
    }

    /// Poll a workload until it runs, failing fast on conditions that will
    /// not clear by themselves
    pub async fn wait_for_workload(&self, namespace: &str, name: &str) -> Result<Workload> {
        let fail =
            |message: String| VerifierError::workload_scheduling_failed(namespace, name, message);
        let attempts = self.config.workload_ready_attempts;
        let mut last_phase = None;

        for attempt in 1..=attempts {
            let pod = self
                .cluster
                .get_pod(namespace, name)
                .await
                .map_err(|e| fail(e.to_string()))?;

            if let Some(reason) = unrecoverable_reason(&pod) {
                return Err(fail(reason));
            }

            let workload = workload_from_pod(&pod).map_err(|e| fail(e.to_string()))?;
            if workload.is_running() {
                info!(
                    "Workload {} running on {} with IP {}",
                    workload.key(),
                    workload.node_name.as_deref().unwrap_or("<unknown>"),
                    workload.pod_ip.as_deref().unwrap_or("<none>")
                );
                return Ok(workload);
            }

            debug!(
                "Workload {}/{} is {} (check {}/{})",
                namespace,
                name,
                workload.phase.as_deref().unwrap_or("Unknown"),
                attempt,
                attempts
            );
            last_phase = workload.phase;

            if attempt < attempts {
                self.sleeper.sleep(self.config.workload_ready_interval).await;
            }
        }

        Err(fail(format!(
            "not running after {} status checks (last phase {})",
            attempts,
            last_phase.as_deref().unwrap_or("Unknown")
        )))
    }

    // --- Nodes ---

    /// Pick the node probes are sent to
    pub async fn resolve_node(&self) -> Result<NodeTarget> {
        let nodes = self.cluster.list_nodes().await?;

        let target = pick_node_address(&nodes, self.config.node_os).ok_or_else(|| {
            VerifierError::no_node_address(match self.config.node_os {
                Some(os) => format!(
                    "none of {} node(s) is a Ready {} node with an address",
                    nodes.len(),
                    os
                ),
                None => format!("none of {} node(s) is Ready with an address", nodes.len()),
            })
        })?;

        info!("Probing through node {} at {}", target.name, target.address);
        Ok(target)
    }

    /// Address of a representative node, ExternalIP preferred
    pub async fn resolve_node_address(&self) -> Result<String> {
        Ok(self.resolve_node().await?.address)
    }

    // --- Probes ---

    /// Send one HTTP GET to `address:port`. A zero timeout is rejected
    /// before any connection is attempted.
    pub async fn probe_http(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<ProbeResult> {
        let timeout = ProbeTimeout::new(timeout)?;
        probes::probe_http(address, port, "/", timeout).await
    }

    /// Probe and require a specific status
    pub async fn expect_http_status(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
        expected: u16,
    ) -> Result<ProbeResult> {
        let result = self.probe_http(address, port, timeout).await?;
        check_status(result, expected)
    }

    /// Probe from inside a pod with curl instead of from this process
    pub async fn probe_http_in_cluster(
        &self,
        target: &ExecTarget,
        os: NodeOs,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<ProbeResult> {
        let timeout = ProbeTimeout::new(timeout)?;
        let start = Instant::now();

        let output = self
            .exec
            .exec(target, &curl_command(os, address, port, timeout))
            .await?;
        let status = parse_curl_output(address, port, &output)?;

        debug!("In-cluster probe from {} to {}:{} returned {}", target, address, port, status);
        Ok(ProbeResult::http(
            address,
            port,
            status,
            start.elapsed().as_millis() as u64,
        ))
    }

    /// Poll the configured diagnostic container until `port` is listening
    pub async fn probe_listen_state(
        &self,
        address: &str,
        port: u16,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<ProbeResult> {
        let diagnostic = self.config.diagnostic.as_ref().ok_or_else(|| {
            VerifierError::invalid_config(
                "no diagnostic container is configured for listen-state checks",
                "Set a diagnostic pod running on the probed node",
            )
        })?;

        self.probe_listen_state_via(
            &diagnostic.exec,
            diagnostic.os,
            address,
            port,
            max_attempts,
            interval,
        )
        .await
    }

    /// Poll `target` until `port` is listening, up to `max_attempts` observations
    pub async fn probe_listen_state_via(
        &self,
        target: &ExecTarget,
        os: NodeOs,
        address: &str,
        port: u16,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<ProbeResult> {
        if max_attempts == 0 {
            return Err(VerifierError::invalid_config(
                "max_attempts must be at least 1",
                "Pass the number of observations to make before giving up",
            ));
        }

        let poll = ListenProber::new(self.exec.as_ref(), self.sleeper.as_ref())
            .poll(target, os, port, max_attempts, interval)
            .await;

        match poll.state {
            ListenState::Confirmed => {
                info!(
                    "Port {} on {} confirmed listening after {} attempt(s)",
                    port, address, poll.attempts
                );
                Ok(ProbeResult::listen(
                    address,
                    port,
                    true,
                    poll.attempts,
                    poll.elapsed.as_millis() as u64,
                ))
            }
            ListenState::Exhausted => Err(VerifierError::listen_state_timeout(
                address,
                port,
                poll.attempts,
                interval,
            )),
            ListenState::Pending => Err(VerifierError::internal_error(
                "listen-state poll returned before reaching a final state",
            )),
        }
    }

    // --- Diagnostics ---

    /// YAML dump of every exposure in `namespace`, for failure reports.
    /// Never fails; listing errors are reported inline.
    pub async fn describe_exposures(&self, namespace: &str) -> String {
        let services = match self.cluster.list_services(namespace).await {
            Ok(services) => services,
            Err(e) => return format!("# failed to list services in {}: {}\n", namespace, e),
        };

        if services.is_empty() {
            return format!("# no services in {}\n", namespace);
        }

        services
            .iter()
            .map(|svc| match nodeprobe_core::to_yaml(svc) {
                Ok(yaml) => yaml,
                Err(e) => format!(
                    "# {}: {}\n",
                    svc.metadata.name.as_deref().unwrap_or("<unnamed>"),
                    e
                ),
            })
            .collect::<Vec<_>>()
            .join("---\n")
    }
}

/// Fail with `ProbeAssertionFailed` unless the probe saw `expected`
pub fn check_status(result: ProbeResult, expected: u16) -> Result<ProbeResult> {
    match result.status_code {
        Some(status) if status == expected => Ok(result),
        observed => Err(VerifierError::probe_assertion_failed(
            &result.address,
            result.port,
            format!("HTTP {}", expected),
            observed
                .map(|s| format!("HTTP {}", s))
                .unwrap_or_else(|| "no status".to_string()),
        )),
    }
}

/// Why a pod can never start, if it already says so
fn unrecoverable_reason(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;

    if let Some(phase @ ("Failed" | "Succeeded")) = status.phase.as_deref() {
        return Some(format!("pod terminated with phase {}", phase));
    }

    let unschedulable = status.conditions.iter().flatten().find(|c| {
        c.type_ == "PodScheduled"
            && c.status == "False"
            && c.reason.as_deref() == Some("Unschedulable")
    });
    if let Some(condition) = unschedulable {
        return Some(format!(
            "unschedulable: {}",
            condition.message.as_deref().unwrap_or("no reason given")
        ));
    }

    status
        .container_statuses
        .iter()
        .flatten()
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref())
        .find(|w| {
            w.reason
                .as_deref()
                .is_some_and(|r| FATAL_WAITING_REASONS.contains(&r))
        })
        .map(|w| {
            format!(
                "{}: {}",
                w.reason.as_deref().unwrap_or_default(),
                w.message.as_deref().unwrap_or("no message")
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::config::DiagnosticTarget;
    use crate::mock::{MockCluster, MockExec, RecordingSleeper};
    use nodeprobe_core::PortSpec;

    struct Harness {
        cluster: MockCluster,
        exec: MockExec,
        sleeper: RecordingSleeper,
        verifier: ReachabilityVerifier,
    }

    async fn harness(config: VerifierConfig) -> Harness {
        let cluster = MockCluster::new();
        cluster
            .add_node("node-1", NodeOs::Linux, "10.0.0.1", Some("203.0.113.1"))
            .await;
        let exec = MockExec::new();
        let sleeper = RecordingSleeper::new();
        let verifier = ReachabilityVerifier::new(
            Arc::new(cluster.clone()),
            Arc::new(exec.clone()),
            config,
        )
        .unwrap()
        .with_sleeper(Arc::new(sleeper.clone()));

        Harness {
            cluster,
            exec,
            sleeper,
            verifier,
        }
    }

    fn nodeport_spec(name: &str) -> ExposureSpec {
        ExposureSpec::tcp("e2e", name, 80, 9376).exposure_type(ExposureType::NodePort)
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_construction() {
        let config = VerifierConfig {
            listen_attempts: 0,
            ..Default::default()
        };
        let result = ReachabilityVerifier::new(
            Arc::new(MockCluster::new()),
            Arc::new(MockExec::new()),
            config,
        );
        assert!(matches!(result, Err(VerifierError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_create_exposure_allocates_node_port() {
        let h = harness(VerifierConfig::default()).await;

        let exposure = h.verifier.create_exposure(&nodeport_spec("web")).await.unwrap();
        assert_eq!(exposure.exposure_type, ExposureType::NodePort);
        assert!(exposure.node_port().is_some());
        h.verifier
            .sanity_check(&exposure, ExposureType::NodePort)
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_duplicate_exposure_fails() {
        let h = harness(VerifierConfig::default()).await;

        h.verifier.create_exposure(&nodeport_spec("web")).await.unwrap();
        let err = h
            .verifier
            .create_exposure(&nodeport_spec("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::ExposureCreationFailed { .. }));
        assert_eq!(h.cluster.service_count().await, 1);
    }

    #[tokio::test]
    async fn test_unreadable_created_objects_are_deleted() {
        let h = harness(VerifierConfig::default()).await;
        h.cluster.return_incomplete_creates().await;

        let err = h
            .verifier
            .create_exposure(&nodeport_spec("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::ExposureCreationFailed { .. }));
        assert_eq!(h.cluster.service_count().await, 0);

        let err = h
            .verifier
            .submit_workload(&WorkloadSpec::new("e2e", "web", "serve-hostname:1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::WorkloadSchedulingFailed { .. }));
        assert_eq!(h.cluster.pod_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_exposure_with_invalid_spec_never_reaches_cluster() {
        let h = harness(VerifierConfig::default()).await;
        let spec = ExposureSpec::new("e2e", "Bad_Name").port(PortSpec::tcp(80, 80));

        let err = h.verifier.create_exposure(&spec).await.unwrap_err();
        assert!(matches!(err, VerifierError::ExposureCreationFailed { .. }));
        assert_eq!(h.cluster.service_count().await, 0);
    }

    #[tokio::test]
    async fn test_sanity_check_rejects_wrong_type() {
        let h = harness(VerifierConfig::default()).await;
        let exposure = h
            .verifier
            .create_exposure(&ExposureSpec::tcp("e2e", "web", 80, 9376))
            .await
            .unwrap();

        let err = h
            .verifier
            .sanity_check(&exposure, ExposureType::NodePort)
            .unwrap_err();
        assert!(matches!(err, VerifierError::SanityCheckFailed { .. }));
        h.verifier
            .sanity_check(&exposure, ExposureType::ClusterIP)
            .unwrap();
    }

    #[tokio::test]
    async fn test_sanity_check_rejects_node_port_outside_range() {
        let config = VerifierConfig {
            node_port_range: 31000..=31999,
            ..Default::default()
        };
        let h = harness(config).await;
        // The mock allocates from 30000, outside the configured range
        let exposure = h.verifier.create_exposure(&nodeport_spec("web")).await.unwrap();

        let err = h
            .verifier
            .sanity_check(&exposure, ExposureType::NodePort)
            .unwrap_err();
        assert!(err.to_string().contains("failed sanity check"));
    }

    #[tokio::test]
    async fn test_promote_keeps_node_ports() {
        let h = harness(VerifierConfig::default()).await;
        let exposure = h.verifier.create_exposure(&nodeport_spec("web")).await.unwrap();

        let promoted = h
            .verifier
            .promote_exposure(&exposure, ExposureType::LoadBalancer)
            .await
            .unwrap();
        assert_eq!(promoted.exposure_type, ExposureType::LoadBalancer);
        assert_eq!(promoted.node_ports(), exposure.node_ports());
        h.verifier.verify_node_ports_stable(&exposure).await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_workload_waits_until_running() {
        let h = harness(VerifierConfig::default()).await;
        h.cluster.set_pending_polls(3).await;
        let exposure = h.verifier.create_exposure(&nodeport_spec("web")).await.unwrap();

        let workload = h.verifier.attach_workload(&exposure).await.unwrap();
        assert!(workload.is_running());
        assert_eq!(workload.labels, exposure.selector);
        assert_eq!(h.sleeper.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn test_attach_workload_unpullable_image_fails_fast() {
        let h = harness(VerifierConfig::default()).await;
        h.cluster
            .mark_image_unpullable(crate::config::DEFAULT_WORKLOAD_IMAGE)
            .await;
        let exposure = h.verifier.create_exposure(&nodeport_spec("web")).await.unwrap();

        let err = h.verifier.attach_workload(&exposure).await.unwrap_err();
        assert!(matches!(err, VerifierError::WorkloadSchedulingFailed { .. }));
        assert!(err.to_string().contains("ErrImagePull"));
        assert!(h.sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_attach_workload_unschedulable_os() {
        let config = VerifierConfig {
            node_os: Some(NodeOs::Windows),
            ..Default::default()
        };
        let h = harness(config).await;
        let exposure = h.verifier.create_exposure(&nodeport_spec("web")).await.unwrap();

        let err = h.verifier.attach_workload(&exposure).await.unwrap_err();
        assert!(matches!(err, VerifierError::WorkloadSchedulingFailed { .. }));
        assert!(err.to_string().contains("unschedulable"));
    }

    #[tokio::test]
    async fn test_wait_for_workload_exhausts_budget() {
        let config = VerifierConfig {
            workload_ready_attempts: 3,
            ..Default::default()
        };
        let h = harness(config).await;
        h.cluster.set_pending_polls(10).await;
        let spec = WorkloadSpec::new("e2e", "slow", "nginx");

        let err = h.verifier.launch_workload(&spec).await.unwrap_err();
        assert!(matches!(err, VerifierError::WorkloadSchedulingFailed { .. }));
        assert_eq!(h.sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_node_address_prefers_external() {
        let h = harness(VerifierConfig::default()).await;
        assert_eq!(
            h.verifier.resolve_node_address().await.unwrap(),
            "203.0.113.1"
        );
    }

    #[tokio::test]
    async fn test_resolve_node_address_without_nodes() {
        let verifier = ReachabilityVerifier::new(
            Arc::new(MockCluster::new()),
            Arc::new(MockExec::new()),
            VerifierConfig::default(),
        )
        .unwrap();

        let err = verifier.resolve_node_address().await.unwrap_err();
        assert!(matches!(err, VerifierError::NoNodeAddress { .. }));
    }

    #[tokio::test]
    async fn test_probe_http_rejects_zero_timeout() {
        let h = harness(VerifierConfig::default()).await;
        let err = h
            .verifier
            .probe_http("127.0.0.1", 80, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::InvalidConfig { .. }));
    }

    #[test]
    fn test_check_status() {
        let ok = ProbeResult::http("10.0.0.1", 30080, 200, 5);
        assert!(check_status(ok, 200).is_ok());

        let wrong = ProbeResult::http("10.0.0.1", 30080, 404, 5);
        let err = check_status(wrong, 200).unwrap_err();
        assert!(matches!(err, VerifierError::ProbeAssertionFailed { .. }));
    }

    #[tokio::test]
    async fn test_probe_http_in_cluster() {
        let h = harness(VerifierConfig::default()).await;
        let target = ExecTarget::new("e2e", "nanotest", "nanotest");
        h.exec.push_output(CommandOutput::success("200"));
        h.exec.push_output(CommandOutput::failure(28, "Operation timed out"));

        let result = h
            .verifier
            .probe_http_in_cluster(
                &target,
                NodeOs::Windows,
                "10.0.0.1",
                30080,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(result.status_code, Some(200));

        let err = h
            .verifier
            .probe_http_in_cluster(
                &target,
                NodeOs::Windows,
                "10.0.0.1",
                30080,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::ProbeConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn test_probe_listen_state_requires_diagnostic_target() {
        let h = harness(VerifierConfig::default()).await;
        let err = h
            .verifier
            .probe_listen_state("10.0.0.1", 30080, 3, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_probe_listen_state_confirms_and_times_out() {
        let config = VerifierConfig {
            diagnostic: Some(DiagnosticTarget {
                exec: ExecTarget::new("e2e", "diag", "diag"),
                os: NodeOs::Linux,
            }),
            ..Default::default()
        };
        let h = harness(config).await;
        h.exec.push_output(CommandOutput::success(""));
        h.exec
            .push_output(CommandOutput::success("LISTEN 0 4096 0.0.0.0:30080 0.0.0.0:*"));

        let result = h
            .verifier
            .probe_listen_state("10.0.0.1", 30080, 5, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.listening, Some(true));
        assert_eq!(result.attempts, 2);

        let err = h
            .verifier
            .probe_listen_state("10.0.0.1", 30081, 3, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerifierError::ListenStateTimeout { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_probe_listen_state_zero_attempts_rejected() {
        let h = harness(VerifierConfig::default()).await;
        let target = ExecTarget::new("e2e", "diag", "diag");
        let err = h
            .verifier
            .probe_listen_state_via(
                &target,
                NodeOs::Linux,
                "10.0.0.1",
                30080,
                0,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::InvalidConfig { .. }));
        assert!(h.exec.executed().is_empty());
    }

    #[tokio::test]
    async fn test_describe_exposures_dumps_yaml() {
        let h = harness(VerifierConfig::default()).await;
        assert!(h.verifier.describe_exposures("e2e").await.contains("no services"));

        h.verifier.create_exposure(&nodeport_spec("web")).await.unwrap();
        h.verifier.create_exposure(&nodeport_spec("api")).await.unwrap();

        let dump = h.verifier.describe_exposures("e2e").await;
        assert!(dump.contains("name: web"));
        assert!(dump.contains("name: api"));
        assert!(dump.contains("nodePort:"));
        assert!(dump.contains("---"));
    }
}
