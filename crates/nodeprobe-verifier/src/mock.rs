use crate::command::CommandOutput;
use crate::config::DEFAULT_NODE_PORT_RANGE;
use crate::error::{Result, VerifierError};
use crate::traits::{
    ClusterClient, ExecTarget, LoadBalancerRef, RemoteExec, Sleeper,
    LOAD_BALANCER_CLEANUP_FINALIZER,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, Node, NodeAddress, NodeCondition,
    NodeStatus, Pod, PodCondition, PodStatus, Service,
};
use nodeprobe_core::{ExposureType, NodeOs, NODE_OS_LABEL};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

type ObjectKey = (String, String);

/// Why a mock pod never reaches Running
#[derive(Debug, Clone)]
enum PodFailure {
    Unschedulable(String),
    ImagePull(String),
}

#[derive(Debug, Clone)]
struct MockPod {
    pod: Pod,
    polls_until_running: u32,
    failure: Option<PodFailure>,
}

/// A released load balancer: name, region, zone
pub type ReleasedLoadBalancer = (String, Option<String>, Option<String>);

#[derive(Debug)]
struct ClusterState {
    services: BTreeMap<ObjectKey, Service>,
    /// Deleted services still held by a finalizer, with their remaining reads
    terminating: BTreeMap<ObjectKey, (Service, u32)>,
    deletion_lingers: u32,
    incomplete_creates: bool,
    pods: BTreeMap<ObjectKey, MockPod>,
    nodes: Vec<Node>,
    node_port_range: RangeInclusive<u16>,
    unpullable_images: HashSet<String>,
    pending_polls: u32,
    next_cluster_ip: u32,
    next_pod_ip: u32,
    released_load_balancers: Vec<ReleasedLoadBalancer>,
}

/// In-memory control plane for testing without a cluster
///
/// Allocates node ports from a configurable range, rejects duplicate names,
/// node port collisions and empty selectors, and walks pods from Pending to
/// Running over a configurable number of status reads.
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<RwLock<ClusterState>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::with_node_port_range(DEFAULT_NODE_PORT_RANGE)
    }

    pub fn with_node_port_range(range: RangeInclusive<u16>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ClusterState {
                services: BTreeMap::new(),
                terminating: BTreeMap::new(),
                deletion_lingers: 0,
                incomplete_creates: false,
                pods: BTreeMap::new(),
                nodes: Vec::new(),
                node_port_range: range,
                unpullable_images: HashSet::new(),
                pending_polls: 0,
                next_cluster_ip: 1,
                next_pod_ip: 2,
                released_load_balancers: Vec::new(),
            })),
        }
    }

    /// Register a Ready node
    pub async fn add_node(
        &self,
        name: &str,
        os: NodeOs,
        internal_ip: &str,
        external_ip: Option<&str>,
    ) {
        let mut addresses = vec![NodeAddress {
            type_: "InternalIP".to_string(),
            address: internal_ip.to_string(),
        }];
        if let Some(ip) = external_ip {
            addresses.push(NodeAddress {
                type_: "ExternalIP".to_string(),
                address: ip.to_string(),
            });
        }

        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node.metadata.labels = Some(
            [(NODE_OS_LABEL.to_string(), os.label_value().to_string())]
                .into_iter()
                .collect(),
        );
        node.status = Some(NodeStatus {
            addresses: Some(addresses),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });

        self.state.write().await.nodes.push(node);
        debug!("Mock: node added: {}", name);
    }

    /// Pods using this image fail with ErrImagePull
    pub async fn mark_image_unpullable(&self, image: &str) {
        self.state
            .write()
            .await
            .unpullable_images
            .insert(image.to_string());
    }

    /// Number of status reads a new pod stays Pending for
    pub async fn set_pending_polls(&self, polls: u32) {
        self.state.write().await.pending_polls = polls;
    }

    /// Deleted LoadBalancer services stay readable for this many reads,
    /// carrying the load balancer cleanup finalizer
    pub async fn set_deletion_lingers(&self, reads: u32) {
        self.state.write().await.deletion_lingers = reads;
    }

    /// Store created services and pods as usual but answer the create call
    /// with an object that has no spec
    pub async fn return_incomplete_creates(&self) {
        self.state.write().await.incomplete_creates = true;
    }

    pub async fn released_load_balancers(&self) -> Vec<ReleasedLoadBalancer> {
        self.state.read().await.released_load_balancers.clone()
    }

    pub async fn has_service(&self, namespace: &str, name: &str) -> bool {
        self.state
            .read()
            .await
            .services
            .contains_key(&key(namespace, name))
    }

    pub async fn has_pod(&self, namespace: &str, name: &str) -> bool {
        self.state
            .read()
            .await
            .pods
            .contains_key(&key(namespace, name))
    }

    pub async fn service_count(&self) -> usize {
        self.state.read().await.services.len()
    }

    pub async fn pod_count(&self) -> usize {
        self.state.read().await.pods.len()
    }
}

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn object_key(metadata: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> ObjectKey {
    key(
        metadata.namespace.as_deref().unwrap_or("default"),
        metadata.name.as_deref().unwrap_or_default(),
    )
}

impl ClusterState {
    fn used_node_ports(&self, exclude: &ObjectKey) -> HashSet<u16> {
        self.services
            .iter()
            .filter(|(k, _)| *k != exclude)
            .filter_map(|(_, svc)| svc.spec.as_ref()?.ports.as_ref())
            .flatten()
            .filter_map(|p| p.node_port)
            .filter_map(|p| u16::try_from(p).ok())
            .collect()
    }

    /// Validate a service spec and fill in node ports. `previous` keeps
    /// already-allocated ports stable across updates.
    fn allocate_ports(
        &self,
        object: &ObjectKey,
        service: &mut Service,
        previous: Option<&Service>,
    ) -> Result<()> {
        let (namespace, name) = object;
        let reject = |message: String| {
            VerifierError::resource_rejected("Service", namespace.as_str(), name.as_str(), message)
        };

        let spec = service
            .spec
            .as_mut()
            .ok_or_else(|| reject("spec is required".to_string()))?;

        if spec.selector.as_ref().is_none_or(|s| s.is_empty()) {
            return Err(reject("spec.selector must not be empty".to_string()));
        }

        let exposure_type = ExposureType::from_service_type(spec.type_.as_deref())
            .ok_or_else(|| reject(format!("unsupported type {:?}", spec.type_)))?;

        let ports = match spec.ports.as_mut() {
            Some(ports) if !ports.is_empty() => ports,
            _ => return Err(reject("spec.ports must not be empty".to_string())),
        };

        let previous_ports: Vec<_> = previous
            .and_then(|svc| svc.spec.as_ref())
            .and_then(|s| s.ports.clone())
            .unwrap_or_default();

        let mut used = self.used_node_ports(object);

        for port in ports.iter_mut() {
            if !exposure_type.allocates_node_ports() {
                if previous.is_none() && port.node_port.is_some() {
                    return Err(reject(format!(
                        "spec.ports[{}].nodePort may not be set when type is ClusterIP",
                        port.port
                    )));
                }
                port.node_port = None;
                continue;
            }

            let requested = match port.node_port {
                Some(n) => Some(n),
                None => previous_ports
                    .iter()
                    .find(|p| p.port == port.port && p.protocol == port.protocol)
                    .and_then(|p| p.node_port),
            };

            let allocated = match requested {
                Some(n) => {
                    let n = u16::try_from(n)
                        .ok()
                        .filter(|n| self.node_port_range.contains(n))
                        .ok_or_else(|| {
                            reject(format!(
                                "nodePort {} is outside the range {}-{}",
                                n,
                                self.node_port_range.start(),
                                self.node_port_range.end()
                            ))
                        })?;
                    if used.contains(&n) {
                        return Err(reject(format!(
                            "provided port is already allocated: {}",
                            n
                        )));
                    }
                    n
                }
                None => self
                    .node_port_range
                    .clone()
                    .find(|p| !used.contains(p))
                    .ok_or_else(|| reject("node port range exhausted".to_string()))?,
            };

            used.insert(allocated);
            port.node_port = Some(i32::from(allocated));
        }

        Ok(())
    }

    fn schedule(&self, pod: &Pod) -> Option<PodFailure> {
        let spec = pod.spec.as_ref()?;

        let wanted_os = spec
            .node_selector
            .as_ref()
            .and_then(|sel| sel.get(NODE_OS_LABEL));
        let eligible = self.nodes.iter().any(|node| match wanted_os {
            Some(os) => node
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(NODE_OS_LABEL))
                == Some(os),
            None => true,
        });
        if !eligible {
            return Some(PodFailure::Unschedulable(format!(
                "0/{} nodes are available: {} node(s) didn't match Pod's node affinity/selector",
                self.nodes.len(),
                self.nodes.len()
            )));
        }

        spec.containers
            .iter()
            .filter_map(|c| c.image.as_ref())
            .find(|image| self.unpullable_images.contains(*image))
            .map(|image| {
                PodFailure::ImagePull(format!("failed to pull image \"{}\": not found", image))
            })
    }

    fn eligible_node(&self, pod: &Pod) -> Option<&Node> {
        let wanted_os = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_selector.as_ref())
            .and_then(|sel| sel.get(NODE_OS_LABEL));
        let wanted_name = pod.spec.as_ref().and_then(|s| s.node_name.as_ref());

        self.nodes.iter().find(|node| {
            let labels = node.metadata.labels.as_ref();
            wanted_os.is_none_or(|os| labels.and_then(|l| l.get(NODE_OS_LABEL)) == Some(os))
                && wanted_name.is_none_or(|n| node.metadata.name.as_ref() == Some(n))
        })
    }
}

fn internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn create_service(&self, service: &Service) -> Result<Service> {
        let mut state = self.state.write().await;
        let object = object_key(&service.metadata);

        if state.services.contains_key(&object) || state.terminating.contains_key(&object) {
            return Err(VerifierError::resource_already_exists(
                "Service", &object.0, &object.1,
            ));
        }

        let mut created = service.clone();
        state.allocate_ports(&object, &mut created, None)?;

        created.metadata.namespace = Some(object.0.clone());
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.metadata.resource_version = Some("1".to_string());
        if let Some(spec) = created.spec.as_mut() {
            spec.cluster_ip = Some(format!("10.96.0.{}", state.next_cluster_ip));
        }
        state.next_cluster_ip += 1;

        state.services.insert(object.clone(), created.clone());
        debug!("Mock: service created: {}/{}", object.0, object.1);
        if state.incomplete_creates {
            created.spec = None;
        }
        Ok(created)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        let mut state = self.state.write().await;
        let object = key(namespace, name);

        if let Some(service) = state.services.get(&object) {
            return Ok(service.clone());
        }

        let Some((service, reads_left)) = state.terminating.get_mut(&object) else {
            return Err(VerifierError::resource_not_found("Service", namespace, name));
        };
        let service = service.clone();
        *reads_left -= 1;
        if *reads_left == 0 {
            state.terminating.remove(&object);
            debug!("Mock: finalizer cleared on {}/{}", namespace, name);
        }
        Ok(service)
    }

    async fn update_service(&self, service: &Service) -> Result<Service> {
        let mut state = self.state.write().await;
        let object = object_key(&service.metadata);

        let previous = state
            .services
            .get(&object)
            .cloned()
            .ok_or_else(|| VerifierError::resource_not_found("Service", &object.0, &object.1))?;

        let mut updated = service.clone();
        state.allocate_ports(&object, &mut updated, Some(&previous))?;

        updated.metadata.uid = previous.metadata.uid.clone();
        updated.metadata.namespace = Some(object.0.clone());
        let version = previous
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1);
        updated.metadata.resource_version = Some((version + 1).to_string());
        if let Some(spec) = updated.spec.as_mut() {
            spec.cluster_ip = previous.spec.as_ref().and_then(|s| s.cluster_ip.clone());
        }

        state.services.insert(object.clone(), updated.clone());
        debug!("Mock: service updated: {}/{}", object.0, object.1);
        Ok(updated)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let object = key(namespace, name);

        if state.terminating.contains_key(&object) {
            return Ok(());
        }

        let mut service = state
            .services
            .remove(&object)
            .ok_or_else(|| VerifierError::resource_not_found("Service", namespace, name))?;
        debug!("Mock: service deleted: {}/{}", namespace, name);

        let is_load_balancer = service.spec.as_ref().and_then(|s| s.type_.as_deref())
            == Some(ExposureType::LoadBalancer.as_str());
        if is_load_balancer && state.deletion_lingers > 0 {
            service.metadata.finalizers = Some(vec![LOAD_BALANCER_CLEANUP_FINALIZER.to_string()]);
            let reads = state.deletion_lingers;
            state.terminating.insert(object, (service, reads));
        }
        Ok(())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        Ok(self
            .state
            .read()
            .await
            .services
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, svc)| svc.clone())
            .collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.write().await;
        let object = object_key(&pod.metadata);

        if state.pods.contains_key(&object) {
            return Err(VerifierError::resource_already_exists(
                "Pod", &object.0, &object.1,
            ));
        }

        if pod.spec.as_ref().is_none_or(|s| s.containers.is_empty()) {
            return Err(VerifierError::resource_rejected(
                "Pod",
                &object.0,
                &object.1,
                "spec.containers must not be empty",
            ));
        }

        let mut created = pod.clone();
        created.metadata.namespace = Some(object.0.clone());
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });

        let failure = state.schedule(&created);
        let polls_until_running = state.pending_polls;
        state.pods.insert(
            object.clone(),
            MockPod {
                pod: created.clone(),
                polls_until_running,
                failure,
            },
        );
        debug!("Mock: pod created: {}/{}", object.0, object.1);
        if state.incomplete_creates {
            created.spec = None;
        }
        Ok(created)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let mut state = self.state.write().await;
        let object = key(namespace, name);

        let mut entry = state
            .pods
            .get(&object)
            .cloned()
            .ok_or_else(|| VerifierError::resource_not_found("Pod", namespace, name))?;

        match &entry.failure {
            Some(PodFailure::Unschedulable(message)) => {
                entry.pod.status = Some(PodStatus {
                    phase: Some("Pending".to_string()),
                    conditions: Some(vec![PodCondition {
                        type_: "PodScheduled".to_string(),
                        status: "False".to_string(),
                        reason: Some("Unschedulable".to_string()),
                        message: Some(message.clone()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                });
            }
            Some(PodFailure::ImagePull(message)) => {
                let container = entry
                    .pod
                    .spec
                    .as_ref()
                    .and_then(|s| s.containers.first())
                    .cloned()
                    .unwrap_or_default();
                entry.pod.status = Some(PodStatus {
                    phase: Some("Pending".to_string()),
                    container_statuses: Some(vec![ContainerStatus {
                        name: container.name,
                        image: container.image.unwrap_or_default(),
                        state: Some(ContainerState {
                            waiting: Some(ContainerStateWaiting {
                                reason: Some("ErrImagePull".to_string()),
                                message: Some(message.clone()),
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                });
            }
            None if entry.polls_until_running > 0 => {
                entry.polls_until_running -= 1;
            }
            None => {
                let is_running = entry
                    .pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    == Some("Running");
                if !is_running {
                    let node = state.eligible_node(&entry.pod).cloned();
                    let host_network = entry
                        .pod
                        .spec
                        .as_ref()
                        .and_then(|s| s.host_network)
                        .unwrap_or(false);
                    let pod_ip = match (&node, host_network) {
                        (Some(node), true) => internal_ip(node),
                        _ => {
                            let ip = format!("10.244.0.{}", state.next_pod_ip);
                            state.next_pod_ip += 1;
                            Some(ip)
                        }
                    };

                    if let Some(spec) = entry.pod.spec.as_mut() {
                        spec.node_name = node.and_then(|n| n.metadata.name);
                    }
                    entry.pod.status = Some(PodStatus {
                        phase: Some("Running".to_string()),
                        pod_ip,
                        ..Default::default()
                    });
                }
            }
        }

        state.pods.insert(object, entry.clone());
        Ok(entry.pod)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.state
            .write()
            .await
            .pods
            .remove(&key(namespace, name))
            .map(|_| debug!("Mock: pod deleted: {}/{}", namespace, name))
            .ok_or_else(|| VerifierError::resource_not_found("Pod", namespace, name))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state.read().await.nodes.clone())
    }

    async fn cleanup_load_balancer(&self, lb: &LoadBalancerRef) -> Result<()> {
        self.state.write().await.released_load_balancers.push((
            lb.name.clone(),
            lb.region.clone(),
            lb.zone.clone(),
        ));
        debug!("Mock: {} released", lb);
        Ok(())
    }
}

/// A canned exec response for commands containing a substring
#[derive(Debug, Clone)]
struct ExecRule {
    contains: String,
    output: CommandOutput,
}

#[derive(Debug, Default)]
struct ExecState {
    queued: VecDeque<std::result::Result<CommandOutput, String>>,
    rules: Vec<ExecRule>,
    executed: Vec<(ExecTarget, Vec<String>)>,
}

/// Scripted remote execution channel
///
/// Answers from the FIFO queue first, then from the first rule whose
/// substring occurs in the joined command, then with empty successful output.
#[derive(Clone, Default)]
pub struct MockExec {
    state: Arc<Mutex<ExecState>>,
}

impl MockExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next call with `output`
    pub fn push_output(&self, output: CommandOutput) {
        self.state.lock().queued.push_back(Ok(output));
    }

    /// Fail the next call at the channel level
    pub fn push_error(&self, message: impl Into<String>) {
        self.state.lock().queued.push_back(Err(message.into()));
    }

    /// Answer every command containing `contains` with `output`
    pub fn respond(&self, contains: impl Into<String>, output: CommandOutput) {
        self.state.lock().rules.push(ExecRule {
            contains: contains.into(),
            output,
        });
    }

    /// Every command run so far, with its target
    pub fn executed(&self) -> Vec<(ExecTarget, Vec<String>)> {
        self.state.lock().executed.clone()
    }
}

#[async_trait]
impl RemoteExec for MockExec {
    async fn exec(&self, target: &ExecTarget, command: &[String]) -> Result<CommandOutput> {
        let mut state = self.state.lock();
        state.executed.push((target.clone(), command.to_vec()));

        if let Some(next) = state.queued.pop_front() {
            return next.map_err(|message| {
                VerifierError::command_failed(command.join(" "), -1, message)
            });
        }

        let joined = command.join(" ");
        Ok(state
            .rules
            .iter()
            .find(|rule| joined.contains(&rule.contains))
            .map(|rule| rule.output.clone())
            .unwrap_or_default())
    }
}

/// Sleeper that records requested durations and returns immediately
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeprobe_core::{pod_from_spec, service_from_spec, ExposureSpec, PortSpec, WorkloadSpec};

    fn node_port_of(svc: &Service) -> Option<i32> {
        svc.spec.as_ref()?.ports.as_ref()?.first()?.node_port
    }

    #[tokio::test]
    async fn test_node_port_allocated_from_range() {
        let cluster = MockCluster::new();
        let spec = ExposureSpec::tcp("e2e", "web", 80, 8080).exposure_type(ExposureType::NodePort);

        let created = cluster.create_service(&service_from_spec(&spec)).await.unwrap();
        assert_eq!(node_port_of(&created), Some(30000));
        assert!(created.metadata.uid.is_some());

        let other = ExposureSpec::tcp("e2e", "api", 80, 8080).exposure_type(ExposureType::NodePort);
        let created = cluster.create_service(&service_from_spec(&other)).await.unwrap();
        assert_eq!(node_port_of(&created), Some(30001));
    }

    #[tokio::test]
    async fn test_cluster_ip_gets_no_node_port() {
        let cluster = MockCluster::new();
        let spec = ExposureSpec::tcp("e2e", "web", 80, 8080);
        let created = cluster.create_service(&service_from_spec(&spec)).await.unwrap();
        assert_eq!(node_port_of(&created), None);
    }

    #[tokio::test]
    async fn test_duplicate_service_returns_error() {
        let cluster = MockCluster::new();
        let svc = service_from_spec(&ExposureSpec::tcp("e2e", "web", 80, 8080));

        cluster.create_service(&svc).await.unwrap();
        let err = cluster.create_service(&svc).await.unwrap_err();
        assert!(matches!(err, VerifierError::ResourceAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_node_port_collision_rejected() {
        let cluster = MockCluster::new();
        let first = ExposureSpec::new("e2e", "a")
            .selector("name", "a")
            .port(PortSpec::tcp(80, 80).with_node_port(30500))
            .exposure_type(ExposureType::NodePort);
        let second = ExposureSpec::new("e2e", "b")
            .selector("name", "b")
            .port(PortSpec::tcp(80, 80).with_node_port(30500))
            .exposure_type(ExposureType::NodePort);

        cluster.create_service(&service_from_spec(&first)).await.unwrap();
        let err = cluster
            .create_service(&service_from_spec(&second))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::ResourceRejected { .. }));
    }

    #[tokio::test]
    async fn test_empty_selector_rejected() {
        let cluster = MockCluster::new();
        let spec = ExposureSpec::new("e2e", "headless").port(PortSpec::tcp(80, 80));
        let err = cluster
            .create_service(&service_from_spec(&spec))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::ResourceRejected { .. }));
    }

    #[tokio::test]
    async fn test_update_keeps_allocated_node_port() {
        let cluster = MockCluster::new();
        let spec = ExposureSpec::tcp("e2e", "web", 80, 8080).exposure_type(ExposureType::NodePort);
        let created = cluster.create_service(&service_from_spec(&spec)).await.unwrap();

        let mut promoted = created.clone();
        promoted.spec.as_mut().unwrap().type_ = Some("LoadBalancer".to_string());
        let updated = cluster.update_service(&promoted).await.unwrap();

        assert_eq!(node_port_of(&updated), node_port_of(&created));
        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_pod_runs_after_pending_polls() {
        let cluster = MockCluster::new();
        cluster.add_node("node-1", NodeOs::Linux, "10.0.0.1", None).await;
        cluster.set_pending_polls(2).await;

        let pod = pod_from_spec(&WorkloadSpec::new("e2e", "web", "nginx"));
        cluster.create_pod(&pod).await.unwrap();

        for _ in 0..2 {
            let pod = cluster.get_pod("e2e", "web").await.unwrap();
            assert_eq!(pod.status.unwrap().phase.as_deref(), Some("Pending"));
        }
        let pod = cluster.get_pod("e2e", "web").await.unwrap();
        let status = pod.status.unwrap();
        assert_eq!(status.phase.as_deref(), Some("Running"));
        assert!(status.pod_ip.is_some());
        assert_eq!(pod.spec.unwrap().node_name.as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn test_pod_without_matching_node_is_unschedulable() {
        let cluster = MockCluster::new();
        cluster.add_node("node-1", NodeOs::Linux, "10.0.0.1", None).await;

        let spec = WorkloadSpec::new("e2e", "win", "nanoserver").node_os(NodeOs::Windows);
        cluster.create_pod(&pod_from_spec(&spec)).await.unwrap();

        let pod = cluster.get_pod("e2e", "win").await.unwrap();
        let condition = &pod.status.unwrap().conditions.unwrap()[0];
        assert_eq!(condition.reason.as_deref(), Some("Unschedulable"));
    }

    #[tokio::test]
    async fn test_load_balancer_release_recorded() {
        let cluster = MockCluster::new();
        let lb = LoadBalancerRef {
            name: "a123".to_string(),
            region: Some("us-east1".to_string()),
            zone: None,
            namespace: "default".to_string(),
            service: "web".to_string(),
        };
        cluster.cleanup_load_balancer(&lb).await.unwrap();

        let released = cluster.released_load_balancers().await;
        assert_eq!(
            released,
            vec![("a123".to_string(), Some("us-east1".to_string()), None)]
        );
    }

    #[tokio::test]
    async fn test_deleted_load_balancer_service_lingers_with_finalizer() {
        let cluster = MockCluster::new();
        cluster.set_deletion_lingers(2).await;
        let spec = ExposureSpec::tcp("default", "web", 80, 8080)
            .exposure_type(ExposureType::LoadBalancer);
        cluster.create_service(&service_from_spec(&spec)).await.unwrap();

        cluster.delete_service("default", "web").await.unwrap();
        assert_eq!(cluster.service_count().await, 0);
        assert!(matches!(
            cluster.create_service(&service_from_spec(&spec)).await,
            Err(VerifierError::ResourceAlreadyExists { .. })
        ));

        for _ in 0..2 {
            let lingering = cluster.get_service("default", "web").await.unwrap();
            assert_eq!(
                lingering.metadata.finalizers,
                Some(vec![LOAD_BALANCER_CLEANUP_FINALIZER.to_string()])
            );
        }
        assert!(cluster
            .get_service("default", "web")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_deleted_node_port_service_goes_at_once() {
        let cluster = MockCluster::new();
        cluster.set_deletion_lingers(2).await;
        let spec =
            ExposureSpec::tcp("default", "web", 80, 8080).exposure_type(ExposureType::NodePort);
        cluster.create_service(&service_from_spec(&spec)).await.unwrap();

        cluster.delete_service("default", "web").await.unwrap();
        assert!(cluster.get_service("default", "web").await.is_err());
    }

    #[tokio::test]
    async fn test_incomplete_creates_still_store_the_object() {
        let cluster = MockCluster::new();
        cluster.return_incomplete_creates().await;
        let spec = ExposureSpec::tcp("default", "web", 80, 8080);

        let created = cluster.create_service(&service_from_spec(&spec)).await.unwrap();
        assert!(created.spec.is_none());
        assert!(cluster.has_service("default", "web").await);
        assert!(cluster.get_service("default", "web").await.unwrap().spec.is_some());
    }

    #[tokio::test]
    async fn test_mock_exec_queue_then_rules() {
        let exec = MockExec::new();
        let target = ExecTarget::new("e2e", "diag", "diag");
        exec.push_output(CommandOutput::failure(1, "first"));
        exec.respond("netstat", CommandOutput::success("listing"));

        let cmd = vec!["netstat".to_string(), "-an".to_string()];
        assert_eq!(exec.exec(&target, &cmd).await.unwrap().exit_code, 1);
        assert_eq!(exec.exec(&target, &cmd).await.unwrap().stdout, "listing");
        let other = vec!["hostname".to_string()];
        assert_eq!(exec.exec(&target, &other).await.unwrap(), CommandOutput::default());
        assert_eq!(exec.executed().len(), 3);
    }
}
