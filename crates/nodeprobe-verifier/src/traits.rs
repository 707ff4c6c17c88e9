use crate::command::CommandOutput;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Trait for the cluster control plane the verifier drives
///
/// The verifier treats the control plane as opaque: it submits objects,
/// reads back what was allocated, and releases what it created. It enables
/// testing via `MockCluster` without a real cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    // --- Services ---

    /// Create a service. Fails with `ResourceAlreadyExists` on a name clash.
    async fn create_service(&self, service: &Service) -> Result<Service>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    /// Replace a service's spec, keeping control-plane allocated fields
    async fn update_service(&self, service: &Service) -> Result<Service>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>>;

    // --- Pods ---

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    // --- Nodes ---

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    // --- Cloud resources ---

    /// Release a cloud load balancer provisioned for a service. Returns once
    /// the load balancer is known to be gone.
    async fn cleanup_load_balancer(&self, lb: &LoadBalancerRef) -> Result<()>;
}

/// Finalizer the cloud controller holds on a LoadBalancer Service until the
/// balancer behind it is released
pub const LOAD_BALANCER_CLEANUP_FINALIZER: &str = "service.kubernetes.io/load-balancer-cleanup";

/// A cloud load balancer and the Service it was provisioned for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerRef {
    pub name: String,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub namespace: String,
    pub service: String,
}

impl fmt::Display for LoadBalancerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "load balancer {} for service {}/{}",
            self.name, self.namespace, self.service
        )
    }
}

/// A container commands can be executed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ExecTarget {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.namespace, self.pod, self.container)
    }
}

/// Remote command execution channel
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` inside `target` and return its output regardless of exit code.
    /// An `Err` means the channel itself failed, not the command.
    async fn exec(&self, target: &ExecTarget, command: &[String]) -> Result<CommandOutput>;
}

/// Source of waiting between poll attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
