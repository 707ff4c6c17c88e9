//! Scoped test scenarios with guaranteed resource release
//!
//! A [`Scenario`] runs a body against a [`ScenarioContext`]. Every exposure,
//! workload and load balancer created through the context is recorded in a
//! [`ResourceTracker`] and released when the body finishes, whether it
//! returned `Ok`, returned an error, or panicked.

use crate::error::{Result, VerifierError};
use crate::traits::{ClusterClient, LoadBalancerRef};
use crate::verifier::ReachabilityVerifier;
use futures_util::FutureExt;
use nodeprobe_core::{ExposurePoint, ExposureSpec, ExposureType, Workload, WorkloadSpec};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Longest load balancer name cloud providers accept
const LOAD_BALANCER_NAME_MAX: usize = 32;

/// Something a scenario allocated and must give back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedResource {
    Service {
        namespace: String,
        name: String,
    },
    Pod {
        namespace: String,
        name: String,
    },
    LoadBalancer(LoadBalancerRef),
}

impl fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackedResource::Service { namespace, name } => {
                write!(f, "service {}/{}", namespace, name)
            }
            TrackedResource::Pod { namespace, name } => write!(f, "pod {}/{}", namespace, name),
            TrackedResource::LoadBalancer(lb) => write!(f, "{}", lb),
        }
    }
}

/// Cloud load balancer name derived from the service UID
pub fn load_balancer_name(exposure: &ExposurePoint) -> Option<String> {
    exposure.uid.as_deref().map(load_balancer_name_for_uid)
}

pub fn load_balancer_name_for_uid(uid: &str) -> String {
    let mut name: String = std::iter::once('a')
        .chain(uid.chars().filter(|c| *c != '-'))
        .collect();
    name.truncate(LOAD_BALANCER_NAME_MAX);
    name
}

async fn release(cluster: &dyn ClusterClient, resource: &TrackedResource) -> Result<()> {
    match resource {
        TrackedResource::Service { namespace, name } => {
            cluster.delete_service(namespace, name).await
        }
        TrackedResource::Pod { namespace, name } => cluster.delete_pod(namespace, name).await,
        TrackedResource::LoadBalancer(lb) => cluster.cleanup_load_balancer(lb).await,
    }
}

/// Release order: newest first, load balancers after the services that own them
fn release_order(mut resources: Vec<TrackedResource>) -> Vec<TrackedResource> {
    resources.reverse();
    let (load_balancers, mut rest): (Vec<_>, Vec<_>) = resources
        .into_iter()
        .partition(|r| matches!(r, TrackedResource::LoadBalancer(_)));
    rest.extend(load_balancers);
    rest
}

/// Records allocated resources and releases them in one pass
pub struct ResourceTracker {
    cluster: Arc<dyn ClusterClient>,
    resources: Mutex<Vec<TrackedResource>>,
}

impl ResourceTracker {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            cluster,
            resources: Mutex::new(Vec::new()),
        }
    }

    pub fn track(&self, resource: TrackedResource) {
        debug!("Tracking {}", resource);
        let mut resources = self.resources.lock();
        if !resources.contains(&resource) {
            resources.push(resource);
        }
    }

    pub fn tracked(&self) -> Vec<TrackedResource> {
        self.resources.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }

    /// Release everything tracked so far. Objects that are already gone
    /// count as released; every other failure is collected into a single
    /// `CleanupFailed` after all releases have been attempted.
    pub async fn release_all(&self) -> Result<usize> {
        let resources = std::mem::take(&mut *self.resources.lock());
        let mut released = 0;
        let mut failures = Vec::new();

        for resource in release_order(resources) {
            match release(self.cluster.as_ref(), &resource).await {
                Ok(()) => {
                    debug!("Released {}", resource);
                    released += 1;
                }
                Err(e) if e.is_not_found() => {
                    debug!("{} was already gone", resource);
                    released += 1;
                }
                Err(e) => {
                    warn!("Failed to release {}: {}", resource, e);
                    failures.push(format!("{} ({})", resource, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(released)
        } else {
            Err(VerifierError::cleanup_failed(failures.len(), failures.join("; ")))
        }
    }
}

impl Drop for ResourceTracker {
    fn drop(&mut self) {
        let leftovers = std::mem::take(self.resources.get_mut());
        if leftovers.is_empty() {
            return;
        }

        warn!(
            "Resource tracker dropped with {} unreleased resource(s): {}",
            leftovers.len(),
            leftovers
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        // Best effort when a runtime is still around to run the deletes
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let cluster = self.cluster.clone();
            handle.spawn(async move {
                for resource in release_order(leftovers) {
                    if let Err(e) = release(cluster.as_ref(), &resource).await {
                        if !e.is_not_found() {
                            warn!("Failed to release {}: {}", resource, e);
                        }
                    }
                }
            });
        }
    }
}

/// Called with the scenario name and exposure dump when a scenario fails
pub type FailureHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Handle given to a scenario body. Creation through it is tracked.
#[derive(Clone)]
pub struct ScenarioContext {
    verifier: Arc<ReachabilityVerifier>,
    tracker: Arc<ResourceTracker>,
    namespace: String,
}

impl ScenarioContext {
    pub fn verifier(&self) -> &ReachabilityVerifier {
        &self.verifier
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn tracked(&self) -> Vec<TrackedResource> {
        self.tracker.tracked()
    }

    /// The service is tracked under the requested name as soon as the
    /// control plane accepts it, before the response is read
    pub async fn create_exposure(&self, spec: &ExposureSpec) -> Result<ExposurePoint> {
        let created = self.verifier.submit_exposure(spec).await?;
        self.tracker.track(TrackedResource::Service {
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
        });
        if spec.exposure_type == ExposureType::LoadBalancer {
            let uid = created.metadata.uid.as_deref();
            self.track_load_balancer(&spec.namespace, &spec.name, uid);
        }
        self.verifier.created_exposure(spec, &created)
    }

    pub async fn promote_exposure(
        &self,
        exposure: &ExposurePoint,
        exposure_type: ExposureType,
    ) -> Result<ExposurePoint> {
        let updated = self
            .verifier
            .submit_promotion(exposure, exposure_type)
            .await?;
        if exposure_type == ExposureType::LoadBalancer {
            let uid = updated.metadata.uid.as_deref().or(exposure.uid.as_deref());
            self.track_load_balancer(&exposure.namespace, &exposure.name, uid);
        }
        self.verifier.promoted_exposure(exposure, &updated)
    }

    pub async fn attach_workload(&self, exposure: &ExposurePoint) -> Result<Workload> {
        let spec = self.verifier.workload_for_exposure(exposure)?;
        self.launch_workload(&spec).await
    }

    /// The pod is tracked as soon as it exists, before it is known to run
    pub async fn launch_workload(&self, spec: &WorkloadSpec) -> Result<Workload> {
        let created = self.verifier.submit_pod(spec).await?;
        self.tracker.track(TrackedResource::Pod {
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
        });
        self.verifier.created_workload(spec, &created)?;
        self.verifier
            .wait_for_workload(&spec.namespace, &spec.name)
            .await
    }

    fn track_load_balancer(&self, namespace: &str, service: &str, uid: Option<&str>) {
        let Some(uid) = uid else {
            warn!(
                "Service {}/{} has no UID, its load balancer cannot be tracked",
                namespace, service
            );
            return;
        };
        let config = self.verifier.config();
        self.tracker.track(TrackedResource::LoadBalancer(LoadBalancerRef {
            name: load_balancer_name_for_uid(uid),
            region: config.region.clone(),
            zone: config.zone.clone(),
            namespace: namespace.to_string(),
            service: service.to_string(),
        }));
    }
}

/// A named, namespaced scenario body with scoped cleanup
pub struct Scenario {
    name: String,
    namespace: String,
    verifier: Arc<ReachabilityVerifier>,
    on_failure: Option<FailureHook>,
    deadline: Option<Duration>,
}

impl Scenario {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        verifier: Arc<ReachabilityVerifier>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            verifier,
            on_failure: None,
            deadline: None,
        }
    }

    /// Abandon the body after `deadline`; teardown still runs
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Also hand the failure dump to `hook`, in addition to logging it
    pub fn on_failure(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Run `body`, then release everything it created.
    ///
    /// A body error comes back as `ScenarioFailed` carrying the exposure
    /// dump taken before teardown. A panic is re-raised after teardown. A
    /// cleanup failure after a successful body is returned as `CleanupFailed`.
    pub async fn run<F, Fut, T>(self, body: F) -> Result<T>
    where
        F: FnOnce(ScenarioContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tracker = Arc::new(ResourceTracker::new(self.verifier.cluster().clone()));
        let ctx = ScenarioContext {
            verifier: self.verifier.clone(),
            tracker: tracker.clone(),
            namespace: self.namespace.clone(),
        };

        info!("Scenario '{}' starting in {}", self.name, self.namespace);
        let scenario = self.name.clone();
        let deadline = self.deadline;
        let outcome = AssertUnwindSafe(async move {
            match deadline {
                Some(limit) => tokio::time::timeout(limit, body(ctx))
                    .await
                    .unwrap_or_else(|_| Err(VerifierError::deadline_exceeded(scenario, limit))),
                None => body(ctx).await,
            }
        })
        .catch_unwind()
        .await;

        let diagnostics = match &outcome {
            Ok(Ok(_)) => None,
            _ => {
                let dump = self.verifier.describe_exposures(&self.namespace).await;
                error!(
                    "Scenario '{}' failed, exposures in {}:\n{}",
                    self.name, self.namespace, dump
                );
                if let Some(hook) = &self.on_failure {
                    hook(&self.name, &dump);
                }
                Some(dump)
            }
        };

        let cleanup = tracker.release_all().await;

        match outcome {
            Ok(Ok(value)) => {
                let released = cleanup?;
                info!(
                    "Scenario '{}' passed, released {} resource(s)",
                    self.name, released
                );
                Ok(value)
            }
            Ok(Err(e)) => {
                if let Err(cleanup_err) = cleanup {
                    error!("Scenario '{}' cleanup also failed: {}", self.name, cleanup_err);
                }
                Err(VerifierError::ScenarioFailed {
                    scenario: self.name,
                    diagnostics: diagnostics.unwrap_or_default(),
                    source: Box::new(e),
                })
            }
            Err(panic) => {
                if let Err(cleanup_err) = cleanup {
                    error!("Scenario '{}' cleanup also failed: {}", self.name, cleanup_err);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}
