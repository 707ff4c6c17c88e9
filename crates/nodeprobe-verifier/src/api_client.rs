use crate::error::{Result, VerifierError};
use crate::scenario::load_balancer_name_for_uid;
use crate::traits::{
    ClusterClient, LoadBalancerRef, Sleeper, TokioSleeper, LOAD_BALANCER_CLEANUP_FINALIZER,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default number of checks for a load balancer's Service to go away
const DEFAULT_RELEASE_ATTEMPTS: u32 = 30;
const DEFAULT_RELEASE_INTERVAL: Duration = Duration::from_secs(2);

/// Lightweight HTTP client for the verifier to talk to the API server
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: Client,
    sleeper: Arc<dyn Sleeper>,
    release_attempts: u32,
    release_interval: Duration,
}

/// `items` of a list response
#[derive(Debug, Clone, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Which object a request addresses, for error reporting
struct ObjectRef<'a> {
    kind: &'a str,
    namespace: &'a str,
    name: &'a str,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client: Client::new(),
            sleeper: Arc::new(TokioSleeper),
            release_attempts: DEFAULT_RELEASE_ATTEMPTS,
            release_interval: DEFAULT_RELEASE_INTERVAL,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// How often and how long to wait for a load balancer to be released
    pub fn with_release_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.release_attempts = attempts.max(1);
        self.release_interval = interval;
        self
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        object: ObjectRef<'_>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut builder = self.request(method.clone(), path);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            VerifierError::api_request_failed(
                method.as_str(),
                path,
                format!("HTTP request failed: {}", e),
            )
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(&method, path, status, body, object));
        }

        resp.json::<T>().await.map_err(|e| {
            VerifierError::api_request_failed(
                method.as_str(),
                path,
                format!("Failed to parse {}: {}", object.kind, e),
            )
        })
    }
}

/// Map a non-success response onto the error the caller can act on
fn map_status(
    method: &Method,
    path: &str,
    status: StatusCode,
    body: String,
    object: ObjectRef<'_>,
) -> VerifierError {
    match status {
        StatusCode::NOT_FOUND => {
            VerifierError::resource_not_found(object.kind, object.namespace, object.name)
        }
        StatusCode::CONFLICT if *method == Method::POST => {
            VerifierError::resource_already_exists(object.kind, object.namespace, object.name)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            VerifierError::resource_rejected(object.kind, object.namespace, object.name, body)
        }
        _ => VerifierError::api_request_failed(
            method.as_str(),
            path,
            format!("status {}: {}", status, body),
        ),
    }
}

fn namespace_of(metadata: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> &str {
    metadata.namespace.as_deref().unwrap_or("default")
}

#[async_trait]
impl ClusterClient for ApiClient {
    /// POST /api/v1/namespaces/{namespace}/services
    async fn create_service(&self, service: &Service) -> Result<Service> {
        let namespace = namespace_of(&service.metadata);
        let name = service.metadata.name.as_deref().unwrap_or_default();
        let path = format!("/api/v1/namespaces/{}/services", namespace);

        self.send(
            Method::POST,
            &path,
            Some(service),
            ObjectRef {
                kind: "Service",
                namespace,
                name,
            },
        )
        .await
    }

    /// GET /api/v1/namespaces/{namespace}/services/{name}
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        let path = format!("/api/v1/namespaces/{}/services/{}", namespace, name);

        self.send::<_, ()>(
            Method::GET,
            &path,
            None,
            ObjectRef {
                kind: "Service",
                namespace,
                name,
            },
        )
        .await
    }

    /// PUT /api/v1/namespaces/{namespace}/services/{name}
    async fn update_service(&self, service: &Service) -> Result<Service> {
        let namespace = namespace_of(&service.metadata);
        let name = service.metadata.name.as_deref().unwrap_or_default();
        let path = format!("/api/v1/namespaces/{}/services/{}", namespace, name);

        self.send(
            Method::PUT,
            &path,
            Some(service),
            ObjectRef {
                kind: "Service",
                namespace,
                name,
            },
        )
        .await
    }

    /// DELETE /api/v1/namespaces/{namespace}/services/{name}
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let path = format!("/api/v1/namespaces/{}/services/{}", namespace, name);

        self.send::<serde_json::Value, ()>(
            Method::DELETE,
            &path,
            None,
            ObjectRef {
                kind: "Service",
                namespace,
                name,
            },
        )
        .await
        .map(|_| ())
    }

    /// GET /api/v1/namespaces/{namespace}/services
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        let path = format!("/api/v1/namespaces/{}/services", namespace);

        self.send::<ItemList<Service>, ()>(
            Method::GET,
            &path,
            None,
            ObjectRef {
                kind: "ServiceList",
                namespace,
                name: "",
            },
        )
        .await
        .map(|list| list.items)
    }

    /// POST /api/v1/namespaces/{namespace}/pods
    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let namespace = namespace_of(&pod.metadata);
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let path = format!("/api/v1/namespaces/{}/pods", namespace);

        self.send(
            Method::POST,
            &path,
            Some(pod),
            ObjectRef {
                kind: "Pod",
                namespace,
                name,
            },
        )
        .await
    }

    /// GET /api/v1/namespaces/{namespace}/pods/{name}
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let path = format!("/api/v1/namespaces/{}/pods/{}", namespace, name);

        self.send::<_, ()>(
            Method::GET,
            &path,
            None,
            ObjectRef {
                kind: "Pod",
                namespace,
                name,
            },
        )
        .await
    }

    /// DELETE /api/v1/namespaces/{namespace}/pods/{name}
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let path = format!("/api/v1/namespaces/{}/pods/{}", namespace, name);

        self.send::<serde_json::Value, ()>(
            Method::DELETE,
            &path,
            None,
            ObjectRef {
                kind: "Pod",
                namespace,
                name,
            },
        )
        .await
        .map(|_| ())
    }

    /// GET /api/v1/nodes
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.send::<ItemList<Node>, ()>(
            Method::GET,
            "/api/v1/nodes",
            None,
            ObjectRef {
                kind: "NodeList",
                namespace: "",
                name: "",
            },
        )
        .await
        .map(|list| list.items)
    }

    /// The API server has no endpoint for cloud load balancers. The cloud
    /// controller releases one after its Service is deleted and only then
    /// lets the Service go, so this waits for the owning Service to vanish.
    async fn cleanup_load_balancer(&self, lb: &LoadBalancerRef) -> Result<()> {
        let attempts = self.release_attempts;
        let mut held_by_finalizer = false;

        for attempt in 1..=attempts {
            let service = match self.get_service(&lb.namespace, &lb.service).await {
                Ok(service) => service,
                Err(e) if e.is_not_found() => {
                    info!("Released {}", lb);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            // A recreated Service under the same name owns a different balancer
            let owner = service.metadata.uid.as_deref().map(load_balancer_name_for_uid);
            if owner.is_some_and(|owner| owner != lb.name) {
                info!("Released {}", lb);
                return Ok(());
            }

            held_by_finalizer = service
                .metadata
                .finalizers
                .as_ref()
                .is_some_and(|f| f.iter().any(|f| f == LOAD_BALANCER_CLEANUP_FINALIZER));
            debug!(
                "{} still present (finalizer held: {}, check {}/{})",
                lb, held_by_finalizer, attempt, attempts
            );

            if attempt < attempts {
                self.sleeper.sleep(self.release_interval).await;
            }
        }

        Err(VerifierError::cleanup_failed(
            1,
            format!(
                "{} (service still present after {} checks{})",
                lb,
                attempts,
                if held_by_finalizer {
                    ", held by the load balancer cleanup finalizer"
                } else {
                    ""
                }
            ),
        ))
    }
}
