//! Kubernetes adapter.
//!
//! Registration labels and annotates the current pod; discovery lists
//! running pods by label. Only the in-cluster service account is supported,
//! and Kubernetes never acts as a config center.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatehouse_config::KubernetesConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::client::{bounded_builder, expect_success, json as decode_json, request_error};
use crate::selector::BackendFactory;
use crate::{BackendError, ConfigSource, Discovery, Registrar, ServiceInstance};

const BACKEND: &str = "kubernetes";

pub const LABEL_APP: &str = "gatehouse-service-app";
pub const LABEL_VERSION: &str = "gatehouse-service-version";
pub const ANNOTATION_ID: &str = "gatehouse-service-id";
pub const ANNOTATION_METADATA: &str = "gatehouse-service-metadata";
pub const ANNOTATION_ENDPOINTS: &str = "gatehouse-service-endpoints";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const DEFAULT_NAMESPACE: &str = "default";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Where the in-cluster credentials come from.
#[derive(Debug, Clone)]
pub struct InCluster {
    /// API server URL, e.g. `https://10.96.0.1:443`.
    pub api_server: Option<String>,
    pub token_path: PathBuf,
    pub ca_path: PathBuf,
    pub namespace_path: PathBuf,
    /// Name of the pod this process runs in.
    pub pod_name: Option<String>,
}

impl InCluster {
    /// Reads the standard service-account mount and `KUBERNETES_SERVICE_*`
    /// variables.
    pub fn from_env() -> Self {
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let api_server = match (
            std::env::var("KUBERNETES_SERVICE_HOST"),
            std::env::var("KUBERNETES_SERVICE_PORT"),
        ) {
            (Ok(host), Ok(port)) if !host.is_empty() => Some(if host.contains(':') {
                format!("https://[{host}]:{port}")
            } else {
                format!("https://{host}:{port}")
            }),
            _ => None,
        };

        Self {
            api_server,
            token_path: dir.join("token"),
            ca_path: dir.join("ca.crt"),
            namespace_path: dir.join("namespace"),
            pod_name: std::env::var("HOSTNAME").ok().filter(|name| !name.is_empty()),
        }
    }
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize)]
struct PodMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    pod_ip: String,
}

#[derive(Debug, Clone)]
pub struct KubernetesClient {
    http: Client,
    api_server: String,
    token: String,
    namespace: String,
    pod_name: Option<String>,
}

impl KubernetesClient {
    /// Every API call is bounded by `timeout`.
    pub fn in_cluster(source: &InCluster, timeout: Duration) -> Result<Self, BackendError> {
        let api_server = source
            .api_server
            .clone()
            .ok_or_else(|| BackendError::construction(BACKEND, "not running inside a cluster"))?;
        Url::parse(&api_server)
            .map_err(|e| BackendError::construction(BACKEND, format!("invalid API server {api_server}: {e}")))?;

        let token = std::fs::read_to_string(&source.token_path)
            .map_err(|e| {
                BackendError::construction(
                    BACKEND,
                    format!("reading token {}: {e}", source.token_path.display()),
                )
            })?
            .trim()
            .to_string();

        let mut builder = bounded_builder(timeout);
        if source.ca_path.exists() {
            let pem = std::fs::read(&source.ca_path).map_err(|e| {
                BackendError::construction(BACKEND, format!("reading CA {}: {e}", source.ca_path.display()))
            })?;
            let ca = Certificate::from_pem(&pem).map_err(|e| BackendError::construction(BACKEND, e))?;
            builder = builder.add_root_certificate(ca);
        }
        let http = builder
            .build()
            .map_err(|e| BackendError::construction(BACKEND, e))?;

        // A missing namespace file means the default namespace.
        let namespace = std::fs::read_to_string(&source.namespace_path)
            .map(|ns| ns.trim().to_string())
            .ok()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Ok(Self {
            http,
            api_server: api_server.trim_end_matches('/').to_string(),
            token,
            namespace,
            pod_name: source.pod_name.clone(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn pods_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.api_server, self.namespace)
    }

    fn pod_name(&self) -> Result<&str, BackendError> {
        self.pod_name.as_deref().ok_or_else(|| {
            BackendError::InvalidInstance("pod name unknown; HOSTNAME is not set".to_string())
        })
    }

    async fn patch_pod(&self, patch: &Value) -> Result<(), BackendError> {
        let url = format!("{}/{}", self.pods_url(), self.pod_name()?);
        let body = serde_json::to_vec(patch).map_err(|e| BackendError::InvalidInstance(e.to_string()))?;
        let response = self
            .http
            .patch(url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(body)
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        expect_success(BACKEND, response).await?;
        Ok(())
    }
}

fn registration_patch(instance: &ServiceInstance) -> Result<Value, BackendError> {
    let metadata = serde_json::to_string(&instance.metadata.iter().collect::<BTreeMap<_, _>>())
        .map_err(|e| BackendError::InvalidInstance(e.to_string()))?;
    let endpoints =
        serde_json::to_string(&instance.endpoints).map_err(|e| BackendError::InvalidInstance(e.to_string()))?;

    let mut labels = json!({ LABEL_APP: instance.name });
    if !instance.version.is_empty() {
        labels[LABEL_VERSION] = json!(instance.version);
    }

    Ok(json!({
        "metadata": {
            "labels": labels,
            "annotations": {
                ANNOTATION_ID: instance.id,
                ANNOTATION_METADATA: metadata,
                ANNOTATION_ENDPOINTS: endpoints,
            }
        }
    }))
}

fn deregistration_patch() -> Value {
    json!({
        "metadata": {
            "labels": { LABEL_APP: null, LABEL_VERSION: null },
            "annotations": {
                ANNOTATION_ID: null,
                ANNOTATION_METADATA: null,
                ANNOTATION_ENDPOINTS: null,
            }
        }
    })
}

/// Builds an instance from a running pod, pointing its endpoints at the pod IP.
fn instance_from_pod(pod: Pod) -> Option<ServiceInstance> {
    if pod.status.phase != "Running" || pod.status.pod_ip.is_empty() {
        return None;
    }
    let metadata = pod.metadata;
    let name = metadata.labels.get(LABEL_APP)?.clone();

    let endpoints: Vec<String> = metadata
        .annotations
        .get(ANNOTATION_ENDPOINTS)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let endpoints = endpoints
        .into_iter()
        .filter_map(|endpoint| {
            let mut url = Url::parse(&endpoint).ok()?;
            url.set_host(Some(&pod.status.pod_ip)).ok()?;
            Some(url.as_str().trim_end_matches('/').to_string())
        })
        .collect();

    Some(ServiceInstance {
        id: metadata
            .annotations
            .get(ANNOTATION_ID)
            .cloned()
            .unwrap_or(metadata.name),
        name,
        version: metadata.labels.get(LABEL_VERSION).cloned().unwrap_or_default(),
        metadata: metadata
            .annotations
            .get(ANNOTATION_METADATA)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default(),
        endpoints,
    })
}

#[async_trait]
impl Registrar for KubernetesClient {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), BackendError> {
        self.patch_pod(&registration_patch(instance)?).await?;
        info!(service_id = %instance.id, pod = ?self.pod_name, "Registered pod with Kubernetes");
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), BackendError> {
        self.patch_pod(&deregistration_patch()).await?;
        info!(service_id = %instance.id, pod = ?self.pod_name, "Deregistered pod from Kubernetes");
        Ok(())
    }
}

#[async_trait]
impl Discovery for KubernetesClient {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>, BackendError> {
        let response = self
            .http
            .get(self.pods_url())
            .bearer_auth(&self.token)
            .query(&[("labelSelector", format!("{LABEL_APP}={name}"))])
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        let pods: PodList = decode_json(BACKEND, response).await?;
        Ok(pods.items.into_iter().filter_map(instance_from_pod).collect())
    }
}

fn client(config: &KubernetesConfig) -> Result<Option<KubernetesClient>, BackendError> {
    if !config.enable {
        return Ok(None);
    }
    if !config.in_cluster {
        warn!("Only in-cluster Kubernetes access is supported; Kubernetes backend disabled");
        return Ok(None);
    }
    KubernetesClient::in_cluster(&InCluster::from_env(), config.timeout()).map(Some)
}

#[async_trait]
impl BackendFactory for KubernetesConfig {
    async fn discovery(&self) -> Result<Option<Arc<dyn Discovery>>, BackendError> {
        Ok(client(self)?.map(|client| Arc::new(client) as Arc<dyn Discovery>))
    }

    async fn registrar(&self) -> Result<Option<Arc<dyn Registrar>>, BackendError> {
        Ok(client(self)?.map(|client| Arc::new(client) as Arc<dyn Registrar>))
    }

    async fn config_source(&self) -> Result<Option<Arc<dyn ConfigSource>>, BackendError> {
        warn!("Kubernetes cannot serve configuration; remote config disabled");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_pod(annotations: HashMap<String, String>) -> Pod {
        Pod {
            metadata: PodMetadata {
                name: "orders-7d9f".to_string(),
                labels: HashMap::from([
                    (LABEL_APP.to_string(), "orders".to_string()),
                    (LABEL_VERSION.to_string(), "v2".to_string()),
                ]),
                annotations,
            },
            status: PodStatus {
                phase: "Running".to_string(),
                pod_ip: "10.1.2.3".to_string(),
            },
        }
    }

    #[test]
    fn test_instance_from_pod_rewrites_host() {
        let annotations = HashMap::from([
            (ANNOTATION_ID.to_string(), "orders-1".to_string()),
            (
                ANNOTATION_ENDPOINTS.to_string(),
                r#"["http://0.0.0.0:8000"]"#.to_string(),
            ),
            (ANNOTATION_METADATA.to_string(), r#"{"zone":"a"}"#.to_string()),
        ]);
        let instance = instance_from_pod(running_pod(annotations)).unwrap();

        assert_eq!(instance.id, "orders-1");
        assert_eq!(instance.name, "orders");
        assert_eq!(instance.version, "v2");
        assert_eq!(instance.endpoints, vec!["http://10.1.2.3:8000".to_string()]);
        assert_eq!(instance.metadata["zone"], "a");
    }

    #[test]
    fn test_instance_from_pod_falls_back_to_pod_name() {
        let instance = instance_from_pod(running_pod(HashMap::new())).unwrap();
        assert_eq!(instance.id, "orders-7d9f");
        assert!(instance.endpoints.is_empty());
    }

    #[test]
    fn test_pending_pod_is_skipped() {
        let mut pod = running_pod(HashMap::new());
        pod.status.phase = "Pending".to_string();
        assert!(instance_from_pod(pod).is_none());
    }

    #[test]
    fn test_registration_patch_shape() {
        let instance = ServiceInstance {
            id: "orders-1".into(),
            name: "orders".into(),
            version: String::new(),
            metadata: HashMap::new(),
            endpoints: vec!["http://10.1.2.3:8000".into()],
        };
        let patch = registration_patch(&instance).unwrap();

        assert_eq!(patch["metadata"]["labels"][LABEL_APP], "orders");
        assert!(patch["metadata"]["labels"].get(LABEL_VERSION).is_none());
        assert_eq!(patch["metadata"]["annotations"][ANNOTATION_ID], "orders-1");
    }

    #[test]
    fn test_in_cluster_requires_api_server() {
        let source = InCluster {
            api_server: None,
            token_path: PathBuf::from("/nonexistent/token"),
            ca_path: PathBuf::from("/nonexistent/ca.crt"),
            namespace_path: PathBuf::from("/nonexistent/namespace"),
            pod_name: None,
        };
        assert!(KubernetesClient::in_cluster(&source, Duration::from_secs(1)).unwrap_err().is_construction());
    }

    #[test]
    fn test_in_cluster_reads_service_account() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), "secret-token\n").unwrap();
        std::fs::write(dir.path().join("namespace"), "shop\n").unwrap();

        let source = InCluster {
            api_server: Some("http://127.0.0.1:6443".to_string()),
            token_path: dir.path().join("token"),
            ca_path: dir.path().join("ca.crt"),
            namespace_path: dir.path().join("namespace"),
            pod_name: Some("orders-7d9f".to_string()),
        };
        let client = KubernetesClient::in_cluster(&source, Duration::from_secs(1)).unwrap();

        assert_eq!(client.namespace(), "shop");
        assert_eq!(client.token, "secret-token");
        assert_eq!(
            client.pods_url(),
            "http://127.0.0.1:6443/api/v1/namespaces/shop/pods"
        );
    }

    #[tokio::test]
    async fn test_unresponsive_api_server_times_out() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), "secret-token").unwrap();
        let source = InCluster {
            api_server: Some(format!("http://{addr}")),
            token_path: dir.path().join("token"),
            ca_path: dir.path().join("ca.crt"),
            namespace_path: dir.path().join("namespace"),
            pod_name: Some("orders-7d9f".to_string()),
        };
        let client = KubernetesClient::in_cluster(&source, Duration::from_millis(200)).unwrap();

        let lookup = tokio::time::timeout(Duration::from_secs(5), client.get_service("orders"))
            .await
            .expect("discovery hung past its timeout");
        assert!(matches!(lookup, Err(BackendError::Request { .. })));

        let instance = ServiceInstance {
            id: "orders-1".into(),
            name: "orders".into(),
            ..Default::default()
        };
        let deregistration = tokio::time::timeout(Duration::from_secs(5), client.deregister(&instance))
            .await
            .expect("deregistration hung past its timeout");
        assert!(deregistration.is_err());

        holder.abort();
    }

    #[tokio::test]
    async fn test_disabled_config_yields_nothing() {
        let config = KubernetesConfig::default();
        assert!(config.discovery().await.unwrap().is_none());
        assert!(config.registrar().await.unwrap().is_none());
        assert!(config.config_source().await.unwrap().is_none());
    }
}
