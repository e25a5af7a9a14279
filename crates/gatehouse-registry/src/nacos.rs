//! Nacos adapter over the open API (`/nacos/v1`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatehouse_config::{KeyValue, NacosConfig};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{base_url, expect_success, http_client, json as decode_json, request_error};
use crate::selector::BackendFactory;
use crate::{BackendError, ConfigSource, Discovery, Registrar, ServiceInstance};

const BACKEND: &str = "nacos";
const CONTEXT_PATH: &str = "/nacos";
const BEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Beat response code meaning the server no longer knows the instance.
const RESOURCE_NOT_FOUND: i64 = 20404;
/// Metadata key carrying our instance id; Nacos derives its own otherwise.
const META_ID: &str = "id";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct InstanceList {
    #[serde(default)]
    hosts: Vec<Host>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Host {
    #[serde(default)]
    instance_id: String,
    ip: String,
    port: u16,
    #[serde(default = "default_true")]
    healthy: bool,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug)]
struct Connection {
    http: Client,
    base: String,
    namespace: String,
    group: String,
    data_id: String,
    access_token: Option<String>,
}

impl Connection {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{}", self.base, path));
        if !self.namespace.is_empty() {
            builder = builder.query(&[("namespaceId", &self.namespace)]);
        }
        if let Some(token) = &self.access_token {
            builder = builder.query(&[("accessToken", token)]);
        }
        builder
    }

    async fn register(&self, instance: &ServiceInstance) -> Result<(), BackendError> {
        let (ip, port) = instance.host_port()?;
        let mut metadata = instance.flat_metadata();
        metadata.insert(META_ID.to_string(), instance.id.clone());
        let metadata = serde_json::to_string(&metadata).map_err(|e| BackendError::InvalidInstance(e.to_string()))?;

        let response = self
            .request(Method::POST, "/v1/ns/instance")
            .query(&[
                ("serviceName", instance.name.as_str()),
                ("groupName", self.group.as_str()),
                ("ip", ip.as_str()),
                ("port", port.to_string().as_str()),
                ("metadata", metadata.as_str()),
                ("ephemeral", "true"),
                ("healthy", "true"),
                ("enabled", "true"),
                ("weight", "1.0"),
            ])
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        expect_success(BACKEND, response).await?;
        Ok(())
    }

    /// Sends one heartbeat; returns `false` when the server has dropped the
    /// instance.
    async fn beat(&self, instance: &ServiceInstance) -> Result<bool, BackendError> {
        let (ip, port) = instance.host_port()?;
        let beat = json!({
            "serviceName": instance.name,
            "ip": ip,
            "port": port,
            "cluster": "DEFAULT",
            "scheduled": true,
        });
        let response = self
            .request(Method::PUT, "/v1/ns/instance/beat")
            .query(&[
                ("serviceName", instance.name.as_str()),
                ("groupName", self.group.as_str()),
                ("beat", beat.to_string().as_str()),
            ])
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        let body: Value = decode_json(BACKEND, response).await?;
        Ok(body.get("code").and_then(Value::as_i64) != Some(RESOURCE_NOT_FOUND))
    }
}

pub struct NacosClient {
    connection: Arc<Connection>,
    heartbeats: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl std::fmt::Debug for NacosClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NacosClient")
            .field("base", &self.connection.base)
            .field("namespace", &self.connection.namespace)
            .field("group", &self.connection.group)
            .finish_non_exhaustive()
    }
}

impl NacosClient {
    /// Builds the client and logs in when both credentials are set.
    pub async fn connect(config: &NacosConfig) -> Result<Self, BackendError> {
        let address = config.address.trim();
        let root = if address.contains("://") {
            base_url(BACKEND, "http", address)?
        } else if address.is_empty() {
            return Err(BackendError::construction(BACKEND, "address is empty"));
        } else {
            base_url(BACKEND, "http", &format!("{address}:{}", config.port()))?
        };

        let mut connection = Connection {
            http: http_client(BACKEND, config.timeout())?,
            base: format!("{root}{CONTEXT_PATH}"),
            namespace: config.namespace.clone(),
            group: config.group().to_string(),
            data_id: config.data_id().to_string(),
            access_token: None,
        };

        if let Some((username, password)) = config.credentials() {
            connection.access_token = Some(login(&connection, username, password).await?);
        } else if config.has_partial_credentials() {
            warn!("Nacos username and password must both be set; connecting without authentication");
        }

        Ok(Self {
            connection: Arc::new(connection),
            heartbeats: Mutex::new(HashMap::new()),
        })
    }
}

async fn login(connection: &Connection, username: &str, password: &str) -> Result<String, BackendError> {
    let response = connection
        .http
        .post(format!("{}/v1/auth/login", connection.base))
        .query(&[("username", username), ("password", password)])
        .send()
        .await
        .map_err(|e| BackendError::construction(BACKEND, format!("login failed: {e}")))?;
    let body: LoginResponse = decode_json(BACKEND, response)
        .await
        .map_err(|e| BackendError::construction(BACKEND, format!("login failed: {e}")))?;
    Ok(body.access_token)
}

async fn heartbeat(connection: Arc<Connection>, instance: ServiceInstance) {
    let mut ticker = tokio::time::interval(BEAT_INTERVAL);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match connection.beat(&instance).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(service_id = %instance.id, "Nacos dropped the instance; registering again");
                if let Err(e) = connection.register(&instance).await {
                    warn!(service_id = %instance.id, error = %e, "Nacos re-registration failed");
                }
            }
            Err(e) => warn!(service_id = %instance.id, error = %e, "Nacos heartbeat failed"),
        }
    }
}

#[async_trait]
impl Registrar for NacosClient {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), BackendError> {
        self.connection.register(instance).await?;

        let task = tokio::spawn(heartbeat(Arc::clone(&self.connection), instance.clone()));
        if let Some(previous) = self.heartbeats.lock().await.insert(instance.id.clone(), task) {
            previous.abort();
        }

        info!(service_id = %instance.id, service = %instance.name, group = %self.connection.group, "Registered with Nacos");
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), BackendError> {
        if let Some(task) = self.heartbeats.lock().await.remove(&instance.id) {
            task.abort();
        }

        let (ip, port) = instance.host_port()?;
        let response = self
            .connection
            .request(Method::DELETE, "/v1/ns/instance")
            .query(&[
                ("serviceName", instance.name.as_str()),
                ("groupName", self.connection.group.as_str()),
                ("ip", ip.as_str()),
                ("port", port.to_string().as_str()),
                ("ephemeral", "true"),
            ])
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        expect_success(BACKEND, response).await?;

        info!(service_id = %instance.id, "Deregistered from Nacos");
        Ok(())
    }
}

#[async_trait]
impl Discovery for NacosClient {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>, BackendError> {
        let response = self
            .connection
            .request(Method::GET, "/v1/ns/instance/list")
            .query(&[
                ("serviceName", name),
                ("groupName", self.connection.group.as_str()),
                ("healthyOnly", "true"),
            ])
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        let list: InstanceList = decode_json(BACKEND, response).await?;

        Ok(list
            .hosts
            .into_iter()
            .filter(|host| host.healthy)
            .map(|mut host| {
                let id = host.metadata.remove(META_ID).unwrap_or(host.instance_id);
                let fallback = format!("http://{}:{}", host.ip, host.port);
                ServiceInstance::from_flat_metadata(id, name.to_string(), host.metadata, fallback)
            })
            .collect())
    }
}

#[async_trait]
impl ConfigSource for NacosClient {
    async fn load(&self) -> Result<Vec<KeyValue>, BackendError> {
        let connection = &self.connection;
        let mut request = connection
            .http
            .get(format!("{}/v1/cs/configs", connection.base))
            .query(&[("dataId", &connection.data_id), ("group", &connection.group)]);
        if !connection.namespace.is_empty() {
            request = request.query(&[("tenant", &connection.namespace)]);
        }
        if let Some(token) = &connection.access_token {
            request = request.query(&[("accessToken", token)]);
        }

        let response = request.send().await.map_err(request_error(BACKEND))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(data_id = %connection.data_id, "No Nacos config found");
            return Ok(Vec::new());
        }
        let content = expect_success(BACKEND, response)
            .await?
            .text()
            .await
            .map_err(request_error(BACKEND))?;
        Ok(vec![KeyValue::new(connection.data_id.clone(), content)])
    }
}

#[async_trait]
impl BackendFactory for NacosConfig {
    async fn discovery(&self) -> Result<Option<Arc<dyn Discovery>>, BackendError> {
        let client: Arc<dyn Discovery> = Arc::new(NacosClient::connect(self).await?);
        Ok(Some(client))
    }

    async fn registrar(&self) -> Result<Option<Arc<dyn Registrar>>, BackendError> {
        let client: Arc<dyn Registrar> = Arc::new(NacosClient::connect(self).await?);
        Ok(Some(client))
    }

    async fn config_source(&self) -> Result<Option<Arc<dyn ConfigSource>>, BackendError> {
        let client: Arc<dyn ConfigSource> = Arc::new(NacosClient::connect(self).await?);
        Ok(Some(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_requires_address() {
        let err = NacosClient::connect(&NacosConfig::default()).await.unwrap_err();
        assert!(err.is_construction());
    }

    #[tokio::test]
    async fn test_connect_applies_defaults() {
        let config = NacosConfig {
            address: "10.0.0.5".to_string(),
            ..Default::default()
        };
        let client = NacosClient::connect(&config).await.unwrap();
        assert_eq!(client.connection.base, "http://10.0.0.5:8848/nacos");
        assert_eq!(client.connection.group, "DEFAULT_GROUP");
        assert_eq!(client.connection.data_id, "config.yaml");
        assert!(client.connection.access_token.is_none());
    }

    #[tokio::test]
    async fn test_partial_credentials_skip_login() {
        let config = NacosConfig {
            address: "10.0.0.5".to_string(),
            username: "nacos".to_string(),
            ..Default::default()
        };
        let client = NacosClient::connect(&config).await.unwrap();
        assert!(client.connection.access_token.is_none());
    }
}
