//! Consul adapter over the agent, health and KV HTTP APIs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use data_encoding::BASE64;
use gatehouse_config::{ConsulConfig, KeyValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{base_url, expect_success, http_client, json, request_error};
use crate::selector::BackendFactory;
use crate::{BackendError, ConfigSource, Discovery, Registrar, ServiceInstance};

const BACKEND: &str = "consul";
const TOKEN_HEADER: &str = "X-Consul-Token";
const CHECK_INTERVAL: &str = "10s";
const DEREGISTER_AFTER: &str = "1m";

#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: Client,
    base: String,
    token: Option<String>,
    datacenter: Option<String>,
    tags: Vec<String>,
    health_check: bool,
    key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    tags: &'a [String],
    address: String,
    port: u16,
    meta: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<AgentCheck>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentCheck {
    #[serde(rename = "TCP")]
    tcp: String,
    interval: &'static str,
    deregister_critical_service_after: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    service: AgentService,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

impl ConsulClient {
    pub fn new(config: &ConsulConfig) -> Result<Self, BackendError> {
        Ok(Self {
            http: http_client(BACKEND, config.timeout())?,
            base: base_url(BACKEND, config.scheme(), config.address())?,
            token: non_empty(&config.token),
            datacenter: non_empty(&config.datacenter),
            tags: config.tags.clone(),
            health_check: config.health_check(),
            key: config.key().trim_start_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(token) = &self.token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        if let Some(dc) = &self.datacenter {
            builder = builder.query(&[("dc", dc)]);
        }
        builder
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[async_trait]
impl Registrar for ConsulClient {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), BackendError> {
        let (address, port) = instance.host_port()?;
        let check = self.health_check.then(|| AgentCheck {
            tcp: format!("{address}:{port}"),
            interval: CHECK_INTERVAL,
            deregister_critical_service_after: DEREGISTER_AFTER,
        });
        let body = AgentRegistration {
            id: &instance.id,
            name: &instance.name,
            tags: &self.tags,
            address,
            port,
            meta: instance.flat_metadata(),
            check,
        };

        let response = self
            .request(Method::PUT, "/v1/agent/service/register")
            .json(&body)
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        expect_success(BACKEND, response).await?;

        info!(service_id = %instance.id, service = %instance.name, "Registered with Consul");
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), BackendError> {
        let path = format!("/v1/agent/service/deregister/{}", instance.id);
        let response = self
            .request(Method::PUT, &path)
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        expect_success(BACKEND, response).await?;

        info!(service_id = %instance.id, "Deregistered from Consul");
        Ok(())
    }
}

#[async_trait]
impl Discovery for ConsulClient {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>, BackendError> {
        let response = self
            .request(Method::GET, &format!("/v1/health/service/{name}"))
            .query(&[("passing", "true")])
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        let entries: Vec<HealthEntry> = json(BACKEND, response).await?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let service = entry.service;
                let fallback = format!("http://{}:{}", service.address, service.port);
                ServiceInstance::from_flat_metadata(
                    service.id,
                    service.service,
                    service.meta.unwrap_or_default(),
                    fallback,
                )
            })
            .collect())
    }
}

#[async_trait]
impl ConfigSource for ConsulClient {
    async fn load(&self) -> Result<Vec<KeyValue>, BackendError> {
        let response = self
            .request(Method::GET, &format!("/v1/kv/{}", self.key))
            .query(&[("recurse", "true")])
            .send()
            .await
            .map_err(request_error(BACKEND))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(key = %self.key, "No Consul config found");
            return Ok(Vec::new());
        }
        let pairs: Vec<KvPair> = json(BACKEND, response).await?;

        let mut documents = Vec::new();
        for pair in pairs {
            // Folder entries carry no value.
            let Some(encoded) = pair.value else { continue };
            if pair.key.ends_with('/') {
                continue;
            }
            let raw = BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| BackendError::decode(BACKEND, format!("key {}: {e}", pair.key)))?;
            let value = String::from_utf8(raw)
                .map_err(|e| BackendError::decode(BACKEND, format!("key {}: {e}", pair.key)))?;
            documents.push(KeyValue::new(pair.key, value));
        }
        Ok(documents)
    }
}

#[async_trait]
impl BackendFactory for ConsulConfig {
    async fn discovery(&self) -> Result<Option<Arc<dyn Discovery>>, BackendError> {
        let client: Arc<dyn Discovery> = Arc::new(ConsulClient::new(self)?);
        Ok(Some(client))
    }

    async fn registrar(&self) -> Result<Option<Arc<dyn Registrar>>, BackendError> {
        let client: Arc<dyn Registrar> = Arc::new(ConsulClient::new(self)?);
        Ok(Some(client))
    }

    async fn config_source(&self) -> Result<Option<Arc<dyn ConfigSource>>, BackendError> {
        let client: Arc<dyn ConfigSource> = Arc::new(ConsulClient::new(self)?);
        Ok(Some(client))
    }
}
