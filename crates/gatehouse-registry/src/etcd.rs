//! Etcd adapter over the v3 JSON gateway.
//!
//! Instances are stored as JSON under `<namespace>/<service>/<id>`, bound to
//! a lease of the configured TTL. A background task keeps the lease alive
//! and re-registers under a fresh lease when it is lost, giving up after
//! `max_retry` consecutive failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use data_encoding::BASE64;
use gatehouse_config::{EtcdConfig, KeyValue};
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{base_url, http_client, json as decode_json};
use crate::selector::BackendFactory;
use crate::{BackendError, ConfigSource, Discovery, Registrar, ServiceInstance};

const BACKEND: &str = "etcd";

/// The gateway renders int64 fields as strings; older releases used numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Int64 {
    Number(i64),
    Text(String),
}

impl Int64 {
    fn value(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

#[derive(Deserialize)]
struct AuthenticateResponse {
    #[serde(default)]
    token: String,
}

#[derive(Deserialize)]
struct LeaseGrantResponse {
    #[serde(rename = "ID")]
    id: Option<Int64>,
}

#[derive(Deserialize)]
struct KeepAliveResponse {
    result: Option<LeaseStatus>,
}

#[derive(Deserialize)]
struct LeaseStatus {
    #[serde(rename = "TTL")]
    ttl: Option<Int64>,
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<RawKeyValue>,
}

#[derive(Deserialize)]
struct RawKeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

/// Endpoint list plus auth token; tried in order until one answers.
#[derive(Debug)]
struct Gateway {
    http: Client,
    endpoints: Vec<String>,
    token: Option<String>,
}

impl Gateway {
    async fn call<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, BackendError> {
        let mut unreachable = None;
        for endpoint in &self.endpoints {
            let mut request = self.http.post(format!("{endpoint}{path}")).json(body);
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, token);
            }
            match request.send().await {
                Ok(response) => return decode_json(BACKEND, response).await,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(endpoint = %endpoint, error = %e, "Etcd endpoint unreachable");
                    unreachable = Some(e);
                }
                Err(source) => return Err(BackendError::Request { backend: BACKEND, source }),
            }
        }
        match unreachable {
            Some(source) => Err(BackendError::Request { backend: BACKEND, source }),
            None => Err(BackendError::construction(BACKEND, "no endpoints configured")),
        }
    }

    async fn grant(&self, ttl: Duration) -> Result<i64, BackendError> {
        let response: LeaseGrantResponse = self
            .call("/v3/lease/grant", &json!({ "TTL": ttl.as_secs() }))
            .await?;
        response
            .id
            .as_ref()
            .and_then(Int64::value)
            .ok_or_else(|| BackendError::decode(BACKEND, "lease grant returned no ID"))
    }

    /// Returns `false` when the lease no longer exists.
    async fn keep_alive(&self, lease: i64) -> Result<bool, BackendError> {
        let response: KeepAliveResponse = self.call("/v3/lease/keepalive", &json!({ "ID": lease })).await?;
        Ok(response
            .result
            .and_then(|status| status.ttl)
            .and_then(|ttl| ttl.value())
            .is_some_and(|ttl| ttl > 0))
    }

    async fn revoke(&self, lease: i64) -> Result<(), BackendError> {
        self.call::<Value>("/v3/lease/revoke", &json!({ "ID": lease })).await?;
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: i64) -> Result<(), BackendError> {
        let body = json!({
            "key": BASE64.encode(key.as_bytes()),
            "value": BASE64.encode(value.as_bytes()),
            "lease": lease,
        });
        self.call::<Value>("/v3/kv/put", &body).await?;
        Ok(())
    }

    /// Grants a lease and writes `key` under it.
    async fn put_with_lease(&self, key: &str, value: &str, ttl: Duration) -> Result<i64, BackendError> {
        let lease = self.grant(ttl).await?;
        self.put(key, value, lease).await?;
        Ok(lease)
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let body = json!({ "key": BASE64.encode(key.as_bytes()) });
        self.call::<Value>("/v3/kv/deleterange", &body).await?;
        Ok(())
    }

    /// All pairs under `prefix`, decoded to UTF-8.
    async fn range_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, BackendError> {
        let body = json!({
            "key": BASE64.encode(prefix.as_bytes()),
            "range_end": BASE64.encode(&prefix_range_end(prefix.as_bytes())),
        });
        let response: RangeResponse = self.call("/v3/kv/range", &body).await?;
        response
            .kvs
            .into_iter()
            .map(|kv| Ok((decode_text(&kv.key)?, decode_text(&kv.value)?)))
            .collect()
    }
}

fn decode_text(encoded: &str) -> Result<String, BackendError> {
    let raw = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| BackendError::decode(BACKEND, e))?;
    String::from_utf8(raw).map_err(|e| BackendError::decode(BACKEND, e))
}

/// Smallest key greater than every key starting with `prefix`.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // Every byte was 0xff: range to the end of the keyspace.
    vec![0]
}

struct Registration {
    lease: Arc<AtomicI64>,
    keepalive: JoinHandle<()>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

pub struct EtcdClient {
    gateway: Arc<Gateway>,
    namespace: String,
    ttl: Duration,
    max_retry: u32,
    key: String,
    registrations: Mutex<HashMap<String, Registration>>,
}

impl std::fmt::Debug for EtcdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdClient")
            .field("endpoints", &self.gateway.endpoints)
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .field("max_retry", &self.max_retry)
            .finish_non_exhaustive()
    }
}

impl EtcdClient {
    /// Builds the client and, when credentials are configured, exchanges
    /// them for an auth token.
    pub async fn connect(config: &EtcdConfig) -> Result<Self, BackendError> {
        if config.endpoints.is_empty() {
            return Err(BackendError::construction(BACKEND, "no endpoints configured"));
        }
        let endpoints = config
            .endpoints
            .iter()
            .map(|endpoint| base_url(BACKEND, "http", endpoint))
            .collect::<Result<Vec<_>, _>>()?;

        let mut gateway = Gateway {
            http: http_client(BACKEND, config.timeout())?,
            endpoints,
            token: None,
        };

        if let Some((username, password)) = config.credentials() {
            let response: AuthenticateResponse = gateway
                .call(
                    "/v3/auth/authenticate",
                    &json!({ "name": username, "password": password }),
                )
                .await
                .map_err(|e| BackendError::construction(BACKEND, format!("authentication failed: {e}")))?;
            gateway.token = Some(response.token);
        } else if config.has_partial_credentials() {
            warn!("Etcd username and password must both be set; connecting without authentication");
        }

        Ok(Self {
            gateway: Arc::new(gateway),
            namespace: config.namespace().trim_end_matches('/').to_string(),
            ttl: config.ttl(),
            max_retry: config.max_retry(),
            key: config.key().to_string(),
            registrations: Mutex::new(HashMap::new()),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn service_prefix(&self, name: &str) -> String {
        format!("{}/{}/", self.namespace, name)
    }

    fn service_key(&self, instance: &ServiceInstance) -> String {
        format!("{}{}", self.service_prefix(&instance.name), instance.id)
    }
}

#[async_trait]
impl Registrar for EtcdClient {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), BackendError> {
        let key = self.service_key(instance);
        let value = serde_json::to_string(instance).map_err(|e| BackendError::InvalidInstance(e.to_string()))?;

        let lease = Arc::new(AtomicI64::new(self.gateway.put_with_lease(&key, &value, self.ttl).await?));
        let keepalive = tokio::spawn(keep_alive(
            Arc::clone(&self.gateway),
            key.clone(),
            value,
            self.ttl,
            self.max_retry,
            Arc::clone(&lease),
        ));

        let previous = self
            .registrations
            .lock()
            .await
            .insert(instance.id.clone(), Registration { lease, keepalive });
        if let Some(previous) = previous {
            previous.keepalive.abort();
        }

        info!(key = %key, ttl_secs = self.ttl.as_secs(), "Registered with Etcd");
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), BackendError> {
        let key = self.service_key(instance);
        let registration = self.registrations.lock().await.remove(&instance.id);

        // Keepalive must stop before the delete can fail.
        if let Some(registration) = registration {
            registration.keepalive.abort();
            let lease = registration.lease.load(Ordering::SeqCst);
            if let Err(e) = self.gateway.revoke(lease).await {
                warn!(lease, error = %e, "Failed to revoke Etcd lease");
            }
        }
        self.gateway.delete(&key).await?;

        info!(key = %key, "Deregistered from Etcd");
        Ok(())
    }
}

async fn keep_alive(
    gateway: Arc<Gateway>,
    key: String,
    value: String,
    ttl: Duration,
    max_retry: u32,
    lease: Arc<AtomicI64>,
) {
    let period = (ttl / 3).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match gateway.keep_alive(lease.load(Ordering::SeqCst)).await {
            Ok(true) => continue,
            Ok(false) => warn!(key = %key, "Etcd lease expired"),
            Err(e) => warn!(key = %key, error = %e, "Etcd lease keepalive failed"),
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match gateway.put_with_lease(&key, &value, ttl).await {
                Ok(id) => {
                    lease.store(id, Ordering::SeqCst);
                    info!(key = %key, attempt, "Re-registered with Etcd");
                    break;
                }
                Err(e) if attempt < max_retry.max(1) => {
                    warn!(key = %key, attempt, error = %e, "Etcd re-registration failed");
                    tokio::time::sleep(retry_delay(attempt, ttl)).await;
                }
                Err(e) => {
                    error!(key = %key, attempts = attempt, error = %e, "Giving up on Etcd registration");
                    return;
                }
            }
        }
    }
}

fn retry_delay(attempt: u32, ttl: Duration) -> Duration {
    let delay = Duration::from_millis(500u64.saturating_mul(1 << attempt.min(10)));
    delay.min(ttl)
}

#[async_trait]
impl Discovery for EtcdClient {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>, BackendError> {
        let pairs = self.gateway.range_prefix(&self.service_prefix(name)).await?;
        let mut instances = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            match serde_json::from_str::<ServiceInstance>(&value) {
                Ok(instance) => instances.push(instance),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed Etcd instance"),
            }
        }
        Ok(instances)
    }
}

#[async_trait]
impl ConfigSource for EtcdClient {
    async fn load(&self) -> Result<Vec<KeyValue>, BackendError> {
        let pairs = self.gateway.range_prefix(&self.key).await?;
        debug!(prefix = %self.key, count = pairs.len(), "Loaded Etcd config");
        Ok(pairs
            .into_iter()
            .map(|(key, value)| KeyValue::new(key, value))
            .collect())
    }
}

#[async_trait]
impl BackendFactory for EtcdConfig {
    async fn discovery(&self) -> Result<Option<Arc<dyn Discovery>>, BackendError> {
        let client: Arc<dyn Discovery> = Arc::new(EtcdClient::connect(self).await?);
        Ok(Some(client))
    }

    async fn registrar(&self) -> Result<Option<Arc<dyn Registrar>>, BackendError> {
        let client: Arc<dyn Registrar> = Arc::new(EtcdClient::connect(self).await?);
        Ok(Some(client))
    }

    async fn config_source(&self) -> Result<Option<Arc<dyn ConfigSource>>, BackendError> {
        let client: Arc<dyn ConfigSource> = Arc::new(EtcdClient::connect(self).await?);
        Ok(Some(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_range_end() {
        assert_eq!(prefix_range_end(b"/config"), b"/confih".to_vec());
        assert_eq!(prefix_range_end(b"a\xff"), b"b".to_vec());
        assert_eq!(prefix_range_end(b"\xff\xff"), vec![0]);
    }

    #[test]
    fn test_int64_accepts_string_and_number() {
        let text: Int64 = serde_json::from_str("\"7587862342\"").unwrap();
        let number: Int64 = serde_json::from_str("42").unwrap();
        assert_eq!(text.value(), Some(7_587_862_342));
        assert_eq!(number.value(), Some(42));
    }

    #[test]
    fn test_retry_delay_is_capped_by_ttl() {
        let ttl = Duration::from_secs(15);
        assert_eq!(retry_delay(1, ttl), Duration::from_secs(1));
        assert_eq!(retry_delay(2, ttl), Duration::from_secs(2));
        assert_eq!(retry_delay(10, ttl), ttl);
    }

    #[tokio::test]
    async fn test_connect_without_endpoints_fails() {
        let err = EtcdClient::connect(&EtcdConfig::default()).await.unwrap_err();
        assert!(err.is_construction());
    }

    #[tokio::test]
    async fn test_connect_defaults_namespace() {
        let config = EtcdConfig {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            ..Default::default()
        };
        let client = EtcdClient::connect(&config).await.unwrap();
        assert_eq!(client.namespace(), "/microservices");
        assert_eq!(client.service_prefix("orders"), "/microservices/orders/");
    }
}
