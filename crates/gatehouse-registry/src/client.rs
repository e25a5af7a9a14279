//! HTTP plumbing shared by the backend adapters.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response, Url};
use serde::de::DeserializeOwned;

use crate::BackendError;

/// Client builder with connect and request timeouts set to `timeout`.
pub fn bounded_builder(timeout: Duration) -> ClientBuilder {
    Client::builder().connect_timeout(timeout).timeout(timeout)
}

/// Builds the HTTP client for one backend, bounded by its dial timeout.
pub fn http_client(backend: &'static str, timeout: Duration) -> Result<Client, BackendError> {
    bounded_builder(timeout)
        .build()
        .map_err(|e| BackendError::construction(backend, e))
}

/// Normalizes `host:port` or a full URL into a base URL without a trailing
/// slash. `scheme` applies only when the address carries none.
pub fn base_url(backend: &'static str, scheme: &str, address: &str) -> Result<String, BackendError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(BackendError::construction(backend, "address is empty"));
    }

    let candidate = if address.contains("://") {
        address.to_string()
    } else {
        format!("{scheme}://{address}")
    };

    let url = Url::parse(&candidate)
        .map_err(|e| BackendError::construction(backend, format!("invalid address {address}: {e}")))?;
    if url.host_str().is_none() {
        return Err(BackendError::construction(
            backend,
            format!("invalid address {address}: missing host"),
        ));
    }

    Ok(candidate.trim_end_matches('/').to_string())
}

/// Passes 2xx responses through and turns anything else into
/// [`BackendError::Status`].
pub async fn expect_success(backend: &'static str, response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        backend,
        status,
        body,
    })
}

pub async fn json<T: DeserializeOwned>(backend: &'static str, response: Response) -> Result<T, BackendError> {
    let response = expect_success(backend, response).await?;
    let body = response
        .bytes()
        .await
        .map_err(|source| BackendError::Request { backend, source })?;
    serde_json::from_slice(&body).map_err(|e| BackendError::decode(backend, e))
}

pub fn request_error(backend: &'static str) -> impl Fn(reqwest::Error) -> BackendError {
    move |source| BackendError::Request { backend, source }
}
