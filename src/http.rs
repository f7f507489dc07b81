//! HTTP plumbing shared by the remote providers.
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ProviderError;

/// A connection scope that lives for exactly one provider call.
///
/// Idle pooling is disabled and the client is dropped with the session, so
/// no keep-alive connection outlives the attempt that opened it.
pub struct ScopedSession {
    client: Client,
    provider: &'static str,
}

impl ScopedSession {
    pub fn open(provider: &'static str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ProviderError::permanent(provider, format!("HTTP client build failed: {e}")))?;
        debug!("{provider} session opened");
        Ok(Self { client, provider })
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        debug!("{} session closed", self.provider);
    }
}

/// Map a transport-level `reqwest` error onto the provider taxonomy.
pub fn classify(provider: &'static str, err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout { provider, timeout }
    } else if let Some(status) = err.status() {
        ProviderError::from_status(provider, status.as_u16(), err.to_string())
    } else if err.is_decode() || err.is_builder() {
        ProviderError::permanent(provider, err.to_string())
    } else {
        ProviderError::transient(provider, err.to_string())
    }
}

/// Send a request and turn non-2xx responses into classified errors.
pub async fn send(
    provider: &'static str,
    request: RequestBuilder,
    timeout: Duration,
) -> Result<Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify(provider, e, timeout))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(provider, status.as_u16(), body))
}

pub async fn decode_json<R: DeserializeOwned>(
    provider: &'static str,
    response: Response,
    timeout: Duration,
) -> Result<R, ProviderError> {
    response
        .json::<R>()
        .await
        .map_err(|e| classify(provider, e, timeout))
}

/// Join a base URL and a path without doubling the slash.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
