//! Upstream observation providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ProviderError;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::store::ObservationWriter;
use crate::types::{GeoPoint, Observation};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of fresh observations.
///
/// `stations` may be empty when only `location` is set; the provider decides
/// which nearby stations to report.
#[async_trait]
pub trait ObservationProvider: Send + Sync {
    async fn fetch(
        &self,
        stations: &[String],
        location: Option<GeoPoint>,
    ) -> Result<Vec<Observation>, ProviderError>;
}

#[async_trait]
impl<T: ObservationProvider + ?Sized> ObservationProvider for Arc<T> {
    async fn fetch(
        &self,
        stations: &[String],
        location: Option<GeoPoint>,
    ) -> Result<Vec<Observation>, ProviderError> {
        (**self).fetch(stations, location).await
    }
}

#[derive(Debug, Serialize)]
struct FetchRequest<'a> {
    stations: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<GeoPoint>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    data: Vec<Observation>,
    #[serde(default)]
    error: Option<String>,
}

/// Provider backed by the aviation weather edge function.
///
/// Requests are `POST {stations, location}` with an optional bearer key;
/// responses are `{data: [...]}` or `{error: "..."}`.
#[derive(Debug, Clone)]
pub struct HttpObservationProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpObservationProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> Result<Vec<Observation>, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<FetchResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(text);
            return Err(ProviderError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: FetchResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Malformed(format!("JSON parse error: {}", e)))?;

        match parsed.error {
            Some(message) => Err(ProviderError::Service {
                status: status.as_u16(),
                message,
            }),
            None => Ok(parsed.data),
        }
    }
}

#[async_trait]
impl ObservationProvider for HttpObservationProvider {
    #[instrument(skip(self), level = "info")]
    async fn fetch(
        &self,
        stations: &[String],
        location: Option<GeoPoint>,
    ) -> Result<Vec<Observation>, ProviderError> {
        let body = FetchRequest { stations, location };

        let response = send_with_retry(&self.retry, || {
            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            request.send()
        })
        .await?;

        let observations = self.handle_response(response).await?;
        tracing::info!(count = observations.len(), "Fetched observations");
        Ok(observations)
    }
}

/// Writes every successful fetch through to a store before returning it.
///
/// Persistence failures are logged and never fail the fetch.
pub struct PersistingProvider<P, W> {
    inner: P,
    writer: W,
}

impl<P, W> PersistingProvider<P, W> {
    pub fn new(inner: P, writer: W) -> Self {
        Self { inner, writer }
    }
}

#[async_trait]
impl<P, W> ObservationProvider for PersistingProvider<P, W>
where
    P: ObservationProvider,
    W: ObservationWriter,
{
    async fn fetch(
        &self,
        stations: &[String],
        location: Option<GeoPoint>,
    ) -> Result<Vec<Observation>, ProviderError> {
        let observations = self.inner.fetch(stations, location).await?;

        match self.writer.upsert(&observations).await {
            Ok(written) => tracing::debug!(written, "Persisted fetched observations"),
            Err(e) => tracing::warn!(error = %e, "Failed to persist fetched observations"),
        }

        Ok(observations)
    }
}
