//! HTTP clients for the remote record store and the fraud boundary

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{Endpoint, FraudRecord, FraudRequest, FraudResponse, FraudVerdict};
use crate::infra::{FraudEvaluator, ProvenanceError, RemoteStore, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProvenanceError::Configuration(format!("HTTP client: {e}")))
}

/// Remote store speaking `PUT {base}/api/v1/records/{endpoint}/{id}`
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            http_client: build_client(timeout)?,
        })
    }

    fn record_url(&self, endpoint: Endpoint, id: &str) -> String {
        format!("{}/api/v1/records/{}/{}", self.base_url, endpoint, id)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upsert(
        &self,
        endpoint: Endpoint,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let url = self.record_url(endpoint, id);
        let response = self
            .http_client
            .put(&url)
            .header("Idempotency-Key", id)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvenanceError::Delivery(format!(
                "{endpoint}/{id} rejected with {status}: {body}"
            )));
        }

        debug!(endpoint = %endpoint, id = %id, "Record delivered");
        Ok(())
    }
}

/// Client for `POST /functions/v1/fraud-detection`
#[derive(Clone)]
pub struct HttpFraudClient {
    url: String,
    http_client: reqwest::Client,
}

impl HttpFraudClient {
    /// `url` is the full fraud-detection function URL
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            http_client: build_client(DEFAULT_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl FraudEvaluator for HttpFraudClient {
    async fn evaluate(&self, record: FraudRecord) -> Result<FraudVerdict> {
        let request = FraudRequest {
            record: Some(record),
        };
        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvenanceError::Delivery(format!(
                "fraud evaluation failed with {status}: {body}"
            )));
        }

        let body: FraudResponse = response.json().await?;
        Ok(body.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_url() {
        let store = HttpRemoteStore::new("http://localhost:8080/").unwrap();
        assert_eq!(
            store.record_url(Endpoint::Materials, "m-1"),
            "http://localhost:8080/api/v1/records/materials/m-1"
        );
    }
}
