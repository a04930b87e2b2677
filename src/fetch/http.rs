// reqwest transport for `/api/stats` endpoints

use reqwest::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::instrument;

use super::{FetchError, TelemetryFetcher};
use crate::models::Sample;

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl TelemetryFetcher for HttpFetcher {
    #[instrument(skip(self), fields(operation = "fetch_stats"))]
    async fn fetch(&self, endpoint: &str) -> Result<Sample, FetchError> {
        let response = self
            .client
            .get(endpoint)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        let payload: Value =
            serde_json::from_slice(&body).map_err(|e| FetchError::InvalidBody(e.to_string()))?;
        Ok(Sample::from_payload(&payload))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err.to_string())
        }
    }
}
