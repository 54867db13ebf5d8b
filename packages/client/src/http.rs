//! REST incident list.

use incident_map_incident_models::Incident;
use incident_map_sync::LoadError;
use incident_map_sync::loader::{IncidentSource, decode_incident_list};

/// Fetches incidents from `GET {api_base_url}/incidents`.
#[derive(Debug, Clone)]
pub struct HttpIncidentSource {
    client: reqwest::Client,
    url: String,
}

impl HttpIncidentSource {
    /// Creates a source for the given API base URL (ending in `/api`).
    #[must_use]
    pub fn new(api_base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), api_base_url)
    }

    /// Creates a source sharing an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, api_base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/incidents", api_base_url.trim_end_matches('/')),
        }
    }

    /// The list endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl IncidentSource for HttpIncidentSource {
    async fn list_incidents(&self) -> Result<Vec<Incident>, LoadError> {
        log::info!("Fetching incidents from {}", self.url);

        let resp = self
            .client
            .get(&self.url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| LoadError::Transport(Box::new(e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| LoadError::Transport(Box::new(e)))?;
        let body: serde_json::Value = serde_json::from_str(&body)?;

        Ok(decode_incident_list(body))
    }
}
