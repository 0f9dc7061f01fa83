//! API client for communicating with the disk pressure agent

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the agent's HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    async fn send(&self, path: &str) -> Result<Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        self.client
            .get(url)
            .send()
            .await
            .context("Failed to send request")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(path).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        self.get("api/v1/status").await
    }

    pub async fn events(&self, kind: Option<&str>, limit: usize) -> Result<Vec<AgentEvent>> {
        let mut path = format!("api/v1/events?limit={}", limit);
        if let Some(kind) = kind {
            path.push_str("&kind=");
            path.push_str(kind);
        }
        self.get(&path).await
    }

    pub async fn cycles(&self) -> Result<Vec<CycleCount>> {
        self.get("api/v1/cycles").await
    }

    /// Component health; an unhealthy agent answers 503 with the same body
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.send("healthz").await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            anyhow::bail!("API error ({})", status);
        }
        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_name: String,
    pub condition: String,
    pub tainted: bool,
    pub usage_percent: Option<f64>,
    pub used_bytes: Option<u64>,
    pub capacity_bytes: Option<u64>,
    pub high_threshold_percent: f64,
    pub low_threshold_percent: f64,
    pub last_tick_at: Option<String>,
    pub last_outcome: Option<String>,
    pub unresolved_ticks: u32,
    pub ticks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: String,
    pub timestamp: String,
    pub subject: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_before_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_after_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleCount {
    pub identity: String,
    pub cycles: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: std::collections::BTreeMap<String, ComponentHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "node_name": "worker-1",
                    "condition": "disk_pressure",
                    "tainted": true,
                    "usage_percent": 91.5,
                    "used_bytes": 915,
                    "capacity_bytes": 1000,
                    "high_threshold_percent": 85.0,
                    "low_threshold_percent": 80.0,
                    "last_tick_at": "2024-03-01T08:00:00Z",
                    "last_outcome": "unresolved",
                    "unresolved_ticks": 3,
                    "ticks": 42
                }"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status = client.status().await.unwrap();

        mock.assert_async().await;
        assert_eq!(status.node_name, "worker-1");
        assert!(status.tainted);
        assert_eq!(status.unresolved_ticks, 3);
    }

    #[tokio::test]
    async fn test_events_passes_filters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/events")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("kind".into(), "pod".into()),
                Matcher::UrlEncoded("limit".into(), "5".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"[{
                    "kind": "pod_evicted",
                    "timestamp": "2024-03-01T08:00:00Z",
                    "subject": "default/mysql",
                    "message": "DiskPressure",
                    "usage_before_percent": 90.0,
                    "usage_after_percent": 86.0
                }]"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let events = client.events(Some("pod"), 5).await.unwrap();

        mock.assert_async().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject, "default/mysql");
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/events")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"unknown event kind 'volume'"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.events(Some("volume"), 10).await.unwrap_err();

        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_unhealthy_agent_still_reports_components() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                r#"{
                    "status": "unhealthy",
                    "components": {
                        "disk_monitor": {"status": "unhealthy", "message": "statvfs failed"}
                    }
                }"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health = client.health().await.unwrap();

        assert_eq!(health.status, "unhealthy");
        assert_eq!(health.components["disk_monitor"].status, "unhealthy");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
