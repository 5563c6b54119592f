//! HTTP client for the agent API

use anyhow::{Context, Result};
use health_core::{LivenessReport, MonitorSummary};
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

pub struct AgentClient {
    client: Client,
    base_url: Url,
}

impl AgentClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid agent URL")?;

        Ok(Self { client, base_url })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach agent")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Agent error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn monitors(&self) -> Result<Vec<MonitorSummary>> {
        self.get("monitors").await
    }

    /// Liveness report; the agent answers 503 with the same body when
    /// unhealthy, so the status code is not treated as an error here
    pub async fn liveness(&self) -> Result<LivenessReport> {
        let url = self.base_url.join("healthz").context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach agent")?;

        response.json().await.context("Failed to parse response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use health_core::{ComponentStatus, HealthState, MonitorType};

    const MONITORS_BODY: &str = r#"[
        {
            "instance_id": "node_cpu_utilization-abc",
            "monitor_type": "node_cpu_utilization",
            "labels": {"cluster_id": "c1", "node_name": "n1"},
            "state": "warning",
            "last_emitted_state": "healthy",
            "last_observed_at": "2024-01-01T00:05:00Z",
            "first_observed_at": "2024-01-01T00:00:00Z",
            "observation_count": 6,
            "details": {"cpuUsageMillicores": 3400.0, "cpuUtilizationPercentage": 85.0}
        }
    ]"#;

    #[tokio::test]
    async fn test_fetch_monitors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/monitors")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(MONITORS_BODY)
            .create_async()
            .await;

        let client = AgentClient::new(&server.url()).unwrap();
        let monitors = client.monitors().await.unwrap();

        mock.assert_async().await;
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].monitor_type, MonitorType::NodeCpuUtilization);
        assert_eq!(monitors[0].state, HealthState::Warning);
        assert_eq!(monitors[0].last_emitted_state, Some(HealthState::Healthy));
        assert_eq!(monitors[0].last_emitted_at, None);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/monitors")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = AgentClient::new(&server.url()).unwrap();
        let error = client.monitors().await.unwrap_err();
        assert!(error.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_unhealthy_liveness_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"unhealthy","components":{"capacity_cache":{"status":"unhealthy","message":"node capacity not resolved","checked_at":0}}}"#,
            )
            .create_async()
            .await;

        let client = AgentClient::new(&server.url()).unwrap();
        let report = client.liveness().await.unwrap();
        assert_eq!(report.status, ComponentStatus::Unhealthy);
        assert_eq!(report.components.len(), 1);
    }

    #[test]
    fn test_invalid_url() {
        assert!(AgentClient::new("not a url").is_err());
    }
}
