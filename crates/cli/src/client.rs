//! API client for the autoscaler status/control API

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the autoscaler daemon
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

        // Joining relative paths keeps any prefix only with a trailing slash
        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn status(&self) -> Result<ManagerStatus> {
        self.get("api/v1/status").await
    }

    pub async fn detailed_metrics(&self) -> Result<DetailedMetrics> {
        self.get("api/v1/metrics").await
    }

    pub async fn events(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ScalingEvent>> {
        let mut path = format!("api/v1/events?limit={}", limit);
        if let Some(since) = since {
            // RFC 3339 contains '+', which must not reach the server as a space
            let mut encoded = Url::parse("http://localhost/").context("Invalid URL")?;
            encoded
                .query_pairs_mut()
                .append_pair("since", &since.to_rfc3339());
            if let Some(query) = encoded.query() {
                path.push('&');
                path.push_str(query);
            }
        }
        self.get(&path).await
    }

    pub async fn scale(&self, target_instances: u32, reason: &str) -> Result<ScalingExecution> {
        let request = ScaleRequest {
            target_instances,
            reason: reason.to_string(),
        };
        self.post("api/v1/scale", &request).await
    }

    pub async fn config(&self) -> Result<serde_json::Value> {
        self.get("api/v1/config").await
    }

    pub async fn update_config(&self, update: &serde_json::Value) -> Result<serde_json::Value> {
        self.post("api/v1/config", update).await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub running: bool,
    pub region: String,
    pub monitoring_interval_secs: u64,
    pub auto_scaling_enabled: bool,
    pub cost_limit_per_hour: f64,
    pub current_hourly_cost: f64,
    pub running_instances: usize,
    pub last_scaling_at: Option<DateTime<Utc>>,
    pub total_events: usize,
    #[serde(default)]
    pub recent_events: Vec<ScalingEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub queue_depth: u64,
    pub pending_requests: u64,
    pub active_tasks: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub gpu_utilization: Option<f64>,
    pub avg_response_ms: f64,
    pub p95_response_ms: f64,
    pub success_rate: f64,
    pub running_instances: u32,
    pub predicted_load: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub made_at: DateTime<Utc>,
    pub horizon: usize,
    pub value: f64,
    pub forest_lower: f64,
    pub forest_upper: f64,
    pub model: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub running_instances: usize,
    pub cost_per_hour: f64,
    pub cost_per_day: f64,
    pub cost_per_month: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub id: u64,
    pub action: String,
    pub reasons: Vec<String>,
    pub confidence: f64,
    pub urgency: u8,
    pub current_instances: u32,
    pub recommended_instances: u32,
    pub cost_impact: f64,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingExecution {
    pub execution_id: String,
    pub decision_id: u64,
    pub action: String,
    pub target_instances: u32,
    pub status: String,
    #[serde(default)]
    pub created_instances: Vec<String>,
    #[serde(default)]
    pub terminated_instances: Vec<String>,
    pub rollback_performed: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub cost_estimate: f64,
}

/// Model health as reported by the accuracy check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    /// `assessed` or `insufficient_data`
    pub status: String,
    pub model: Option<String>,
    pub score: Option<f64>,
    pub grade: Option<String>,
    pub requires_retraining: Option<bool>,
    pub accuracy_pct: Option<f64>,
    pub samples: Option<usize>,
    pub required: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedMetrics {
    pub current: Option<MetricSnapshot>,
    pub forecast: Option<Forecast>,
    pub cost: CostEstimate,
    #[serde(default)]
    pub recent_executions: Vec<ScalingExecution>,
    #[serde(default)]
    pub recent_decisions: Vec<ScalingDecision>,
    pub model_health: Option<ModelHealth>,
    pub pending_predictions: usize,
    pub status: ManagerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub target_instances: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn status_body() -> serde_json::Value {
        json!({
            "running": true,
            "region": "us-west-2",
            "monitoring_interval_secs": 60,
            "auto_scaling_enabled": true,
            "cost_limit_per_hour": 10.0,
            "current_hourly_cost": 0.1856,
            "running_instances": 2,
            "last_scaling_at": null,
            "total_events": 1,
            "recent_events": [{
                "id": 1,
                "type": "decision_made",
                "timestamp": "2024-05-01T13:00:00Z",
                "message": "maintain 2 -> 2",
                "details": {}
            }]
        })
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let client = ApiClient::new("http://autoscaler.internal/proxy").unwrap();
        assert_eq!(
            client.base_url().join("api/v1/status").unwrap().as_str(),
            "http://autoscaler.internal/proxy/api/v1/status"
        );
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_status_parses_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(status_body().to_string())
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status = assert_ok!(client.status().await);

        mock.assert_async().await;
        assert!(status.running);
        assert_eq!(status.running_instances, 2);
        assert_eq!(status.recent_events[0].kind, "decision_made");
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/scale")
            .match_body(mockito::Matcher::PartialJson(json!({ "target_instances": 15 })))
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"safety limit exceeded: target 15 above ceiling 10"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.scale(15, "load test").await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("422"));
        assert!(message.contains("safety limit exceeded"));
    }

    #[tokio::test]
    async fn test_events_sends_limit_and_encoded_since() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/events")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("limit".into(), "5".into()),
                mockito::Matcher::UrlEncoded("since".into(), "2024-05-01T12:00:00+00:00".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let since = "2024-05-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let events = assert_ok!(client.events(5, Some(since)).await);

        mock.assert_async().await;
        assert!(events.is_empty());
    }
}
