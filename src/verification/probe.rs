//! HTTP health probing

use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    Request(String),
}

/// Status and latency of one GET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub elapsed: Duration,
}

impl ProbeResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Issues GET requests against verification targets
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn get(&self, url: &str) -> Result<ProbeResponse, ProbeError>;
}

/// `reqwest`-backed probe
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    /// `request_timeout` bounds each individual request
    pub fn new(request_timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| ProbeError::Request(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn get(&self, url: &str) -> Result<ProbeResponse, ProbeError> {
        let parsed = url::Url::parse(url).map_err(|_| ProbeError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProbeError::InvalidUrl(url.to_string()));
        }

        let started = Instant::now();
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        Ok(ProbeResponse {
            status: response.status().as_u16(),
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn probe() -> HttpHealthProbe {
        HttpHealthProbe::new(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_healthy_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"status\":\"UP\"}"))
            .mount(&server)
            .await;

        let response = probe()
            .get(&format!("{}/health", server.uri()))
            .await
            .unwrap();
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_unhealthy_status_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let response = probe()
            .get(&format!("{}/health", server.uri()))
            .await
            .unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.is_ok());
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let probe = HttpHealthProbe::new(Duration::from_millis(100)).unwrap();
        let err = probe.get(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Request(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let err = probe().get("ftp://example.com/health").await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidUrl(_)));
        assert!(probe().get("not a url").await.is_err());
    }
}
