//! HTTP health probe against the sidecar's MCP endpoint.

use async_trait::async_trait;
use boss_core::HealthChecker;
use boss_core::config::HEALTH_PROBE_TIMEOUT;
use reqwest::Client;
use tracing::debug;

/// Single-shot GET `http://127.0.0.1:<port>/health`, 200 means healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthChecker {
    client: Client,
}

impl HttpHealthChecker {
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpHealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check_health(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/health");
        match self.client.get(&url).send().await {
            Ok(response) => {
                let healthy = response.status() == reqwest::StatusCode::OK;
                if !healthy {
                    debug!(port, status = %response.status(), "health probe returned non-200");
                }
                healthy
            }
            Err(e) => {
                debug!(port, error = %e, "health probe failed");
                false
            }
        }
    }
}
