//! Post-deployment health verification.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub url: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl HealthStatus {
    pub fn from_status(url: &str, status_code: u16) -> Self {
        Self {
            url: url.to_string(),
            healthy: (200..300).contains(&status_code),
            status_code: Some(status_code),
            error: None,
            skipped: false,
        }
    }

    pub fn unreachable(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            healthy: false,
            status_code: None,
            error: Some(error.into()),
            skipped: false,
        }
    }
}

pub trait HealthProbe: Send + Sync {
    fn check(&self, url: &str) -> HealthStatus;
}

/// Single GET; healthy on any 2xx.
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal_unexpected(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn check(&self, url: &str) -> HealthStatus {
        match self.client.get(url).send() {
            Ok(response) => HealthStatus::from_status(url, response.status().as_u16()),
            Err(e) => HealthStatus::unreachable(url, e.to_string()),
        }
    }
}

/// Dry-run stand-in that never touches the network.
pub struct SkippedProbe;

impl HealthProbe for SkippedProbe {
    fn check(&self, url: &str) -> HealthStatus {
        HealthStatus {
            url: url.to_string(),
            healthy: true,
            status_code: None,
            error: None,
            skipped: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_2xx_is_healthy() {
        assert!(HealthStatus::from_status("u", 200).healthy);
        assert!(HealthStatus::from_status("u", 204).healthy);
        assert!(!HealthStatus::from_status("u", 301).healthy);
        assert!(!HealthStatus::from_status("u", 503).healthy);
    }

    #[test]
    fn unreachable_endpoint_is_unhealthy() {
        // Port 9 (discard) on localhost is closed on test hosts.
        let probe = HttpHealthProbe::new(Duration::from_secs(2)).unwrap();
        let status = probe.check("http://127.0.0.1:9/health");
        assert!(!status.healthy);
        assert!(status.error.is_some());
    }

    #[test]
    fn probe_builds_with_timeout() {
        assert!(HttpHealthProbe::new(Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn skipped_probe_reports_skipped() {
        let status = SkippedProbe.check("http://localhost:3000/health");
        assert!(status.healthy);
        assert!(status.skipped);
    }
}
