//! Live external capacity signal.
//!
//! Reads the OAuth access token from the CLI's credentials file and asks the
//! usage endpoint for the two rate-limit windows. Every failure mode --
//! missing credentials, network error, unexpected payload -- collapses to
//! `None`: the scheduler treats an unknown capacity as "plan from budget
//! alone", never as an error.

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

const USAGE_API: &str = "https://api.anthropic.com/api/oauth/usage";
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Rate-limit usage across the two replenishing windows.
#[derive(Debug, Clone, PartialEq)]
pub struct Capacity {
    pub five_hour_percent: f64,
    pub weekly_percent: f64,
    pub five_hour_resets_at: Option<DateTime<Utc>>,
    pub weekly_resets_at: Option<DateTime<Utc>>,
}

impl Capacity {
    pub fn is_limited(&self) -> bool {
        self.five_hour_percent >= 100.0 || self.weekly_percent >= 100.0
    }

    /// Remaining capacity: the tighter of the two windows.
    pub fn available_percent(&self) -> f64 {
        (100.0 - self.five_hour_percent).min(100.0 - self.weekly_percent)
    }

    /// A synthetic full-capacity signal, for planning when the probe is
    /// unavailable and the caller prefers optimism over refusal.
    pub fn unconstrained() -> Self {
        Self {
            five_hour_percent: 0.0,
            weekly_percent: 0.0,
            five_hour_resets_at: None,
            weekly_resets_at: None,
        }
    }
}

pub struct CapacityProbe {
    credentials_path: PathBuf,
    endpoint: String,
}

impl CapacityProbe {
    pub fn new(credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            endpoint: USAGE_API.to_string(),
        }
    }

    /// Probe against the default credentials location.
    pub fn from_home() -> Self {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude")
            .join(".credentials.json");
        Self::new(path)
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn access_token(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.credentials_path).ok()?;
        let data: Value = serde_json::from_str(&content).ok()?;
        // The token may sit under an oauth wrapper or at the top level
        let creds = data.get("claudeAiOauth").unwrap_or(&data);
        creds
            .get("accessToken")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
    }

    /// Check current usage. `None` if credentials or the API are
    /// unavailable.
    pub fn check(&self) -> Option<Capacity> {
        let token = self.access_token()?;

        let client = reqwest::blocking::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .ok()?;

        let response = client
            .get(&self.endpoint)
            .header("Authorization", format!("Bearer {token}"))
            .header("anthropic-beta", "oauth-2025-04-20")
            .header("Content-Type", "application/json")
            .send()
            .ok()?;

        if !response.status().is_success() {
            debug!("Capacity probe returned {}", response.status());
            return None;
        }

        let payload: Value = response.json().ok()?;
        Some(parse_usage(&payload))
    }
}

/// Map the usage payload onto a [`Capacity`]; absent fields read as zero
/// utilization.
pub fn parse_usage(payload: &Value) -> Capacity {
    let utilization = |window: &str| -> f64 {
        payload
            .get(window)
            .and_then(|w| w.get("utilization"))
            .and_then(|u| u.as_f64())
            .unwrap_or(0.0)
    };
    let resets_at = |window: &str| -> Option<DateTime<Utc>> {
        payload
            .get(window)
            .and_then(|w| w.get("resets_at"))
            .and_then(|r| r.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };

    Capacity {
        five_hour_percent: utilization("five_hour"),
        weekly_percent: utilization("seven_day"),
        five_hour_resets_at: resets_at("five_hour"),
        weekly_resets_at: resets_at("seven_day"),
    }
}
