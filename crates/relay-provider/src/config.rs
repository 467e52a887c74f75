//! Relay provider configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use relay_types::RelayError;

/// What to do when the gateway cannot estimate a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatePolicy {
    /// Log the failure and submit anyway.
    #[default]
    Observe,
    /// Abort the send with `RelayError::EstimateFailed`.
    Require,
}

impl FromStr for EstimatePolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "observe" => Ok(Self::Observe),
            "require" => Ok(Self::Require),
            other => Err(RelayError::Other(format!("unknown estimate policy: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Upper bound on waiting for a terminal batch state. `None` waits forever.
    #[serde(default = "defaults::confirmation_timeout", with = "duration_secs")]
    pub confirmation_timeout: Option<Duration>,

    #[serde(default)]
    pub estimate_policy: EstimatePolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: defaults::confirmation_timeout(),
            estimate_policy: EstimatePolicy::default(),
        }
    }
}

mod defaults {
    use std::time::Duration;

    pub fn confirmation_timeout() -> Option<Duration> {
        Some(Duration::from_secs(300))
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // 0 disables the timeout
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.filter(|s| *s > 0).map(Duration::from_secs))
    }
}
