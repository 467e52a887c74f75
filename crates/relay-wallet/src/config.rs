//! Runtime configuration for the wallet context.

use serde::Deserialize;

use relay_gateway::GatewayConfig;
use relay_provider::{EstimatePolicy, ProviderConfig};
use relay_types::{RelayError, Result};

/// Chain the relay gateway executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayNetwork {
    Bsc,
    BscTest,
}

impl RelayNetwork {
    pub fn from_chain_id(chain_id: u64) -> Self {
        if chain_id == 56 {
            Self::Bsc
        } else {
            Self::BscTest
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bsc => "bsc",
            Self::BscTest => "bscTest",
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            Self::Bsc => 56,
            Self::BscTest => 97,
        }
    }

    pub fn is_mainnet(self) -> bool {
        self == Self::Bsc
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "defaults::chain_id")]
    pub chain_id: u64,

    #[serde(default = "defaults::network_url")]
    pub network_url: String,

    #[serde(default = "defaults::gateway_url")]
    pub gateway_url: String,

    #[serde(default)]
    pub notifications_url: Option<String>,

    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chain_id: defaults::chain_id(),
            network_url: defaults::network_url(),
            gateway_url: defaults::gateway_url(),
            notifications_url: None,
            request_timeout_ms: defaults::request_timeout_ms(),
            provider: ProviderConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `RELAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(chain_id) = env("RELAY_CHAIN_ID") {
            config.chain_id = parse("RELAY_CHAIN_ID", &chain_id)?;
            config.network_url = defaults::network_url_for(config.chain_id);
        }
        if let Some(url) = env("RELAY_NETWORK_URL") {
            config.network_url = url;
        }
        if let Some(url) = env("RELAY_GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Some(url) = env("RELAY_NOTIFICATIONS_URL") {
            config.notifications_url = Some(url);
        }
        if let Some(ms) = env("RELAY_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse("RELAY_REQUEST_TIMEOUT_MS", &ms)?;
        }
        if let Some(secs) = env("RELAY_CONFIRMATION_TIMEOUT_SECS") {
            let secs: u64 = parse("RELAY_CONFIRMATION_TIMEOUT_SECS", &secs)?;
            config.provider.confirmation_timeout =
                (secs > 0).then(|| std::time::Duration::from_secs(secs));
        }
        if let Some(policy) = env("RELAY_ESTIMATE_POLICY") {
            config.provider.estimate_policy = policy.parse::<EstimatePolicy>()?;
        }

        Ok(config)
    }

    pub fn network(&self) -> RelayNetwork {
        RelayNetwork::from_chain_id(self.chain_id)
    }

    /// Wallets already connected to one of these chains are never relayed.
    pub fn relay_chain_ids(&self) -> [u64; 2] {
        [RelayNetwork::Bsc.chain_id(), RelayNetwork::BscTest.chain_id()]
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            gateway_url: self.gateway_url.clone(),
            notifications_url: self.notifications_url.clone(),
            network: self.network().name().to_string(),
            request_timeout_ms: Some(self.request_timeout_ms),
        }
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::Other(format!("invalid value for {}: {}", key, raw)))
}

mod defaults {
    pub fn chain_id() -> u64 {
        56
    }

    pub fn network_url() -> String {
        network_url_for(chain_id())
    }

    pub fn network_url_for(chain_id: u64) -> String {
        if chain_id == 56 {
            "https://bsc-dataseed1.binance.org".into()
        } else {
            "https://data-seed-prebsc-1-s1.binance.org:8545".into()
        }
    }

    pub fn gateway_url() -> String {
        "http://localhost:4000".into()
    }

    pub fn request_timeout_ms() -> u64 {
        30_000
    }
}
