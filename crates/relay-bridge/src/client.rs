//! Binance Bridge REST client.
//!
//! Endpoints:
//! - GET  /v2/tokens?walletNetwork=ETH
//! - GET  /v2/tokens/<symbol>/networks
//! - GET  /v1/swaps/quota/24hour?symbol=<symbol>&walletAddress=<address>
//! - POST /v2/swaps
//! - GET  /v2/swaps/<id>

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use relay_types::{RelayError, Result};

/// Partner id the bridge expects on every swap.
pub const SWAP_SOURCE: u32 = 921;

const MISSING_DATA: &str = "Unable to get from Binance Bridge API";

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "defaults::api_url")]
    pub api_url: String,

    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_url: defaults::api_url(),
            request_timeout_ms: defaults::request_timeout_ms(),
        }
    }
}

mod defaults {
    pub fn api_url() -> String {
        "https://api.binance.org/bridge/api".into()
    }

    pub fn request_timeout_ms() -> u64 {
        30_000
    }
}

/// Bridge API response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeResponse<T> {
    pub code: Option<i64>,
    pub message: Option<String>,
    pub data: Option<T>,
}

/// Amounts come back as JSON numbers or decimal strings.
fn lenient_amount<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeToken {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub eth_symbol: Option<String>,
    #[serde(default)]
    pub eth_contract_address: Option<String>,
    #[serde(default)]
    pub eth_contract_decimal: Option<u32>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub min_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub max_amount: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenList {
    #[serde(default)]
    tokens: Vec<BridgeToken>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenNetwork {
    pub name: String,
    #[serde(default)]
    pub deposit_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TokenNetworks {
    #[serde(default)]
    networks: Vec<TokenNetwork>,
}

/// Remaining 24-hour swap allowance for one wallet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwapQuota {
    #[serde(default, deserialize_with = "lenient_amount")]
    pub left: Option<f64>,
}

/// Whether, and within which bounds, a token can be bridged.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEligibility {
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub bridge_enabled: bool,
}

impl BridgeEligibility {
    pub fn disabled() -> Self {
        Self {
            min_amount: None,
            max_amount: None,
            bridge_enabled: false,
        }
    }

    /// Combine the token list, the token's networks and the caller's quota.
    ///
    /// The upper bound is the token maximum, lowered to the remaining quota.
    /// Bridging is enabled only when the ETH network accepts deposits.
    pub fn from_parts(
        symbol: &str,
        tokens: &[BridgeToken],
        networks: &[TokenNetwork],
        quota: &SwapQuota,
    ) -> Self {
        let token = tokens.iter().find(|t| t.symbol == symbol);
        let eth = networks.iter().find(|n| n.name == "ETH");

        let token_max = token.and_then(|t| t.max_amount).unwrap_or(0.0);
        let max_amount = quota.left.unwrap_or(token_max).min(token_max);

        Self {
            min_amount: token.and_then(|t| t.min_amount),
            max_amount: Some(max_amount),
            bridge_enabled: eth.and_then(|n| n.deposit_enabled).unwrap_or(false),
        }
    }
}

/// A registered swap: where to send the deposit and what it costs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Swap {
    #[serde(default)]
    pub id: Option<String>,
    pub deposit_address: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub swap_fee: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    amount: &'a str,
    from_network: &'static str,
    source: u32,
    symbol: &'a str,
    to_address: &'a str,
    to_address_label: &'static str,
    to_network: &'static str,
    wallet_address: &'a str,
    wallet_network: &'static str,
}

/// Bridge service operations used by the quote/confirm pipeline.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    /// Tokens that can leave the ETH network.
    async fn list_available_tokens(&self) -> Result<Vec<BridgeToken>>;

    async fn get_token_bridge_info(&self, symbol: &str, account: &str)
        -> Result<BridgeEligibility>;

    /// Register a swap of `amount` from `from_address` on ETH to
    /// `to_address` on BSC.
    async fn register_deposit_intent(
        &self,
        symbol: &str,
        amount: &str,
        from_address: &str,
        to_address: &str,
    ) -> Result<Swap>;

    async fn get_deposit_by_id(&self, id: &str) -> Result<Swap>;
}

pub struct BinanceBridgeClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceBridgeClient {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(config.request_timeout_ms))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_request(&self, path: &str, query: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "bridge request");
        self.client.get(&url).query(query)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<BridgeResponse<T>> {
        let resp = self
            .get_request(path, query)
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("bridge request failed: {}", e)))?;
        Self::decode(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<BridgeResponse<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "bridge request");
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("bridge request failed: {}", e)))?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<BridgeResponse<T>> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Transport(format!(
                "bridge returned status {}: {}",
                status, body
            )));
        }
        resp.json()
            .await
            .map_err(|e| RelayError::Transport(format!("failed to parse bridge response: {}", e)))
    }
}

/// Unwrap `data`, failing with the API's message when there is none.
pub fn validate_response<T>(response: BridgeResponse<T>) -> Result<T> {
    response.data.ok_or_else(|| {
        RelayError::Bridge(
            response
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| MISSING_DATA.to_string()),
        )
    })
}

#[async_trait]
impl BridgeClient for BinanceBridgeClient {
    async fn list_available_tokens(&self) -> Result<Vec<BridgeToken>> {
        let list: TokenList =
            validate_response(self.get("/v2/tokens", &[("walletNetwork", "ETH")]).await?)?;
        Ok(list.tokens)
    }

    async fn get_token_bridge_info(
        &self,
        symbol: &str,
        account: &str,
    ) -> Result<BridgeEligibility> {
        let networks_path = format!("/v2/tokens/{}/networks", symbol);
        let quota_query = [("symbol", symbol), ("walletAddress", account)];
        let (tokens, networks, quota) = tokio::try_join!(
            self.list_available_tokens(),
            self.get::<TokenNetworks>(&networks_path, &[]),
            self.get::<SwapQuota>("/v1/swaps/quota/24hour", &quota_query),
        )?;

        // Networks and quota are optional; only the token list must carry data.
        let networks = networks.data.unwrap_or_default();
        let quota = quota.data.unwrap_or_default();
        Ok(BridgeEligibility::from_parts(
            symbol,
            &tokens,
            &networks.networks,
            &quota,
        ))
    }

    async fn register_deposit_intent(
        &self,
        symbol: &str,
        amount: &str,
        from_address: &str,
        to_address: &str,
    ) -> Result<Swap> {
        let body = SwapRequest {
            amount,
            from_network: "ETH",
            source: SWAP_SOURCE,
            symbol,
            to_address,
            to_address_label: "",
            to_network: "BSC",
            wallet_address: from_address,
            wallet_network: "ETH",
        };
        validate_response(self.post("/v2/swaps", &body).await?)
    }

    async fn get_deposit_by_id(&self, id: &str) -> Result<Swap> {
        validate_response(self.get(&format!("/v2/swaps/{}", id), &[]).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens() -> Vec<BridgeToken> {
        serde_json::from_value(json!([
            { "symbol": "ETH", "name": "Ethereum", "minAmount": 0.05, "maxAmount": 2 },
            { "symbol": "USDT", "name": "Tether", "minAmount": "10", "maxAmount": "100000" },
        ]))
        .unwrap()
    }

    fn eth_networks(enabled: Option<bool>) -> Vec<TokenNetwork> {
        vec![
            TokenNetwork { name: "BSC".into(), deposit_enabled: Some(true) },
            TokenNetwork { name: "ETH".into(), deposit_enabled: enabled },
        ]
    }

    #[test]
    fn test_eligibility_uses_token_bounds() {
        let eligibility = BridgeEligibility::from_parts(
            "ETH",
            &tokens(),
            &eth_networks(Some(true)),
            &SwapQuota::default(),
        );
        assert_eq!(eligibility.min_amount, Some(0.05));
        assert_eq!(eligibility.max_amount, Some(2.0));
        assert!(eligibility.bridge_enabled);
    }

    #[test]
    fn test_quota_lowers_max() {
        let quota = SwapQuota { left: Some(0.5) };
        let eligibility =
            BridgeEligibility::from_parts("ETH", &tokens(), &eth_networks(Some(true)), &quota);
        assert_eq!(eligibility.max_amount, Some(0.5));

        // A quota above the token maximum does not raise it.
        let quota = SwapQuota { left: Some(50.0) };
        let eligibility =
            BridgeEligibility::from_parts("ETH", &tokens(), &eth_networks(Some(true)), &quota);
        assert_eq!(eligibility.max_amount, Some(2.0));
    }

    #[test]
    fn test_unknown_token_and_network() {
        let eligibility =
            BridgeEligibility::from_parts("DOGE", &tokens(), &[], &SwapQuota { left: Some(3.0) });
        assert_eq!(eligibility.min_amount, None);
        assert_eq!(eligibility.max_amount, Some(0.0));
        assert!(!eligibility.bridge_enabled);

        let eligibility =
            BridgeEligibility::from_parts("USDT", &tokens(), &eth_networks(None), &SwapQuota::default());
        assert_eq!(eligibility.min_amount, Some(10.0));
        assert!(!eligibility.bridge_enabled);
    }

    #[test]
    fn test_validate_response() {
        let ok: BridgeResponse<u32> = BridgeResponse { code: Some(0), message: None, data: Some(7) };
        assert_eq!(validate_response(ok).unwrap(), 7);

        let with_message: BridgeResponse<u32> = BridgeResponse {
            code: Some(1),
            message: Some("symbol not supported".into()),
            data: None,
        };
        assert_eq!(
            validate_response(with_message).unwrap_err().to_string(),
            "symbol not supported"
        );

        let bare: BridgeResponse<u32> = BridgeResponse { code: None, message: None, data: None };
        assert_eq!(validate_response(bare).unwrap_err().to_string(), MISSING_DATA);
    }

    #[test]
    fn test_swap_request_shape() {
        let body = SwapRequest {
            amount: "1",
            from_network: "ETH",
            source: SWAP_SOURCE,
            symbol: "ETH",
            to_address: "0xto",
            to_address_label: "",
            to_network: "BSC",
            wallet_address: "0xfrom",
            wallet_network: "ETH",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "amount": "1",
                "fromNetwork": "ETH",
                "source": 921,
                "symbol": "ETH",
                "toAddress": "0xto",
                "toAddressLabel": "",
                "toNetwork": "BSC",
                "walletAddress": "0xfrom",
                "walletNetwork": "ETH",
            })
        );
    }

    #[test]
    fn test_swap_parses_string_fee() {
        let swap: Swap = serde_json::from_value(json!({
            "id": "abc",
            "depositAddress": "0xdeposit",
            "swapFee": "0.005",
            "status": "WaitingForDeposit",
            "network": "ETH",
        }))
        .unwrap();
        assert_eq!(swap.swap_fee, Some(0.005));
        assert_eq!(swap.extra.get("network"), Some(&json!("ETH")));
    }

    #[test]
    fn test_default_config() {
        let client = BinanceBridgeClient::new(&BridgeConfig {
            api_url: "https://bridge.test/api/".into(),
            ..BridgeConfig::default()
        });
        assert_eq!(client.base_url(), "https://bridge.test/api");
        assert_eq!(BridgeConfig::default().api_url, "https://api.binance.org/bridge/api");
    }

    #[test]
    fn test_quota_query_is_encoded() {
        let client = BinanceBridgeClient::new(&BridgeConfig::default());
        let req = client
            .get_request(
                "/v1/swaps/quota/24hour",
                &[("symbol", "ETH"), ("walletAddress", "0xabc&symbol=BTC")],
            )
            .build()
            .unwrap();
        assert_eq!(req.url().path(), "/bridge/api/v1/swaps/quota/24hour");
        assert_eq!(
            req.url().query(),
            Some("symbol=ETH&walletAddress=0xabc%26symbol%3DBTC")
        );
    }
}
