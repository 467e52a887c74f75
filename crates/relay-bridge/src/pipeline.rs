//! Bridge quote/confirm pipeline.
//!
//! `Idle -> Quoting -> Quoted -> Confirming -> Completed | Failed`, plus
//! `Idle -> Failed` when eligibility cannot be fetched. Validation problems
//! never change the state; they come back as a [`SubmitWarning`].

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::client::{BridgeClient, BridgeEligibility, BridgeToken, Swap};
use relay_provider::SEND_TRANSACTION;
use relay_types::{parse_units, to_checksum_address, to_quantity_hex, Hex, Result};
use relay_wallet::WalletContext;

/// Only Ethereum mainnet deposits are supported.
pub const ETHEREUM_MAINNET: u64 = 1;

/// Native asset that can be transferred to a deposit address.
pub const NATIVE_SYMBOL: &str = "ETH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Quoting,
    Quoted,
    Confirming,
    Completed,
    Failed,
}

/// Reason the pipeline refuses to quote or confirm.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitWarning {
    NotConnected,
    WrongNetwork,
    /// Eligibility has not been fetched for the current account and token.
    NoEligibility,
    CannotSend,
    InvalidAmount,
    BelowMinimum(f64),
    AboveMaximum(f64),
    UnsupportedToken(String),
    NoQuote,
}

impl fmt::Display for SubmitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("Connect a wallet"),
            Self::WrongNetwork => f.write_str("Must be on Ethereum mainnet!"),
            Self::NoEligibility => f.write_str("Bridge details unavailable"),
            Self::CannotSend => f.write_str("Cannot send"),
            Self::InvalidAmount => f.write_str("Enter a valid amount"),
            Self::BelowMinimum(min) => write!(f, "Min. amount is {}", min),
            Self::AboveMaximum(max) => write!(f, "Max. amount is {}", max),
            Self::UnsupportedToken(symbol) => write!(f, "{} cannot be bridged yet", symbol),
            Self::NoQuote => f.write_str("Get a quote first"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Quoted {
        deposit_address: String,
        swap_fee: Option<f64>,
    },
    Completed(Hex),
    Blocked(SubmitWarning),
    Failed(String),
}

/// A token that can be bridged, keyed by its ETH contract address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueToken {
    pub address: String,
    pub decimals: u32,
    pub symbol: String,
    pub name: String,
}

/// Tokens with an ETH contract, first occurrence per address kept.
pub fn token_catalogue(tokens: &[BridgeToken]) -> Vec<CatalogueToken> {
    let mut catalogue: Vec<CatalogueToken> = Vec::new();
    for token in tokens {
        let address = match token.eth_contract_address.as_deref() {
            Some(address) if !address.is_empty() => address,
            _ => continue,
        };
        if catalogue.iter().any(|t| t.address == address) {
            continue;
        }
        catalogue.push(CatalogueToken {
            address: address.to_string(),
            decimals: token.eth_contract_decimal.unwrap_or(18),
            symbol: token.eth_symbol.clone().unwrap_or_else(|| token.symbol.clone()),
            name: token.name.clone(),
        });
    }
    catalogue
}

/// Symbol sent to the bridge for the selected asset.
pub fn bridge_symbol(symbol: &str) -> &str {
    if symbol == "BNB" {
        NATIVE_SYMBOL
    } else {
        symbol
    }
}

pub struct BridgePipeline {
    client: Arc<dyn BridgeClient>,
    wallet: Arc<WalletContext>,
    state: BridgeState,
    symbol: String,
    decimals: u32,
    amount: String,
    account: Option<String>,
    eligibility: Option<BridgeEligibility>,
    deposit: Option<Swap>,
    error_message: Option<String>,
    tx_hash: Option<Hex>,
}

impl BridgePipeline {
    pub fn new(client: Arc<dyn BridgeClient>, wallet: Arc<WalletContext>) -> Self {
        Self {
            client,
            wallet,
            state: BridgeState::Idle,
            symbol: NATIVE_SYMBOL.to_string(),
            decimals: 18,
            amount: String::new(),
            account: None,
            eligibility: None,
            deposit: None,
            error_message: None,
            tx_hash: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn amount(&self) -> &str {
        &self.amount
    }

    pub fn eligibility(&self) -> Option<&BridgeEligibility> {
        self.eligibility.as_ref()
    }

    pub fn deposit(&self) -> Option<&Swap> {
        self.deposit.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn tx_hash(&self) -> Option<&str> {
        self.tx_hash.as_deref()
    }

    /// Amount minus the quoted swap fee.
    pub fn estimated_receive(&self) -> Option<f64> {
        let deposit = self.deposit.as_ref()?;
        let amount: f64 = self.amount.trim().parse().ok()?;
        Some(amount - deposit.swap_fee.unwrap_or(0.0))
    }

    pub async fn available_tokens(&self) -> Result<Vec<CatalogueToken>> {
        let tokens = self.client.list_available_tokens().await?;
        Ok(token_catalogue(&tokens))
    }

    /// Switch the bridged asset and re-fetch eligibility for it.
    pub async fn select_token(&mut self, symbol: &str, decimals: u32) {
        let symbol = bridge_symbol(symbol).to_string();
        if symbol == self.symbol && decimals == self.decimals && self.eligibility.is_some() {
            return;
        }
        self.symbol = symbol;
        self.decimals = decimals;
        self.refresh_eligibility().await;
    }

    /// Re-fetch eligibility if the wallet's resolved account changed.
    pub async fn sync_account(&mut self) {
        let account = self.wallet.effective_account().await;
        if account != self.account || (account.is_some() && self.eligibility.is_none()) {
            self.account = account;
            self.refresh_eligibility().await;
        }
    }

    /// Fetch eligibility for the current account and token. Any earlier
    /// quote or result is discarded.
    pub async fn refresh_eligibility(&mut self) {
        self.reset_quote();
        self.error_message = None;
        self.state = BridgeState::Idle;

        let account = match &self.account {
            Some(account) => account.clone(),
            None => {
                self.eligibility = None;
                return;
            }
        };
        let fetched = self.client.get_token_bridge_info(&self.symbol, &account).await;
        match fetched {
            Ok(eligibility) => {
                debug!(
                    symbol = %self.symbol,
                    account = %account,
                    enabled = eligibility.bridge_enabled,
                    "bridge eligibility"
                );
                self.eligibility = Some(eligibility);
            }
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "bridge eligibility unavailable");
                self.eligibility = Some(BridgeEligibility::disabled());
                self.error_message = Some(e.to_string());
                self.state = BridgeState::Failed;
            }
        }
    }

    /// Change the amount. A quote for the previous amount is dropped.
    pub fn set_amount(&mut self, amount: &str) {
        if amount == self.amount {
            return;
        }
        self.amount = amount.to_string();
        if self.deposit.is_some() || self.tx_hash.is_some() {
            self.reset_quote();
            self.state = BridgeState::Idle;
        }
    }

    /// First reason the current amount cannot be bridged, if any.
    pub fn submit_warning(&self, chain_id: Option<u64>) -> Option<SubmitWarning> {
        if self.account.is_none() {
            return Some(SubmitWarning::NotConnected);
        }
        if chain_id != Some(ETHEREUM_MAINNET) {
            return Some(SubmitWarning::WrongNetwork);
        }
        let eligibility = match &self.eligibility {
            Some(eligibility) => eligibility,
            None => return Some(SubmitWarning::NoEligibility),
        };
        if !eligibility.bridge_enabled {
            return Some(SubmitWarning::CannotSend);
        }
        // Bounds are floats, but the amount must also be payable in base units.
        let amount = match (
            parse_units(&self.amount, self.decimals),
            self.amount.trim().parse::<f64>(),
        ) {
            (Ok(units), Ok(amount)) if units > 0 => amount,
            _ => return Some(SubmitWarning::InvalidAmount),
        };
        if let Some(min) = eligibility.min_amount.filter(|m| *m > 0.0) {
            if amount < min {
                return Some(SubmitWarning::BelowMinimum(min));
            }
        }
        if let Some(max) = eligibility.max_amount.filter(|m| *m > 0.0) {
            if amount > max {
                return Some(SubmitWarning::AboveMaximum(max));
            }
        }
        None
    }

    /// Register a deposit intent for `amount` of the selected token.
    pub async fn quote(&mut self, amount: &str) -> PipelineOutcome {
        self.set_amount(amount);
        self.sync_account().await;

        let chain_id = self.wallet.chain_id().await;
        if let Some(warning) = self.submit_warning(chain_id) {
            return PipelineOutcome::Blocked(warning);
        }
        let (from, to) = match (self.wallet.direct_address().await, self.account.clone()) {
            (Some(from), Some(to)) => (from, to),
            _ => return PipelineOutcome::Blocked(SubmitWarning::NotConnected),
        };

        self.reset_quote();
        self.error_message = None;
        self.state = BridgeState::Quoting;
        let registered = self
            .client
            .register_deposit_intent(&self.symbol, &self.amount, &from, &to)
            .await;
        match registered {
            Ok(swap) => {
                info!(
                    symbol = %self.symbol,
                    amount = %self.amount,
                    deposit_address = %swap.deposit_address,
                    "bridge quote registered"
                );
                let outcome = PipelineOutcome::Quoted {
                    deposit_address: swap.deposit_address.clone(),
                    swap_fee: swap.swap_fee,
                };
                self.deposit = Some(swap);
                self.state = BridgeState::Quoted;
                outcome
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    /// Send the quoted amount to the deposit address through the wallet's
    /// current provider.
    pub async fn confirm(&mut self) -> PipelineOutcome {
        let to = match (&self.deposit, self.state) {
            (Some(deposit), BridgeState::Quoted | BridgeState::Failed) => {
                deposit.deposit_address.clone()
            }
            _ => return PipelineOutcome::Blocked(SubmitWarning::NoQuote),
        };
        let chain_id = self.wallet.chain_id().await;
        if let Some(warning) = self.submit_warning(chain_id) {
            return PipelineOutcome::Blocked(warning);
        }
        if self.symbol != NATIVE_SYMBOL {
            return PipelineOutcome::Blocked(SubmitWarning::UnsupportedToken(self.symbol.clone()));
        }
        let value = match parse_units(&self.amount, self.decimals) {
            Ok(units) => to_quantity_hex(units),
            Err(_) => return PipelineOutcome::Blocked(SubmitWarning::InvalidAmount),
        };
        let from = match self.wallet.direct_address().await {
            Some(from) => from,
            None => return PipelineOutcome::Blocked(SubmitWarning::NotConnected),
        };
        let (from, to) = match (to_checksum_address(&from), to_checksum_address(&to)) {
            (Ok(from), Ok(to)) => (from, to),
            _ => return self.fail(format!("invalid deposit address {}", to)),
        };

        self.error_message = None;
        self.state = BridgeState::Confirming;
        let provider = self.wallet.library().await;
        let params = vec![json!({ "from": from, "to": to, "value": value })];
        match provider.send(SEND_TRANSACTION, params).await {
            Ok(Value::String(hash)) => {
                info!(tx_hash = %hash, deposit_address = %to, "bridge deposit sent");
                self.tx_hash = Some(hash.clone());
                self.state = BridgeState::Completed;
                PipelineOutcome::Completed(hash)
            }
            Ok(other) => self.fail(format!("unexpected transaction response: {}", other)),
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn fail(&mut self, message: String) -> PipelineOutcome {
        warn!(state = ?self.state, error = %message, "bridge step failed");
        self.error_message = Some(message.clone());
        self.state = BridgeState::Failed;
        PipelineOutcome::Failed(message)
    }

    fn reset_quote(&mut self) {
        self.deposit = None;
        self.tx_hash = None;
    }
}
