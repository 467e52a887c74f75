//! ETH -> BSC bridging on top of the relay wallet context.
//!
//! - `BinanceBridgeClient`: token list, eligibility and swap registration
//! - `BridgePipeline`: quote / confirm state machine that pays the deposit
//!   through whichever provider the wallet context currently exposes

pub mod client;
pub mod pipeline;

pub use client::{
    validate_response, BinanceBridgeClient, BridgeClient, BridgeConfig, BridgeEligibility,
    BridgeResponse, BridgeToken, Swap, SwapQuota, TokenNetwork,
};
pub use pipeline::{
    bridge_symbol, token_catalogue, BridgePipeline, BridgeState, CatalogueToken, PipelineOutcome,
    SubmitWarning,
};
