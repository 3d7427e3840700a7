//! Venue abstraction.
//!
//! One adapter per liquidity venue, all behind a single trait so the
//! classifier, sizing engine and router are shared and only the swap builder
//! varies. The adapters are thin HTTP clients over each venue's transaction
//! API; instruction encoding correctness is the API's problem, not ours.

use async_trait::async_trait;
use serde_json::Value;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    pubkey,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::VersionedTransaction,
};
use thiserror::Error;

use crate::classify::TradeDirection;

pub mod pump_portal;
pub mod raydium;

pub const RAYDIUM_AMM_V4: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");
pub const PUMP_FUN: Pubkey = pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");
pub const PUMP_AMM: Pubkey = pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Venue {
    Raydium,
    PumpPortal,
    PumpSwap,
}

impl Venue {
    /// Classification priority order: when a transaction matches more than
    /// one venue's signals, the first match here wins.
    pub const PRIORITY: [Venue; 3] = [Venue::Raydium, Venue::PumpPortal, Venue::PumpSwap];

    pub fn program_id(&self) -> Pubkey {
        match self {
            Venue::Raydium => RAYDIUM_AMM_V4,
            Venue::PumpPortal => PUMP_FUN,
            Venue::PumpSwap => PUMP_AMM,
        }
    }

    /// Marker string looked for in transaction logs. Unreliable in isolation;
    /// always OR-ed with the program-id signal and the upstream feed hint.
    pub fn log_marker(&self) -> &'static str {
        match self {
            Venue::Raydium => "ray_log",
            Venue::PumpPortal => "vdt/007mYe",
            Venue::PumpSwap => "Program pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA invoke",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Venue::Raydium => "Raydium",
            Venue::PumpPortal => "PumpPortal",
            Venue::PumpSwap => "PumpSwap",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A priced swap ready for submission. For venues without a separate quote
/// endpoint the payload is simply the prepared trade request.
#[derive(Clone, Debug)]
pub struct SwapQuote {
    pub venue: Venue,
    pub mint: Pubkey,
    pub direction: TradeDirection,
    /// SOL for buys, tokens for sells (ui units).
    pub amount: f64,
    pub slippage_pct: f64,
    /// Venue-specific quote body carried through to `swap`.
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rpc error: {0}")]
    Rpc(#[from] solana_client::client_error::ClientError),
    #[error("signing failed: {0}")]
    Signing(#[from] solana_sdk::signer::SignerError),
    #[error("venue returned an undecodable transaction: {0}")]
    BadTransaction(String),
}

/// Venue swap capability: price a trade, then build, sign and submit it.
/// `quote` returning `Ok(None)` and `swap` returning `Ok(None)` both mean the
/// venue declined the trade (no route, no pool); the router reports those as
/// rejections rather than errors.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    async fn quote(
        &self,
        mint: &Pubkey,
        direction: TradeDirection,
        amount: f64,
        decimals: u8,
        slippage_pct: f64,
    ) -> Result<Option<SwapQuote>, VenueError>;

    async fn swap(&self, quote: &SwapQuote) -> Result<Option<Signature>, VenueError>;
}

/// Deserialize a venue-built transaction, re-sign it as the operator and
/// submit it over RPC.
pub(crate) async fn sign_and_send(
    rpc: &RpcClient,
    keypair: &Keypair,
    tx_bytes: &[u8],
) -> Result<Signature, VenueError> {
    let unsigned: VersionedTransaction = bincode::deserialize(tx_bytes)
        .map_err(|e| VenueError::BadTransaction(e.to_string()))?;
    if !unsigned
        .message
        .static_account_keys()
        .contains(&keypair.pubkey())
    {
        return Err(VenueError::BadTransaction(
            "operator key missing from venue transaction".to_string(),
        ));
    }
    let signed = VersionedTransaction::try_new(unsigned.message, &[keypair])?;
    let signature = rpc.send_transaction(&signed).await?;
    Ok(signature)
}
