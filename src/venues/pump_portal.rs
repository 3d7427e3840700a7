//! PumpPortal trade-local adapter.
//!
//! Serves both pump venues: the bonding-curve venue (`pool=pump`) and the
//! PumpSwap AMM (`pool=pump-amm`). The API builds an unsigned transaction for
//! the requested trade; we re-sign it as the operator and submit it over RPC.

use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use reqwest::Client;
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};

use crate::classify::TradeDirection;

use super::{sign_and_send, SwapQuote, Venue, VenueAdapter, VenueError};

const TRADE_LOCAL_URL: &str = "https://pumpportal.fun/api/trade-local";
const PRIORITY_FEE_SOL: f64 = 0.0005;

pub struct PumpPortalAdapter {
    client: Client,
    rpc: Arc<RpcClient>,
    keypair: Arc<Keypair>,
    venue: Venue,
    pool: &'static str,
}

impl PumpPortalAdapter {
    /// Adapter for the bonding-curve venue.
    pub fn curve(client: Client, rpc: Arc<RpcClient>, keypair: Arc<Keypair>) -> Self {
        Self {
            client,
            rpc,
            keypair,
            venue: Venue::PumpPortal,
            pool: "pump",
        }
    }

    /// Adapter for the PumpSwap AMM.
    pub fn amm(client: Client, rpc: Arc<RpcClient>, keypair: Arc<Keypair>) -> Self {
        Self {
            client,
            rpc,
            keypair,
            venue: Venue::PumpSwap,
            pool: "pump-amm",
        }
    }
}

#[async_trait]
impl VenueAdapter for PumpPortalAdapter {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn quote(
        &self,
        mint: &Pubkey,
        direction: TradeDirection,
        amount: f64,
        _decimals: u8,
        slippage_pct: f64,
    ) -> Result<Option<SwapQuote>, VenueError> {
        // No separate quote endpoint; the prepared trade request is the quote.
        let payload = json!({
            "publicKey": self.keypair.pubkey().to_string(),
            "action": direction.label(),
            "mint": mint.to_string(),
            "amount": amount,
            "denominatedInSol": match direction {
                TradeDirection::Buy => "true",
                TradeDirection::Sell => "false",
            },
            "slippage": slippage_pct,
            "priorityFee": PRIORITY_FEE_SOL,
            "pool": self.pool,
        });
        Ok(Some(SwapQuote {
            venue: self.venue,
            mint: *mint,
            direction,
            amount,
            slippage_pct,
            payload,
        }))
    }

    async fn swap(&self, quote: &SwapQuote) -> Result<Option<Signature>, VenueError> {
        let response = self
            .client
            .post(TRADE_LOCAL_URL)
            .json(&quote.payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "{} declined {} for {} (status {status}): {body}",
                self.venue, quote.direction, quote.mint
            );
            return Ok(None);
        }

        let tx_bytes = response.bytes().await?;
        let signature = sign_and_send(&self.rpc, &self.keypair, &tx_bytes).await?;
        Ok(Some(signature))
    }
}
