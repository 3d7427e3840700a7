//! Raydium trade API adapter.
//!
//! Two-step flow: `compute/swap-base-in` prices the route, then
//! `transaction/swap-base-in` materializes it into an unsigned transaction
//! which we re-sign and submit. SOL legs are wrapped/unwrapped by the API.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_ENGINE, Engine as _};
use log::warn;
use reqwest::Client;
use serde_json::{json, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    native_token::sol_to_lamports,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};

use crate::classify::{TradeDirection, WSOL_MINT};

use super::{sign_and_send, SwapQuote, Venue, VenueAdapter, VenueError};

const TRADE_API_HOST: &str = "https://transaction-v1.raydium.io";
const COMPUTE_UNIT_PRICE_MICROLAMPORTS: &str = "100000";

pub struct RaydiumAdapter {
    client: Client,
    rpc: Arc<RpcClient>,
    keypair: Arc<Keypair>,
}

impl RaydiumAdapter {
    pub fn new(client: Client, rpc: Arc<RpcClient>, keypair: Arc<Keypair>) -> Self {
        Self {
            client,
            rpc,
            keypair,
        }
    }
}

#[async_trait]
impl VenueAdapter for RaydiumAdapter {
    fn venue(&self) -> Venue {
        Venue::Raydium
    }

    async fn quote(
        &self,
        mint: &Pubkey,
        direction: TradeDirection,
        amount: f64,
        decimals: u8,
        slippage_pct: f64,
    ) -> Result<Option<SwapQuote>, VenueError> {
        let (input_mint, output_mint, raw_amount) = match direction {
            TradeDirection::Buy => (WSOL_MINT, *mint, sol_to_lamports(amount)),
            TradeDirection::Sell => (
                *mint,
                WSOL_MINT,
                (amount * 10f64.powi(decimals as i32)) as u64,
            ),
        };
        let slippage_bps = (slippage_pct * 100.0).round().max(0.0) as u64;

        let url = format!(
            "{TRADE_API_HOST}/compute/swap-base-in?inputMint={input_mint}&outputMint={output_mint}&amount={raw_amount}&slippageBps={slippage_bps}&txVersion=V0"
        );
        let response: Value = self.client.get(&url).send().await?.json().await?;
        if response["success"] != json!(true) {
            warn!(
                "Raydium has no route for {} {} of {mint}: {}",
                direction, amount, response["msg"]
            );
            return Ok(None);
        }

        Ok(Some(SwapQuote {
            venue: Venue::Raydium,
            mint: *mint,
            direction,
            amount,
            slippage_pct,
            payload: response,
        }))
    }

    async fn swap(&self, quote: &SwapQuote) -> Result<Option<Signature>, VenueError> {
        let body = json!({
            "wallet": self.keypair.pubkey().to_string(),
            "computeUnitPriceMicroLamports": COMPUTE_UNIT_PRICE_MICROLAMPORTS,
            "swapResponse": quote.payload,
            "txVersion": "V0",
            "wrapSol": quote.direction == TradeDirection::Buy,
            "unwrapSol": quote.direction == TradeDirection::Sell,
        });
        let response: Value = self
            .client
            .post(format!("{TRADE_API_HOST}/transaction/swap-base-in"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if response["success"] != json!(true) {
            warn!(
                "Raydium rejected {} for {}: {}",
                quote.direction, quote.mint, response["msg"]
            );
            return Ok(None);
        }
        let Some(encoded) = response["data"][0]["transaction"].as_str() else {
            return Ok(None);
        };
        let tx_bytes = BASE64_ENGINE
            .decode(encoded)
            .map_err(|e| VenueError::BadTransaction(e.to_string()))?;
        let signature = sign_and_send(&self.rpc, &self.keypair, &tx_bytes).await?;
        Ok(Some(signature))
    }
}
