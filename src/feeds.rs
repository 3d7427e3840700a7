//! Inbound event feeds.
//!
//! Two independently running sources funnel into one engine channel: a
//! PumpPortal WebSocket subscription on the source wallet (push, carries full
//! trade facts) and an RPC signature poller (poll-on-interval, carries only
//! the signature and requires a follow-up fetch). Delivery is at-least-once
//! across the two; the engine's idempotency guard resolves the overlap.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tokio::{sync::mpsc, time::sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{classify::TradeDirection, ledger::LedgerClient, venues::Venue};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const POLL_DEPTH: usize = 10;

/// A trade pushed by the PumpPortal stream, already carrying trade facts.
#[derive(Clone, Debug)]
pub struct PushTrade {
    pub signature: String,
    pub wallet: Pubkey,
    pub mint: Pubkey,
    pub direction: TradeDirection,
    pub token_amount: f64,
    pub sol_amount: f64,
    pub venue_hint: Option<Venue>,
}

#[derive(Clone, Debug)]
pub enum InboundEvent {
    Push(PushTrade),
    /// A signature observed on the source wallet; the engine fetches and
    /// classifies the transaction itself.
    Signature {
        signature: String,
        venue_hint: Option<Venue>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPortalTrade {
    signature: Option<String>,
    trader_public_key: Option<String>,
    tx_type: Option<String>,
    mint: Option<String>,
    token_amount: Option<f64>,
    sol_amount: Option<f64>,
    pool: Option<String>,
}

fn venue_from_pool(pool: &str) -> Option<Venue> {
    match pool {
        "pump" => Some(Venue::PumpPortal),
        "pump-amm" => Some(Venue::PumpSwap),
        "raydium" => Some(Venue::Raydium),
        _ => None,
    }
}

fn parse_portal_trade(text: &str, source: &Pubkey) -> Option<PushTrade> {
    let raw: RawPortalTrade = serde_json::from_str(text).ok()?;
    let wallet = Pubkey::from_str(raw.trader_public_key.as_deref()?).ok()?;
    if wallet != *source {
        return None;
    }
    let direction = match raw.tx_type.as_deref()? {
        "buy" => TradeDirection::Buy,
        "sell" => TradeDirection::Sell,
        other => {
            debug!("Ignoring portal message with txType {other}");
            return None;
        }
    };
    let mint = Pubkey::from_str(raw.mint.as_deref()?).ok()?;
    Some(PushTrade {
        signature: raw.signature.unwrap_or_default(),
        wallet,
        mint,
        direction,
        token_amount: raw.token_amount.unwrap_or(0.0),
        sol_amount: raw.sol_amount.unwrap_or(0.0),
        venue_hint: raw.pool.as_deref().and_then(venue_from_pool),
    })
}

/// Subscribe to the source wallet's trades over the PumpPortal stream,
/// reconnecting forever on failure.
pub async fn run_pumpportal_feed(
    ws_url: String,
    source: Pubkey,
    events: mpsc::Sender<InboundEvent>,
) {
    loop {
        match subscribe_once(&ws_url, &source, &events).await {
            Ok(()) => info!("PumpPortal stream closed; reconnecting"),
            Err(err) => warn!("PumpPortal stream error: {err}; reconnecting"),
        }
        sleep(RECONNECT_DELAY).await;
    }
}

async fn subscribe_once(
    ws_url: &str,
    source: &Pubkey,
    events: &mpsc::Sender<InboundEvent>,
) -> anyhow::Result<()> {
    let (mut ws, _) = connect_async(ws_url).await?;
    let subscribe = json!({
        "method": "subscribeAccountTrade",
        "keys": [source.to_string()],
    });
    ws.send(Message::Text(subscribe.to_string())).await?;
    info!("PumpPortal stream opened, watching {source}");

    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => {
                if let Some(trade) = parse_portal_trade(&text, source) {
                    if events.send(InboundEvent::Push(trade)).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Message::Ping(payload) => ws.send(Message::Pong(payload)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

/// Poll recent signatures on the source wallet, forwarding anything newer
/// than the previous poll. Catches venues the push stream does not cover.
pub async fn run_signature_poller(
    ledger: Arc<dyn LedgerClient>,
    source: Pubkey,
    interval: Duration,
    events: mpsc::Sender<InboundEvent>,
) {
    let mut cursor: Option<String> = None;
    loop {
        match ledger.recent_signatures(&source, POLL_DEPTH).await {
            Ok(signatures) => {
                let fresh: Vec<String> = signatures
                    .into_iter()
                    .take_while(|signature| Some(signature) != cursor.as_ref())
                    .collect();
                if let Some(newest) = fresh.first() {
                    let had_cursor = cursor.is_some();
                    cursor = Some(newest.clone());
                    // First poll only establishes the cursor; mirroring the
                    // wallet's stale history would double-trade on restart.
                    if had_cursor {
                        for signature in fresh.into_iter().rev() {
                            let event = InboundEvent::Signature {
                                signature,
                                venue_hint: None,
                            };
                            if events.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            Err(err) => warn!("Signature poll for {source} failed: {err}"),
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_trades_parse_and_filter_by_wallet() {
        let source = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let text = json!({
            "signature": "abc123",
            "traderPublicKey": source.to_string(),
            "txType": "buy",
            "mint": mint.to_string(),
            "tokenAmount": 1234.5,
            "solAmount": 0.8,
            "pool": "pump",
        })
        .to_string();

        let trade = parse_portal_trade(&text, &source).expect("trade expected");
        assert_eq!(trade.direction, TradeDirection::Buy);
        assert_eq!(trade.mint, mint);
        assert_eq!(trade.venue_hint, Some(Venue::PumpPortal));
        assert!((trade.token_amount - 1234.5).abs() < 1e-9);

        // Another wallet's trade on the same stream is ignored.
        assert!(parse_portal_trade(&text, &Pubkey::new_unique()).is_none());
    }

    #[test]
    fn non_trade_messages_are_ignored() {
        let source = Pubkey::new_unique();
        let text = json!({
            "traderPublicKey": source.to_string(),
            "txType": "create",
            "mint": Pubkey::new_unique().to_string(),
        })
        .to_string();
        assert!(parse_portal_trade(&text, &source).is_none());
        assert!(parse_portal_trade("{\"message\":\"subscribed\"}", &source).is_none());
    }

    #[test]
    fn pool_names_map_to_venue_hints() {
        assert_eq!(venue_from_pool("pump"), Some(Venue::PumpPortal));
        assert_eq!(venue_from_pool("pump-amm"), Some(Venue::PumpSwap));
        assert_eq!(venue_from_pool("raydium"), Some(Venue::Raydium));
        assert_eq!(venue_from_pool("bonk"), None);
    }
}
