//! Execution routing: venue dispatch, confirmation, fill extraction.

use std::{collections::HashMap, sync::Arc, time::Duration};

use log::{debug, info, warn};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;
use tokio::time::sleep;

use crate::{
    classify::TradeDirection,
    ledger::{LedgerClient, LedgerError},
    venues::{Venue, VenueAdapter, VenueError},
};

pub const CONFIRM_ATTEMPTS: u32 = 5;
pub const CONFIRM_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("no adapter registered for {0}")]
    UnknownVenue(Venue),
    #[error("{venue} rejected the swap")]
    VenueRejected { venue: Venue },
    #[error("confirmation timed out for {signature}")]
    ConfirmationTimeout { signature: Signature },
    #[error(transparent)]
    Venue(#[from] VenueError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Outcome of a confirmed mirrored swap.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionReceipt {
    pub signature: Signature,
    /// SOL spent (buy) or received (sell), from the controlled wallet's
    /// native balance diff around the swap. For P/L, not for sizing.
    pub realized_sol: f64,
    /// Token fill read from the confirmed transaction, when available.
    pub realized_tokens: Option<f64>,
}

pub struct ExecutionRouter {
    adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
    ledger: Arc<dyn LedgerClient>,
    controlled: Pubkey,
}

impl ExecutionRouter {
    pub fn new(
        adapters: HashMap<Venue, Arc<dyn VenueAdapter>>,
        ledger: Arc<dyn LedgerClient>,
        controlled: Pubkey,
    ) -> Self {
        Self {
            adapters,
            ledger,
            controlled,
        }
    }

    /// Quote, submit and confirm a swap on the given venue.
    ///
    /// A confirmation timeout means the trade is treated as not having
    /// happened for accounting, even though the transaction may still land
    /// later; callers must not mutate controlled-side totals on error.
    pub async fn execute(
        &self,
        venue: Venue,
        mint: &Pubkey,
        direction: TradeDirection,
        amount: f64,
        decimals: u8,
        slippage_pct: f64,
    ) -> Result<ExecutionReceipt, ExecError> {
        let adapter = self
            .adapters
            .get(&venue)
            .ok_or(ExecError::UnknownVenue(venue))?;

        let balance_before = self.ledger.native_balance_sol(&self.controlled).await?;

        let quote = adapter
            .quote(mint, direction, amount, decimals, slippage_pct)
            .await?
            .ok_or(ExecError::VenueRejected { venue })?;
        let signature = adapter
            .swap(&quote)
            .await?
            .ok_or(ExecError::VenueRejected { venue })?;
        info!("Submitted {venue} {direction} for {mint}: {signature}");

        self.await_confirmation(&signature).await?;

        let balance_after = self.ledger.native_balance_sol(&self.controlled).await?;
        let realized_sol = match direction {
            TradeDirection::Buy => (balance_before - balance_after).max(0.0),
            TradeDirection::Sell => (balance_after - balance_before).max(0.0),
        };
        let realized_tokens = self.extract_token_fill(&signature, mint).await;

        Ok(ExecutionReceipt {
            signature,
            realized_sol,
            realized_tokens,
        })
    }

    async fn await_confirmation(&self, signature: &Signature) -> Result<(), ExecError> {
        for attempt in 1..=CONFIRM_ATTEMPTS {
            match self.ledger.is_confirmed(signature).await {
                Ok(true) => {
                    debug!("Swap {signature} confirmed on attempt {attempt}");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => warn!("Status poll {attempt} for {signature} failed: {err}"),
            }
            if attempt < CONFIRM_ATTEMPTS {
                sleep(CONFIRM_INTERVAL).await;
            }
        }
        // The transaction may still land after we give up; holdings would
        // then drift from the book until the position is next traded.
        warn!("Swap {signature} unconfirmed after {CONFIRM_ATTEMPTS} attempts; position state may drift");
        Err(ExecError::ConfirmationTimeout {
            signature: *signature,
        })
    }

    async fn extract_token_fill(&self, signature: &Signature, mint: &Pubkey) -> Option<f64> {
        match self.ledger.fetch_transaction(signature).await {
            Ok(Some(snapshot)) => snapshot
                .token_deltas_for(&self.controlled)
                .into_iter()
                .find(|change| change.mint == *mint)
                .map(|change| change.delta_ui().abs()),
            Ok(None) => None,
            Err(err) => {
                debug!("Fill extraction for {signature} failed: {err}");
                None
            }
        }
    }
}
