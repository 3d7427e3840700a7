//! The mirroring engine.
//!
//! One engine task owns all mutable state (position book, idempotency guard)
//! and consumes every inbound event sequentially, so per-event processing
//! never interleaves. Every failure is caught at the event boundary: it ends
//! processing of that event only and never crashes the loop.

use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::str::FromStr;
use thiserror::Error;
use tokio::{sync::mpsc, time::sleep};

use crate::{
    classify::{classify, Classification, TradeDirection, TradeEvent},
    dedupe::{trade_key, ProcessedSet},
    ledger::{LedgerClient, LedgerError, TxSnapshot},
    notify::Notifier,
    positions::PositionBook,
    router::{ExecError, ExecutionRouter},
    sizing::{self, SizingConfig, SkipReason},
    feeds::{InboundEvent, PushTrade},
    venues::Venue,
};

const FETCH_ATTEMPTS: u32 = 5;
const FETCH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("transaction {0} unavailable after {FETCH_ATTEMPTS} attempts")]
    TransactionUnavailable(String),
    #[error("malformed signature {0:?}")]
    BadSignature(String),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Copy, Debug)]
pub struct EngineSettings {
    pub source_wallet: Pubkey,
    pub controlled_wallet: Pubkey,
    pub sizing: SizingConfig,
}

pub struct MirrorEngine {
    settings: EngineSettings,
    ledger: Arc<dyn LedgerClient>,
    router: ExecutionRouter,
    notifier: Arc<dyn Notifier>,
    book: PositionBook,
    processed: ProcessedSet,
}

impl MirrorEngine {
    pub fn new(
        settings: EngineSettings,
        ledger: Arc<dyn LedgerClient>,
        router: ExecutionRouter,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            ledger,
            router,
            notifier,
            book: PositionBook::new(),
            processed: ProcessedSet::default(),
        }
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<InboundEvent>) {
        info!(
            "Engine running | source={} | controlled={} | trade_pct={:.2}",
            self.settings.source_wallet,
            self.settings.controlled_wallet,
            self.settings.sizing.trade_percentage
        );
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!(
            "Event channel closed, engine stopping ({} mints tracked)",
            self.book.tracked_mints()
        );
    }

    /// Process one inbound event; errors terminate this event only.
    pub async fn handle_event(&mut self, event: InboundEvent) {
        if let Err(err) = self.process_event(event).await {
            warn!("Event processing failed: {err}");
            self.notify(format!("Mirror failed: {err}"));
        }
    }

    async fn process_event(&mut self, event: InboundEvent) -> Result<(), MirrorError> {
        match event {
            InboundEvent::Push(push) => self.process_push(push).await,
            InboundEvent::Signature {
                signature,
                venue_hint,
            } => self.process_signature(&signature, venue_hint).await,
        }
    }

    /// Push payloads already carry classified trade facts; the guard is
    /// keyed on the signature when present, else on a composite trade key.
    async fn process_push(&mut self, push: PushTrade) -> Result<(), MirrorError> {
        let key = if push.signature.is_empty() {
            trade_key(&push.mint, push.direction, &format!("{:.9}", push.token_amount))
        } else {
            push.signature.clone()
        };
        if self.processed.contains(&key) {
            debug!("Duplicate push delivery ignored: {key}");
            return Ok(());
        }
        self.processed.insert(key);

        let trade = TradeEvent {
            signature: push.signature,
            venue: push.venue_hint.unwrap_or(Venue::PumpPortal),
            mint: push.mint,
            direction: push.direction,
            token_amount: push.token_amount,
            sol_amount: push.sol_amount,
            timestamp: 0,
        };
        self.mirror(trade).await
    }

    async fn process_signature(
        &mut self,
        signature: &str,
        venue_hint: Option<Venue>,
    ) -> Result<(), MirrorError> {
        if self.processed.contains(signature) {
            debug!("Duplicate signature delivery ignored: {signature}");
            return Ok(());
        }
        let parsed = Signature::from_str(signature)
            .map_err(|_| MirrorError::BadSignature(signature.to_string()))?;
        let snapshot = self.fetch_with_retry(&parsed).await?;

        match classify(&snapshot, &self.settings.source_wallet, venue_hint) {
            Classification::NotApplicable(reason) => {
                debug!("Skipping {signature}: {reason}");
                Ok(())
            }
            Classification::Trade(trade) => {
                // Marked as soon as classification matches, before execution:
                // a second delivery must never race a slow swap into a
                // duplicate spend, even if this attempt fails.
                self.processed.insert(signature.to_string());
                self.mirror(trade).await
            }
        }
    }

    async fn mirror(&mut self, trade: TradeEvent) -> Result<(), MirrorError> {
        info!(
            "Source {} | {} {:.4} of {} for {:.6} SOL on {} | block_time={}",
            self.settings.source_wallet,
            trade.direction,
            trade.token_amount,
            trade.mint,
            trade.sol_amount,
            trade.venue,
            trade.timestamp
        );
        match trade.direction {
            TradeDirection::Buy => self.mirror_buy(trade).await,
            TradeDirection::Sell => self.mirror_sell(trade).await,
        }
    }

    async fn mirror_buy(&mut self, trade: TradeEvent) -> Result<(), MirrorError> {
        self.book.record_source_buy(trade.mint, trade.token_amount);

        // Live balance is re-read immediately before sizing so a concurrent
        // spend from another feed is reflected.
        let live_sol = self
            .ledger
            .native_balance_sol(&self.settings.controlled_wallet)
            .await?;
        let spend = match sizing::plan_buy(trade.sol_amount, &self.settings.sizing, live_sol) {
            Ok(spend) => spend,
            Err(reason) => return Ok(self.log_skip(&trade, reason)),
        };

        let receipt = self
            .router
            .execute(
                trade.venue,
                &trade.mint,
                TradeDirection::Buy,
                spend,
                9,
                self.settings.sizing.slippage_pct,
            )
            .await?;

        // Prefer the real fill; fall back to the proportional estimate when
        // the confirmed transaction cannot be read back.
        let tokens_bought = receipt
            .realized_tokens
            .unwrap_or(trade.token_amount * self.settings.sizing.trade_percentage);
        let cost_sol = if receipt.realized_sol > 0.0 {
            receipt.realized_sol
        } else {
            spend
        };
        self.book
            .record_controlled_buy(trade.mint, tokens_bought, cost_sol);

        info!(
            "Mirrored buy | mint={} | spend={:.6} SOL | tokens={:.4} | sig={}",
            trade.mint, cost_sol, tokens_bought, receipt.signature
        );
        self.notify(format!(
            "Mirrored BUY on {}\nmint: {}\nspent: {:.6} SOL\ntokens: {:.4}\ntx: {}",
            trade.venue, trade.mint, cost_sol, tokens_bought, receipt.signature
        ));
        Ok(())
    }

    async fn mirror_sell(&mut self, trade: TradeEvent) -> Result<(), MirrorError> {
        self.book.record_source_sell(trade.mint, trade.token_amount);

        let holding = self
            .ledger
            .token_balance(&self.settings.controlled_wallet, &trade.mint)
            .await?;
        let position = self.book.snapshot(&trade.mint);
        let sell_amount = match sizing::plan_sell(trade.token_amount, &position, holding.ui_amount)
        {
            Ok(amount) => amount,
            Err(reason) => return Ok(self.log_skip(&trade, reason)),
        };

        let receipt = self
            .router
            .execute(
                trade.venue,
                &trade.mint,
                TradeDirection::Sell,
                sell_amount,
                holding.decimals,
                self.settings.sizing.slippage_pct,
            )
            .await?;

        let cost_basis = self.book.cost_basis(&trade.mint, sell_amount);
        let pnl = receipt.realized_sol - cost_basis;
        self.book
            .record_controlled_sell(trade.mint, sell_amount, receipt.realized_sol);

        info!(
            "Mirrored sell | mint={} | tokens={:.4} | received={:.6} SOL | pnl={:+.6} SOL | sig={}",
            trade.mint, sell_amount, receipt.realized_sol, pnl, receipt.signature
        );
        let totals = self.book.snapshot(&trade.mint);
        info!(
            "Position {} | sold {:.4} of {:.4} bought | revenue {:.6} SOL vs cost {:.6} SOL",
            trade.mint,
            totals.controlled_sold,
            totals.controlled_bought,
            totals.controlled_revenue_sol,
            totals.controlled_cost_sol
        );
        self.notify(format!(
            "Mirrored SELL on {}\nmint: {}\ntokens: {:.4}\nreceived: {:.6} SOL\nP/L: {:+.6} SOL\ntx: {}",
            trade.venue, trade.mint, sell_amount, receipt.realized_sol, pnl, receipt.signature
        ));
        Ok(())
    }

    fn log_skip(&self, trade: &TradeEvent, reason: SkipReason) {
        info!(
            "Skipping {} of {} on {}: {reason}",
            trade.direction, trade.mint, trade.venue
        );
        if matches!(reason, SkipReason::InsufficientBalance { .. }) {
            self.notify(format!(
                "Skipped {} of {}: {reason}",
                trade.direction, trade.mint
            ));
        }
    }

    async fn fetch_with_retry(&self, signature: &Signature) -> Result<TxSnapshot, MirrorError> {
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.ledger.fetch_transaction(signature).await {
                Ok(Some(snapshot)) => return Ok(snapshot),
                Ok(None) => debug!("Transaction {signature} not found (attempt {attempt})"),
                Err(err) => warn!("Fetch of {signature} failed (attempt {attempt}): {err}"),
            }
            if attempt < FETCH_ATTEMPTS {
                sleep(FETCH_INTERVAL).await;
            }
        }
        Err(MirrorError::TransactionUnavailable(signature.to_string()))
    }

    /// Fire-and-forget; delivery failures are logged, never propagated.
    fn notify(&self, text: String) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(err) = notifier.send(&text).await {
                warn!("Notification failed: {err}");
            }
        });
    }
}
