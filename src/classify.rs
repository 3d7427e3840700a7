//! Trade classification from raw balance deltas.
//!
//! No explicit buy/sell event exists on-chain; intent is reconstructed from
//! how the watched wallet's native and token balances moved within a single
//! transaction. Venue membership is decided from OR-ed signals: program-id
//! presence, a log marker, or an out-of-band hint from the upstream feed. Log
//! text is unreliable in isolation and program-id presence can be
//! coincidental with nested instructions, so no single signal is required.

use solana_sdk::{native_token::lamports_to_sol, pubkey, pubkey::Pubkey};

use crate::{
    ledger::TxSnapshot,
    venues::Venue,
};

pub const WSOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn label(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified swap by the watched wallet. Ephemeral: consumed by the
/// position book and sizing engine, then discarded.
#[derive(Clone, Debug)]
pub struct TradeEvent {
    pub signature: String,
    pub venue: Venue,
    pub mint: Pubkey,
    pub direction: TradeDirection,
    /// Token quantity the source wallet traded, ui units.
    pub token_amount: f64,
    /// SOL the source wallet spent (buy) or received (sell). Zero when the
    /// settlement-side delta could not be derived.
    pub sol_amount: f64,
    pub timestamp: i64,
}

#[derive(Clone, Debug)]
pub enum Classification {
    /// Not a recognized swap by the watched wallet. Silently skipped.
    NotApplicable(&'static str),
    Trade(TradeEvent),
}

/// Classify a fetched transaction against the watched wallet.
pub fn classify(tx: &TxSnapshot, source: &Pubkey, hint: Option<Venue>) -> Classification {
    if tx.failed {
        return Classification::NotApplicable("transaction failed on-chain");
    }
    if tx.fee_payer() != Some(*source) {
        return Classification::NotApplicable("fee payer is not the watched wallet");
    }
    let Some(venue) = detect_venue(tx, hint) else {
        return Classification::NotApplicable("no venue signal matched");
    };

    let deltas = tx.token_deltas_for(source);

    // Among multiple token legs, take the delta with the largest ui-unit
    // magnitude per direction. Multi-hop routes produce intermediate legs;
    // the dominant leg is the traded asset.
    let increase = deltas
        .iter()
        .filter(|change| change.mint != WSOL_MINT && change.delta_raw() > 0)
        .max_by(|a, b| a.delta_ui().abs().total_cmp(&b.delta_ui().abs()));
    let decrease = deltas
        .iter()
        .filter(|change| change.mint != WSOL_MINT && change.delta_raw() < 0)
        .max_by(|a, b| a.delta_ui().abs().total_cmp(&b.delta_ui().abs()));

    // The settlement side is native SOL plus any wrapped-SOL account the
    // wallet funded or drained as part of the route.
    let native = tx.native_delta_lamports(source).unwrap_or(0);
    let wsol: i128 = deltas
        .iter()
        .filter(|change| change.mint == WSOL_MINT)
        .map(|change| change.delta_raw())
        .sum();

    let timestamp = tx.block_time.unwrap_or(0);

    match (increase, decrease) {
        (Some(_), Some(_)) => {
            Classification::NotApplicable("token-to-token swap, no settlement leg")
        }
        (Some(bought), None) => {
            // Fees come out of the native balance; the swap spend is the
            // remainder of the decrease.
            let spent_lamports =
                (-native - tx.fee_lamports as i128).max(0) + (-wsol).max(0);
            Classification::Trade(TradeEvent {
                signature: tx.signature.clone(),
                venue,
                mint: bought.mint,
                direction: TradeDirection::Buy,
                token_amount: bought.delta_ui().abs(),
                sol_amount: lamports_to_sol(spent_lamports.min(u64::MAX as i128) as u64),
                timestamp,
            })
        }
        (None, Some(sold)) => {
            let received_lamports = native.max(0) + wsol.max(0);
            Classification::Trade(TradeEvent {
                signature: tx.signature.clone(),
                venue,
                mint: sold.mint,
                direction: TradeDirection::Sell,
                token_amount: sold.delta_ui().abs(),
                sol_amount: lamports_to_sol(received_lamports.min(u64::MAX as i128) as u64),
                timestamp,
            })
        }
        (None, None) => Classification::NotApplicable("no token delta for the watched wallet"),
    }
}

/// Venue detection. A feed hint wins outright; otherwise the first venue in
/// priority order with a matching program id or log marker is taken.
fn detect_venue(tx: &TxSnapshot, hint: Option<Venue>) -> Option<Venue> {
    if let Some(venue) = hint {
        return Some(venue);
    }
    Venue::PRIORITY.into_iter().find(|venue| {
        tx.references_program(&venue.program_id()) || tx.has_log_marker(venue.log_marker())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TokenBalanceChange;

    const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

    struct Fixture {
        source: Pubkey,
        tx: TxSnapshot,
    }

    impl Fixture {
        fn new() -> Self {
            let source = Pubkey::new_unique();
            let tx = TxSnapshot {
                signature: "test-signature".to_string(),
                account_keys: vec![source],
                fee_lamports: 5_000,
                pre_lamports: vec![10 * LAMPORTS_PER_SOL],
                post_lamports: vec![10 * LAMPORTS_PER_SOL],
                block_time: Some(1_700_000_000),
                ..Default::default()
            };
            Self { source, tx }
        }

        fn with_program(mut self, program: Pubkey) -> Self {
            self.tx.account_keys.push(program);
            self
        }

        fn with_log(mut self, line: &str) -> Self {
            self.tx.log_messages.push(line.to_string());
            self
        }

        fn with_native_spend(mut self, lamports: u64) -> Self {
            self.tx.post_lamports[0] =
                self.tx.pre_lamports[0] - lamports - self.tx.fee_lamports;
            self
        }

        fn with_native_receive(mut self, lamports: u64) -> Self {
            self.tx.post_lamports[0] = self.tx.pre_lamports[0] + lamports;
            self
        }

        fn with_token_change(mut self, mint: Pubkey, pre: u64, post: u64, decimals: u8) -> Self {
            self.tx.token_changes.push(TokenBalanceChange {
                owner: self.source,
                mint,
                decimals,
                pre_raw: pre,
                post_raw: post,
            });
            self
        }
    }

    fn expect_trade(classification: Classification) -> TradeEvent {
        match classification {
            Classification::Trade(event) => event,
            Classification::NotApplicable(reason) => {
                panic!("expected a trade, got NotApplicable: {reason}")
            }
        }
    }

    #[test]
    fn buy_is_derived_from_native_decrease_and_token_increase() {
        let mint = Pubkey::new_unique();
        let fixture = Fixture::new()
            .with_program(Venue::Raydium.program_id())
            .with_native_spend(2 * LAMPORTS_PER_SOL)
            .with_token_change(mint, 0, 100_000_000, 6);

        let event = expect_trade(classify(&fixture.tx, &fixture.source, None));
        assert_eq!(event.venue, Venue::Raydium);
        assert_eq!(event.direction, TradeDirection::Buy);
        assert_eq!(event.mint, mint);
        assert!((event.token_amount - 100.0).abs() < 1e-9);
        assert!((event.sol_amount - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sell_is_derived_from_token_decrease_and_native_increase() {
        let mint = Pubkey::new_unique();
        let fixture = Fixture::new()
            .with_program(Venue::PumpPortal.program_id())
            .with_native_receive(950_000_000)
            .with_token_change(mint, 50_000_000, 0, 6);

        let event = expect_trade(classify(&fixture.tx, &fixture.source, None));
        assert_eq!(event.direction, TradeDirection::Sell);
        assert!((event.token_amount - 50.0).abs() < 1e-9);
        assert!((event.sol_amount - 0.95).abs() < 1e-9);
    }

    #[test]
    fn other_wallets_transactions_are_not_applicable() {
        let fixture = Fixture::new()
            .with_program(Venue::Raydium.program_id())
            .with_token_change(Pubkey::new_unique(), 0, 100, 6);
        let stranger = Pubkey::new_unique();
        assert!(matches!(
            classify(&fixture.tx, &stranger, None),
            Classification::NotApplicable(_)
        ));
    }

    #[test]
    fn failed_transactions_are_not_applicable() {
        let mut fixture = Fixture::new()
            .with_program(Venue::Raydium.program_id())
            .with_token_change(Pubkey::new_unique(), 0, 100, 6);
        fixture.tx.failed = true;
        assert!(matches!(
            classify(&fixture.tx, &fixture.source, None),
            Classification::NotApplicable(_)
        ));
    }

    #[test]
    fn venue_signals_are_or_ed_not_and_ed() {
        let mint = Pubkey::new_unique();
        // Program id present, log marker says something else entirely.
        let by_program = Fixture::new()
            .with_program(Venue::Raydium.program_id())
            .with_log("Program log: Instruction: Transfer")
            .with_native_spend(LAMPORTS_PER_SOL)
            .with_token_change(mint, 0, 1_000_000, 6);
        let event = expect_trade(classify(&by_program.tx, &by_program.source, None));
        assert_eq!(event.venue, Venue::Raydium);

        // No program id, only the log marker.
        let by_log = Fixture::new()
            .with_log("Program log: ray_log: A8c3...")
            .with_native_spend(LAMPORTS_PER_SOL)
            .with_token_change(mint, 0, 1_000_000, 6);
        let event = expect_trade(classify(&by_log.tx, &by_log.source, None));
        assert_eq!(event.venue, Venue::Raydium);
    }

    #[test]
    fn ambiguity_resolves_by_hint_then_priority() {
        let mint = Pubkey::new_unique();
        let build = || {
            Fixture::new()
                .with_program(Venue::Raydium.program_id())
                .with_program(Venue::PumpPortal.program_id())
                .with_native_spend(LAMPORTS_PER_SOL)
                .with_token_change(mint, 0, 1_000_000, 6)
        };

        let fixture = build();
        let event = expect_trade(classify(&fixture.tx, &fixture.source, None));
        assert_eq!(event.venue, Venue::Raydium);

        let fixture = build();
        let event = expect_trade(classify(
            &fixture.tx,
            &fixture.source,
            Some(Venue::PumpPortal),
        ));
        assert_eq!(event.venue, Venue::PumpPortal);
    }

    #[test]
    fn largest_magnitude_token_delta_wins() {
        let small = Pubkey::new_unique();
        let large = Pubkey::new_unique();
        let fixture = Fixture::new()
            .with_program(Venue::Raydium.program_id())
            .with_native_spend(LAMPORTS_PER_SOL)
            .with_token_change(small, 0, 5_000_000, 6)
            .with_token_change(large, 0, 900_000_000, 6);

        let event = expect_trade(classify(&fixture.tx, &fixture.source, None));
        assert_eq!(event.mint, large);
        assert!((event.token_amount - 900.0).abs() < 1e-9);
    }

    #[test]
    fn token_to_token_swaps_are_not_applicable() {
        let fixture = Fixture::new()
            .with_program(Venue::Raydium.program_id())
            .with_token_change(Pubkey::new_unique(), 1_000_000, 0, 6)
            .with_token_change(Pubkey::new_unique(), 0, 2_000_000, 6);
        assert!(matches!(
            classify(&fixture.tx, &fixture.source, None),
            Classification::NotApplicable(_)
        ));
    }

    #[test]
    fn wsol_leg_counts_toward_settlement_not_token_side() {
        let mint = Pubkey::new_unique();
        // Spend routed through a wrapped-SOL account instead of native.
        let fixture = Fixture::new()
            .with_program(Venue::PumpSwap.program_id())
            .with_token_change(WSOL_MINT, 2 * LAMPORTS_PER_SOL, 0, 9)
            .with_token_change(mint, 0, 100_000_000, 6);

        let event = expect_trade(classify(&fixture.tx, &fixture.source, None));
        assert_eq!(event.direction, TradeDirection::Buy);
        assert_eq!(event.mint, mint);
        assert!((event.sol_amount - 2.0).abs() < 1e-9);
    }
}
