//! Per-mint position accounting for both wallet roles.
//!
//! The book is the authoritative state for proportional sizing and P/L. All
//! operations are pure accumulation: totals only ever grow, and reconciling
//! against what is actually held is the sizing engine's job (live balances are
//! authoritative, accumulated state can drift).

use std::collections::HashMap;

use solana_sdk::pubkey::Pubkey;

/// Lifetime trade totals for a single mint, ui-denominated.
///
/// `source_*` tracks the watched wallet, `controlled_*` the operator wallet.
/// SOL cost/revenue is only tracked for the controlled side; the source
/// wallet's SOL flows are observed per-event and not accumulated.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AssetPosition {
    pub source_bought: f64,
    pub source_sold: f64,
    pub controlled_bought: f64,
    pub controlled_sold: f64,
    pub controlled_cost_sol: f64,
    pub controlled_revenue_sol: f64,
}

impl AssetPosition {
    /// Net tokens the controlled wallet has bought and not yet sold, per the
    /// book. Live balance may disagree; callers clamp against both.
    pub fn controlled_remaining(&self) -> f64 {
        (self.controlled_bought - self.controlled_sold).max(0.0)
    }
}

#[derive(Default)]
pub struct PositionBook {
    positions: HashMap<Pubkey, AssetPosition>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_source_buy(&mut self, mint: Pubkey, qty: f64) {
        if !qty.is_finite() || qty <= 0.0 {
            return;
        }
        self.positions.entry(mint).or_default().source_bought += qty;
    }

    pub fn record_source_sell(&mut self, mint: Pubkey, qty: f64) {
        if !qty.is_finite() || qty <= 0.0 {
            return;
        }
        self.positions.entry(mint).or_default().source_sold += qty;
    }

    pub fn record_controlled_buy(&mut self, mint: Pubkey, qty: f64, cost_sol: f64) {
        if !qty.is_finite() || qty <= 0.0 {
            return;
        }
        let entry = self.positions.entry(mint).or_default();
        entry.controlled_bought += qty;
        if cost_sol.is_finite() && cost_sol > 0.0 {
            entry.controlled_cost_sol += cost_sol;
        }
    }

    pub fn record_controlled_sell(&mut self, mint: Pubkey, qty: f64, revenue_sol: f64) {
        if !qty.is_finite() || qty <= 0.0 {
            return;
        }
        let entry = self.positions.entry(mint).or_default();
        entry.controlled_sold += qty;
        if revenue_sol.is_finite() && revenue_sol > 0.0 {
            entry.controlled_revenue_sol += revenue_sol;
        }
    }

    /// Copy of the current totals for a mint; zero record for unseen mints.
    pub fn snapshot(&self, mint: &Pubkey) -> AssetPosition {
        self.positions.get(mint).copied().unwrap_or_default()
    }

    /// Proportional cost basis for selling `qty` tokens of `mint`: the same
    /// fraction of accumulated cost as `qty` is of lifetime bought.
    pub fn cost_basis(&self, mint: &Pubkey, qty: f64) -> f64 {
        let pos = self.snapshot(mint);
        if pos.controlled_bought <= 0.0 || qty <= 0.0 {
            return 0.0;
        }
        pos.controlled_cost_sol * (qty / pos.controlled_bought).min(1.0)
    }

    pub fn tracked_mints(&self) -> usize {
        self.positions.len()
    }
}
