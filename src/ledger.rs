//! Ledger access: parsed transactions and live balances.
//!
//! `LedgerClient` is the seam the engine and router depend on; `RpcLedger` is
//! the production implementation over a Solana JSON-RPC node. Tests construct
//! their own implementations instead of relying on process-wide state.

use std::{collections::HashMap, str::FromStr, sync::Mutex};

use async_trait::async_trait;
use log::debug;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::RpcTransactionConfig,
    rpc_request::TokenAccountsFilter,
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::{
    option_serializer::OptionSerializer, EncodedConfirmedTransactionWithStatusMeta,
    UiTransactionEncoding, UiTransactionTokenBalance,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("rpc error: {0}")]
    Rpc(#[from] solana_client::client_error::ClientError),
    #[error("transaction {0} has no meta")]
    MissingMeta(Signature),
    #[error("transaction {0} could not be decoded")]
    Undecodable(Signature),
    #[error("invalid pubkey in rpc response: {0}")]
    InvalidPubkey(String),
}

/// Pre/post token balance for one (owner, mint) pair within a transaction,
/// merged from the transaction meta's snapshots.
#[derive(Clone, Copy, Debug)]
pub struct TokenBalanceChange {
    pub owner: Pubkey,
    pub mint: Pubkey,
    pub decimals: u8,
    pub pre_raw: u64,
    pub post_raw: u64,
}

impl TokenBalanceChange {
    /// Raw-unit delta, positive when the balance increased.
    pub fn delta_raw(&self) -> i128 {
        self.post_raw as i128 - self.pre_raw as i128
    }

    pub fn delta_ui(&self) -> f64 {
        self.delta_raw() as f64 / 10f64.powi(self.decimals as i32)
    }
}

/// A fetched transaction reduced to the facts classification needs: who paid
/// the fee, which programs ran, what the logs said, and how every balance
/// moved.
#[derive(Clone, Debug, Default)]
pub struct TxSnapshot {
    pub signature: String,
    pub account_keys: Vec<Pubkey>,
    pub fee_lamports: u64,
    pub pre_lamports: Vec<u64>,
    pub post_lamports: Vec<u64>,
    pub log_messages: Vec<String>,
    pub token_changes: Vec<TokenBalanceChange>,
    pub block_time: Option<i64>,
    pub failed: bool,
}

impl TxSnapshot {
    pub fn fee_payer(&self) -> Option<Pubkey> {
        self.account_keys.first().copied()
    }

    pub fn references_program(&self, program_id: &Pubkey) -> bool {
        self.account_keys.contains(program_id)
    }

    pub fn has_log_marker(&self, marker: &str) -> bool {
        self.log_messages.iter().any(|line| line.contains(marker))
    }

    /// Native balance delta for `owner` in lamports, positive on increase.
    /// None when the owner is not among the transaction accounts.
    pub fn native_delta_lamports(&self, owner: &Pubkey) -> Option<i128> {
        let index = self.account_keys.iter().position(|key| key == owner)?;
        let pre = *self.pre_lamports.get(index)? as i128;
        let post = *self.post_lamports.get(index)? as i128;
        Some(post - pre)
    }

    /// Token balance changes for accounts owned by `owner`, excluding flat
    /// deltas.
    pub fn token_deltas_for(&self, owner: &Pubkey) -> Vec<&TokenBalanceChange> {
        self.token_changes
            .iter()
            .filter(|change| change.owner == *owner && change.delta_raw() != 0)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokenHolding {
    pub ui_amount: f64,
    pub raw_amount: u64,
    pub decimals: u8,
}

/// Read side of the chain the core depends on.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch and flatten a confirmed transaction. `Ok(None)` means the node
    /// does not (yet) know the signature.
    async fn fetch_transaction(&self, signature: &Signature)
        -> Result<Option<TxSnapshot>, LedgerError>;

    async fn native_balance_sol(&self, owner: &Pubkey) -> Result<f64, LedgerError>;

    /// Aggregate balance of `mint` across the owner's token accounts, with
    /// decimals resolved lazily and cached.
    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey)
        -> Result<TokenHolding, LedgerError>;

    async fn is_confirmed(&self, signature: &Signature) -> Result<bool, LedgerError>;

    /// Most recent non-failed signatures involving `owner`, newest first.
    async fn recent_signatures(
        &self,
        owner: &Pubkey,
        limit: usize,
    ) -> Result<Vec<String>, LedgerError>;
}

pub struct RpcLedger {
    rpc: RpcClient,
    decimals_cache: Mutex<HashMap<Pubkey, u8>>,
}

impl RpcLedger {
    pub fn new(rpc_url: String) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed()),
            decimals_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_decimals(&self, mint: &Pubkey) -> Option<u8> {
        self.decimals_cache.lock().ok()?.get(mint).copied()
    }

    fn cache_decimals(&self, mint: Pubkey, decimals: u8) {
        if let Ok(mut cache) = self.decimals_cache.lock() {
            cache.insert(mint, decimals);
        }
    }

    fn build_snapshot(
        signature: &Signature,
        confirmed: EncodedConfirmedTransactionWithStatusMeta,
    ) -> Result<TxSnapshot, LedgerError> {
        let meta = confirmed
            .transaction
            .meta
            .ok_or(LedgerError::MissingMeta(*signature))?;
        let tx = confirmed
            .transaction
            .transaction
            .decode()
            .ok_or(LedgerError::Undecodable(*signature))?;

        let mut account_keys: Vec<Pubkey> = tx.message.static_account_keys().to_vec();
        // v0 transactions resolve additional accounts through lookup tables;
        // meta carries them in on-chain order (writable then readonly).
        if let OptionSerializer::Some(loaded) = &meta.loaded_addresses {
            for address in loaded.writable.iter().chain(loaded.readonly.iter()) {
                account_keys.push(
                    Pubkey::from_str(address)
                        .map_err(|_| LedgerError::InvalidPubkey(address.clone()))?,
                );
            }
        }

        let pre_token = match meta.pre_token_balances {
            OptionSerializer::Some(balances) => balances,
            _ => Vec::new(),
        };
        let post_token = match meta.post_token_balances {
            OptionSerializer::Some(balances) => balances,
            _ => Vec::new(),
        };
        let token_changes = merge_token_balances(&pre_token, &post_token);

        let log_messages = match meta.log_messages {
            OptionSerializer::Some(lines) => lines,
            _ => Vec::new(),
        };

        Ok(TxSnapshot {
            signature: signature.to_string(),
            account_keys,
            fee_lamports: meta.fee,
            pre_lamports: meta.pre_balances,
            post_lamports: meta.post_balances,
            log_messages,
            token_changes,
            block_time: confirmed.block_time,
            failed: meta.err.is_some(),
        })
    }
}

/// Merge pre/post token balance snapshots into per-(owner, mint) changes.
/// Accounts present on only one side default the other side to zero (created
/// or closed within the transaction).
fn merge_token_balances(
    pre: &[UiTransactionTokenBalance],
    post: &[UiTransactionTokenBalance],
) -> Vec<TokenBalanceChange> {
    #[derive(Default)]
    struct Partial {
        decimals: u8,
        pre_raw: Option<u64>,
        post_raw: Option<u64>,
    }

    let mut merged: HashMap<(Pubkey, Pubkey), Partial> = HashMap::new();

    let mut absorb = |balance: &UiTransactionTokenBalance, is_pre: bool| {
        let owner = match &balance.owner {
            OptionSerializer::Some(owner) => match Pubkey::from_str(owner) {
                Ok(owner) => owner,
                Err(_) => return,
            },
            _ => return,
        };
        let mint = match Pubkey::from_str(&balance.mint) {
            Ok(mint) => mint,
            Err(_) => return,
        };
        let raw = match balance.ui_token_amount.amount.parse::<u64>() {
            Ok(raw) => raw,
            Err(err) => {
                debug!(
                    "Unparseable token amount {} for mint {}: {err}",
                    balance.ui_token_amount.amount, balance.mint
                );
                return;
            }
        };
        let entry = merged.entry((owner, mint)).or_default();
        entry.decimals = balance.ui_token_amount.decimals;
        if is_pre {
            entry.pre_raw = Some(raw);
        } else {
            entry.post_raw = Some(raw);
        }
    };

    for balance in pre {
        absorb(balance, true);
    }
    for balance in post {
        absorb(balance, false);
    }

    merged
        .into_iter()
        .map(|((owner, mint), partial)| TokenBalanceChange {
            owner,
            mint,
            decimals: partial.decimals,
            pre_raw: partial.pre_raw.unwrap_or(0),
            post_raw: partial.post_raw.unwrap_or(0),
        })
        .collect()
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn fetch_transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<TxSnapshot>, LedgerError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let confirmed = match self.rpc.get_transaction_with_config(signature, config).await {
            Ok(confirmed) => confirmed,
            Err(err) => {
                // Signatures propagate to RPC nodes with some lag; callers
                // retry on a fixed schedule, so not-found is not an error.
                debug!("Transaction {signature} not available yet: {err}");
                return Ok(None);
            }
        };
        let snapshot = Self::build_snapshot(signature, confirmed)?;
        for change in &snapshot.token_changes {
            self.cache_decimals(change.mint, change.decimals);
        }
        Ok(Some(snapshot))
    }

    async fn native_balance_sol(&self, owner: &Pubkey) -> Result<f64, LedgerError> {
        let lamports = self.rpc.get_balance(owner).await?;
        Ok(solana_sdk::native_token::lamports_to_sol(lamports))
    }

    async fn token_balance(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<TokenHolding, LedgerError> {
        let accounts = self
            .rpc
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::Mint(*mint))
            .await?;

        let mut holding = TokenHolding {
            decimals: self.cached_decimals(mint).unwrap_or(0),
            ..Default::default()
        };
        for keyed in accounts {
            let token_account = Pubkey::from_str(&keyed.pubkey)
                .map_err(|_| LedgerError::InvalidPubkey(keyed.pubkey.clone()))?;
            let amount = self.rpc.get_token_account_balance(&token_account).await?;
            holding.decimals = amount.decimals;
            holding.raw_amount = holding
                .raw_amount
                .saturating_add(amount.amount.parse::<u64>().unwrap_or(0));
        }
        holding.ui_amount = holding.raw_amount as f64 / 10f64.powi(holding.decimals as i32);
        self.cache_decimals(*mint, holding.decimals);
        Ok(holding)
    }

    async fn is_confirmed(&self, signature: &Signature) -> Result<bool, LedgerError> {
        let statuses = self.rpc.get_signature_statuses(&[*signature]).await?;
        Ok(statuses
            .value
            .first()
            .and_then(|status| status.as_ref())
            .map(|status| {
                status.err.is_none()
                    && status.satisfies_commitment(CommitmentConfig::confirmed())
            })
            .unwrap_or(false))
    }

    async fn recent_signatures(
        &self,
        owner: &Pubkey,
        limit: usize,
    ) -> Result<Vec<String>, LedgerError> {
        let config = GetConfirmedSignaturesForAddress2Config {
            limit: Some(limit),
            ..Default::default()
        };
        let signatures = self
            .rpc
            .get_signatures_for_address_with_config(owner, config)
            .await?;
        Ok(signatures
            .into_iter()
            .filter(|status| status.err.is_none())
            .map(|status| status.signature)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(owner: Pubkey, mint: Pubkey, pre: u64, post: u64, decimals: u8) -> TokenBalanceChange {
        TokenBalanceChange {
            owner,
            mint,
            decimals,
            pre_raw: pre,
            post_raw: post,
        }
    }

    #[test]
    fn native_delta_is_signed_post_minus_pre() {
        let owner = Pubkey::new_unique();
        let snapshot = TxSnapshot {
            account_keys: vec![owner],
            pre_lamports: vec![5_000_000_000],
            post_lamports: vec![3_000_000_000],
            ..Default::default()
        };
        assert_eq!(snapshot.native_delta_lamports(&owner), Some(-2_000_000_000));
        assert_eq!(snapshot.native_delta_lamports(&Pubkey::new_unique()), None);
    }

    #[test]
    fn token_deltas_filter_by_owner_and_drop_flat_changes() {
        let owner = Pubkey::new_unique();
        let other = Pubkey::new_unique();
        let mint_a = Pubkey::new_unique();
        let mint_b = Pubkey::new_unique();
        let snapshot = TxSnapshot {
            token_changes: vec![
                change(owner, mint_a, 0, 1_000_000, 6),
                change(owner, mint_b, 500, 500, 6),
                change(other, mint_a, 100, 0, 6),
            ],
            ..Default::default()
        };
        let deltas = snapshot.token_deltas_for(&owner);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].mint, mint_a);
        assert_eq!(deltas[0].delta_raw(), 1_000_000);
        assert!((deltas[0].delta_ui() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn log_marker_matches_substrings() {
        let snapshot = TxSnapshot {
            log_messages: vec![
                "Program log: Instruction: Swap".to_string(),
                "Program log: ray_log: AwW3...".to_string(),
            ],
            ..Default::default()
        };
        assert!(snapshot.has_log_marker("ray_log"));
        assert!(!snapshot.has_log_marker("vdt/007mYe"));
    }
}
