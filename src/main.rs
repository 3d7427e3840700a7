mod classify;
mod config;
mod dedupe;
mod engine;
mod feeds;
mod ledger;
mod notify;
mod positions;
mod router;
mod sizing;
mod venues;

use std::{collections::HashMap, env, sync::Arc};

use log::{info, warn};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use tokio::sync::mpsc;

use crate::{
    config::Config,
    engine::{EngineSettings, MirrorEngine},
    ledger::{LedgerClient, RpcLedger},
    notify::{Notifier, NullNotifier, TelegramNotifier},
    router::ExecutionRouter,
    venues::{
        pump_portal::PumpPortalAdapter, raydium::RaydiumAdapter, Venue, VenueAdapter,
    },
};

const EVENT_CHANNEL_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env::set_var(
        env_logger::DEFAULT_FILTER_ENV,
        env::var_os(env_logger::DEFAULT_FILTER_ENV).unwrap_or_else(|| "info".into()),
    );
    env_logger::init();

    let config = Config::load()?;

    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedger::new(config.rpc_url.clone()));
    log_startup_summary(&config, &ledger).await;

    let http = reqwest::Client::new();
    let submit_rpc = Arc::new(RpcClient::new_with_commitment(
        config.rpc_url.clone(),
        CommitmentConfig::confirmed(),
    ));
    let keypair = config.operator_keypair();

    let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
    adapters.insert(
        Venue::Raydium,
        Arc::new(RaydiumAdapter::new(
            http.clone(),
            Arc::clone(&submit_rpc),
            Arc::clone(&keypair),
        )),
    );
    adapters.insert(
        Venue::PumpPortal,
        Arc::new(PumpPortalAdapter::curve(
            http.clone(),
            Arc::clone(&submit_rpc),
            Arc::clone(&keypair),
        )),
    );
    adapters.insert(
        Venue::PumpSwap,
        Arc::new(PumpPortalAdapter::amm(
            http.clone(),
            Arc::clone(&submit_rpc),
            Arc::clone(&keypair),
        )),
    );

    let router = ExecutionRouter::new(adapters, Arc::clone(&ledger), config.operator_pubkey());

    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(telegram) => {
            info!("Telegram notifications enabled for chat {}", telegram.chat_id);
            Arc::new(TelegramNotifier::new(
                http,
                &telegram.bot_token,
                telegram.chat_id.clone(),
            ))
        }
        None => {
            info!("No Telegram credentials configured; notifications disabled");
            Arc::new(NullNotifier)
        }
    };

    let settings = EngineSettings {
        source_wallet: config.source_wallet,
        controlled_wallet: config.operator_pubkey(),
        sizing: config.sizing(),
    };
    let engine = MirrorEngine::new(settings, Arc::clone(&ledger), router, notifier);

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(feeds::run_pumpportal_feed(
        config.pumpportal_ws_url.clone(),
        config.source_wallet,
        event_tx.clone(),
    ));
    tokio::spawn(feeds::run_signature_poller(
        Arc::clone(&ledger),
        config.source_wallet,
        config.poll_interval,
        event_tx,
    ));

    engine.run(event_rx).await;
    Ok(())
}

async fn log_startup_summary(config: &Config, ledger: &Arc<dyn LedgerClient>) {
    let operator = config.operator_pubkey();
    let balance_sol = match ledger.native_balance_sol(&operator).await {
        Ok(value) => value,
        Err(err) => {
            warn!("Failed to fetch operator SOL balance: {err}");
            0.0
        }
    };

    info!(
        "Startup | operator={} | sol={:.4} | source={} | trade_pct={:.2} | min_sol={:.4} | slippage={:.2}%",
        operator,
        balance_sol,
        config.source_wallet,
        config.trade_percentage,
        config.min_trade_sol,
        config.slippage_pct,
    );
    info!(
        "Endpoints | rpc={} | pumpportal={} | poll_interval={:?}",
        config.rpc_url, config.pumpportal_ws_url, config.poll_interval
    );
}
