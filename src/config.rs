use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use base64::{engine::general_purpose, Engine as _};
use dotenvy::Error as DotenvError;
use serde::Deserialize;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use thiserror::Error;

use crate::sizing::SizingConfig;

const DEFAULT_PUMPPORTAL_WS_URL: &str = "wss://pumpportal.fun/api/data";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_FEE_RESERVE_SOL: f64 = 0.01;

#[derive(Clone)]
pub struct Config {
    pub env_path: PathBuf,
    pub operator: Arc<Keypair>,
    pub source_wallet: Pubkey,
    pub rpc_url: String,
    pub pumpportal_ws_url: String,
    pub poll_interval: Duration,
    pub trade_percentage: f64,
    pub min_trade_sol: f64,
    pub slippage_pct: f64,
    pub fee_reserve_sol: f64,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let env_path = env::current_dir()
            .map_err(|e| ConfigError::Io("current_dir".into(), e))?
            .join(".env");

        match dotenvy::from_path(&env_path) {
            Ok(_) => {}
            Err(DotenvError::LineParse(_, _)) | Err(DotenvError::Io(_)) if env_path.exists() => {
                return Err(ConfigError::Dotenv)
            }
            Err(_) => {
                return Err(ConfigError::MissingEnv(env_path));
            }
        }

        let raw = RawConfig::gather()?;

        let operator = Arc::new(parse_keypair(&raw.private_key)?);
        let source_wallet = Pubkey::from_str(raw.source_wallet.trim())
            .map_err(|e| ConfigError::Pubkey(raw.source_wallet.clone(), e))?;
        if source_wallet == operator.pubkey() {
            return Err(ConfigError::SourceIsOperator(source_wallet));
        }

        if !(raw.trade_percentage > 0.0 && raw.trade_percentage <= 1.0) {
            return Err(ConfigError::OutOfRange {
                key: "TRADE_PERCENTAGE".into(),
                value: raw.trade_percentage,
            });
        }
        if raw.slippage_pct < 0.0 || raw.min_trade_sol < 0.0 {
            return Err(ConfigError::OutOfRange {
                key: "SLIPPAGE_PCT / MIN_TRADE_SOL".into(),
                value: raw.slippage_pct.min(raw.min_trade_sol),
            });
        }

        let telegram = match (raw.telegram_bot_token, raw.telegram_chat_id) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialTelegram),
        };

        Ok(Self {
            env_path,
            operator,
            source_wallet,
            rpc_url: raw.rpc_url,
            pumpportal_ws_url: raw
                .pumpportal_ws_url
                .unwrap_or_else(|| DEFAULT_PUMPPORTAL_WS_URL.to_string()),
            poll_interval: Duration::from_secs(
                raw.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS).max(1),
            ),
            trade_percentage: raw.trade_percentage,
            min_trade_sol: raw.min_trade_sol,
            slippage_pct: raw.slippage_pct,
            fee_reserve_sol: raw.fee_reserve_sol.unwrap_or(DEFAULT_FEE_RESERVE_SOL),
            telegram,
        })
    }

    pub fn operator_pubkey(&self) -> Pubkey {
        self.operator.pubkey()
    }

    pub fn operator_keypair(&self) -> Arc<Keypair> {
        Arc::clone(&self.operator)
    }

    pub fn sizing(&self) -> SizingConfig {
        SizingConfig {
            trade_percentage: self.trade_percentage,
            min_trade_sol: self.min_trade_sol,
            slippage_pct: self.slippage_pct,
            fee_reserve_sol: self.fee_reserve_sol,
        }
    }
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(rename = "PRIVATE_KEY")]
    private_key: String,
    #[serde(rename = "SOURCE_WALLET")]
    source_wallet: String,
    #[serde(rename = "RPC_URL")]
    rpc_url: String,
    #[serde(
        rename = "PUMPPORTAL_WS_URL",
        default,
        deserialize_with = "de_optional_string"
    )]
    pumpportal_ws_url: Option<String>,
    #[serde(
        rename = "POLL_INTERVAL_SECS",
        default,
        deserialize_with = "de_optional_u64"
    )]
    poll_interval_secs: Option<u64>,
    #[serde(rename = "TRADE_PERCENTAGE", deserialize_with = "de_f64")]
    trade_percentage: f64,
    #[serde(rename = "MIN_TRADE_SOL", deserialize_with = "de_f64")]
    min_trade_sol: f64,
    #[serde(rename = "SLIPPAGE_PCT", deserialize_with = "de_f64")]
    slippage_pct: f64,
    #[serde(
        rename = "FEE_RESERVE_SOL",
        default,
        deserialize_with = "de_optional_f64"
    )]
    fee_reserve_sol: Option<f64>,
    #[serde(
        rename = "TELEGRAM_BOT_TOKEN",
        default,
        deserialize_with = "de_optional_string"
    )]
    telegram_bot_token: Option<String>,
    #[serde(
        rename = "TELEGRAM_CHAT_ID",
        default,
        deserialize_with = "de_optional_string"
    )]
    telegram_chat_id: Option<String>,
}

impl RawConfig {
    fn gather() -> Result<Self, ConfigError> {
        let mut data = std::collections::BTreeMap::new();
        for (key, value) in env::vars() {
            data.insert(key, value);
        }
        let json = serde_json::to_value(&data).map_err(|e| ConfigError::Serde(e.to_string()))?;
        serde_json::from_value(json).map_err(|e| ConfigError::Serde(e.to_string()))
    }
}

fn parse_keypair(encoded: &str) -> Result<Keypair, ConfigError> {
    let trimmed = encoded.trim();

    if let Ok(bytes) = bs58::decode(trimmed).into_vec() {
        if let Ok(kp) = Keypair::from_bytes(&bytes) {
            return Ok(kp);
        }
    }

    if let Ok(bytes) = general_purpose::STANDARD.decode(trimmed.as_bytes()) {
        if let Ok(kp) = Keypair::from_bytes(&bytes) {
            return Ok(kp);
        }
    }

    if trimmed.starts_with('[') {
        if let Ok(vec) = serde_json::from_str::<Vec<u8>>(trimmed) {
            if let Ok(kp) = Keypair::from_bytes(&vec) {
                return Ok(kp);
            }
        }
    }

    Err(ConfigError::InvalidPrivateKey)
}

fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| serde::de::Error::custom("expected number"))
}

fn de_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }))
}

fn de_optional_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    opt.map(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(serde::de::Error::custom("expected number"));
        }
        trimmed
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom("expected number"))
    })
    .transpose()
}

fn de_optional_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    opt.map(|raw| {
        raw.trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("expected integer"))
    })
    .transpose()
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine working directory for {0}")]
    Io(String, #[source] std::io::Error),
    #[error("missing .env at {0}")]
    MissingEnv(PathBuf),
    #[error("failed to parse .env file")]
    Dotenv,
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("pubkey parse error for {0}")]
    Pubkey(String, #[source] solana_sdk::pubkey::ParsePubkeyError),
    #[error("source wallet {0} is the operator wallet; mirroring it would echo our own trades")]
    SourceIsOperator(Pubkey),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("value {value} out of range for {key}")]
    OutOfRange { key: String, value: f64 },
    #[error("TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set together")]
    PartialTelegram,
}

impl ConfigError {
    pub fn missing_env_path(&self) -> Option<&Path> {
        match self {
            ConfigError::MissingEnv(path) => Some(path.as_path()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_parses_base58_base64_and_json_array() {
        let keypair = Keypair::new();
        let bytes = keypair.to_bytes();

        let bs58_encoded = bs58::encode(&bytes).into_string();
        assert_eq!(
            parse_keypair(&bs58_encoded).unwrap().pubkey(),
            keypair.pubkey()
        );

        let base64_encoded = general_purpose::STANDARD.encode(bytes);
        assert_eq!(
            parse_keypair(&base64_encoded).unwrap().pubkey(),
            keypair.pubkey()
        );

        let json_encoded = serde_json::to_string(&bytes.to_vec()).unwrap();
        assert_eq!(
            parse_keypair(&json_encoded).unwrap().pubkey(),
            keypair.pubkey()
        );
    }

    #[test]
    fn keypair_rejects_garbage() {
        assert!(matches!(
            parse_keypair("not-a-key"),
            Err(ConfigError::InvalidPrivateKey)
        ));
        assert!(matches!(
            parse_keypair("[1,2,3]"),
            Err(ConfigError::InvalidPrivateKey)
        ));
    }
}
