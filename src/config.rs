use crate::error::{ConfigError, Result};
use alloy::primitives::U256;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_SYMBOL: &str = "QUORUM";

/// secp256k1 is the only curve this chain family signs with.
pub const CURVE_SECP256K1: u32 = 0;

/// Nonce source selection for the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonceComputeMode {
    /// `max(cached, chain_count)`; the wallet's persisted counter wins when ahead.
    #[default]
    AutoIncrement,
    /// `chain_count` unconditionally; the cache is still written on success.
    ChainLatest,
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub symbol: String,
    /// Read endpoint for all JSON-RPC traffic.
    pub server_api: String,
    /// Optional distinct endpoint; `eth_sendRawTransaction` routes here when set.
    pub broadcast_api: Option<String>,
    /// EIP-155 chain identifier.
    pub chain_id: u64,
    /// Zero means estimate dynamically.
    pub fix_gas_limit: U256,
    /// Zero means read `eth_gasPrice` dynamically.
    pub fix_gas_price: U256,
    /// Additive premium over the dynamic gas price.
    pub offset_gas_price: U256,
    pub nonce_compute_mode: NonceComputeMode,
    /// Enables `qn_getBlockWithReceipts` for block fetches.
    pub use_single_flight_rpc: bool,
    pub curve_type: u32,
    /// Native coin decimals, carried out-of-band from coin config.
    pub decimals: u32,
    /// Root directory for the adapter's local store.
    pub data_dir: PathBuf,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            server_api: String::new(),
            broadcast_api: None,
            chain_id: 1,
            fix_gas_limit: U256::ZERO,
            fix_gas_price: U256::ZERO,
            offset_gas_price: U256::ZERO,
            nonce_compute_mode: NonceComputeMode::AutoIncrement,
            use_single_flight_rpc: false,
            curve_type: CURVE_SECP256K1,
            decimals: 18,
            data_dir: PathBuf::from("data"),
        }
    }
}

fn validate_http_url(name: &str, raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::Invalid(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))
        .into()),
    }
}

fn env_u256(name: &str) -> Result<U256> {
    match env::var(name) {
        Err(_) => Ok(U256::ZERO),
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(U256::ZERO);
            }
            crate::types::parse_big_uint(trimmed).ok_or_else(|| {
                ConfigError::Invalid(format!("{name} must be a decimal or 0x-hex integer")).into()
            })
        }
    }
}

impl WalletConfig {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Self::default()
        }
    }

    /// Location of the adapter's local store under the data directory,
    /// partitioned per symbol.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir
            .join(self.symbol.to_lowercase())
            .join("wallet.db")
    }

    /// Loads the adapter configuration from the process environment.
    ///
    /// `WALLET_SERVER_API` is required; everything else has a workable default.
    pub fn from_env() -> Result<Self> {
        let server_api = env::var("WALLET_SERVER_API")
            .map_err(|_| ConfigError::Missing("WALLET_SERVER_API must be set".to_string()))?;
        validate_http_url("WALLET_SERVER_API", &server_api)?;

        let broadcast_api = env::var("WALLET_BROADCAST_API")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if let Some(url) = broadcast_api.as_deref() {
            validate_http_url("WALLET_BROADCAST_API", url)?;
        }

        let symbol = env::var("WALLET_SYMBOL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_SYMBOL.to_string());

        let chain_id = env::var("WALLET_CHAIN_ID")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(1);

        let nonce_compute_mode = match env::var("WALLET_NONCE_COMPUTE_MODE")
            .ok()
            .and_then(|raw| raw.trim().parse::<u8>().ok())
            .unwrap_or(0)
        {
            1 => NonceComputeMode::ChainLatest,
            _ => NonceComputeMode::AutoIncrement,
        };

        let use_single_flight_rpc = env::var("WALLET_USE_SINGLE_FLIGHT_RPC")
            .ok()
            .map(|raw| raw.trim() == "1" || raw.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let decimals = env::var("WALLET_DECIMALS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|d| *d <= 36)
            .unwrap_or(18);

        let data_dir = env::var("WALLET_DATA_DIR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));

        Ok(Self {
            symbol,
            server_api,
            broadcast_api,
            chain_id,
            fix_gas_limit: env_u256("WALLET_FIX_GAS_LIMIT")?,
            fix_gas_price: env_u256("WALLET_FIX_GAS_PRICE")?,
            offset_gas_price: env_u256("WALLET_OFFSET_GAS_PRICE")?,
            nonce_compute_mode,
            use_single_flight_rpc,
            curve_type: CURVE_SECP256K1,
            decimals,
            data_dir,
        })
    }
}
