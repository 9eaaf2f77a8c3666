//! Protocol configuration.
//!
//! Everything here is static: network endpoint, protocol contract
//! addresses, the market list and the tuning knobs of the readers,
//! pollers and coordinator. Loaded once from TOML; every field has a
//! default so a partial file is valid. The defaults describe the
//! reference Sepolia deployment.

use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::{
    consts::{
        DEFAULT_ACCOUNT_POLL_INTERVAL, DEFAULT_ACTION_COOLDOWN, DEFAULT_CONFIRMATION_TIMEOUT,
        DEFAULT_MARKET_POLL_INTERVAL, DEFAULT_MAX_ANNUAL_RATE, DEFAULT_MAX_APY,
        DEFAULT_PERIODS_PER_YEAR, DEFAULT_RECEIPT_POLL_INTERVAL, DEFAULT_REFETCH_DELAY,
        SEPOLIA_CHAIN_ID, SEPOLIA_RPC_URL,
    },
    logging::LogConfig,
    prelude::*,
    Error, Market,
};

/// Largest underlying precision accepted.
const MAX_UNDERLYING_DECIMALS: u8 = 36;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub contracts: ContractsConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub market_settings: MarketSettings,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub logging: LogConfig,

    #[serde(default = "default_markets")]
    pub markets: Vec<MarketConfig>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            contracts: ContractsConfig::default(),
            oracle: OracleConfig::default(),
            market_settings: MarketSettings::default(),
            polling: PollingConfig::default(),
            coordinator: CoordinatorConfig::default(),
            logging: LogConfig::default(),
            markets: default_markets(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

fn default_rpc_url() -> String {
    SEPOLIA_RPC_URL.to_string()
}

fn default_chain_id() -> u64 {
    SEPOLIA_CHAIN_ID
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
        }
    }
}

/// Protocol-wide contract addresses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContractsConfig {
    #[serde(default = "default_comptroller")]
    pub comptroller: Address,
    #[serde(default = "default_oracle")]
    pub oracle: Address,
}

fn default_comptroller() -> Address {
    address!("300068b3EA3d6080065f31d6914c818aFbf69671")
}

fn default_oracle() -> Address {
    address!("dbb126a47D145AcdF08569950E6027f5D55153e1")
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            comptroller: default_comptroller(),
            oracle: default_oracle(),
        }
    }
}

/// Price resolution policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct OracleConfig {
    /// Treat a feed whose health could not be read as unhealthy
    #[serde(default)]
    pub require_health_check: bool,

    /// USD prices used when the live price is unusable, keyed by underlying
    /// symbol. Markets without an entry resolve to unknown instead.
    #[serde(default)]
    pub fallback_prices: HashMap<String, f64>,
}

/// Rate and APY derivation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MarketSettings {
    /// Compounding periods per year
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: u32,
    /// Displayed APY ceiling (1.0 = 100%)
    #[serde(default = "default_max_apy")]
    pub max_apy: f64,
    /// Raw simple annual rates above this are discarded as faults
    #[serde(default = "default_max_annual_rate")]
    pub max_annual_rate: f64,
}

fn default_periods_per_year() -> u32 {
    DEFAULT_PERIODS_PER_YEAR
}

fn default_max_apy() -> f64 {
    DEFAULT_MAX_APY
}

fn default_max_annual_rate() -> f64 {
    DEFAULT_MAX_ANNUAL_RATE
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            periods_per_year: default_periods_per_year(),
            max_apy: default_max_apy(),
            max_annual_rate: default_max_annual_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PollingConfig {
    #[serde(default = "default_account_interval_ms")]
    pub account_interval_ms: u64,
    #[serde(default = "default_market_interval_ms")]
    pub market_interval_ms: u64,
}

fn default_account_interval_ms() -> u64 {
    DEFAULT_ACCOUNT_POLL_INTERVAL.as_millis() as u64
}

fn default_market_interval_ms() -> u64 {
    DEFAULT_MARKET_POLL_INTERVAL.as_millis() as u64
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            account_interval_ms: default_account_interval_ms(),
            market_interval_ms: default_market_interval_ms(),
        }
    }
}

impl PollingConfig {
    pub fn account_interval(&self) -> Duration {
        Duration::from_millis(self.account_interval_ms)
    }

    pub fn market_interval(&self) -> Duration {
        Duration::from_millis(self.market_interval_ms)
    }
}

/// Lending action coordinator settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CoordinatorConfig {
    /// Minimum interval between two submissions of the same action on the same market
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Delay between a confirmed action and the snapshot refresh
    #[serde(default = "default_refetch_delay_ms")]
    pub refetch_delay_ms: u64,
    /// Upper bound on waiting for a transaction receipt
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    /// Approve `U256::MAX` instead of the exact amount
    #[serde(default)]
    pub approve_max: bool,
}

fn default_cooldown_ms() -> u64 {
    DEFAULT_ACTION_COOLDOWN.as_millis() as u64
}

fn default_refetch_delay_ms() -> u64 {
    DEFAULT_REFETCH_DELAY.as_millis() as u64
}

fn default_confirmation_timeout_ms() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT.as_millis() as u64
}

fn default_receipt_poll_interval_ms() -> u64 {
    DEFAULT_RECEIPT_POLL_INTERVAL.as_millis() as u64
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            refetch_delay_ms: default_refetch_delay_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            approve_max: false,
        }
    }
}

impl CoordinatorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn refetch_delay(&self) -> Duration {
        Duration::from_millis(self.refetch_delay_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

/// One market entry as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MarketConfig {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub underlying_symbol: String,
    pub underlying_decimals: u8,
    pub collateral_factor: f64,
    pub liquidation_threshold: f64,
    pub ltoken_address: Address,
    pub underlying_address: Address,
}

impl MarketConfig {
    pub fn to_market(&self) -> Market {
        Market {
            symbol: self.symbol.clone(),
            name: self.name.clone().unwrap_or_else(|| self.symbol.clone()),
            underlying_symbol: self.underlying_symbol.clone(),
            underlying_decimals: self.underlying_decimals,
            collateral_factor: self.collateral_factor,
            liquidation_threshold: self.liquidation_threshold,
            ltoken: self.ltoken_address,
            underlying: self.underlying_address,
        }
    }

    fn validate(&self) -> Result<()> {
        let cf = self.collateral_factor;
        let lt = self.liquidation_threshold;
        if !(cf > 0.0 && cf <= 1.0) {
            return Err(Error::Config(format!(
                "{}: collateral_factor must be in (0, 1], got {cf}",
                self.symbol
            )));
        }
        if !(lt > cf && lt <= 1.0) {
            return Err(Error::Config(format!(
                "{}: liquidation_threshold must be in (collateral_factor, 1], got {lt}",
                self.symbol
            )));
        }
        if self.underlying_decimals > MAX_UNDERLYING_DECIMALS {
            return Err(Error::Config(format!(
                "{}: underlying_decimals {} exceeds {MAX_UNDERLYING_DECIMALS}",
                self.symbol, self.underlying_decimals
            )));
        }
        if self.ltoken_address == Address::ZERO {
            return Err(Error::Config(format!("{}: ltoken_address is zero", self.symbol)));
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn market(
    symbol: &str,
    name: &str,
    underlying_symbol: &str,
    underlying_decimals: u8,
    collateral_factor: f64,
    liquidation_threshold: f64,
    ltoken_address: Address,
    underlying_address: Address,
) -> MarketConfig {
    MarketConfig {
        symbol: symbol.to_string(),
        name: Some(name.to_string()),
        underlying_symbol: underlying_symbol.to_string(),
        underlying_decimals,
        collateral_factor,
        liquidation_threshold,
        ltoken_address,
        underlying_address,
    }
}

fn default_markets() -> Vec<MarketConfig> {
    vec![
        market(
            "lUSDC",
            "USD Coin",
            "USDC",
            6,
            0.8,
            0.85,
            address!("2035a1Ad5542388108aa3ec0EA4cc995422252F6"),
            address!("94a9D9AC8a22534E3FaCa9F4e7F2E2cf85d5E4C8"),
        ),
        market(
            "lETH",
            "Ethereum",
            "WETH",
            18,
            0.75,
            0.82,
            address!("d6d3BfA05F1c24Ad1f8056328341c6BBE598Bc2a"),
            address!("fFf9976782d46CC05630D1f6eBAb18b2324d6B14"),
        ),
        market(
            "lWBTC",
            "Wrapped Bitcoin",
            "WBTC",
            8,
            0.7,
            0.75,
            address!("11245Da0D7A2b69f661d715CB20a11A41140ae8F"),
            address!("29f2D40B0605204364af54EC677bD022dA425d03"),
        ),
        market(
            "lLINK",
            "Chainlink",
            "LINK",
            18,
            0.65,
            0.72,
            address!("02266A9d79Aa697780cC87E95dFcC87c83f7a560"),
            address!("f8Fb3713D459D7C1018BD0A49D19b4C44290EBE5"),
        ),
        market(
            "lUSDT",
            "Tether USD",
            "USDT",
            6,
            0.8,
            0.85,
            address!("7B03e675C406c8fDC75Ea5c252acA6EdecdB1CAF"),
            address!("aA8E23Fb1079EA71e0a56F48a2aA51851D8433D0"),
        ),
    ]
}

impl ProtocolConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to the defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.trim().is_empty() {
            return Err(Error::Config("network.rpc_url is empty".to_string()));
        }
        if self.markets.is_empty() {
            return Err(Error::Config("no markets configured".to_string()));
        }

        let mut symbols = HashSet::new();
        for market in &self.markets {
            market.validate()?;
            if !symbols.insert(market.symbol.as_str()) {
                return Err(Error::Config(format!("duplicate market symbol {}", market.symbol)));
            }
        }

        for (symbol, price) in &self.oracle.fallback_prices {
            if !(price.is_finite() && *price > 0.0) {
                return Err(Error::Config(format!(
                    "fallback price for {symbol} must be positive, got {price}"
                )));
            }
        }

        let settings = &self.market_settings;
        if settings.periods_per_year == 0 {
            return Err(Error::Config("periods_per_year must be > 0".to_string()));
        }
        if !(settings.max_apy > 0.0 && settings.max_annual_rate > 0.0) {
            return Err(Error::Config(
                "max_apy and max_annual_rate must be > 0".to_string(),
            ));
        }

        if self.polling.account_interval_ms == 0 || self.polling.market_interval_ms == 0 {
            return Err(Error::Config("polling intervals must be > 0".to_string()));
        }
        if self.coordinator.receipt_poll_interval_ms == 0 {
            return Err(Error::Config("receipt_poll_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }

    /// Immutable market descriptors, in configuration order.
    pub fn markets(&self) -> Vec<Market> {
        self.markets.iter().map(MarketConfig::to_market).collect()
    }
}
