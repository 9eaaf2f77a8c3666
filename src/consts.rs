use std::time::Duration;

/// Decimals of the 1e18 fixed-point mantissa used by exchange rates, prices and rates.
pub const MANTISSA_DECIMALS: u8 = 18;

/// Receipt tokens always carry 18 decimals, whatever the underlying asset uses.
pub const RECEIPT_DECIMALS: u8 = 18;

/// Compounding periods used to turn a simple annual rate into an APY.
pub const DEFAULT_PERIODS_PER_YEAR: u32 = 365;

/// Displayed APY ceiling (1.0 = 100%).
pub const DEFAULT_MAX_APY: f64 = 1.0;

/// Simple annual rates above this are treated as corrupted reads (5.0 = 500%).
pub const DEFAULT_MAX_ANNUAL_RATE: f64 = 5.0;

pub const DEFAULT_ACCOUNT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MARKET_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_ACTION_COOLDOWN: Duration = Duration::from_secs(3);
pub const DEFAULT_REFETCH_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Relative gap between the two borrow-limit estimates that gets logged.
pub const BORROW_LIMIT_DISCREPANCY_TOLERANCE: f64 = 0.01;

pub const SEPOLIA_RPC_URL: &str = "https://rpc.sepolia.org";
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
