//! Lending Monitor
//!
//! Operator tool for the lending protocol:
//! - CLI arguments and TOML config file support
//! - Market state and oracle price tables
//! - Account risk snapshot and protocol diagnostics
//! - Continuous account watch with structured logging
//! - Emergency pause and resume of oracle price feeds

use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use lending_rust_sdk::{
    account::UsdValue,
    init_logging,
    monitor::spawn_account_monitor,
    AccountPositionAggregator, AccountSnapshot, ChainDataPort, ExchangeRateGuard, HttpClient,
    JsonRpcChainPort, LogFormat, MarketReading, MarketStateReader, OracleAdmin, PriceOracleReader,
    PriceResolution,
    ProtocolConfig, ProtocolDiagnostics,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "lending_monitor")]
#[command(version, about = "Lending protocol account and market monitor", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "lending.toml")]
    config: String,

    /// Override JSON-RPC endpoint
    #[arg(long, env = "LENDING_RPC_URL")]
    rpc_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Print results as JSON instead of tables
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample config file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "lending.toml")]
        output: String,
    },
    /// Validate config without connecting
    ValidateConfig,
    /// Show market state for every configured market
    Markets,
    /// Show oracle prices and how each was resolved
    Prices,
    /// Show an account's risk snapshot
    Status {
        #[arg(long)]
        account: Address,
    },
    /// Check protocol wiring and, optionally, an account's liquidity
    Diagnostics {
        #[arg(long)]
        account: Option<Address>,
    },
    /// Poll an account and log changes until interrupted
    Watch {
        #[arg(long)]
        account: Address,
    },
    /// Pin a market to an emergency USD price (oracle admin only)
    PauseFeed {
        /// Unlocked admin account that signs the transaction
        #[arg(long)]
        from: Address,
        #[arg(long)]
        market: String,
        /// USD per whole underlying unit, e.g. 1850.5
        #[arg(long)]
        price: String,
    },
    /// Return a paused market to its live price feed (oracle admin only)
    ResumeFeed {
        #[arg(long)]
        from: Address,
        #[arg(long)]
        market: String,
    },
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists (before parsing CLI args)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match &cli.command {
        Commands::GenerateConfig { output } => return generate_sample_config(output),
        Commands::ValidateConfig => {
            let config = load_config(&cli)?;
            println!(
                "Configuration is valid: {} markets on chain {} via {}",
                config.markets.len(),
                config.network.chain_id,
                config.network.rpc_url
            );
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let _guard = setup_logging(&config, &cli)?;
    let app = App::connect(&config);

    match &cli.command {
        Commands::Markets => show_markets(&app, cli.json).await,
        Commands::Prices => show_prices(&app, cli.json).await,
        Commands::Status { account } => show_status(&app, *account, cli.json).await,
        Commands::Diagnostics { account } => show_diagnostics(&app, *account, cli.json).await,
        Commands::Watch { account } => watch(&app, *account).await,
        Commands::PauseFeed { from, market, price } => {
            let receipt = app.oracle_admin(*from).pause_price_feed(market, price).await?;
            println!("Paused {market} at ${price}: {}", receipt.tx_hash);
            Ok(())
        }
        Commands::ResumeFeed { from, market } => {
            let receipt = app.oracle_admin(*from).resume_price_feed(market).await?;
            println!("Resumed {market}: {}", receipt.tx_hash);
            Ok(())
        }
        Commands::GenerateConfig { .. } | Commands::ValidateConfig => Ok(()),
    }
}

// ============================================================================
// Wiring
// ============================================================================

struct App {
    config: ProtocolConfig,
    chain: Arc<dyn ChainDataPort>,
    oracle: Arc<PriceOracleReader>,
    markets_reader: Arc<MarketStateReader>,
    aggregator: Arc<AccountPositionAggregator>,
}

impl App {
    fn connect(config: &ProtocolConfig) -> Self {
        let http = HttpClient::new(None, config.network.rpc_url.clone());
        let chain: Arc<dyn ChainDataPort> = Arc::new(
            JsonRpcChainPort::new(http, config.contracts.clone()).with_confirmation(
                config.coordinator.confirmation_timeout(),
                config.coordinator.receipt_poll_interval(),
            ),
        );
        let guard = Arc::new(ExchangeRateGuard::new());
        let oracle = Arc::new(PriceOracleReader::new(chain.clone(), config.oracle.clone()));
        let markets_reader = Arc::new(MarketStateReader::new(
            chain.clone(),
            config.market_settings.clone(),
            guard.clone(),
        ));
        let aggregator = Arc::new(AccountPositionAggregator::new(
            chain.clone(),
            oracle.clone(),
            guard,
            config.market_settings.clone(),
        ));

        info!(rpc_url = %config.network.rpc_url, markets = config.markets.len(), "Connected");
        Self {
            config: config.clone(),
            chain,
            oracle,
            markets_reader,
            aggregator,
        }
    }

    fn oracle_admin(&self, from: Address) -> OracleAdmin {
        let http = HttpClient::new(None, self.config.network.rpc_url.clone());
        let chain = JsonRpcChainPort::new(http, self.config.contracts.clone())
            .with_sender(from)
            .with_confirmation(
                self.config.coordinator.confirmation_timeout(),
                self.config.coordinator.receipt_poll_interval(),
            );
        OracleAdmin::new(Arc::new(chain), self.config.markets())
    }
}

fn load_config(cli: &Cli) -> Result<ProtocolConfig, Box<dyn std::error::Error>> {
    let mut config = ProtocolConfig::load(&cli.config)?;
    if let Some(url) = &cli.rpc_url {
        config.network.rpc_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn setup_logging(
    config: &ProtocolConfig,
    cli: &Cli,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let mut logging = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging = logging.with_level(level.clone());
    }
    if let Some(format) = &cli.log_format {
        logging = logging.with_format(format.parse::<LogFormat>()?);
    }
    Ok(init_logging(&logging)?)
}

fn generate_sample_config(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let content = ProtocolConfig::default().to_toml_string()?;
    let with_comments = format!(
        r#"# Lending Monitor Configuration
# See: cargo run --bin lending_monitor -- --help
#
# The RPC endpoint can also be set via the LENDING_RPC_URL environment variable.

{content}"#
    );
    std::fs::write(path, with_comments)?;
    println!("Sample config written to: {path}");
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn show_markets(app: &App, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let markets = app.config.markets();
    let readings = app.markets_reader.get_market_readings(&markets).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&readings)?);
        return Ok(());
    }

    println!(
        "{:<8} {:>16} {:>16} {:>8} {:>10} {:>10}",
        "MARKET", "SUPPLIED", "BORROWED", "UTIL", "SUPPLY APY", "BORROW APY"
    );
    for (market, reading) in markets.iter().zip(&readings) {
        match reading {
            MarketReading::Available(state) => {
                let supplied = state.total_supplied(market).unwrap_or(f64::NAN);
                let borrowed = state.total_borrowed(market).unwrap_or(f64::NAN);
                println!(
                    "{:<8} {:>16.4} {:>16.4} {:>7.2}% {:>10} {:>10}{}",
                    market.symbol,
                    supplied,
                    borrowed,
                    state.utilization * 100.0,
                    fmt_pct(state.supply_apy),
                    fmt_pct(state.borrow_apy),
                    if state.is_degraded() { "  (degraded)" } else { "" }
                );
                for fault in &state.faults {
                    println!("         ! {fault}");
                }
            }
            MarketReading::Unavailable { error, .. } => println!("{:<8} unavailable: {error}", market.symbol),
        }
    }
    Ok(())
}

async fn show_prices(app: &App, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let markets = app.config.markets();
    let prices = app.oracle.get_resolved_prices(&markets).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&prices)?);
        return Ok(());
    }

    for market in &markets {
        let line = match prices.get(&market.symbol) {
            Some(PriceResolution::Live { price_usd, emergency }) => format!(
                "${price_usd:.4}{}",
                if *emergency { " (emergency)" } else { "" }
            ),
            Some(PriceResolution::Fallback { price_usd, reason }) => {
                format!("${price_usd:.4} (fallback: {reason})")
            }
            Some(PriceResolution::Unknown { reason }) => format!("unknown ({reason})"),
            None => "unknown".to_string(),
        };
        println!("{:<8} {:<6} {line}", market.symbol, market.underlying_symbol);
    }
    Ok(())
}

async fn show_status(app: &App, account: Address, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = app
        .aggregator
        .get_account_snapshot(account, &app.config.markets())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

async fn show_diagnostics(
    app: &App,
    account: Option<Address>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = ProtocolDiagnostics::new(app.chain.clone(), app.config.contracts.clone())
        .run(account, &app.config.markets())
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match report.oracle_address {
        Some(oracle) => println!("Oracle:  {oracle}"),
        None => println!("Oracle:  unreadable"),
    }
    for listing in &report.markets {
        let status = match listing.listed {
            Some(true) => "listed",
            Some(false) => "NOT LISTED",
            None => "unknown",
        };
        println!("Market:  {:<8} {status}", listing.symbol);
    }
    if let Some(liq) = &report.account_liquidity {
        println!(
            "Account: liquidity ${:.2}, shortfall ${:.2}",
            liq.liquidity_usd, liq.shortfall_usd
        );
    }
    if report.is_healthy() {
        println!("\nNo issues detected");
    } else {
        println!("\nIssues:");
        for issue in &report.issues {
            println!("  - {issue}");
        }
    }
    Ok(())
}

async fn watch(app: &App, account: Address) -> Result<(), Box<dyn std::error::Error>> {
    let handle = spawn_account_monitor(
        app.aggregator.clone(),
        account,
        app.config.markets(),
        app.config.polling.account_interval(),
    );
    let mut updates = handle.subscribe();
    info!(account = %account, "Watching account, Ctrl+C to stop");

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Poller stopped");
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if let Some(snapshot) = state.latest.as_deref() {
                    info!(
                        health_factor = snapshot.health_factor,
                        tier = %snapshot.risk_tier,
                        supplied_usd = snapshot.total_supplied_usd,
                        borrowed_usd = snapshot.total_borrowed_usd,
                        degraded = snapshot.degraded_markets.len(),
                        stale = state.last_error.is_some(),
                        "Account update"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown();
    Ok(())
}

// ============================================================================
// Formatting
// ============================================================================

fn print_snapshot(snapshot: &AccountSnapshot) {
    println!("Account: {}", snapshot.account);
    println!();
    println!(
        "{:<8} {:>14} {:>14} {:>14} {:>14}  PRICE",
        "MARKET", "SUPPLIED", "SUPPLIED USD", "BORROWED", "BORROWED USD"
    );
    for pos in snapshot.positions.iter().filter(|p| p.has_position() != Some(false)) {
        let price = match &pos.price {
            PriceResolution::Live { .. } => "live",
            PriceResolution::Fallback { .. } => "fallback",
            PriceResolution::Unknown { .. } => "unknown",
        };
        println!(
            "{:<8} {:>14} {:>14} {:>14} {:>14}  {price}",
            pos.symbol,
            fmt_amount(pos.supplied),
            fmt_usd(pos.supplied_usd),
            fmt_amount(pos.borrowed),
            fmt_usd(pos.borrowed_usd),
        );
        for degradation in &pos.degradations {
            println!("         ! {degradation:?}");
        }
    }

    println!();
    println!("Total supplied:      ${:.2}", snapshot.total_supplied_usd);
    println!("Total borrowed:      ${:.2}", snapshot.total_borrowed_usd);
    println!(
        "Borrow limit:        ${:.2} ({:?}), {:.1}% used",
        snapshot.borrow_limit_usd, snapshot.borrow_limit.source, snapshot.borrow_limit_used_pct
    );
    if let Some(gap) = snapshot.borrow_limit.discrepancy_usd {
        println!("  protocol vs computed gap: ${gap:.2}");
    }
    println!("Available to borrow: ${:.2}", snapshot.available_to_borrow_usd);
    println!("Loan to value:       {:.2}%", snapshot.loan_to_value * 100.0);
    if !snapshot.has_debt() {
        println!("Health factor:       ∞ ({})", snapshot.risk_tier);
    } else {
        println!(
            "Health factor:       {:.3} ({})",
            snapshot.health_factor, snapshot.risk_tier
        );
    }
    if !snapshot.is_complete() {
        println!("Degraded markets:    {}", snapshot.degraded_markets.join(", "));
    }
}

fn fmt_amount(amount: Option<f64>) -> String {
    amount.map_or_else(|| "?".to_string(), |a| format!("{a:.4}"))
}

fn fmt_usd(value: UsdValue) -> String {
    value
        .known()
        .map_or_else(|| "unknown".to_string(), |v| format!("${v:.2}"))
}

fn fmt_pct(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}%", v * 100.0))
}
