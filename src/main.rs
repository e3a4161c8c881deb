use clap::Parser;
use dotenv::dotenv;
use rust_decimal_macros::dec;
use solpilot::bot::TradingBot;
use solpilot::config::BotConfig;
use solpilot::engine::PositionEngine;
use solpilot::market::{NoDistributionMonitor, PriceFeed};
use solpilot::sandbox::{PaperDataSource, PaperMarket, PaperSignalSource, PaperVenue};
use solpilot::state::FileStore;
use solpilot::types::SystemClock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    verbose: String,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the bot in paper-trading mode against a simulated market
    Paper {
        /// Optional JSON configuration file; defaults apply for omitted fields
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory for persisted state and the trade archive
        #[arg(long, default_value = "solpilot_data")]
        data_dir: PathBuf,
        /// Starting quote balance for the simulated account
        #[arg(long, default_value_t = 10000.0)]
        balance: f64,
    },
    /// Validate a configuration file and print the effective settings
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<BotConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(BotConfig::from_file(path)?),
        None => Ok(BotConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.verbose)),
        )
        .init();

    match &cli.command {
        Commands::Paper {
            config,
            data_dir,
            balance,
        } => {
            let config = load_config(config.as_ref())?;
            run_paper(config, data_dir, *balance).await?;
        }
        Commands::CheckConfig { config } => {
            let config = BotConfig::from_file(config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_paper(
    config: BotConfig,
    data_dir: &PathBuf,
    balance: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let market = PaperMarket::new(&[
        ("WIF/USDC", 2.15),
        ("BONK/USDC", 0.000021),
        ("POPCAT/USDC", 0.88),
    ]);

    let clock = Arc::new(SystemClock);
    let store = Arc::new(FileStore::open(data_dir)?);
    let venue = Arc::new(PaperVenue::new(
        market.clone(),
        &config.trading.quote_asset,
        rust_decimal::Decimal::try_from(balance).unwrap_or(dec!(10000)),
    ));
    let feed = Arc::new(PriceFeed::new(
        vec![
            Arc::new(PaperDataSource::new(market.clone(), "paper-primary"))
                as Arc<dyn solpilot::market::MarketDataSource>,
            Arc::new(PaperDataSource::new(market.clone(), "paper-fallback")),
        ],
        &config.resilience,
    ));
    let monitor = Arc::new(NoDistributionMonitor);
    let signals = Arc::new(PaperSignalSource::new(market, 0.5));

    let engine = Arc::new(PositionEngine::new(
        config.clone(),
        venue.clone(),
        feed,
        monitor,
        store.clone(),
        clock.clone(),
    ));
    let bot = Arc::new(TradingBot::new(config, engine, signals, venue, store, clock));

    let shutdown = bot.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown.send(true);
        }
    });

    if let Err(err) = bot.run().await {
        error!(error = %err, "bot exited with error");
        return Err(err.into());
    }
    Ok(())
}
