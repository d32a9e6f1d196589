//! Crypto Quant Trading Bot
//!
//! ATR-bracketed trade simulation, tiered risk and leverage sizing, and
//! UCB-driven symbol selection for Binance USDT pairs.

mod api;
mod backtest;
mod bot;
mod error;
mod export;
mod metrics;
mod models;
mod signals;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::api::{
    BinanceClient, MarketGateway, OrderRequest, PaperGateway, SentimentClient, SentimentSource, TimeInForce, MAX_KLINE_LIMIT,
};
use crate::backtest::TradeSimulator;
use crate::bot::{Bot, TradingContext};
use crate::models::{Candle, Side};
use crate::signals::{forward_return_labels, CentroidPolicy, DecisionPolicy, FeatureProvider, TechnicalFeatures, LABEL_HORIZON};
use crate::trading::TradingConfig;

/// Crypto trading bot CLI.
#[derive(Parser)]
#[command(name = "cquant")]
#[command(about = "Volatility-sized crypto trading with bandit symbol selection", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate the policy over historical bars
    Backtest {
        /// CSV file with time,open,high,low,close,volume
        #[arg(long, conflicts_with = "symbol", required_unless_present = "symbol")]
        csv: Option<PathBuf>,

        /// Fetch klines for this symbol from Binance
        #[arg(short, long)]
        symbol: Option<String>,

        /// Number of klines to fetch
        #[arg(long, default_value = "1000")]
        limit: u32,

        /// Fraction of bars used to train the policy before simulating the rest
        #[arg(long, default_value = "0.5")]
        train_fraction: f64,

        /// Cap on each decision's size (fraction of equity risked)
        #[arg(long, default_value = "0.02")]
        risk_aversion: f64,

        /// Write the trade log to this CSV file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Start the trading loop (paper unless --live or PAPER=0)
    Run {
        /// Place real orders (needs BINANCE_API_KEY / BINANCE_SECRET_KEY)
        #[arg(long)]
        live: bool,

        /// Starting paper balance in USDT
        #[arg(short, long, default_value = "1000")]
        balance: f64,
    },

    /// Place a single spot order
    Order {
        /// Trading pair, e.g. BTCUSDT
        #[arg(short, long)]
        symbol: String,

        /// Sell instead of buy
        #[arg(long)]
        sell: bool,

        /// Base-asset quantity
        #[arg(short, long)]
        quantity: f64,

        /// Limit price; market order when omitted
        #[arg(short, long)]
        price: Option<f64>,

        /// Time in force for limit orders
        #[arg(long, value_enum, default_value = "gtc")]
        time_in_force: TimeInForce,
    },

    /// List open orders
    Orders {
        /// Only this symbol
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Cancel an open order
    Cancel {
        /// Trading pair of the order
        #[arg(short, long)]
        symbol: String,

        /// Exchange order ID
        order_id: u64,
    },

    /// Show risk, bracket and leverage for one entry
    Size {
        /// Account balance in USDT
        #[arg(short, long)]
        balance: f64,

        /// Current ATR
        #[arg(short, long)]
        atr: f64,

        /// Entry price, for the base-asset quantity
        #[arg(short, long, default_value = "0")]
        price: f64,

        /// Minimum notional in USDT (defaults to MAX_POSITION_USDT)
        #[arg(long)]
        min_notional: Option<f64>,

        /// Venue leverage cap
        #[arg(long)]
        exchange_max_leverage: Option<u32>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = TradingConfig::from_env()?;

    match cli.command {
        Commands::Backtest {
            csv,
            symbol,
            limit,
            train_fraction,
            risk_aversion,
            out,
        } => {
            let candles = match (csv, symbol) {
                (Some(path), _) => export::load_bars_csv(&path)?,
                (None, Some(symbol)) => {
                    let client = BinanceClient::new()?;
                    client
                        .fetch_bars(&symbol, &config.interval, limit.min(MAX_KLINE_LIMIT))
                        .await?
                }
                (None, None) => anyhow::bail!("Pass --csv or --symbol"),
            };
            run_backtest(&config, &candles, train_fraction, risk_aversion, out)?;
        }

        Commands::Run { live, balance } => {
            let live = config.is_live(live);
            let gateway: Arc<dyn MarketGateway> = if live {
                let client = BinanceClient::from_env().context("Live mode needs Binance credentials")?;
                warn!("=== LIVE MODE: real orders will be placed ===");
                Arc::new(client)
            } else {
                let market: Arc<dyn MarketGateway> = Arc::new(BinanceClient::new()?);
                info!("=== PAPER MODE: no real orders will be placed ===");
                Arc::new(PaperGateway::new(market, config.interval.clone(), balance))
            };

            let sentiment: Option<Arc<dyn SentimentSource>> = if config.use_sentiment {
                Some(Arc::new(SentimentClient::from_env()?))
            } else {
                None
            };

            let mut config = config;
            config.paper = !live;
            let ctx = TradingContext::new(config, gateway, sentiment)?;
            let mut bot = Bot::new(ctx);
            bot.run().await?;
        }

        Commands::Order {
            symbol,
            sell,
            quantity,
            price,
            time_in_force,
        } => {
            let client = BinanceClient::from_env()?;
            let side = if sell { Side::Short } else { Side::Long };

            match price {
                Some(price) => {
                    let order = client
                        .place_limit_order(&symbol, side, quantity, price, time_in_force)
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&order)?);
                }
                None => {
                    let last = client
                        .fetch_bars(&symbol, &config.interval, 1)
                        .await?
                        .pop()
                        .map(|c| c.close)
                        .unwrap_or(0.0);
                    let ack = client
                        .place_market_order(&OrderRequest {
                            symbol: symbol.clone(),
                            side,
                            quantity,
                            leverage: 1,
                            reference_price: last,
                        })
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&ack)?);
                }
            }
        }

        Commands::Orders { symbol } => {
            let client = BinanceClient::from_env()?;
            let orders = client.open_orders(symbol.as_deref()).await?;

            if orders.is_empty() {
                println!("No open orders.");
            } else {
                println!("\n{:<12} {:>12} {:<6} {:<8} {:>14} {:>14} {:<10}",
                    "Symbol", "Order ID", "Side", "Type", "Price", "Qty", "Status");
                println!("{}", "-".repeat(82));
                for o in &orders {
                    println!("{:<12} {:>12} {:<6} {:<8} {:>14} {:>14} {:<10}",
                        o.symbol, o.order_id, o.side, o.order_type, o.price, o.orig_qty, o.status);
                }
            }
        }

        Commands::Cancel { symbol, order_id } => {
            let client = BinanceClient::from_env()?;
            let order = client.cancel_order(&symbol, order_id).await?;
            println!("Cancelled {} order {} ({})", order.symbol, order.order_id, order.status);
        }

        Commands::Size {
            balance,
            atr,
            price,
            min_notional,
            exchange_max_leverage,
        } => {
            let mut config = config;
            if let Some(n) = min_notional {
                config.max_position_usdt = n;
            }
            let sizer = config.position_sizer()?;
            let sized = sizer.size(balance, Side::Long, price, atr, exchange_max_leverage)?;

            println!("\n=== Position Sizing ===\n");
            println!("  Balance:              {:.2} USDT", balance);
            println!("  Risk Fraction:        {:.2}%", sized.risk_fraction * 100.0);
            println!("  Stop Distance:        {:.6}", sized.stop_distance);
            println!("  Take Distance:        {:.6}", sized.take_distance);
            println!("  Leverage:             {}x ({:?})", sized.leverage, sized.margin_mode);
            println!("  Notional:             {:.2} USDT", sized.notional_usd);
            if price > 0.0 {
                println!("  Long Stop / Take:     {:.6} / {:.6}", sized.stop_price, sized.take_price);
                println!("  Quantity:             {:.6}", sized.qty_base);
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Train on the leading bars, simulate the rest, print the summary.
fn run_backtest(
    config: &TradingConfig,
    candles: &[Candle],
    train_fraction: f64,
    risk_aversion: f64,
    out: Option<PathBuf>,
) -> Result<()> {
    let features = TechnicalFeatures::default();
    let bars = features.transform(candles);
    if bars.is_empty() {
        anyhow::bail!("Not enough candles ({}) to compute features", candles.len());
    }

    let split = ((bars.len() as f64) * train_fraction.clamp(0.0, 1.0)) as usize;
    let (train, test) = bars.split_at(split);

    let mut policy = CentroidPolicy::default();
    let (rows, labels): (Vec<Vec<f64>>, Vec<usize>) =
        forward_return_labels(train, LABEL_HORIZON, config.sl_multiplier).into_iter().unzip();
    policy.train(&rows, &labels)?;
    if !policy.is_trained() {
        warn!("No training rows; the policy will stay flat");
    }
    info!(train = train.len(), test = test.len(), "Running backtest");

    let simulator = TradeSimulator::from_config(config);
    let result = simulator.run_policy(test, config.initial_balance, &policy, risk_aversion)?;
    println!("{}", result);

    if let Some(path) = out {
        export::save_trade_log(&result.trades, &path)
            .with_context(|| format!("Failed to write trade log to {}", path.display()))?;
        info!(path = %path.display(), trades = result.trades.len(), "Trade log written");
    }

    Ok(())
}
