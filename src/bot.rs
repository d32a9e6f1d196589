//! Live trading loop: one tick per bar interval.
//!
//! Each tick:
//! - Reads the account balance and its risk tier
//! - Logs market sentiment
//! - Picks symbols (static list plus bandit picks from the volume universe)
//! - Decides, sizes and places an order per symbol
//! - Scores each symbol's recent window to feed the bandit
//! - Retrains the policy when due

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{MarketGateway, OrderAck, OrderRequest, SentimentSource};
use crate::backtest::TradeSimulator;
use crate::models::Bar;
use crate::signals::{
    forward_return_labels, CentroidPolicy, DecisionPolicy, FeatureProvider, OnlineUpdater, TechnicalFeatures,
    LABEL_HORIZON,
};
use crate::trading::{BanditSelector, PositionSizer, TradingConfig};

/// Everything a tick needs, owned in one place.
pub struct TradingContext {
    pub config: TradingConfig,
    pub gateway: Arc<dyn MarketGateway>,
    pub sentiment: Option<Arc<dyn SentimentSource>>,
    pub features: Box<dyn FeatureProvider>,
    pub updater: OnlineUpdater<Box<dyn DecisionPolicy>>,
    pub selector: BanditSelector,
    pub sizer: PositionSizer,
    pub simulator: TradeSimulator,

    /// Time of the newest bar already fed to the updater, per symbol
    labelled_until: HashMap<String, DateTime<Utc>>,
}

impl TradingContext {
    /// Context with the technical feature pipeline and an untrained
    /// centroid policy.
    pub fn new(
        config: TradingConfig,
        gateway: Arc<dyn MarketGateway>,
        sentiment: Option<Arc<dyn SentimentSource>>,
    ) -> Result<Self> {
        Self::with_policy(config, gateway, sentiment, Box::new(CentroidPolicy::default()))
    }

    pub fn with_policy(
        config: TradingConfig,
        gateway: Arc<dyn MarketGateway>,
        sentiment: Option<Arc<dyn SentimentSource>>,
        policy: Box<dyn DecisionPolicy>,
    ) -> Result<Self> {
        let sizer = config.position_sizer().context("Invalid sizing configuration")?;
        let updater = OnlineUpdater::new(
            policy,
            config.training_window,
            chrono::Duration::hours(config.retrain_interval_hours),
        );

        Ok(Self {
            simulator: TradeSimulator::from_config(&config),
            config,
            gateway,
            sentiment,
            features: Box::new(TechnicalFeatures::default()),
            updater,
            selector: BanditSelector::new(),
            sizer,
            labelled_until: HashMap::new(),
        })
    }
}

/// What a tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub balance: f64,
    pub risk_fraction: f64,
    pub symbols: Vec<String>,
    pub orders: Vec<OrderAck>,
    pub retrained: bool,
}

/// Main bot runner.
pub struct Bot {
    ctx: TradingContext,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(ctx: TradingContext) -> Self {
        Self {
            ctx,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn context(&self) -> &TradingContext {
        &self.ctx
    }

    /// Tick every bar interval until ctrl-c or the shutdown flag. Ticks run
    /// sequentially; a tick that overruns skips the missed ones.
    pub async fn run(&mut self) -> Result<()> {
        let period = Duration::from_secs(self.ctx.config.interval_secs());
        info!(
            interval = %self.ctx.config.interval,
            paper = self.ctx.config.paper,
            "Starting bot run loop"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.tick(Utc::now()).await {
                Ok(report) => info!(
                    balance = report.balance,
                    symbols = report.symbols.len(),
                    orders = report.orders.len(),
                    retrained = report.retrained,
                    "Tick complete"
                ),
                Err(e) => error!(error = %e, "Error in bot tick"),
            }
        }

        info!("Bot stopped");
        Ok(())
    }

    /// Single iteration of the main loop.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        let ctx = &mut self.ctx;

        // 1. Balance and risk tier
        let balance = ctx
            .gateway
            .account_balance("USDT")
            .await
            .context("Failed to fetch account balance")?;
        let risk_fraction = ctx.sizer.risk_budget().risk_fraction(balance)?;
        info!(balance, risk_fraction, "Account state");

        // 2. Sentiment (informational)
        if let (true, Some(source)) = (ctx.config.use_sentiment, ctx.sentiment.as_ref()) {
            let reading = source.reading().await;
            info!(
                fear_greed = reading.fear_greed,
                headlines = reading.headlines,
                "Sentiment"
            );
        }

        // 3. Symbol selection
        let universe = ctx
            .gateway
            .top_universe(ctx.config.dynamic_universe_size)
            .await
            .context("Failed to fetch symbol universe")?;
        let symbols = ctx
            .selector
            .choose(&universe, &ctx.config.static_symbols, ctx.config.dynamic_select_k)?;

        // 4. Per-symbol decisions
        let mut orders = Vec::new();
        for symbol in &symbols {
            match Self::process_symbol(ctx, symbol, balance, risk_fraction).await {
                Ok(Some(ack)) => orders.push(ack),
                Ok(None) => {}
                Err(e) => warn!(symbol = %symbol, error = %e, "Failed to process symbol"),
            }
        }

        // 5. Retrain when due
        let retrained = if ctx.updater.should_retrain(now) {
            ctx.updater.retrain(now)?
        } else {
            false
        };

        Ok(TickReport {
            balance,
            risk_fraction,
            symbols,
            orders,
            retrained,
        })
    }

    async fn process_symbol(
        ctx: &mut TradingContext,
        symbol: &str,
        balance: f64,
        risk_fraction: f64,
    ) -> Result<Option<OrderAck>> {
        let candles = ctx
            .gateway
            .fetch_bars(symbol, &ctx.config.interval, ctx.config.bar_limit)
            .await?;
        let bars = ctx.features.transform(&candles);
        let Some(last) = bars.last() else {
            debug!(symbol, candles = candles.len(), "Not enough history for features");
            return Ok(None);
        };

        let decision = ctx
            .updater
            .policy()
            .decide(&last.features, &last.state_probs, risk_fraction);
        debug!(symbol, side = ?decision.side, size = decision.size, "Decision");

        // Score the recent window before ordering so scoring errors never follow a fill.
        let result = ctx.simulator.run_policy(
            &bars,
            ctx.config.initial_balance,
            ctx.updater.policy(),
            risk_fraction,
        )?;
        let reward = result.summary().reward();
        ctx.selector.update_reward(symbol, reward);
        debug!(
            symbol,
            reward,
            trades = result.trades.len(),
            pnl = result.total_pnl(),
            "Updated bandit reward"
        );
        record_observations(ctx, symbol, &bars);

        let ack = match decision.side.side().filter(|_| decision.is_entry()) {
            Some(side) => {
                let cap = ctx.gateway.max_leverage(symbol).await.unwrap_or_else(|e| {
                    warn!(symbol, error = %e, "Leverage cap unavailable");
                    None
                });
                let sized = ctx.sizer.size(balance, side, last.close, last.atr, cap)?;
                if sized.is_empty() {
                    debug!(symbol, "Sized order is empty, skipping");
                    None
                } else {
                    let order = OrderRequest {
                        symbol: symbol.to_string(),
                        side,
                        quantity: sized.qty_base,
                        leverage: sized.leverage,
                        reference_price: last.close,
                    };
                    let ack = ctx.gateway.place_market_order(&order).await?;
                    info!(
                        symbol,
                        side = side.as_str(),
                        qty = ack.quantity,
                        leverage = sized.leverage,
                        margin_mode = ?sized.margin_mode,
                        stop = sized.stop_price,
                        take = sized.take_price,
                        order_id = %ack.order_id,
                        "Order placed"
                    );
                    Some(ack)
                }
            }
            None => None,
        };

        Ok(ack)
    }
}

/// Feed newly labelled bars to the updater, skipping ones seen on earlier
/// ticks.
fn record_observations(ctx: &mut TradingContext, symbol: &str, bars: &[Bar]) {
    let since = ctx.labelled_until.get(symbol).copied();
    let labelled = bars.len().saturating_sub(LABEL_HORIZON);
    let fresh: Vec<_> = forward_return_labels(bars, LABEL_HORIZON, ctx.config.sl_multiplier)
        .into_iter()
        .zip(bars)
        .filter(|(_, bar)| since.map_or(true, |t| bar.time > t))
        .map(|(obs, _)| obs)
        .collect();

    if labelled > 0 {
        ctx.labelled_until
            .insert(symbol.to_string(), bars[labelled - 1].time);
    }
    debug!(symbol, rows = fresh.len(), "Recorded training rows");
    ctx.updater.add_observations(fresh);
}
