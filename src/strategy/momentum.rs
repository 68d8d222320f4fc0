use uuid::Uuid;

use super::{Strategy, StrategyContext};
use crate::config::StrategyParams;
use crate::error::{ConfigError, StrategyError};
use crate::execution::{Order, OrderRequest, OrderStatus};
use crate::models::{Candle, OrderSide};

/// Trading signal derived from closed candles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// Configuration for the momentum signal
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumConfig {
    /// Order volume in base units
    pub volume: f64,
    pub rsi_indicator: String,
    pub fast_indicator: String,
    pub slow_indicator: String,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Exit when price falls this far below entry, 0 disables
    pub stop_loss_pct: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            rsi_indicator: "rsi".to_string(),
            fast_indicator: "sma_fast".to_string(),
            slow_indicator: "sma_slow".to_string(),
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            stop_loss_pct: 0.0,
        }
    }
}

/// Combine RSI and a fast/slow moving-average pair into a signal
///
/// Buy needs RSI near oversold (below oversold + 10), the fast average above
/// the slow one and price above the fast average. Sell needs RSI overbought
/// and the fast average below the slow one.
pub fn evaluate(rsi: f64, fast: f64, slow: f64, price: f64, config: &MomentumConfig) -> Signal {
    let rsi_condition = rsi < config.rsi_oversold + 10.0;
    let ma_crossover = fast > slow;
    let price_above_ma = price > fast;

    if rsi_condition && ma_crossover && price_above_ma {
        tracing::debug!(
            "BUY conditions: RSI<{}={}, MA↑={}, Price>MA={}",
            config.rsi_oversold + 10.0,
            rsi_condition,
            ma_crossover,
            price_above_ma
        );
        return Signal::Buy;
    }

    let rsi_overbought = rsi > config.rsi_overbought;
    let ma_crossunder = fast < slow;
    if rsi_overbought && ma_crossunder {
        tracing::debug!("SELL conditions: RSI>{}={}, MA↓={}", config.rsi_overbought, rsi_overbought, ma_crossunder);
        return Signal::Sell;
    }

    Signal::Hold
}

/// Momentum swing strategy
///
/// Long only. Enters with a market order on a buy signal, exits on a sell
/// signal or when the stop loss is hit. Acts on closes of the RSI
/// indicator's timeframe.
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    id: String,
    config: MomentumConfig,
    entry: Option<Uuid>,
    exiting: bool,
}

impl MomentumStrategy {
    pub fn new(id: &str, config: MomentumConfig) -> Self {
        Self {
            id: id.to_string(),
            config,
            entry: None,
            exiting: false,
        }
    }

    pub fn from_params(id: &str, params: &StrategyParams) -> Result<Self, ConfigError> {
        let defaults = MomentumConfig::default();
        let config = MomentumConfig {
            volume: params.number("volume", defaults.volume)?,
            rsi_indicator: params.text("rsi", &defaults.rsi_indicator)?,
            fast_indicator: params.text("fast", &defaults.fast_indicator)?,
            slow_indicator: params.text("slow", &defaults.slow_indicator)?,
            rsi_oversold: params.number("oversold", defaults.rsi_oversold)?,
            rsi_overbought: params.number("overbought", defaults.rsi_overbought)?,
            stop_loss_pct: params.number("stop_loss_pct", defaults.stop_loss_pct)?,
        };

        if config.volume <= 0.0 {
            return Err(ConfigError::Invalid(format!("strategy '{}': volume must be positive", id)));
        }
        if config.rsi_oversold >= config.rsi_overbought {
            return Err(ConfigError::Invalid(format!(
                "strategy '{}': oversold must be below overbought",
                id
            )));
        }

        Ok(Self::new(id, config))
    }

    pub fn config(&self) -> &MomentumConfig {
        &self.config
    }

    /// Entry order while a position is held or pending
    pub fn entry(&self) -> Option<Uuid> {
        self.entry
    }

    fn filled_entry<'a>(&self, ctx: &'a StrategyContext<'_>) -> Option<&'a Order> {
        self.entry
            .and_then(|id| ctx.order(id))
            .filter(|o| o.status == OrderStatus::Filled)
    }

    fn exit(&mut self, ctx: &mut StrategyContext<'_>, reason: &str) -> Result<(), StrategyError> {
        let Some(entry) = self.entry else {
            return Ok(());
        };
        if self.exiting {
            return Ok(());
        }
        tracing::info!("📉 {} {}: exit ({})", self.id, ctx.symbol(), reason);
        ctx.close_order(entry)?;
        self.exiting = true;
        Ok(())
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn on_tick(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        if self.config.stop_loss_pct <= 0.0 || self.exiting {
            return Ok(());
        }
        let Some(entry_price) = self.filled_entry(ctx).and_then(|o| o.executed_price) else {
            return Ok(());
        };

        let stop = entry_price * (1.0 - self.config.stop_loss_pct / 100.0);
        if ctx.tick().bid <= stop {
            self.exit(ctx, "stop loss")?;
        }
        Ok(())
    }

    fn on_candle_close(&mut self, ctx: &mut StrategyContext<'_>, candle: &Candle) -> Result<(), StrategyError> {
        let rsi = ctx.indicator(&self.config.rsi_indicator)?;
        if candle.timeframe != rsi.timeframe() {
            return Ok(());
        }
        let fast = ctx.indicator(&self.config.fast_indicator)?;
        let slow = ctx.indicator(&self.config.slow_indicator)?;

        let (Some(rsi), Some(fast), Some(slow)) = (rsi.latest(), fast.latest(), slow.latest()) else {
            return Ok(());
        };

        match evaluate(rsi, fast, slow, candle.close, &self.config) {
            Signal::Buy if self.entry.is_none() => {
                if let Some(id) = ctx.open_order(OrderRequest::market(OrderSide::Buy, self.config.volume))? {
                    tracing::info!(
                        "📈 {} {}: buy {} (RSI={:.1}, fast={:.4}, slow={:.4})",
                        self.id,
                        ctx.symbol(),
                        self.config.volume,
                        rsi,
                        fast,
                        slow
                    );
                    self.entry = Some(id);
                }
            }
            Signal::Sell if self.filled_entry(ctx).is_some() => self.exit(ctx, "sell signal")?,
            _ => {}
        }
        Ok(())
    }

    fn on_transaction(&mut self, _ctx: &mut StrategyContext<'_>, order: &Order) -> Result<(), StrategyError> {
        let Some(entry) = self.entry else {
            return Ok(());
        };

        if order.id == entry && matches!(order.status, OrderStatus::Rejected | OrderStatus::Cancelled) {
            self.entry = None;
            self.exiting = false;
        } else if order.closes == Some(entry) {
            match order.status {
                OrderStatus::Filled => {
                    self.entry = None;
                    self.exiting = false;
                }
                OrderStatus::Rejected | OrderStatus::Cancelled => self.exiting = false,
                _ => {}
            }
        }
        Ok(())
    }
}
