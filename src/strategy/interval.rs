use uuid::Uuid;

use super::{Strategy, StrategyContext};
use crate::config::StrategyParams;
use crate::error::{ConfigError, StrategyError};
use crate::execution::{Order, OrderRequest, OrderStatus};
use crate::models::OrderSide;

/// Settings for [`IntervalStrategy`]
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalConfig {
    pub interval_minutes: u32,
    pub volume: f64,
    pub side: OrderSide,
    /// Enter with a limit this far (percent) inside the quote, 0 for market
    pub entry_offset_pct: f64,
    /// 0 disables
    pub take_profit_pct: f64,
    /// Protective stop distance from the entry price, 0 disables
    pub stop_loss_pct: f64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            volume: 1.0,
            side: OrderSide::Buy,
            entry_offset_pct: 0.0,
            take_profit_pct: 0.0,
            stop_loss_pct: 0.0,
        }
    }
}

/// Opens a position every N minutes
///
/// Each interval closes the previous position (cancelling its protective
/// stop) and opens a new one. A filled entry gets a stop order at
/// `stop_loss_pct`; take profit is watched on every tick and closes with a
/// market order.
#[derive(Debug, Clone)]
pub struct IntervalStrategy {
    id: String,
    config: IntervalConfig,
    minutes: u32,
    entry: Option<Uuid>,
    stop: Option<Uuid>,
    exiting: bool,
}

impl IntervalStrategy {
    pub fn new(id: &str, config: IntervalConfig) -> Self {
        Self {
            id: id.to_string(),
            config,
            minutes: 0,
            entry: None,
            stop: None,
            exiting: false,
        }
    }

    pub fn from_params(id: &str, params: &StrategyParams) -> Result<Self, ConfigError> {
        let defaults = IntervalConfig::default();

        let interval = params.number("interval_minutes", defaults.interval_minutes as f64)?;
        if interval < 1.0 || interval.fract() != 0.0 {
            return Err(ConfigError::Invalid(format!(
                "strategy '{}': interval_minutes must be a positive whole number",
                id
            )));
        }

        let side = match params.text("side", "buy")?.to_lowercase().as_str() {
            "buy" | "long" => OrderSide::Buy,
            "sell" | "short" => OrderSide::Sell,
            other => {
                return Err(ConfigError::Invalid(format!("strategy '{}': unknown side '{}'", id, other)));
            }
        };

        let config = IntervalConfig {
            interval_minutes: interval as u32,
            volume: params.number("volume", defaults.volume)?,
            side,
            entry_offset_pct: params.number("entry_offset_pct", defaults.entry_offset_pct)?,
            take_profit_pct: params.number("take_profit_pct", defaults.take_profit_pct)?,
            stop_loss_pct: params.number("stop_loss_pct", defaults.stop_loss_pct)?,
        };

        if config.volume <= 0.0 {
            return Err(ConfigError::Invalid(format!("strategy '{}': volume must be positive", id)));
        }
        if config.entry_offset_pct < 0.0 || config.take_profit_pct < 0.0 || config.stop_loss_pct < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "strategy '{}': percentages cannot be negative",
                id
            )));
        }
        if config.stop_loss_pct >= 100.0 && config.side == OrderSide::Buy {
            return Err(ConfigError::Invalid(format!(
                "strategy '{}': stop_loss_pct must be below 100",
                id
            )));
        }

        Ok(Self::new(id, config))
    }

    pub fn config(&self) -> &IntervalConfig {
        &self.config
    }

    pub fn entry(&self) -> Option<Uuid> {
        self.entry
    }

    pub fn stop(&self) -> Option<Uuid> {
        self.stop
    }

    /// Signed distance from the entry, positive when in profit
    fn direction(&self) -> f64 {
        self.config.side.sign()
    }

    fn open_entry(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        let tick = ctx.tick();
        let request = if self.config.entry_offset_pct > 0.0 {
            let offset = self.config.entry_offset_pct / 100.0;
            let price = match self.config.side {
                OrderSide::Buy => tick.bid * (1.0 - offset),
                OrderSide::Sell => tick.ask * (1.0 + offset),
            };
            OrderRequest::limit(self.config.side, self.config.volume, price)
        } else {
            OrderRequest::market(self.config.side, self.config.volume)
        };

        if let Some(id) = ctx.open_order(request)? {
            tracing::info!(
                "⏰ {} {}: interval entry {:?} {}",
                self.id,
                ctx.symbol(),
                self.config.side,
                self.config.volume
            );
            self.entry = Some(id);
            self.exiting = false;
        }
        Ok(())
    }

    /// Leave the current position or drop a pending entry
    fn exit(&mut self, ctx: &mut StrategyContext<'_>, reason: &str) -> Result<(), StrategyError> {
        if let Some(stop) = self.stop.take() {
            if ctx.order(stop).is_some_and(|o| o.status.is_working()) {
                ctx.cancel_order(stop)?;
            }
        }

        let Some(entry) = self.entry else {
            return Ok(());
        };
        let status = ctx.order(entry).map(|o| o.status);

        match status {
            Some(OrderStatus::Filled) if !self.exiting => {
                tracing::info!("🔚 {} {}: closing position ({})", self.id, ctx.symbol(), reason);
                ctx.close_order(entry)?;
                self.exiting = true;
                self.entry = None;
            }
            Some(OrderStatus::Open | OrderStatus::PartiallyFilled) => {
                ctx.close_order(entry)?;
                self.entry = None;
            }
            Some(OrderStatus::Filled) => self.entry = None,
            _ => {}
        }
        Ok(())
    }
}

impl Strategy for IntervalStrategy {
    fn name(&self) -> &str {
        "interval"
    }

    fn on_tick(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        if self.config.take_profit_pct <= 0.0 || self.exiting {
            return Ok(());
        }
        let Some(entry_price) = self
            .entry
            .and_then(|id| ctx.order(id))
            .filter(|o| o.status == OrderStatus::Filled)
            .and_then(|o| o.executed_price)
        else {
            return Ok(());
        };

        let exit_price = match self.config.side {
            OrderSide::Buy => ctx.tick().bid,
            OrderSide::Sell => ctx.tick().ask,
        };
        let gain_pct = (exit_price / entry_price - 1.0) * 100.0 * self.direction();
        if gain_pct >= self.config.take_profit_pct {
            self.exit(ctx, "take profit")?;
        }
        Ok(())
    }

    fn on_new_minute(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        self.minutes += 1;
        if self.minutes < self.config.interval_minutes {
            return Ok(());
        }
        self.minutes = 0;

        // Waiting for a previous close to settle
        if self.exiting {
            return Ok(());
        }
        self.exit(ctx, "interval elapsed")?;
        if ctx.can_open_orders() {
            self.open_entry(ctx)?;
        }
        Ok(())
    }

    fn on_transaction(&mut self, ctx: &mut StrategyContext<'_>, order: &Order) -> Result<(), StrategyError> {
        if Some(order.id) == self.entry {
            match order.status {
                OrderStatus::Filled if self.config.stop_loss_pct > 0.0 && self.stop.is_none() => {
                    let entry_price = order.executed_price.unwrap_or(ctx.tick().mid());
                    let trigger = entry_price * (1.0 - self.direction() * self.config.stop_loss_pct / 100.0);
                    let request = OrderRequest::stop(self.config.side.opposite(), order.executed_volume, trigger);
                    self.stop = ctx.open_order(request)?;
                    tracing::debug!("{} {}: stop at {:.4}", self.id, ctx.symbol(), trigger);
                }
                OrderStatus::Rejected | OrderStatus::Cancelled => self.entry = None,
                _ => {}
            }
        } else if Some(order.id) == self.stop && order.status == OrderStatus::Filled {
            tracing::info!("🛑 {} {}: stop loss filled", self.id, ctx.symbol());
            self.stop = None;
            self.entry = None;
        } else if order.closes.is_some() && order.is_terminal() {
            self.exiting = false;
        }
        Ok(())
    }

    fn on_end(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        tracing::debug!("{} {}: run ended with entry {:?}", self.id, ctx.symbol(), self.entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamValue;

    #[test]
    fn test_from_params() {
        let mut params = StrategyParams::default();
        params.insert("interval_minutes", ParamValue::Number(5.0));
        params.insert("take_profit_pct", ParamValue::Number(1.5));
        params.insert("side", ParamValue::Text("short".to_string()));

        let strategy = IntervalStrategy::from_params("i1", &params).unwrap();
        assert_eq!(strategy.config().interval_minutes, 5);
        assert_eq!(strategy.config().take_profit_pct, 1.5);
        assert_eq!(strategy.config().side, OrderSide::Sell);
        assert_eq!(strategy.config().volume, 1.0);
    }

    #[test]
    fn test_from_params_validation() {
        let mut params = StrategyParams::default();
        params.insert("interval_minutes", ParamValue::Number(0.0));
        assert!(IntervalStrategy::from_params("i1", &params).is_err());

        let mut params = StrategyParams::default();
        params.insert("interval_minutes", ParamValue::Number(2.5));
        assert!(IntervalStrategy::from_params("i1", &params).is_err());

        let mut params = StrategyParams::default();
        params.insert("side", ParamValue::Text("sideways".to_string()));
        assert!(IntervalStrategy::from_params("i1", &params).is_err());

        let mut params = StrategyParams::default();
        params.insert("stop_loss_pct", ParamValue::Number(-1.0));
        assert!(IntervalStrategy::from_params("i1", &params).is_err());
    }
}
