// Trading strategy module
pub mod clock;
pub mod context;
pub mod interval;
pub mod momentum;
pub mod runtime;

pub use clock::{Boundaries, BoundaryClock};
pub use context::{MarketView, StrategyContext};
pub use interval::IntervalStrategy;
pub use momentum::MomentumStrategy;
pub use runtime::{StrategyRuntime, StrategySlot};

use crate::config::StrategyDefinition;
use crate::error::{ConfigError, StrategyError};
use crate::execution::Order;
use crate::models::Candle;

/// Lifecycle hooks a strategy can react to
///
/// Per tick the runtime calls, in order: `on_tick`, the calendar boundary
/// hooks that fired (minute, hour, day, week, month), then `on_transaction`
/// once per change of the strategy's own orders. `on_candle_close` runs when
/// a candle closes, after the indicators for that close. An `Err` from any
/// hook halts the strategy for the rest of the run.
pub trait Strategy {
    fn name(&self) -> &str;

    fn on_tick(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_candle_close(&mut self, _ctx: &mut StrategyContext<'_>, _candle: &Candle) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_new_minute(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_new_hour(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_new_day(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_new_week(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_new_month(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_transaction(&mut self, _ctx: &mut StrategyContext<'_>, _order: &Order) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_end(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// Built-in strategies, dispatched statically
#[derive(Debug, Clone)]
pub enum StrategyKind {
    Momentum(MomentumStrategy),
    Interval(IntervalStrategy),
}

impl StrategyKind {
    /// Build a strategy from its portfolio definition
    pub fn from_definition(def: &StrategyDefinition) -> Result<Self, ConfigError> {
        match def.kind.as_str() {
            "momentum" => Ok(StrategyKind::Momentum(MomentumStrategy::from_params(&def.id, &def.params)?)),
            "interval" => Ok(StrategyKind::Interval(IntervalStrategy::from_params(&def.id, &def.params)?)),
            other => Err(ConfigError::Invalid(format!(
                "unknown strategy kind '{}' for '{}'",
                other, def.id
            ))),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $s:ident => $call:expr) => {
        match $self {
            StrategyKind::Momentum($s) => $call,
            StrategyKind::Interval($s) => $call,
        }
    };
}

impl Strategy for StrategyKind {
    fn name(&self) -> &str {
        delegate!(self, s => s.name())
    }

    fn on_tick(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        delegate!(self, s => s.on_tick(ctx))
    }

    fn on_candle_close(&mut self, ctx: &mut StrategyContext<'_>, candle: &Candle) -> Result<(), StrategyError> {
        delegate!(self, s => s.on_candle_close(ctx, candle))
    }

    fn on_new_minute(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        delegate!(self, s => s.on_new_minute(ctx))
    }

    fn on_new_hour(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        delegate!(self, s => s.on_new_hour(ctx))
    }

    fn on_new_day(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        delegate!(self, s => s.on_new_day(ctx))
    }

    fn on_new_week(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        delegate!(self, s => s.on_new_week(ctx))
    }

    fn on_new_month(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        delegate!(self, s => s.on_new_month(ctx))
    }

    fn on_transaction(&mut self, ctx: &mut StrategyContext<'_>, order: &Order) -> Result<(), StrategyError> {
        delegate!(self, s => s.on_transaction(ctx, order))
    }

    fn on_end(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), StrategyError> {
        delegate!(self, s => s.on_end(ctx))
    }
}
