use uuid::Uuid;

use crate::candles::CandleBuffer;
use crate::error::StrategyError;
use crate::execution::{Order, OrderLifecycleManager, OrderRequest, PositionState};
use crate::indicators::{IndicatorState, IndicatorView};
use crate::models::Tick;

/// Read-only market state of one asset
#[derive(Debug, Clone, Copy)]
pub struct MarketView<'a> {
    pub symbol: &'a str,
    pub candles: &'a CandleBuffer,
    pub indicators: IndicatorView<'a>,
}

/// What a strategy hook can see and do
///
/// Market state is read-only. Orders go through the strategy's own
/// lifecycle manager and take effect before the hook returns.
pub struct StrategyContext<'a> {
    strategy_id: &'a str,
    tick: &'a Tick,
    seq: u64,
    market: MarketView<'a>,
    book: &'a mut OrderLifecycleManager,
    can_open: bool,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        strategy_id: &'a str,
        tick: &'a Tick,
        seq: u64,
        market: MarketView<'a>,
        book: &'a mut OrderLifecycleManager,
        can_open: bool,
    ) -> Self {
        Self {
            strategy_id,
            tick,
            seq,
            market,
            book,
            can_open,
        }
    }

    pub fn strategy_id(&self) -> &str {
        self.strategy_id
    }

    pub fn symbol(&self) -> &str {
        self.market.symbol
    }

    pub fn tick(&self) -> &Tick {
        self.tick
    }

    pub fn candles(&self) -> &CandleBuffer {
        self.market.candles
    }

    pub fn indicators(&self) -> IndicatorView<'a> {
        self.market.indicators
    }

    /// A registered indicator, or an error naming it
    pub fn indicator(&self, name: &str) -> Result<&'a IndicatorState, StrategyError> {
        self.market
            .indicators
            .get(name)
            .ok_or_else(|| StrategyError::MissingIndicator {
                strategy: self.strategy_id.to_string(),
                indicator: name.to_string(),
            })
    }

    /// False during live warm-up and on replayed ticks in production
    pub fn can_open_orders(&self) -> bool {
        self.can_open
    }

    pub fn orders(&self) -> &[Order] {
        self.book.orders()
    }

    pub fn order(&self, id: Uuid) -> Option<&Order> {
        self.book.order(id)
    }

    pub fn position(&self) -> &PositionState {
        self.book.position()
    }

    pub fn balance(&self) -> f64 {
        self.book.balance()
    }

    pub fn nav(&self) -> f64 {
        self.book.nav()
    }

    /// Place an order
    ///
    /// Returns `Ok(None)` without placing anything while opening is blocked.
    pub fn open_order(&mut self, request: OrderRequest) -> Result<Option<Uuid>, StrategyError> {
        if !self.can_open {
            tracing::debug!("{}: order opening blocked at {}", self.strategy_id, self.tick.timestamp);
            return Ok(None);
        }
        let id = self.book.open(&request, self.tick.timestamp, self.seq)?;
        Ok(Some(id))
    }

    /// Cancel a working order, or offset a filled one (returns the offsetting order)
    pub fn close_order(&mut self, id: Uuid) -> Result<Option<Uuid>, StrategyError> {
        Ok(self.book.close(id, self.tick.timestamp, self.seq)?)
    }

    pub fn cancel_order(&mut self, id: Uuid) -> Result<(), StrategyError> {
        Ok(self.book.cancel(id, self.tick.timestamp)?)
    }
}
