use chrono::{DateTime, Utc};

use super::{BoundaryClock, MarketView, Strategy, StrategyContext, StrategyKind};
use crate::analytics::{PerformanceTracker, StrategySnapshot};
use crate::coordinator::{ErrorCategory, EventOutbox};
use crate::error::StrategyError;
use crate::execution::OrderLifecycleManager;
use crate::models::{Candle, Tick};

/// Bound on on_transaction cascades within one tick
pub const MAX_TRANSACTION_ROUNDS: usize = 16;

/// A strategy with its own order book
#[derive(Debug)]
pub struct StrategySlot<S: Strategy = StrategyKind> {
    id: String,
    strategy: S,
    book: OrderLifecycleManager,
    halted: bool,
    performance: PerformanceTracker,
}

impl<S: Strategy> StrategySlot<S> {
    pub fn new(id: &str, strategy: S, book: OrderLifecycleManager) -> Self {
        let performance = PerformanceTracker::new(book.nav());
        Self {
            id: id.to_string(),
            strategy,
            book,
            halted: false,
            performance,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn book(&self) -> &OrderLifecycleManager {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut OrderLifecycleManager {
        &mut self.book
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot::capture(&self.id, self.strategy.name(), self.halted, &self.book, &self.performance)
    }
}

/// Runs the strategies of one asset
///
/// Strategies run sequentially in registration order. Each only sees its own
/// orders and shares nothing with the others.
#[derive(Debug)]
pub struct StrategyRuntime<S: Strategy = StrategyKind> {
    symbol: String,
    slots: Vec<StrategySlot<S>>,
    clock: BoundaryClock,
}

impl<S: Strategy> StrategyRuntime<S> {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            slots: Vec::new(),
            clock: BoundaryClock::new(),
        }
    }

    pub fn register(&mut self, id: &str, strategy: S, book: OrderLifecycleManager) {
        tracing::info!("🧠 {}: registered strategy '{}' ({})", self.symbol, id, strategy.name());
        self.slots.push(StrategySlot::new(id, strategy, book));
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn slots(&self) -> &[StrategySlot<S>] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [StrategySlot<S>] {
        &mut self.slots
    }

    pub fn slot(&self, id: &str) -> Option<&StrategySlot<S>> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn snapshots(&self) -> Vec<StrategySnapshot> {
        self.slots.iter().map(StrategySlot::snapshot).collect()
    }

    /// Deliver a tick
    ///
    /// Per strategy: simulated fills for the tick, `on_tick`, the boundary
    /// hooks that fired, then `on_transaction` for every order change.
    pub fn on_tick(
        &mut self,
        tick: &Tick,
        seq: u64,
        market: MarketView<'_>,
        can_open: bool,
        outbox: &mut EventOutbox,
    ) {
        let boundaries = self.clock.advance(tick.timestamp);

        for slot in &mut self.slots {
            if let Err(e) = slot.book.on_tick(tick, seq) {
                tracing::error!("{} {}: order update failed: {}", slot.id, self.symbol, e);
                outbox.error(ErrorCategory::Engine, Some(&self.symbol), e.to_string());
            }
            slot.performance.update(slot.book.nav(), tick.timestamp);

            run_hook(slot, tick, seq, market, can_open, outbox, "on_tick", |s, ctx| s.on_tick(ctx));
            if boundaries.minute {
                run_hook(slot, tick, seq, market, can_open, outbox, "on_new_minute", |s, ctx| {
                    s.on_new_minute(ctx)
                });
            }
            if boundaries.hour {
                run_hook(slot, tick, seq, market, can_open, outbox, "on_new_hour", |s, ctx| {
                    s.on_new_hour(ctx)
                });
            }
            if boundaries.day {
                run_hook(slot, tick, seq, market, can_open, outbox, "on_new_day", |s, ctx| {
                    s.on_new_day(ctx)
                });
            }
            if boundaries.week {
                run_hook(slot, tick, seq, market, can_open, outbox, "on_new_week", |s, ctx| {
                    s.on_new_week(ctx)
                });
            }
            if boundaries.month {
                run_hook(slot, tick, seq, market, can_open, outbox, "on_new_month", |s, ctx| {
                    s.on_new_month(ctx)
                });
            }

            drain_transactions(slot, tick, seq, market, can_open, outbox);
        }
    }

    /// Deliver a closed candle, after the indicators ran for it
    pub fn on_candle_close(
        &mut self,
        candle: &Candle,
        tick: &Tick,
        seq: u64,
        market: MarketView<'_>,
        can_open: bool,
        outbox: &mut EventOutbox,
    ) {
        for slot in &mut self.slots {
            run_hook(slot, tick, seq, market, can_open, outbox, "on_candle_close", |s, ctx| {
                s.on_candle_close(ctx, candle)
            });
            drain_transactions(slot, tick, seq, market, can_open, outbox);
        }
    }

    /// Deliver order changes made outside the hooks (live gateway sync)
    pub fn dispatch_transactions(
        &mut self,
        tick: &Tick,
        seq: u64,
        market: MarketView<'_>,
        can_open: bool,
        outbox: &mut EventOutbox,
    ) {
        for slot in &mut self.slots {
            drain_transactions(slot, tick, seq, market, can_open, outbox);
        }
    }

    /// End of run: `on_end`, then simulated books are settled
    ///
    /// Working simulated orders are cancelled and any open simulated position
    /// is closed at the last tick, so the final figures are fully realized.
    /// Order changes are still reported as events but no longer delivered
    /// to the strategies.
    pub fn on_end(&mut self, tick: &Tick, seq: u64, market: MarketView<'_>, at: DateTime<Utc>, outbox: &mut EventOutbox) {
        for slot in &mut self.slots {
            run_hook(slot, tick, seq, market, false, outbox, "on_end", |s, ctx| s.on_end(ctx));

            match slot.book.cancel_working_simulated(at) {
                Ok(0) => {}
                Ok(n) => tracing::info!("{} {}: cancelled {} working order(s) at end of run", slot.id, self.symbol, n),
                Err(e) => outbox.error(ErrorCategory::Engine, Some(&self.symbol), e.to_string()),
            }
            match slot.book.flatten_simulated(tick, seq) {
                Ok(Some(_)) => tracing::info!("{} {}: closed open position at end of run", slot.id, self.symbol),
                Ok(None) => {}
                Err(e) => outbox.error(ErrorCategory::Engine, Some(&self.symbol), e.to_string()),
            }

            let working = slot.book.working_orders().count();
            if working > 0 {
                tracing::warn!("{} {}: {} live order(s) left working", slot.id, self.symbol, working);
            }

            for order in slot.book.drain_updates() {
                outbox.order_update(&slot.id, order);
            }
            slot.performance.update(slot.book.nav(), at);
        }
    }
}

/// Run one hook; a failure halts the strategy for the rest of the run
#[allow(clippy::too_many_arguments)]
fn run_hook<S: Strategy>(
    slot: &mut StrategySlot<S>,
    tick: &Tick,
    seq: u64,
    market: MarketView<'_>,
    can_open: bool,
    outbox: &mut EventOutbox,
    hook: &str,
    f: impl FnOnce(&mut S, &mut StrategyContext<'_>) -> Result<(), StrategyError>,
) {
    if slot.halted {
        return;
    }

    let mut ctx = StrategyContext::new(&slot.id, tick, seq, market, &mut slot.book, can_open);
    if let Err(e) = f(&mut slot.strategy, &mut ctx) {
        slot.halted = true;
        tracing::error!("❌ strategy '{}' halted in {}: {}", slot.id, hook, e);
        outbox.error(
            ErrorCategory::Strategy,
            Some(market.symbol),
            format!("strategy '{}' halted in {}: {}", slot.id, hook, e),
        );
    }
}

/// Report order changes and feed them back through `on_transaction`
fn drain_transactions<S: Strategy>(
    slot: &mut StrategySlot<S>,
    tick: &Tick,
    seq: u64,
    market: MarketView<'_>,
    can_open: bool,
    outbox: &mut EventOutbox,
) {
    for _ in 0..MAX_TRANSACTION_ROUNDS {
        let updates = slot.book.drain_updates();
        if updates.is_empty() {
            return;
        }
        for order in updates {
            outbox.order_update(&slot.id, order.clone());
            run_hook(slot, tick, seq, market, can_open, outbox, "on_transaction", |s, ctx| {
                s.on_transaction(ctx, &order)
            });
        }
    }

    if slot.book.has_updates() {
        tracing::warn!(
            "{} {}: order changes still cascading after {} rounds",
            slot.id,
            market.symbol,
            MAX_TRANSACTION_ROUNDS
        );
        for order in slot.book.drain_updates() {
            outbox.order_update(&slot.id, order);
        }
    }
}
