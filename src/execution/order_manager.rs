use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{Fill, Order, OrderRequest, OrderStatus, VOLUME_EPSILON};
use crate::error::OrderError;
use crate::gateway::SymbolInfo;
use crate::models::{OrderSide, OrderType, Tick};

/// How orders reach a fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Filled locally against subsequent ticks
    Simulated,
    /// Submitted to and confirmed by a gateway
    Live,
}

/// Net position of one strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionState {
    /// Signed: positive long, negative short
    pub volume: f64,
    pub average_price: f64,
    pub realized_pnl: f64,
    pub commissions: f64,
}

/// A reduction of the position, realized at `exit_price`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub volume: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub return_pct: f64,
    pub closed_at: DateTime<Utc>,
}

/// Order book and accounting of one strategy on one asset
///
/// The only place orders are mutated. Every change is queued as an update
/// that the runtime turns into an event and an `on_transaction` call.
#[derive(Debug, Clone)]
pub struct OrderLifecycleManager {
    strategy_id: String,
    symbol: String,
    mode: ExecutionMode,
    allocation: f64,
    leverage: f64,
    fee_rate: f64,
    symbol_info: Option<SymbolInfo>,
    orders: Vec<Order>,
    position: PositionState,
    last_price: Option<f64>,
    trades: Vec<ClosedTrade>,
    updates: Vec<Order>,
}

impl OrderLifecycleManager {
    pub fn new(
        strategy_id: &str,
        symbol: &str,
        allocation: f64,
        leverage: f64,
        mode: ExecutionMode,
        fee_rate: f64,
    ) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            symbol: symbol.to_string(),
            mode,
            allocation,
            leverage,
            fee_rate,
            symbol_info: None,
            orders: Vec::new(),
            position: PositionState::default(),
            last_price: None,
            trades: Vec::new(),
            updates: Vec::new(),
        }
    }

    /// Apply exchange volume rules (live only)
    pub fn with_symbol_info(mut self, info: SymbolInfo) -> Self {
        self.symbol_info = Some(info);
        self
    }

    pub fn set_symbol_info(&mut self, info: SymbolInfo) {
        self.symbol_info = Some(info);
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn allocation(&self) -> f64 {
        self.allocation
    }

    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    pub fn set_fee_rate(&mut self, fee_rate: f64) {
        self.fee_rate = fee_rate;
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn order(&self, id: Uuid) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == id)
    }

    pub fn working_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.status.is_working())
    }

    pub fn position(&self) -> &PositionState {
        &self.position
    }

    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    /// Allocation plus realized PnL minus commissions
    pub fn balance(&self) -> f64 {
        self.allocation + self.position.realized_pnl - self.position.commissions
    }

    pub fn unrealized_pnl(&self) -> f64 {
        match self.last_price {
            Some(price) => self.position.volume * (price - self.position.average_price),
            None => 0.0,
        }
    }

    /// Balance marked to the last seen mid price
    pub fn nav(&self) -> f64 {
        self.balance() + self.unrealized_pnl()
    }

    /// Position notional relative to NAV
    pub fn exposure(&self) -> f64 {
        let nav = self.nav();
        match self.last_price {
            Some(price) if nav > 0.0 => self.position.volume.abs() * price / nav,
            _ => 0.0,
        }
    }

    /// Record a strategy decision
    ///
    /// Simulated orders are acknowledged at once (Created -> Opening -> Open).
    /// Live orders stay Created until the next gateway sync; a live volume is
    /// rounded down to the symbol step and rejected locally below the minimum.
    pub fn open(&mut self, request: &OrderRequest, at: DateTime<Utc>, seq: u64) -> Result<Uuid, OrderError> {
        request.validate()?;

        let mut order = Order::new(&self.strategy_id, &self.symbol, request, at, seq);

        match self.mode {
            ExecutionMode::Simulated => order.advance_to(OrderStatus::Open, at)?,
            ExecutionMode::Live => {
                if let Some(info) = &self.symbol_info {
                    order.volume = info.round_volume(order.volume);
                    if order.volume < info.min_quantity || order.volume <= 0.0 {
                        order.reason = Some(format!(
                            "volume {} below minimum {} for {}",
                            request.volume, info.min_quantity, self.symbol
                        ));
                        order.transition(OrderStatus::Rejected, at)?;
                    }
                }
            }
        }

        tracing::debug!(
            "{} {}: {:?} {:?} {} -> {:?}",
            self.strategy_id,
            self.symbol,
            order.side,
            order.order_type,
            order.volume,
            order.status
        );

        let id = order.id;
        self.updates.push(order.clone());
        self.orders.push(order);
        Ok(id)
    }

    /// Request cancellation of a working order
    pub fn cancel(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), OrderError> {
        let idx = self.index(id)?;
        let order = &mut self.orders[idx];

        if !matches!(order.status, OrderStatus::Open | OrderStatus::PartiallyFilled) {
            return Err(OrderError::InvalidTransition {
                id,
                from: order.status,
                to: OrderStatus::Cancelling,
            });
        }

        order.transition(OrderStatus::Cancelling, at)?;
        if self.mode == ExecutionMode::Simulated {
            order.transition(OrderStatus::Cancelled, at)?;
        }
        self.record(idx);
        Ok(())
    }

    /// Close an order
    ///
    /// A working order is cancelled (returns `None`). A filled order is
    /// offset with an opposite market order for its executed volume, whose id
    /// is returned.
    pub fn close(&mut self, id: Uuid, at: DateTime<Utc>, seq: u64) -> Result<Option<Uuid>, OrderError> {
        let idx = self.index(id)?;
        let order = &self.orders[idx];

        match order.status {
            OrderStatus::Open | OrderStatus::PartiallyFilled => {
                self.cancel(id, at)?;
                Ok(None)
            }
            OrderStatus::Filled => {
                let already_closing = self.orders.iter().any(|o| {
                    o.closes == Some(id) && !matches!(o.status, OrderStatus::Cancelled | OrderStatus::Rejected)
                });
                if already_closing {
                    return Err(OrderError::InvalidRequest(format!("order {} is already being closed", id)));
                }

                let request = OrderRequest::market(order.side.opposite(), order.executed_volume);
                let close_id = self.open(&request, at, seq)?;
                let idx = self.index(close_id)?;
                self.orders[idx].closes = Some(id);
                if let Some(update) = self.updates.last_mut() {
                    update.closes = Some(id);
                }
                Ok(Some(close_id))
            }
            status => Err(OrderError::InvalidRequest(format!(
                "order {} cannot be closed while {:?}",
                id, status
            ))),
        }
    }

    /// Advance simulated orders against a new tick
    ///
    /// Only orders decided on an earlier tick are eligible. Market orders
    /// fill at the opposing price (buy at ask, sell at bid). Limits fill at
    /// their price once strictly traded through. Stops trigger when touched
    /// and then fill like a market order on the following tick.
    pub fn on_tick(&mut self, tick: &Tick, seq: u64) -> Result<(), OrderError> {
        self.last_price = Some(tick.mid());

        if self.mode != ExecutionMode::Simulated {
            return Ok(());
        }

        for idx in 0..self.orders.len() {
            let order = &mut self.orders[idx];
            if !matches!(order.status, OrderStatus::Open | OrderStatus::PartiallyFilled)
                || order.decision_seq >= seq
            {
                continue;
            }

            let opposing = match order.side {
                OrderSide::Buy => tick.ask,
                OrderSide::Sell => tick.bid,
            };

            let fill_price = match order.order_type {
                OrderType::Market => Some(opposing),
                OrderType::Stop if order.triggered => Some(opposing),
                OrderType::Limit => order.price.filter(|limit| match order.side {
                    OrderSide::Buy => tick.ask < *limit,
                    OrderSide::Sell => tick.bid > *limit,
                }),
                OrderType::Stop => {
                    let touched = order.stop_price.is_some_and(|trigger| match order.side {
                        OrderSide::Buy => tick.ask >= trigger,
                        OrderSide::Sell => tick.bid <= trigger,
                    });
                    if touched {
                        order.triggered = true;
                        order.decision_seq = seq;
                        tracing::debug!("{} {}: stop {} triggered at {}", self.strategy_id, self.symbol, order.id, opposing);
                    }
                    None
                }
            };

            if let Some(price) = fill_price {
                let volume = order.remaining();
                self.fill(idx, price, volume, tick.timestamp)?;
            }
        }

        Ok(())
    }

    /// Cancel every working simulated order (end of run)
    pub fn cancel_working_simulated(&mut self, at: DateTime<Utc>) -> Result<usize, OrderError> {
        if self.mode != ExecutionMode::Simulated {
            return Ok(0);
        }
        let ids: Vec<Uuid> = self
            .orders
            .iter()
            .filter(|o| matches!(o.status, OrderStatus::Open | OrderStatus::PartiallyFilled))
            .map(|o| o.id)
            .collect();
        for id in &ids {
            self.cancel(*id, at)?;
        }
        Ok(ids.len())
    }

    /// Close the net simulated position at `tick` (end of run)
    ///
    /// A market order for the whole net volume fills immediately at the
    /// tick's opposing price. Returns its id, or `None` when flat.
    pub fn flatten_simulated(&mut self, tick: &Tick, seq: u64) -> Result<Option<Uuid>, OrderError> {
        if self.mode != ExecutionMode::Simulated || self.position.volume.abs() < VOLUME_EPSILON {
            return Ok(None);
        }

        let side = if self.position.volume > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let volume = self.position.volume.abs();
        let id = self.open(&OrderRequest::market(side, volume), tick.timestamp, seq)?;

        let idx = self.index(id)?;
        self.orders[idx].reason = Some("position closed at end of run".to_string());
        let price = match side {
            OrderSide::Buy => tick.ask,
            OrderSide::Sell => tick.bid,
        };
        self.last_price = Some(tick.mid());
        self.fill(idx, price, volume, tick.timestamp)?;
        Ok(Some(id))
    }

    /// Changes since the last drain, oldest first
    pub fn drain_updates(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.updates)
    }

    pub fn has_updates(&self) -> bool {
        !self.updates.is_empty()
    }

    /// Reconcile a gateway report
    ///
    /// Acknowledges the order if needed, books any new executed volume as a
    /// fill and walks the legal path to `status`. Reports for terminal orders
    /// are ignored.
    pub(crate) fn apply_gateway_report(
        &mut self,
        id: Uuid,
        report: GatewayReport,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let idx = self.index(id)?;
        let mut changed = false;

        let order = &mut self.orders[idx];
        if order.is_terminal() {
            return Ok(());
        }
        if let Some(gateway_id) = report.gateway_id {
            if order.gateway_id.as_deref() != Some(gateway_id.as_str()) {
                order.gateway_id = Some(gateway_id);
                changed = true;
            }
        }

        if report.status == OrderStatus::Rejected {
            if !matches!(order.status, OrderStatus::Created | OrderStatus::Opening) {
                return Err(OrderError::InvalidTransition {
                    id,
                    from: order.status,
                    to: OrderStatus::Rejected,
                });
            }
            order.reason = Some("rejected by gateway".to_string());
            order.advance_to(OrderStatus::Rejected, at)?;
            self.record(idx);
            return Ok(());
        }

        if matches!(order.status, OrderStatus::Created | OrderStatus::Opening)
            && !matches!(report.status, OrderStatus::Created | OrderStatus::Opening)
        {
            order.advance_to(OrderStatus::Open, at)?;
            changed = true;
        }

        let delta = report.executed_volume - order.executed_volume;
        if delta > VOLUME_EPSILON {
            let price = fill_price_for_delta(order, report.executed_volume, report.average_price);
            let volume = delta.min(order.remaining());
            self.fill(idx, price, volume, at)?;
        }

        let order = &mut self.orders[idx];
        if matches!(report.status, OrderStatus::Cancelling | OrderStatus::Cancelled)
            && order.status != report.status
            && !order.is_terminal()
        {
            order.advance_to(report.status, at)?;
            changed = true;
        }

        if changed {
            self.record(idx);
        }
        Ok(())
    }

    pub(crate) fn reject(&mut self, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<(), OrderError> {
        let idx = self.index(id)?;
        let order = &mut self.orders[idx];
        order.reason = Some(reason.to_string());
        order.advance_to(OrderStatus::Rejected, at)?;
        self.record(idx);
        Ok(())
    }

    pub(crate) fn order_mut(&mut self, id: Uuid) -> Result<&mut Order, OrderError> {
        let idx = self.index(id)?;
        Ok(&mut self.orders[idx])
    }

    pub(crate) fn record_update(&mut self, id: Uuid) -> Result<(), OrderError> {
        let idx = self.index(id)?;
        self.record(idx);
        Ok(())
    }

    fn index(&self, id: Uuid) -> Result<usize, OrderError> {
        self.orders
            .iter()
            .position(|o| o.id == id)
            .ok_or(OrderError::NotFound(id))
    }

    fn record(&mut self, idx: usize) {
        self.updates.push(self.orders[idx].clone());
    }

    fn fill(&mut self, idx: usize, price: f64, volume: f64, at: DateTime<Utc>) -> Result<(), OrderError> {
        let commission = price * volume * self.fee_rate;
        let side = self.orders[idx].side;

        self.orders[idx].apply_fill(Fill {
            price,
            volume,
            commission,
            timestamp: at,
        })?;
        self.apply_position(side, price, volume, commission, at);
        self.record(idx);

        tracing::info!(
            "💰 {} {}: {:?} {:.6} @ {:.4} (fee {:.4})",
            self.strategy_id,
            self.symbol,
            side,
            volume,
            price,
            commission
        );
        Ok(())
    }

    fn apply_position(&mut self, side: OrderSide, price: f64, volume: f64, commission: f64, at: DateTime<Utc>) {
        let signed = side.sign() * volume;
        let position = &mut self.position;
        position.commissions += commission;

        if position.volume.abs() < VOLUME_EPSILON || position.volume.signum() == signed.signum() {
            let total = position.volume.abs() + volume;
            position.average_price = (position.average_price * position.volume.abs() + price * volume) / total;
            position.volume += signed;
            return;
        }

        // Reducing (and possibly flipping) the position
        let direction = position.volume.signum();
        let closing = volume.min(position.volume.abs());
        let entry_price = position.average_price;
        let pnl = closing * (price - entry_price) * direction;

        position.realized_pnl += pnl;
        position.volume += signed;
        if position.volume.abs() < VOLUME_EPSILON {
            position.volume = 0.0;
            position.average_price = 0.0;
        } else if position.volume.signum() != direction {
            position.average_price = price;
        }

        self.trades.push(ClosedTrade {
            volume: closing,
            entry_price,
            exit_price: price,
            pnl,
            return_pct: (price / entry_price - 1.0) * 100.0 * direction,
            closed_at: at,
        });
    }
}

/// Order state as reported by the exchange, already mapped to local terms
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GatewayReport {
    pub gateway_id: Option<String>,
    pub status: OrderStatus,
    pub executed_volume: f64,
    pub average_price: Option<f64>,
}

/// Price of the newly executed slice given the cumulative average
fn fill_price_for_delta(order: &Order, executed_volume: f64, average_price: Option<f64>) -> f64 {
    let fallback = order.price.or(order.executed_price).unwrap_or(0.0);
    let Some(average) = average_price else {
        return fallback;
    };

    let delta = executed_volume - order.executed_volume;
    let previous = order.executed_price.unwrap_or(average) * order.executed_volume;
    let price = (average * executed_volume - previous) / delta;
    if price.is_finite() && price > 0.0 {
        price
    } else {
        average
    }
}
