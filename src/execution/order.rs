use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::error::OrderError;
use crate::models::{OrderSide, OrderType};

/// Volumes closer than this are treated as equal
pub const VOLUME_EPSILON: f64 = 1e-9;

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Recorded locally, not yet sent
    Created,
    /// Sent, waiting for acknowledgment
    Opening,
    /// Acknowledged and working
    Open,
    PartiallyFilled,
    Filled,
    /// Cancel requested, not yet confirmed
    Cancelling,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// States reachable in one step
    pub fn next_states(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Created => &[Opening, Rejected],
            Opening => &[Open, Rejected],
            Open => &[PartiallyFilled, Filled, Cancelling],
            PartiallyFilled => &[PartiallyFilled, Filled, Cancelling],
            // A fill can race a cancel request
            Cancelling => &[Cancelled, Filled, PartiallyFilled],
            Filled | Cancelled | Rejected => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.next_states().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Acknowledged and not yet terminal
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            OrderStatus::Open | OrderStatus::PartiallyFilled | OrderStatus::Cancelling
        )
    }

    /// Shortest legal path to `target`, excluding the current state
    ///
    /// `Some(vec![])` when already there, `None` when unreachable.
    pub fn path_to(&self, target: OrderStatus) -> Option<Vec<OrderStatus>> {
        if *self == target {
            return Some(Vec::new());
        }

        let mut queue = VecDeque::from([vec![*self]]);
        let mut seen = vec![*self];

        while let Some(path) = queue.pop_front() {
            let last = path[path.len() - 1];
            for next in last.next_states() {
                if seen.contains(next) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(*next);
                if *next == target {
                    return Some(extended.into_iter().skip(1).collect());
                }
                seen.push(*next);
                queue.push_back(extended);
            }
        }

        None
    }
}

/// What a strategy asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub order_type: OrderType,
    pub volume: f64,
    /// Limit price
    pub price: Option<f64>,
    /// Stop trigger price
    pub stop_price: Option<f64>,
}

impl OrderRequest {
    pub fn market(side: OrderSide, volume: f64) -> Self {
        Self {
            side,
            order_type: OrderType::Market,
            volume,
            price: None,
            stop_price: None,
        }
    }

    pub fn limit(side: OrderSide, volume: f64, price: f64) -> Self {
        Self {
            side,
            order_type: OrderType::Limit,
            volume,
            price: Some(price),
            stop_price: None,
        }
    }

    pub fn stop(side: OrderSide, volume: f64, trigger: f64) -> Self {
        Self {
            side,
            order_type: OrderType::Stop,
            volume,
            price: None,
            stop_price: Some(trigger),
        }
    }

    pub fn validate(&self) -> Result<(), OrderError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;

        if !positive(self.volume) {
            return Err(OrderError::InvalidRequest(format!("volume must be positive, got {}", self.volume)));
        }
        match self.order_type {
            OrderType::Limit if !self.price.is_some_and(positive) => Err(OrderError::InvalidRequest(
                "limit order needs a positive price".to_string(),
            )),
            OrderType::Stop if !self.stop_price.is_some_and(positive) => Err(OrderError::InvalidRequest(
                "stop order needs a positive trigger price".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// One execution against an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub volume: f64,
    pub commission: f64,
    pub timestamp: DateTime<Utc>,
}

/// An order with full lifecycle tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Sent to the exchange so a retried submission can be recognised
    pub client_order_id: String,
    pub gateway_id: Option<String>,
    pub strategy_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub volume: f64,
    pub executed_volume: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    /// Volume-weighted average fill price
    pub executed_price: Option<f64>,
    pub commission: f64,
    pub fills: Vec<Fill>,
    /// Filled order this one offsets
    pub closes: Option<Uuid>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Tick sequence of the decision (or of the stop trigger)
    #[serde(skip)]
    pub(crate) decision_seq: u64,
    #[serde(skip)]
    pub(crate) triggered: bool,
    #[serde(skip)]
    pub(crate) submit_attempts: u32,
}

impl Order {
    pub fn new(
        strategy_id: &str,
        symbol: &str,
        request: &OrderRequest,
        created_at: DateTime<Utc>,
        decision_seq: u64,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            client_order_id: id.simple().to_string(),
            gateway_id: None,
            strategy_id: strategy_id.to_string(),
            symbol: symbol.to_string(),
            side: request.side,
            order_type: request.order_type,
            status: OrderStatus::Created,
            volume: request.volume,
            executed_volume: 0.0,
            price: request.price,
            stop_price: request.stop_price,
            executed_price: None,
            commission: 0.0,
            fills: Vec::new(),
            closes: None,
            reason: None,
            created_at,
            updated_at: created_at,
            decision_seq,
            triggered: false,
            submit_attempts: 0,
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.volume - self.executed_volume).max(0.0)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Single-step transition
    pub fn transition(&mut self, next: OrderStatus, at: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    /// Walk the shortest legal path to `target`
    pub fn advance_to(&mut self, target: OrderStatus, at: DateTime<Utc>) -> Result<(), OrderError> {
        let path = self.status.path_to(target).ok_or(OrderError::InvalidTransition {
            id: self.id,
            from: self.status,
            to: target,
        })?;
        for status in path {
            self.transition(status, at)?;
        }
        Ok(())
    }

    /// Record an execution and move to PartiallyFilled or Filled
    pub fn apply_fill(&mut self, fill: Fill) -> Result<(), OrderError> {
        let remaining = self.remaining();
        if fill.volume > remaining + VOLUME_EPSILON {
            return Err(OrderError::Overfill {
                id: self.id,
                volume: fill.volume,
                remaining,
            });
        }

        let complete = remaining - fill.volume <= VOLUME_EPSILON;
        let next = if complete {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.transition(next, fill.timestamp)?;

        let notional = self.executed_price.unwrap_or(0.0) * self.executed_volume + fill.price * fill.volume;
        self.executed_volume = if complete {
            self.volume
        } else {
            self.executed_volume + fill.volume
        };
        self.executed_price = Some(notional / self.executed_volume);
        self.commission += fill.commission;
        self.fills.push(fill);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [OrderStatus; 8] = [
        OrderStatus::Created,
        OrderStatus::Opening,
        OrderStatus::Open,
        OrderStatus::PartiallyFilled,
        OrderStatus::Filled,
        OrderStatus::Cancelling,
        OrderStatus::Cancelled,
        OrderStatus::Rejected,
    ];

    fn open_order(volume: f64) -> Order {
        let mut order = Order::new(
            "s1",
            "BTCUSDT",
            &OrderRequest::market(OrderSide::Buy, volume),
            Utc::now(),
            0,
        );
        order.advance_to(OrderStatus::Open, Utc::now()).unwrap();
        order
    }

    fn fill(price: f64, volume: f64) -> Fill {
        Fill {
            price,
            volume,
            commission: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_happy_path() {
        let mut order = open_order(2.0);
        assert_eq!(order.status, OrderStatus::Open);

        order.apply_fill(fill(100.0, 1.0)).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);

        order.apply_fill(fill(110.0, 1.0)).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.executed_price, Some(105.0));
        assert_eq!(order.executed_volume, 2.0);
        assert!(order.is_terminal());
    }

    #[test]
    fn test_overfill_is_rejected() {
        let mut order = open_order(1.0);
        assert!(matches!(
            order.apply_fill(fill(100.0, 2.0)),
            Err(OrderError::Overfill { .. })
        ));
        assert_eq!(order.status, OrderStatus::Open);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [OrderStatus::Filled, OrderStatus::Cancelled, OrderStatus::Rejected] {
            for next in ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_path_to() {
        assert_eq!(
            OrderStatus::Created.path_to(OrderStatus::Open),
            Some(vec![OrderStatus::Opening, OrderStatus::Open])
        );
        assert_eq!(
            OrderStatus::Open.path_to(OrderStatus::Cancelled),
            Some(vec![OrderStatus::Cancelling, OrderStatus::Cancelled])
        );
        assert_eq!(OrderStatus::Open.path_to(OrderStatus::Open), Some(vec![]));
        assert_eq!(OrderStatus::Filled.path_to(OrderStatus::Cancelled), None);
        assert_eq!(OrderStatus::Open.path_to(OrderStatus::Rejected), None);
    }

    #[test]
    fn test_request_validation() {
        assert!(OrderRequest::market(OrderSide::Buy, 1.0).validate().is_ok());
        assert!(OrderRequest::market(OrderSide::Buy, 0.0).validate().is_err());
        assert!(OrderRequest::market(OrderSide::Buy, f64::NAN).validate().is_err());
        assert!(OrderRequest::limit(OrderSide::Sell, 1.0, -5.0).validate().is_err());
        assert!(OrderRequest::stop(OrderSide::Sell, 1.0, 95.0).validate().is_ok());
    }

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_terminal_orders_never_change(targets in prop::collection::vec(any_status(), 1..20)) {
            let mut order = open_order(1.0);
            order.apply_fill(fill(100.0, 1.0)).unwrap();

            for target in targets {
                let _ = order.advance_to(target, Utc::now());
                let _ = order.transition(target, Utc::now());
                prop_assert_eq!(order.status, OrderStatus::Filled);
            }
        }

        #[test]
        fn prop_random_walk_only_takes_legal_edges(targets in prop::collection::vec(any_status(), 1..30)) {
            let mut order = open_order(1.0);
            for target in targets {
                let before = order.status;
                if order.transition(target, Utc::now()).is_ok() {
                    prop_assert!(before.can_transition_to(order.status));
                    prop_assert!(!before.is_terminal());
                } else {
                    prop_assert_eq!(order.status, before);
                }
            }
        }
    }
}
