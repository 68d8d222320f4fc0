use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::OrderStatus;
use crate::models::{OrderSide, OrderType};

/// Exchange-side order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
}

impl GatewayOrderStatus {
    /// Local lifecycle status this report corresponds to
    pub fn to_local(&self) -> OrderStatus {
        match self {
            GatewayOrderStatus::New => OrderStatus::Open,
            GatewayOrderStatus::PartiallyFilled => OrderStatus::PartiallyFilled,
            GatewayOrderStatus::Filled => OrderStatus::Filled,
            GatewayOrderStatus::Canceled | GatewayOrderStatus::Expired => OrderStatus::Cancelled,
            GatewayOrderStatus::PendingCancel => OrderStatus::Cancelling,
            GatewayOrderStatus::Rejected => OrderStatus::Rejected,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            GatewayOrderStatus::New | GatewayOrderStatus::PartiallyFilled | GatewayOrderStatus::PendingCancel
        )
    }
}

/// Order submission sent to the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub volume: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
}

/// Order as the exchange reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: GatewayOrderStatus,
    pub volume: f64,
    pub executed_volume: f64,
    /// Average execution price when anything executed, else the order price
    pub price: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub symbol: Option<String>,
    pub open_only: bool,
}

impl OrderFilter {
    pub fn open_orders(symbol: &str) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            open_only: true,
        }
    }

    pub fn matches(&self, order: &GatewayOrder) -> bool {
        self.symbol.as_ref().map_or(true, |s| *s == order.symbol) && (!self.open_only || order.status.is_open())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub total_balance: f64,
    pub available_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPosition {
    pub symbol: String,
    /// Signed: positive long, negative short
    pub volume: f64,
    pub entry_price: f64,
}

/// Exchange trading rules for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub step_size: f64,
    pub min_quantity: f64,
    pub tick_size: f64,
}

impl SymbolInfo {
    /// Round a volume down to the step size
    pub fn round_volume(&self, volume: f64) -> f64 {
        if self.step_size <= 0.0 {
            return volume;
        }
        let steps = (volume / self.step_size + 1e-9).floor();
        // Re-derive from the step count to avoid 0.12000000000000001
        let decimals = (-self.step_size.log10()).ceil().max(0.0) as i32;
        let factor = 10f64.powi(decimals);
        (steps * self.step_size * factor).round() / factor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingFees {
    pub maker: f64,
    pub taker: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeverageInfo {
    pub leverage: u32,
    pub max_leverage: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(step_size: f64) -> SymbolInfo {
        SymbolInfo {
            symbol: "BTCUSDT".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            step_size,
            min_quantity: 0.0,
            tick_size: 0.01,
        }
    }

    #[test]
    fn test_round_volume() {
        assert_eq!(info(0.01).round_volume(0.129), 0.12);
        assert_eq!(info(0.001).round_volume(1.0), 1.0);
        assert_eq!(info(1.0).round_volume(2.7), 2.0);
        assert_eq!(info(0.0).round_volume(2.7), 2.7);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayOrderStatus::New.to_local(), OrderStatus::Open);
        assert_eq!(GatewayOrderStatus::Expired.to_local(), OrderStatus::Cancelled);
        assert_eq!(GatewayOrderStatus::PendingCancel.to_local(), OrderStatus::Cancelling);
    }
}
