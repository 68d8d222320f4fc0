// Exchange facade
pub mod models;
pub mod paper;

pub use models::*;
pub use paper::PaperGateway;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::models::Tick;

pub type GatewayResult<T> = std::result::Result<Option<T>, GatewayError>;

/// Uniform view of an exchange
///
/// Every operation distinguishes "nothing there" (`Ok(None)`) from a failed
/// request (`Err`).
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Submit a new order
    async fn open(&self, request: &GatewayOrderRequest) -> GatewayResult<GatewayOrder>;

    /// Submit an order that reduces an existing position
    async fn close(&self, request: &GatewayOrderRequest) -> GatewayResult<GatewayOrder>;

    async fn cancel(&self, symbol: &str, client_order_id: &str) -> GatewayResult<GatewayOrder>;

    /// Look an order up by the client order id it was submitted with
    async fn get_order(&self, symbol: &str, client_order_id: &str) -> GatewayResult<GatewayOrder>;

    async fn get_orders(&self, filter: &OrderFilter) -> GatewayResult<Vec<GatewayOrder>>;

    async fn account(&self) -> GatewayResult<AccountInfo>;

    async fn positions(&self) -> GatewayResult<Vec<GatewayPosition>>;

    async fn get_symbol_info(&self, symbol: &str) -> GatewayResult<SymbolInfo>;

    async fn get_trading_fees(&self, symbol: &str) -> GatewayResult<TradingFees>;

    async fn get_leverage_info(&self, symbol: &str) -> GatewayResult<LeverageInfo>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<LeverageInfo>;

    /// Push live ticks for `symbol` into `sink` until the source ends or the
    /// receiver is dropped. Returns the number of ticks delivered.
    async fn stream(&self, symbol: &str, sink: mpsc::Sender<Tick>) -> GatewayResult<u64>;
}
