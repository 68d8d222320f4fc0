use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{
    AccountInfo, Gateway, GatewayOrder, GatewayOrderRequest, GatewayOrderStatus, GatewayPosition,
    GatewayResult, LeverageInfo, OrderFilter, SymbolInfo, TradingFees,
};
use crate::error::GatewayError;
use crate::models::{OrderSide, OrderType, Tick};

const MAX_LEVERAGE: u32 = 20;

#[derive(Debug, Default)]
struct PaperState {
    orders: Vec<GatewayOrder>,
    quotes: HashMap<String, Tick>,
    leverage: HashMap<String, u32>,
    positions: HashMap<String, GatewayPosition>,
    /// Next tick index per symbol; a reconnecting stream resumes here
    cursors: HashMap<String, usize>,
    disconnected: HashSet<String>,
    balance: f64,
    next_id: u64,
}

/// In-memory exchange
///
/// Acknowledges every order, fills market orders at the current quote and
/// resting limit/stop orders as streamed ticks cross them. Ticks come from
/// preloaded series, one per symbol.
#[derive(Debug)]
pub struct PaperGateway {
    state: Mutex<PaperState>,
    symbols: HashMap<String, SymbolInfo>,
    ticks: HashMap<String, Vec<Tick>>,
    fees: TradingFees,
    tick_delay: Duration,
    keep_simulated: bool,
    disconnect_after: Option<u64>,
}

impl PaperGateway {
    pub fn new(balance: f64, fee_rate: f64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                balance,
                ..Default::default()
            }),
            symbols: HashMap::new(),
            ticks: HashMap::new(),
            fees: TradingFees {
                maker: fee_rate,
                taker: fee_rate,
            },
            tick_delay: Duration::ZERO,
            keep_simulated: false,
            disconnect_after: None,
        }
    }

    /// Register a tradable symbol with its tick series
    pub fn with_symbol(mut self, info: SymbolInfo, ticks: Vec<Tick>) -> Self {
        self.ticks.insert(info.symbol.clone(), ticks);
        self.symbols.insert(info.symbol.clone(), info);
        self
    }

    /// Pause between streamed ticks
    pub fn with_tick_delay(mut self, delay: Duration) -> Self {
        self.tick_delay = delay;
        self
    }

    /// Stream ticks with their own `simulated` flag instead of marking them live
    pub fn keep_simulated_flag(mut self) -> Self {
        self.keep_simulated = true;
        self
    }

    /// Fail each symbol's stream once after `ticks` deliveries
    ///
    /// The next `stream` call resumes after the last delivered tick.
    pub fn with_disconnect_after(mut self, ticks: u64) -> Self {
        self.disconnect_after = Some(ticks);
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PaperState>, GatewayError> {
        self.state
            .lock()
            .map_err(|e| GatewayError::Request(format!("paper gateway state poisoned: {}", e)))
    }

    fn submit(&self, request: &GatewayOrderRequest) -> GatewayResult<GatewayOrder> {
        if !self.symbols.contains_key(&request.symbol) {
            return Err(GatewayError::Request(format!("unknown symbol {}", request.symbol)));
        }

        let mut state = self.lock()?;

        // Same client id: the earlier submission went through
        if let Some(existing) = state
            .orders
            .iter()
            .find(|o| o.client_order_id == request.client_order_id)
        {
            return Ok(Some(existing.clone()));
        }

        state.next_id += 1;
        let order = GatewayOrder {
            id: state.next_id.to_string(),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: GatewayOrderStatus::New,
            volume: request.volume,
            executed_volume: 0.0,
            price: request.price.or(request.stop_price),
            updated_at: Utc::now(),
        };
        state.orders.push(order);
        let idx = state.orders.len() - 1;

        if let Some(quote) = state.quotes.get(&request.symbol).copied() {
            match_order(&mut state, idx, &quote, self.fees.taker);
        }

        tracing::debug!("paper order {} accepted", request.client_order_id);
        Ok(Some(state.orders[idx].clone()))
    }
}

/// Fill or trigger one resting order against a quote
fn match_order(state: &mut PaperState, idx: usize, quote: &Tick, fee_rate: f64) {
    let order = &mut state.orders[idx];
    if !matches!(order.status, GatewayOrderStatus::New) {
        return;
    }

    let opposing = match order.side {
        OrderSide::Buy => quote.ask,
        OrderSide::Sell => quote.bid,
    };
    let fill_price = match order.order_type {
        OrderType::Market => Some(opposing),
        OrderType::Limit => order.price.filter(|limit| match order.side {
            OrderSide::Buy => quote.ask < *limit,
            OrderSide::Sell => quote.bid > *limit,
        }),
        OrderType::Stop => {
            // Stop price travels in `price` once accepted; trigger and fill at once
            order.price.filter(|trigger| match order.side {
                OrderSide::Buy => quote.ask >= *trigger,
                OrderSide::Sell => quote.bid <= *trigger,
            })
            .map(|_| opposing)
        }
    };

    let Some(price) = fill_price else {
        return;
    };

    order.status = GatewayOrderStatus::Filled;
    order.executed_volume = order.volume;
    order.price = Some(price);
    order.updated_at = quote.timestamp;

    let signed = order.side.sign() * order.volume;
    let commission = price * order.volume * fee_rate;
    let symbol = order.symbol.clone();

    state.balance -= commission;
    let position = state.positions.entry(symbol.clone()).or_insert(GatewayPosition {
        symbol,
        volume: 0.0,
        entry_price: price,
    });
    if position.volume == 0.0 {
        position.entry_price = price;
    }
    position.volume += signed;
}

#[async_trait]
impl Gateway for PaperGateway {
    async fn open(&self, request: &GatewayOrderRequest) -> GatewayResult<GatewayOrder> {
        let mut request = request.clone();
        if request.order_type == OrderType::Stop {
            request.price = request.stop_price;
        }
        self.submit(&request)
    }

    async fn close(&self, request: &GatewayOrderRequest) -> GatewayResult<GatewayOrder> {
        self.open(request).await
    }

    async fn cancel(&self, symbol: &str, client_order_id: &str) -> GatewayResult<GatewayOrder> {
        let mut state = self.lock()?;
        let Some(order) = state
            .orders
            .iter_mut()
            .find(|o| o.symbol == symbol && o.client_order_id == client_order_id)
        else {
            return Ok(None);
        };

        if order.status.is_open() {
            order.status = GatewayOrderStatus::Canceled;
            order.updated_at = Utc::now();
        }
        Ok(Some(order.clone()))
    }

    async fn get_order(&self, symbol: &str, client_order_id: &str) -> GatewayResult<GatewayOrder> {
        let state = self.lock()?;
        Ok(state
            .orders
            .iter()
            .find(|o| o.symbol == symbol && o.client_order_id == client_order_id)
            .cloned())
    }

    async fn get_orders(&self, filter: &OrderFilter) -> GatewayResult<Vec<GatewayOrder>> {
        let state = self.lock()?;
        Ok(Some(
            state.orders.iter().filter(|o| filter.matches(o)).cloned().collect(),
        ))
    }

    async fn account(&self) -> GatewayResult<AccountInfo> {
        let state = self.lock()?;
        Ok(Some(AccountInfo {
            total_balance: state.balance,
            available_balance: state.balance,
        }))
    }

    async fn positions(&self) -> GatewayResult<Vec<GatewayPosition>> {
        let state = self.lock()?;
        Ok(Some(
            state
                .positions
                .values()
                .filter(|p| p.volume != 0.0)
                .cloned()
                .collect(),
        ))
    }

    async fn get_symbol_info(&self, symbol: &str) -> GatewayResult<SymbolInfo> {
        Ok(self.symbols.get(symbol).cloned())
    }

    async fn get_trading_fees(&self, symbol: &str) -> GatewayResult<TradingFees> {
        Ok(self.symbols.contains_key(symbol).then_some(self.fees))
    }

    async fn get_leverage_info(&self, symbol: &str) -> GatewayResult<LeverageInfo> {
        if !self.symbols.contains_key(symbol) {
            return Ok(None);
        }
        let state = self.lock()?;
        Ok(Some(LeverageInfo {
            leverage: state.leverage.get(symbol).copied().unwrap_or(1),
            max_leverage: MAX_LEVERAGE,
        }))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<LeverageInfo> {
        if !self.symbols.contains_key(symbol) {
            return Ok(None);
        }
        if leverage == 0 || leverage > MAX_LEVERAGE {
            return Err(GatewayError::Request(format!(
                "leverage {} outside 1..={}",
                leverage, MAX_LEVERAGE
            )));
        }
        let mut state = self.lock()?;
        state.leverage.insert(symbol.to_string(), leverage);
        Ok(Some(LeverageInfo {
            leverage,
            max_leverage: MAX_LEVERAGE,
        }))
    }

    async fn stream(&self, symbol: &str, sink: mpsc::Sender<Tick>) -> GatewayResult<u64> {
        let Some(ticks) = self.ticks.get(symbol) else {
            return Ok(None);
        };

        let mut delivered = 0;
        loop {
            let tick = {
                let mut state = self.lock()?;
                let cursor = state.cursors.get(symbol).copied().unwrap_or(0);
                let Some(next) = ticks.get(cursor) else {
                    break;
                };
                if self.disconnect_after == Some(delivered) && state.disconnected.insert(symbol.to_string()) {
                    return Err(GatewayError::Request(format!("paper stream for {} disconnected", symbol)));
                }

                let tick = Tick {
                    simulated: self.keep_simulated && next.simulated,
                    ..*next
                };
                state.cursors.insert(symbol.to_string(), cursor + 1);
                state.quotes.insert(symbol.to_string(), tick);
                for idx in 0..state.orders.len() {
                    if state.orders[idx].symbol == symbol {
                        match_order(&mut state, idx, &tick, self.fees.taker);
                    }
                }
                tick
            };

            if sink.send(tick).await.is_err() {
                tracing::debug!("paper stream for {} stopped: receiver dropped", symbol);
                break;
            }
            delivered += 1;

            if !self.tick_delay.is_zero() {
                tokio::time::sleep(self.tick_delay).await;
            }
        }

        Ok(Some(delivered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> PaperGateway {
        let info = SymbolInfo {
            symbol: "BTCUSDT".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            step_size: 0.001,
            min_quantity: 0.001,
            tick_size: 0.01,
        };
        let ticks = vec![
            Tick::at_secs(0, 100.0, 101.0),
            Tick::at_secs(1, 98.0, 99.0),
        ];
        PaperGateway::new(10_000.0, 0.001).with_symbol(info, ticks)
    }

    fn request(client_order_id: &str, order_type: OrderType, price: Option<f64>) -> GatewayOrderRequest {
        GatewayOrderRequest {
            client_order_id: client_order_id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type,
            volume: 1.0,
            price,
            stop_price: None,
        }
    }

    #[tokio::test]
    async fn test_market_order_rests_until_quote() {
        let gateway = gateway();
        let ack = gateway
            .open(&request("a", OrderType::Market, None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.status, GatewayOrderStatus::New);

        let (tx, mut rx) = mpsc::channel(8);
        let delivered = gateway.stream("BTCUSDT", tx).await.unwrap();
        assert_eq!(delivered, Some(2));
        assert!(!rx.recv().await.unwrap().simulated);

        let order = gateway.get_order("BTCUSDT", "a").await.unwrap().unwrap();
        assert_eq!(order.status, GatewayOrderStatus::Filled);
        assert_eq!(order.price, Some(101.0));
    }

    #[tokio::test]
    async fn test_stream_resumes_after_disconnect() {
        let gateway = gateway().with_disconnect_after(1);

        let (tx, mut rx) = mpsc::channel(8);
        let result = gateway.stream("BTCUSDT", tx).await;
        assert!(matches!(result, Err(GatewayError::Request(_))));
        assert_eq!(rx.recv().await.unwrap().bid, 100.0);

        let (tx, mut rx) = mpsc::channel(8);
        assert_eq!(gateway.stream("BTCUSDT", tx).await.unwrap(), Some(1));
        assert_eq!(rx.recv().await.unwrap().bid, 98.0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_kept_simulated_flag() {
        let gateway = gateway().keep_simulated_flag();
        let (tx, mut rx) = mpsc::channel(8);
        gateway.stream("BTCUSDT", tx).await.unwrap();
        assert!(rx.recv().await.unwrap().simulated);
    }

    #[tokio::test]
    async fn test_duplicate_client_id_is_idempotent() {
        let gateway = gateway();
        let first = gateway.open(&request("dup", OrderType::Limit, Some(90.0))).await.unwrap().unwrap();
        let second = gateway.open(&request("dup", OrderType::Limit, Some(90.0))).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);

        let all = gateway.get_orders(&OrderFilter::default()).await.unwrap().unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_and_lookup() {
        let gateway = gateway();
        gateway.open(&request("lim", OrderType::Limit, Some(50.0))).await.unwrap();

        let open = gateway.get_orders(&OrderFilter::open_orders("BTCUSDT")).await.unwrap().unwrap();
        assert_eq!(open.len(), 1);

        let cancelled = gateway.cancel("BTCUSDT", "lim").await.unwrap().unwrap();
        assert_eq!(cancelled.status, GatewayOrderStatus::Canceled);
        assert!(gateway.cancel("BTCUSDT", "missing").await.unwrap().is_none());
        assert!(gateway.get_order("BTCUSDT", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reference_data() {
        let gateway = gateway();
        assert!(gateway.get_symbol_info("ETHUSDT").await.unwrap().is_none());
        assert_eq!(gateway.get_trading_fees("BTCUSDT").await.unwrap().unwrap().taker, 0.001);

        let leverage = gateway.set_leverage("BTCUSDT", 3).await.unwrap().unwrap();
        assert_eq!(leverage.leverage, 3);
        assert_eq!(gateway.get_leverage_info("BTCUSDT").await.unwrap().unwrap().leverage, 3);
        assert!(gateway.set_leverage("BTCUSDT", 50).await.is_err());

        let account = gateway.account().await.unwrap().unwrap();
        assert_eq!(account.total_balance, 10_000.0);
    }
}
