// Order lifecycle
pub mod live;
pub mod order;
pub mod order_manager;

pub use live::{sync_orders, LiveSettings};
pub use order::{Fill, Order, OrderRequest, OrderStatus};
pub use order_manager::{ClosedTrade, ExecutionMode, OrderLifecycleManager, PositionState};
