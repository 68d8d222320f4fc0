// Performance snapshots
pub mod snapshot;

pub use snapshot::{PerformanceTracker, PortfolioSnapshot, SnapshotTrigger, StrategySnapshot};
