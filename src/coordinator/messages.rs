use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analytics::PortfolioSnapshot;
use crate::execution::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Replay historical or synthetic ticks with simulated fills
    Backtest,
    /// Stream ticks from the gateway and trade through it
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParameters {
    pub mode: RunMode,
    /// First day included (backtest)
    pub from: Option<NaiveDate>,
    /// Last day included (backtest)
    pub to: Option<NaiveDate>,
}

impl RunParameters {
    pub fn backtest(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self {
            mode: RunMode::Backtest,
            from,
            to,
        }
    }

    pub fn production() -> Self {
        Self {
            mode: RunMode::Production,
            from: None,
            to: None,
        }
    }

    /// Whether a tick timestamp falls in the requested days
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        let day = timestamp.date_naive();
        self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day <= to)
    }
}

/// Control surface to engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Execute(RunParameters),
    /// Stop the active run at the next safe point
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    RunStarted,
    WarmupStarted,
    WarmupFinished,
    RunCompleted,
    RunKilled,
    RunFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Data,
    Indicator,
    Strategy,
    Gateway,
    Config,
    Engine,
}

/// Engine to control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderUpdate {
        run_id: Uuid,
        strategy_id: String,
        symbol: String,
        order: Order,
    },
    Lifecycle {
        run_id: Uuid,
        stage: LifecycleStage,
        at: DateTime<Utc>,
    },
    Snapshot(PortfolioSnapshot),
    Error {
        run_id: Option<Uuid>,
        category: ErrorCategory,
        symbol: Option<String>,
        message: String,
    },
    /// Answer to an EXECUTE received while a run is active
    AlreadyRunning { active_run: Uuid },
}

impl Event {
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Event::OrderUpdate { run_id, .. } | Event::Lifecycle { run_id, .. } => Some(*run_id),
            Event::Snapshot(snapshot) => Some(snapshot.run_id),
            Event::Error { run_id, .. } => *run_id,
            Event::AlreadyRunning { active_run } => Some(*active_run),
        }
    }
}
