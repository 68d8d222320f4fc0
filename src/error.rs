use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::execution::OrderStatus;

/// Bad market data. The offending tick is dropped, the run continues.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DataError {
    #[error("out-of-order tick for {symbol}: {timestamp} is before {last}")]
    OutOfOrder {
        symbol: String,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("malformed tick for {symbol} at {timestamp}: {reason}")]
    Malformed {
        symbol: String,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    #[error("failed to read ticks from {path}: {reason}")]
    Source { path: String, reason: String },
}

/// Indicator computation failure. Soft: only that indicator's value for the
/// current close is lost.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndicatorError {
    #[error("indicator {name}: source indicator '{source_name}' is not registered before it")]
    MissingSource { name: String, source_name: String },

    #[error("indicator {name}: non-finite value {value}")]
    NonFinite { name: String, value: f64 },
}

/// Order state machine and order request failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrderError {
    #[error("order {id}: illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order {0} not found")]
    NotFound(Uuid),

    #[error("invalid order request: {0}")]
    InvalidRequest(String),

    #[error("order {id}: fill of {volume} exceeds remaining {remaining}")]
    Overfill {
        id: Uuid,
        volume: f64,
        remaining: f64,
    },
}

/// A failing strategy hook. Halts that strategy for the rest of the run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyError {
    #[error("strategy {strategy}: indicator '{indicator}' is not registered")]
    MissingIndicator { strategy: String, indicator: String },

    #[error("strategy {strategy}: {reason}")]
    Failed { strategy: String, reason: String },

    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Exchange facade failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("order submission failed: {reason}")]
    OrderFailed { reason: String },

    #[error("order {order_id} still unconfirmed after {attempts} polls")]
    OrderTimeout { order_id: Uuid, attempts: u32 },

    #[error("gateway request failed: {0}")]
    Request(String),
}

/// Invalid settings, portfolio definition or startup state. Fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("startup verification failed for {symbol}: {reason}")]
    Startup { symbol: String, reason: String },
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("a run is already active")]
    AlreadyRunning,

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}
