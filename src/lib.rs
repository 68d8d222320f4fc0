// Core modules
pub mod analytics;
pub mod candles;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod execution;
pub mod feed;
pub mod gateway;
pub mod indicators;
pub mod models;
pub mod strategy;

// Re-export commonly used types
pub use coordinator::{channels, Command, ControlHandle, Event, RunParameters};
pub use engine::{Engine, EngineService, RunSummary};
pub use error::EngineError;
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
