// Engine settings and portfolio definitions
pub mod portfolio;
pub mod settings;

pub use portfolio::{
    AssetDefinition, IndicatorDefinition, ParamValue, PortfolioDefinition, StrategyDefinition,
    StrategyParams, TickSourceDefinition,
};
pub use settings::{EngineSettings, DEFAULT_SETTINGS_FILE};
