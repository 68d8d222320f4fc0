// Tick sources for backtests and warm-up
pub mod csv;
pub mod synthetic;

pub use self::csv::{parse_timestamp, read_ticks};
pub use self::synthetic::{MarketScenario, SyntheticTickGenerator};

use chrono::{DateTime, Utc};

use crate::config::{EngineSettings, TickSourceDefinition};
use crate::error::EngineError;
use crate::models::Tick;

/// Resolve a tick source into ticks in source order
///
/// # Arguments
/// * `source` - CSV file or synthetic scenario
/// * `symbol` - Used for logging
/// * `settings` - Fallback seed and spacing for synthetic ticks
/// * `start` - First synthetic timestamp
pub fn load_ticks(
    source: &TickSourceDefinition,
    symbol: &str,
    settings: &EngineSettings,
    start: DateTime<Utc>,
) -> Result<Vec<Tick>, EngineError> {
    match source {
        TickSourceDefinition::Csv { path } => Ok(read_ticks(path, symbol)?),
        TickSourceDefinition::Synthetic {
            scenario,
            start_price,
            spread,
            count,
            interval_secs,
            seed,
        } => {
            let scenario: MarketScenario = scenario.parse()?;
            let interval = interval_secs.unwrap_or(settings.synthetic_interval_secs);
            let seed = seed.unwrap_or(settings.synthetic_seed);

            tracing::info!(
                "🎲 {}: generating {} synthetic ticks ({:?}, seed {}, every {}s)",
                symbol,
                count,
                scenario,
                seed,
                interval
            );
            let mut generator = SyntheticTickGenerator::new(seed, *start_price, *spread);
            Ok(generator.generate(scenario, start, *count, interval))
        }
    }
}
