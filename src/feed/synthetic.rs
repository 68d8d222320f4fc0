use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::models::Tick;

/// Market scenario types for synthetic tick generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop (±1% around the start price)
    Sideways,
    /// Large swings (±5% per tick)
    Volatile,
}

impl FromStr for MarketScenario {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uptrend" => Ok(MarketScenario::Uptrend),
            "downtrend" => Ok(MarketScenario::Downtrend),
            "sideways" => Ok(MarketScenario::Sideways),
            "volatile" => Ok(MarketScenario::Volatile),
            other => Err(ConfigError::Invalid(format!("unknown market scenario '{}'", other))),
        }
    }
}

/// Generates reproducible bid/ask ticks
pub struct SyntheticTickGenerator {
    rng: StdRng,
    start_price: f64,
    spread: f64,
}

impl SyntheticTickGenerator {
    /// Create a new generator with a seed for reproducibility
    ///
    /// # Arguments
    /// * `seed` - Same seed, same ticks
    /// * `start_price` - Mid price of the first tick
    /// * `spread` - Absolute bid/ask spread
    pub fn new(seed: u64, start_price: f64, spread: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            start_price,
            spread,
        }
    }

    /// Generate `count` ticks spaced `interval_secs` apart, starting at `start`
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        start: DateTime<Utc>,
        count: usize,
        interval_secs: i64,
    ) -> Vec<Tick> {
        let mut ticks = Vec::with_capacity(count);
        let mut price = self.start_price;
        let floor = self.start_price * 0.5;

        // Trend drift per tick for ±2% per day
        let ticks_per_day = (24.0 * 3600.0 / interval_secs.max(1) as f64).max(1.0);
        let drift_per_tick = 0.02 / ticks_per_day;

        for i in 0..count {
            let timestamp = start + Duration::seconds(i as i64 * interval_secs);

            if i > 0 {
                price += match scenario {
                    MarketScenario::Uptrend => price * (drift_per_tick + self.rng.gen_range(-0.001..0.001)),
                    MarketScenario::Downtrend => price * (-drift_per_tick + self.rng.gen_range(-0.001..0.001)),
                    MarketScenario::Sideways => {
                        (self.start_price - price) * 0.1 + price * self.rng.gen_range(-0.01..0.01)
                    }
                    MarketScenario::Volatile => price * self.rng.gen_range(-0.05..0.05),
                };
                // Prevent price from going too low
                price = price.max(floor);
            }

            ticks.push(self.quote(price, timestamp));
        }

        ticks
    }

    fn quote(&self, mid: f64, timestamp: DateTime<Utc>) -> Tick {
        let half = self.spread / 2.0;
        let bid = (mid - half).max(f64::EPSILON);
        Tick::new(timestamp, bid, bid.max(mid + half), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        Tick::at_secs(1_700_000_000, 1.0, 1.0).timestamp
    }

    #[test]
    fn test_same_seed_same_ticks() {
        let a = SyntheticTickGenerator::new(7, 100.0, 0.02).generate(MarketScenario::Volatile, start(), 50, 1);
        let b = SyntheticTickGenerator::new(7, 100.0, 0.02).generate(MarketScenario::Volatile, start(), 50, 1);
        assert_eq!(a, b);

        let c = SyntheticTickGenerator::new(8, 100.0, 0.02).generate(MarketScenario::Volatile, start(), 50, 1);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ticks_are_valid_and_increasing() {
        let ticks = SyntheticTickGenerator::new(1, 50.0, 0.1).generate(MarketScenario::Sideways, start(), 200, 5);
        assert_eq!(ticks.len(), 200);
        assert!((ticks[0].mid() - 50.0).abs() < 1e-9);
        for pair in ticks.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
        for tick in &ticks {
            assert!(tick.validate("X").is_ok());
            assert!(tick.simulated);
        }
    }

    #[test]
    fn test_uptrend_rises() {
        let ticks = SyntheticTickGenerator::new(3, 100.0, 0.01).generate(MarketScenario::Uptrend, start(), 1_000, 3_600);
        assert!(ticks.last().unwrap().mid() > ticks[0].mid());
    }

    #[test]
    fn test_scenario_parsing() {
        assert_eq!("Uptrend".parse::<MarketScenario>().unwrap(), MarketScenario::Uptrend);
        assert!("crash".parse::<MarketScenario>().is_err());
    }
}
