// Technical indicators
pub mod atr;
pub mod moving_average;
pub mod pipeline;
pub mod rate;
pub mod rsi;
pub mod spread;

pub use atr::{calculate_atr, Atr};
pub use moving_average::{calculate_sma, Ema, Sma};
pub use pipeline::IndicatorPipeline;
pub use rate::{Acceleration, Velocity};
pub use rsi::{calculate_rsi, Rsi};
pub use spread::Spread;

use serde::Serialize;

use crate::candles::CandleBuffer;
use crate::config::IndicatorDefinition;
use crate::error::{ConfigError, IndicatorError};
use crate::models::{Candle, Tick, Timeframe};

/// A stateful derived series bound to one timeframe
pub trait Indicator {
    fn name(&self) -> &str;

    fn timeframe(&self) -> Timeframe;

    /// Optional incremental update on every tick of the asset
    fn on_tick(&mut self, _tick: &Tick) -> Result<(), IndicatorError> {
        Ok(())
    }

    /// Finalize the value for a closed candle of this indicator's timeframe
    ///
    /// `history` already contains `candle`. `earlier` exposes the series of
    /// indicators registered before this one, including values appended for
    /// this same close. `Ok(None)` means not enough data yet.
    fn on_close(
        &mut self,
        candle: &Candle,
        history: &CandleBuffer,
        earlier: IndicatorView<'_>,
    ) -> Result<Option<f64>, IndicatorError>;
}

/// Append-only series of an indicator's values, one entry per close
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorState {
    name: String,
    timeframe: Timeframe,
    values: Vec<Option<f64>>,
}

impl IndicatorState {
    pub fn new(name: &str, timeframe: Timeframe) -> Self {
        Self {
            name: name.to_string(),
            timeframe,
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Value at the most recent close, if one was produced
    pub fn latest(&self) -> Option<f64> {
        self.values.last().copied().flatten()
    }

    /// Value one close before the most recent
    pub fn previous(&self) -> Option<f64> {
        self.values.iter().rev().nth(1).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn append(&mut self, value: Option<f64>) {
        self.values.push(value);
    }
}

/// Read-only view over a slice of indicator series
#[derive(Debug, Clone, Copy)]
pub struct IndicatorView<'a> {
    states: &'a [IndicatorState],
}

impl<'a> IndicatorView<'a> {
    pub fn new(states: &'a [IndicatorState]) -> Self {
        Self { states }
    }

    pub fn get(&self, name: &str) -> Option<&'a IndicatorState> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn latest(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|s| s.latest())
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a IndicatorState> {
        self.states.iter()
    }
}

/// Built-in indicators, dispatched statically
#[derive(Debug, Clone)]
pub enum IndicatorKind {
    Sma(Sma),
    Ema(Ema),
    Rsi(Rsi),
    Atr(Atr),
    Velocity(Velocity),
    Acceleration(Acceleration),
    Spread(Spread),
}

impl IndicatorKind {
    /// Build an indicator from its portfolio definition
    pub fn from_definition(def: &IndicatorDefinition) -> Result<Self, ConfigError> {
        let period = || {
            def.period.filter(|p| *p > 0).ok_or_else(|| {
                ConfigError::Invalid(format!("indicator '{}' needs a positive period", def.name))
            })
        };

        let indicator = match def.kind.as_str() {
            "sma" => IndicatorKind::Sma(Sma::new(&def.name, def.timeframe, period()?)),
            "ema" => IndicatorKind::Ema(Ema::new(&def.name, def.timeframe, period()?)),
            "rsi" => IndicatorKind::Rsi(Rsi::new(&def.name, def.timeframe, period()?)),
            "atr" => IndicatorKind::Atr(Atr::new(&def.name, def.timeframe, period()?)),
            "velocity" => IndicatorKind::Velocity(Velocity::new(&def.name, def.timeframe)),
            "acceleration" => {
                let source = def.source.as_deref().ok_or_else(|| {
                    ConfigError::Invalid(format!("indicator '{}' needs a source", def.name))
                })?;
                IndicatorKind::Acceleration(Acceleration::new(&def.name, def.timeframe, source))
            }
            "spread" => IndicatorKind::Spread(Spread::new(&def.name, def.timeframe)),
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown indicator kind '{}' for '{}'",
                    other, def.name
                )))
            }
        };

        Ok(indicator)
    }

    fn inner(&self) -> &dyn Indicator {
        match self {
            IndicatorKind::Sma(i) => i,
            IndicatorKind::Ema(i) => i,
            IndicatorKind::Rsi(i) => i,
            IndicatorKind::Atr(i) => i,
            IndicatorKind::Velocity(i) => i,
            IndicatorKind::Acceleration(i) => i,
            IndicatorKind::Spread(i) => i,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Indicator {
        match self {
            IndicatorKind::Sma(i) => i,
            IndicatorKind::Ema(i) => i,
            IndicatorKind::Rsi(i) => i,
            IndicatorKind::Atr(i) => i,
            IndicatorKind::Velocity(i) => i,
            IndicatorKind::Acceleration(i) => i,
            IndicatorKind::Spread(i) => i,
        }
    }
}

impl Indicator for IndicatorKind {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn timeframe(&self) -> Timeframe {
        self.inner().timeframe()
    }

    fn on_tick(&mut self, tick: &Tick) -> Result<(), IndicatorError> {
        self.inner_mut().on_tick(tick)
    }

    fn on_close(
        &mut self,
        candle: &Candle,
        history: &CandleBuffer,
        earlier: IndicatorView<'_>,
    ) -> Result<Option<f64>, IndicatorError> {
        self.inner_mut().on_close(candle, history, earlier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, kind: &str, period: Option<usize>) -> IndicatorDefinition {
        IndicatorDefinition {
            name: name.to_string(),
            kind: kind.to_string(),
            timeframe: Timeframe::MINUTE,
            period,
            source: None,
        }
    }

    #[test]
    fn test_from_definition() {
        let sma = IndicatorKind::from_definition(&definition("fast", "sma", Some(5))).unwrap();
        assert_eq!(sma.name(), "fast");
        assert_eq!(sma.timeframe(), Timeframe::MINUTE);
        assert!(matches!(sma, IndicatorKind::Sma(_)));
    }

    #[test]
    fn test_from_definition_rejects_bad_input() {
        assert!(IndicatorKind::from_definition(&definition("x", "macd", Some(5))).is_err());
        assert!(IndicatorKind::from_definition(&definition("x", "rsi", None)).is_err());
        assert!(IndicatorKind::from_definition(&definition("x", "rsi", Some(0))).is_err());
        assert!(IndicatorKind::from_definition(&definition("x", "acceleration", None)).is_err());
    }

    #[test]
    fn test_state_latest_and_previous() {
        let mut state = IndicatorState::new("rsi", Timeframe::MINUTE);
        assert_eq!(state.latest(), None);

        state.append(Some(40.0));
        state.append(None);
        assert_eq!(state.latest(), None);
        assert_eq!(state.previous(), Some(40.0));

        state.append(Some(55.0));
        assert_eq!(state.latest(), Some(55.0));
        assert_eq!(state.len(), 3);
    }
}
