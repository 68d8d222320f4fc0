use super::{Indicator, IndicatorView};
use crate::candles::CandleBuffer;
use crate::error::IndicatorError;
use crate::models::{Candle, Timeframe};

/// Close-to-close rate of change
#[derive(Debug, Clone)]
pub struct Velocity {
    name: String,
    timeframe: Timeframe,
}

impl Velocity {
    pub fn new(name: &str, timeframe: Timeframe) -> Self {
        Self {
            name: name.to_string(),
            timeframe,
        }
    }
}

impl Indicator for Velocity {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn on_close(
        &mut self,
        _candle: &Candle,
        history: &CandleBuffer,
        _earlier: IndicatorView<'_>,
    ) -> Result<Option<f64>, IndicatorError> {
        let recent = history.recent(self.timeframe, 2);
        match recent.as_slice() {
            [previous, current] if previous.close != 0.0 => {
                Ok(Some((current.close - previous.close) / previous.close))
            }
            _ => Ok(None),
        }
    }
}

/// Change in another indicator's value between its last two closes
///
/// The source must be registered before this indicator.
#[derive(Debug, Clone)]
pub struct Acceleration {
    name: String,
    timeframe: Timeframe,
    source: String,
}

impl Acceleration {
    pub fn new(name: &str, timeframe: Timeframe, source: &str) -> Self {
        Self {
            name: name.to_string(),
            timeframe,
            source: source.to_string(),
        }
    }
}

impl Indicator for Acceleration {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn on_close(
        &mut self,
        _candle: &Candle,
        _history: &CandleBuffer,
        earlier: IndicatorView<'_>,
    ) -> Result<Option<f64>, IndicatorError> {
        let source = earlier
            .get(&self.source)
            .ok_or_else(|| IndicatorError::MissingSource {
                name: self.name.clone(),
                source_name: self.source.clone(),
            })?;

        match source.values() {
            [.., Some(previous), Some(current)] => Ok(Some(current - previous)),
            _ => Ok(None),
        }
    }
}
