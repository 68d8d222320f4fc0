use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::{Indicator, IndicatorView};
use crate::candles::CandleBuffer;
use crate::error::IndicatorError;
use crate::models::{Candle, Tick, Timeframe};

#[derive(Debug, Clone)]
struct Window {
    start: DateTime<Utc>,
    sum: f64,
    count: usize,
}

/// Average bid/ask spread over the ticks of each window
///
/// Ticks are accumulated into the window their timestamp falls in, so a
/// tick that opens the next window is never counted in the one closing.
/// Windows without ticks produce no value.
#[derive(Debug, Clone)]
pub struct Spread {
    name: String,
    timeframe: Timeframe,
    windows: VecDeque<Window>,
}

impl Spread {
    pub fn new(name: &str, timeframe: Timeframe) -> Self {
        Self {
            name: name.to_string(),
            timeframe,
            windows: VecDeque::new(),
        }
    }
}

impl Indicator for Spread {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn on_tick(&mut self, tick: &Tick) -> Result<(), IndicatorError> {
        let start = self.timeframe.window_start(tick.timestamp);
        match self.windows.back_mut() {
            Some(window) if window.start == start => {
                window.sum += tick.spread();
                window.count += 1;
            }
            _ => self.windows.push_back(Window {
                start,
                sum: tick.spread(),
                count: 1,
            }),
        }
        Ok(())
    }

    fn on_close(
        &mut self,
        candle: &Candle,
        _history: &CandleBuffer,
        _earlier: IndicatorView<'_>,
    ) -> Result<Option<f64>, IndicatorError> {
        while self.windows.front().is_some_and(|w| w.start < candle.start) {
            self.windows.pop_front();
        }
        match self.windows.front() {
            Some(window) if window.start == candle.start => {
                let value = window.sum / window.count as f64;
                self.windows.pop_front();
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }
}
