//! Average True Range (ATR) indicator
//!
//! Measures volatility as the average of true ranges over a period.
//! True Range is the greatest of:
//! - Current High - Current Low
//! - Abs(Current High - Previous Close)
//! - Abs(Current Low - Previous Close)
//!
//! Uses Wilder's smoothing for the moving average.

use super::{Indicator, IndicatorView};
use crate::candles::CandleBuffer;
use crate::error::IndicatorError;
use crate::models::{Candle, Timeframe};

/// Calculate ATR for the given candles
///
/// Returns the current ATR value, or None if insufficient data
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let (high, low, prev_close) = (w[1].high, w[1].low, w[0].close);
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect();

    // First ATR is simple average of first 'period' true ranges
    let first_atr: f64 = true_ranges.iter().take(period).sum::<f64>() / period as f64;

    let atr = true_ranges[period..]
        .iter()
        .fold(first_atr, |atr, tr| (atr * (period as f64 - 1.0) + tr) / period as f64);

    Some(atr)
}

#[derive(Debug, Clone)]
pub struct Atr {
    name: String,
    timeframe: Timeframe,
    period: usize,
}

impl Atr {
    pub fn new(name: &str, timeframe: Timeframe, period: usize) -> Self {
        Self {
            name: name.to_string(),
            timeframe,
            period,
        }
    }
}

impl Indicator for Atr {
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
        Ok(calculate_atr(&history.candles(self.timeframe), self.period))
    }
}
