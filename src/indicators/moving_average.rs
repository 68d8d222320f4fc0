use super::{Indicator, IndicatorView};
use crate::candles::CandleBuffer;
use crate::error::IndicatorError;
use crate::models::{Candle, Timeframe};

/// Calculate Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Simple moving average of closes
#[derive(Debug, Clone)]
pub struct Sma {
    name: String,
    timeframe: Timeframe,
    period: usize,
}

impl Sma {
    pub fn new(name: &str, timeframe: Timeframe, period: usize) -> Self {
        Self {
            name: name.to_string(),
            timeframe,
            period,
        }
    }
}

impl Indicator for Sma {
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
        Ok(calculate_sma(&history.closes(self.timeframe), self.period))
    }
}

/// Exponential moving average of closes, seeded with the SMA of the first
/// `period` closes and updated incrementally afterwards
#[derive(Debug, Clone)]
pub struct Ema {
    name: String,
    timeframe: Timeframe,
    period: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(name: &str, timeframe: Timeframe, period: usize) -> Self {
        Self {
            name: name.to_string(),
            timeframe,
            period,
            value: None,
        }
    }

    fn multiplier(&self) -> f64 {
        2.0 / (self.period as f64 + 1.0)
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn on_close(
        &mut self,
        candle: &Candle,
        history: &CandleBuffer,
        _earlier: IndicatorView<'_>,
    ) -> Result<Option<f64>, IndicatorError> {
        self.value = match self.value {
            Some(ema) => Some((candle.close - ema) * self.multiplier() + ema),
            None => calculate_sma(&history.closes(self.timeframe), self.period),
        };
        Ok(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorState;
    use chrono::{TimeZone, Utc};

    fn push_close(buffer: &mut CandleBuffer, index: i64, close: f64) -> Candle {
        let start = Utc.timestamp_opt(index * 60, 0).unwrap();
        let candle = Candle {
            symbol: "TEST".to_string(),
            timeframe: Timeframe::MINUTE,
            start,
            end: start + Timeframe::MINUTE.duration(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        };
        buffer.push(candle.clone());
        candle
    }

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let sma = calculate_sma(&prices, 5);
        assert_eq!(sma, Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        assert!(calculate_sma(&prices, 5).is_none());
        assert!(calculate_sma(&prices, 0).is_none());
    }

    #[test]
    fn test_ema_seeds_with_sma_then_tracks() {
        let mut buffer = CandleBuffer::new(100);
        let mut ema = Ema::new("ema", Timeframe::MINUTE, 3);
        let states: Vec<IndicatorState> = Vec::new();

        let mut values = Vec::new();
        for (i, close) in [100.0, 102.0, 104.0, 110.0].iter().enumerate() {
            let candle = push_close(&mut buffer, i as i64, *close);
            values.push(ema.on_close(&candle, &buffer, IndicatorView::new(&states)).unwrap());
        }

        assert_eq!(values[0], None);
        assert_eq!(values[1], None);
        assert_eq!(values[2], Some(102.0));
        // (110 - 102) * 0.5 + 102
        assert_eq!(values[3], Some(106.0));
    }
}
