use super::{Indicator, IndicatorView};
use crate::candles::CandleBuffer;
use crate::error::IndicatorError;
use crate::models::{Candle, Timeframe};

/// Calculate Relative Strength Index (RSI)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    let avg_gain: f64 = changes.iter().rev().take(period).map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let avg_loss: f64 = changes.iter().rev().take(period).map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

#[derive(Debug, Clone)]
pub struct Rsi {
    name: String,
    timeframe: Timeframe,
    period: usize,
}

impl Rsi {
    pub fn new(name: &str, timeframe: Timeframe, period: usize) -> Self {
        Self {
            name: name.to_string(),
            timeframe,
            period,
        }
    }
}

impl Indicator for Rsi {
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
        Ok(calculate_rsi(&history.closes(self.timeframe), self.period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_calculation() {
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25, 46.0,
            46.5,
        ];

        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi > 0.0 && rsi < 100.0);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        assert!(calculate_rsi(&prices, 14).is_none());
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        assert_eq!(calculate_rsi(&prices, 5), Some(100.0)); // All gains = RSI 100
    }

    #[test]
    fn test_rsi_balanced_moves() {
        let prices = vec![100.0, 102.0, 100.0, 102.0, 100.0];
        assert_eq!(calculate_rsi(&prices, 4), Some(50.0));
    }
}
