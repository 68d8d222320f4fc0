use crate::models::{Candle, Timeframe};
use std::collections::{HashMap, VecDeque};

/// In-memory buffer of closed candles for one asset
///
/// Maintains a rolling window of candles for each timeframe
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    data: HashMap<Timeframe, VecDeque<Candle>>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep per timeframe
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: HashMap::new(),
            max_candles: max_candles.max(1),
        }
    }

    /// Add a closed candle
    ///
    /// If the buffer is full, removes the oldest candle
    pub fn push(&mut self, candle: Candle) {
        let candles = self.data.entry(candle.timeframe).or_default();
        candles.push_back(candle);

        while candles.len() > self.max_candles {
            candles.pop_front();
        }
    }

    /// All buffered candles for a timeframe, oldest first
    pub fn candles(&self, timeframe: Timeframe) -> Vec<Candle> {
        self.data
            .get(&timeframe)
            .map(|deque| deque.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the N most recent candles for a timeframe
    pub fn recent(&self, timeframe: Timeframe, n: usize) -> Vec<Candle> {
        self.data
            .get(&timeframe)
            .map(|deque| deque.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last(&self, timeframe: Timeframe) -> Option<&Candle> {
        self.data.get(&timeframe).and_then(|deque| deque.back())
    }

    /// Close prices, oldest first
    pub fn closes(&self, timeframe: Timeframe) -> Vec<f64> {
        self.data
            .get(&timeframe)
            .map(|deque| deque.iter().map(|c| c.close).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, timeframe: Timeframe) -> usize {
        self.data.get(&timeframe).map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.values().all(|d| d.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn create_test_candle(timeframe: Timeframe, index: i64, price: f64) -> Candle {
        let start = Utc.timestamp_opt(index * timeframe.seconds(), 0).unwrap();
        Candle {
            symbol: "SOL".to_string(),
            timeframe,
            start,
            end: start + timeframe.duration(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 10.0,
        }
    }

    #[test]
    fn test_new_buffer() {
        let buffer = CandleBuffer::new(100);
        assert_eq!(buffer.max_candles, 100);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_push_and_read() {
        let mut buffer = CandleBuffer::new(100);

        buffer.push(create_test_candle(Timeframe::MINUTE, 0, 100.0));
        buffer.push(create_test_candle(Timeframe::MINUTE, 1, 101.0));
        buffer.push(create_test_candle(Timeframe::MINUTE, 2, 102.0));

        let candles = buffer.candles(Timeframe::MINUTE);
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].close, 100.0);
        assert_eq!(candles[2].close, 102.0);
        assert_eq!(buffer.last(Timeframe::MINUTE).unwrap().close, 102.0);
    }

    #[test]
    fn test_max_candles_limit() {
        let mut buffer = CandleBuffer::new(5);

        for i in 0..10 {
            buffer.push(create_test_candle(Timeframe::MINUTE, i, 100.0 + i as f64));
        }

        let closes = buffer.closes(Timeframe::MINUTE);
        assert_eq!(closes.len(), 5); // Should only keep last 5
        assert_eq!(closes[0], 105.0);
        assert_eq!(closes[4], 109.0);
    }

    #[test]
    fn test_timeframes_are_separate() {
        let mut buffer = CandleBuffer::new(100);

        buffer.push(create_test_candle(Timeframe::MINUTE, 0, 100.0));
        buffer.push(create_test_candle(Timeframe::HOUR, 0, 200.0));

        assert_eq!(buffer.len(Timeframe::MINUTE), 1);
        assert_eq!(buffer.len(Timeframe::HOUR), 1);
        assert_eq!(buffer.len(Timeframe::DAY), 0);
    }

    #[test]
    fn test_recent_candles() {
        let mut buffer = CandleBuffer::new(100);

        for i in 0..10 {
            buffer.push(create_test_candle(Timeframe::MINUTE, i, 100.0 + i as f64));
        }

        let recent = buffer.recent(Timeframe::MINUTE, 3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].close, 107.0); // Last 3: 107, 108, 109
        assert_eq!(recent[2].close, 109.0);
    }
}
