use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DataError;

/// Best bid/ask observation at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    /// True for replayed or generated data (backtest and historical warm-up)
    pub simulated: bool,
}

impl Tick {
    pub fn new(timestamp: DateTime<Utc>, bid: f64, ask: f64, simulated: bool) -> Self {
        Self {
            timestamp,
            bid,
            ask,
            simulated,
        }
    }

    /// Simulated tick at `secs` seconds after the Unix epoch
    pub fn at_secs(secs: i64, bid: f64, ask: f64) -> Self {
        let timestamp = Utc
            .timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self::new(timestamp, bid, ask, true)
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Reject non-finite, non-positive or crossed quotes
    pub fn validate(&self, symbol: &str) -> Result<(), DataError> {
        let reason = if !self.bid.is_finite() || !self.ask.is_finite() {
            Some(format!("non-finite quote {}/{}", self.bid, self.ask))
        } else if self.bid <= 0.0 || self.ask <= 0.0 {
            Some(format!("non-positive quote {}/{}", self.bid, self.ask))
        } else if self.bid > self.ask {
            Some(format!("crossed book: bid {} > ask {}", self.bid, self.ask))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(DataError::Malformed {
                symbol: symbol.to_string(),
                timestamp: self.timestamp,
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Fixed candle window length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    seconds: i64,
}

impl Timeframe {
    pub const MINUTE: Timeframe = Timeframe { seconds: 60 };
    pub const HOUR: Timeframe = Timeframe { seconds: 3_600 };
    pub const DAY: Timeframe = Timeframe { seconds: 86_400 };

    /// Longest supported window
    pub const MAX_SECONDS: i64 = 366 * 86_400;

    /// None unless `0 < seconds <= MAX_SECONDS`
    pub fn from_secs(seconds: i64) -> Option<Self> {
        (seconds > 0 && seconds <= Self::MAX_SECONDS).then_some(Self { seconds })
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds)
    }

    /// Start of the window containing `timestamp`, aligned to the Unix epoch
    pub fn window_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timestamp.timestamp();
        let aligned = secs.div_euclid(self.seconds) * self.seconds;
        Utc.timestamp_opt(aligned, 0).single().unwrap_or(timestamp)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.seconds;
        if s % 86_400 == 0 {
            write!(f, "{}d", s / 86_400)
        } else if s % 3_600 == 0 {
            write!(f, "{}h", s / 3_600)
        } else if s % 60 == 0 {
            write!(f, "{}m", s / 60)
        } else {
            write!(f, "{}s", s)
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    /// Parses "30s", "1m", "15m", "1h", "4h", "1d"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 2 {
            return Err(format!("invalid timeframe '{}'", s));
        }
        let (value, unit) = s.split_at(s.len() - 1);
        let value: i64 = value
            .parse()
            .map_err(|_| format!("invalid timeframe '{}'", s))?;
        let multiplier = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => return Err(format!("invalid timeframe unit in '{}'", s)),
        };
        let seconds = value
            .checked_mul(multiplier)
            .ok_or_else(|| format!("timeframe out of range: '{}'", s))?;
        Timeframe::from_secs(seconds).ok_or_else(|| {
            format!("timeframe must be between 1s and {}d: '{}'", Self::MAX_SECONDS / 86_400, s)
        })
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.to_string()
    }
}

/// OHLCV aggregate over one window `[start, end)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Number of ticks aggregated
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("60s".parse::<Timeframe>().unwrap(), Timeframe::MINUTE);
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::MINUTE);
        assert_eq!("1h".parse::<Timeframe>().unwrap(), Timeframe::HOUR);
        assert_eq!("1d".parse::<Timeframe>().unwrap().seconds(), 86_400);
        assert!("0m".parse::<Timeframe>().is_err());
        assert!("5x".parse::<Timeframe>().is_err());
        assert!("m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_out_of_range_is_an_error() {
        assert!("999999999999999999d".parse::<Timeframe>().is_err());
        assert!("9223372036854775807s".parse::<Timeframe>().is_err());
        assert!("367d".parse::<Timeframe>().is_err());
        assert_eq!("366d".parse::<Timeframe>().unwrap().seconds(), Timeframe::MAX_SECONDS);
        assert!(Timeframe::from_secs(i64::MAX).is_none());
        assert!(serde_json::from_str::<Timeframe>("\"999999999999999999d\"").is_err());
    }

    #[test]
    fn test_timeframe_display() {
        assert_eq!(Timeframe::MINUTE.to_string(), "1m");
        assert_eq!(Timeframe::from_secs(300).unwrap().to_string(), "5m");
        assert_eq!(Timeframe::from_secs(45).unwrap().to_string(), "45s");
        assert_eq!(Timeframe::DAY.to_string(), "1d");
    }

    #[test]
    fn test_window_start_alignment() {
        let tf = Timeframe::MINUTE;
        let tick = Tick::at_secs(61, 100.0, 101.0);
        assert_eq!(tf.window_start(tick.timestamp).timestamp(), 60);

        let tick = Tick::at_secs(59, 100.0, 101.0);
        assert_eq!(tf.window_start(tick.timestamp).timestamp(), 0);
    }

    #[test]
    fn test_tick_validation() {
        assert!(Tick::at_secs(0, 100.0, 101.0).validate("BTC").is_ok());
        assert!(Tick::at_secs(0, 100.0, 100.0).validate("BTC").is_ok());
        assert!(Tick::at_secs(0, 102.0, 101.0).validate("BTC").is_err());
        assert!(Tick::at_secs(0, 0.0, 101.0).validate("BTC").is_err());
        assert!(Tick::at_secs(0, f64::NAN, 101.0).validate("BTC").is_err());
    }

    #[test]
    fn test_order_side() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.sign(), -1.0);
    }

    #[test]
    fn test_timeframe_serde_as_string() {
        let json = serde_json::to_string(&Timeframe::HOUR).unwrap();
        assert_eq!(json, "\"1h\"");
        let parsed: Timeframe = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(parsed.seconds(), 900);
    }
}
