use chrono::{DateTime, Utc};

use crate::error::DataError;
use crate::models::{Candle, Tick, Timeframe};

/// Aggregates one asset's ticks into fixed-window candles
///
/// Every timeframe is built directly from raw ticks. Windows are aligned to
/// multiples of the timeframe since the Unix epoch, so `[0, 60)`, `[60, 120)`
/// and so on for a one-minute timeframe.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    symbol: String,
    /// Finest timeframe first
    windows: Vec<(Timeframe, Option<Candle>)>,
    last_tick_at: Option<DateTime<Utc>>,
}

impl CandleBuilder {
    /// Create a builder for the given timeframes (duplicates are ignored)
    pub fn new(symbol: &str, timeframes: &[Timeframe]) -> Self {
        let mut timeframes = timeframes.to_vec();
        timeframes.sort();
        timeframes.dedup();

        Self {
            symbol: symbol.to_string(),
            windows: timeframes.into_iter().map(|tf| (tf, None)).collect(),
            last_tick_at: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.windows.iter().map(|(tf, _)| *tf).collect()
    }

    pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        self.last_tick_at
    }

    /// Currently open (not yet closed) candle for a timeframe
    pub fn open_candle(&self, timeframe: Timeframe) -> Option<&Candle> {
        self.windows
            .iter()
            .find(|(tf, _)| *tf == timeframe)
            .and_then(|(_, candle)| candle.as_ref())
    }

    /// Feed one tick
    ///
    /// Returns the candles closed by this tick, finer timeframes first and in
    /// window order within a timeframe. Skipped windows come back as flat
    /// zero-volume candles. A malformed or out-of-order tick is rejected and
    /// leaves every open candle untouched.
    pub fn on_tick(&mut self, tick: &Tick) -> Result<Vec<Candle>, DataError> {
        tick.validate(&self.symbol)?;

        if let Some(last) = self.last_tick_at {
            if tick.timestamp < last {
                return Err(DataError::OutOfOrder {
                    symbol: self.symbol.clone(),
                    timestamp: tick.timestamp,
                    last,
                });
            }
        }
        self.last_tick_at = Some(tick.timestamp);

        let mut closed = Vec::new();
        for (timeframe, slot) in self.windows.iter_mut() {
            let start = timeframe.window_start(tick.timestamp);

            match slot {
                Some(candle) if tick.timestamp < candle.end => apply_tick(candle, tick),
                Some(candle) => {
                    let previous_close = candle.close;
                    let mut next_start = candle.end;
                    let finished = std::mem::replace(candle, new_candle(&self.symbol, *timeframe, start, tick));
                    closed.push(finished);

                    // Flat candles for windows with no ticks at all
                    while next_start < start {
                        closed.push(flat_candle(&self.symbol, *timeframe, next_start, previous_close));
                        next_start += timeframe.duration();
                    }
                }
                None => *slot = Some(new_candle(&self.symbol, *timeframe, start, tick)),
            }
        }

        if closed.len() > 1 {
            tracing::debug!("{}: tick at {} closed {} candles", self.symbol, tick.timestamp, closed.len());
        }

        Ok(closed)
    }

    /// Take the still-open candles at the end of a run
    ///
    /// Their windows have not elapsed, so they are only meant for reporting and
    /// are never fed to indicators or strategies.
    pub fn flush(&mut self) -> Vec<Candle> {
        self.windows
            .iter_mut()
            .filter_map(|(_, slot)| slot.take())
            .collect()
    }
}

/// A tick contributes its bid and then its ask
fn apply_tick(candle: &mut Candle, tick: &Tick) {
    for price in [tick.bid, tick.ask] {
        candle.high = candle.high.max(price);
        candle.low = candle.low.min(price);
        candle.close = price;
    }
    candle.volume += 1.0;
}

fn new_candle(symbol: &str, timeframe: Timeframe, start: DateTime<Utc>, tick: &Tick) -> Candle {
    let mut candle = flat_candle(symbol, timeframe, start, tick.bid);
    apply_tick(&mut candle, tick);
    candle
}

fn flat_candle(symbol: &str, timeframe: Timeframe, start: DateTime<Utc>, price: f64) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        timeframe,
        start,
        end: start + timeframe.duration(),
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 0.0,
    }
}
