use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

use crate::error::DataError;
use crate::models::Tick;

/// Epoch values above this are read as milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    bid: f64,
    ask: f64,
}

/// Parse an RFC 3339 timestamp or epoch seconds (milliseconds when large)
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    if let Ok(epoch) = value.parse::<i64>() {
        return if epoch.abs() >= MILLIS_THRESHOLD {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
    }

    let secs = value.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Read `timestamp,bid,ask` rows
///
/// Rows that cannot be parsed are skipped with a warning. Ticks keep file
/// order; ordering and quote checks happen downstream.
pub fn read_ticks(path: &Path, symbol: &str) -> Result<Vec<Tick>, DataError> {
    let source_error = |reason: String| DataError::Source {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| source_error(e.to_string()))?;

    let mut ticks = Vec::new();
    let mut skipped = 0usize;

    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let parsed = row
            .map_err(|e| e.to_string())
            .and_then(|row| match parse_timestamp(&row.timestamp) {
                Some(timestamp) => Ok(Tick::new(timestamp, row.bid, row.ask, true)),
                None => Err(format!("unparseable timestamp '{}'", row.timestamp)),
            });

        match parsed {
            Ok(tick) => ticks.push(tick),
            Err(reason) => {
                skipped += 1;
                tracing::warn!("⚠️  {} row {}: skipped ({})", symbol, line + 2, reason);
            }
        }
    }

    tracing::info!(
        "📥 {}: loaded {} ticks from {} ({} skipped)",
        symbol,
        ticks.len(),
        path.display(),
        skipped
    );
    Ok(ticks)
}
