use proptest::prelude::*;
use quantbot::candles::CandleBuilder;
use quantbot::models::{Candle, Tick, Timeframe};

const START: i64 = 1_704_067_200;

/// Non-decreasing timestamps with valid quotes
fn tick_stream() -> impl Strategy<Value = Vec<Tick>> {
    prop::collection::vec((0i64..400, 1.0f64..1_000.0, 0.0f64..5.0), 1..200).prop_map(|steps| {
        let mut at = START;
        steps
            .into_iter()
            .map(|(gap, bid, spread)| {
                at += gap;
                Tick::at_secs(at, bid, bid + spread)
            })
            .collect()
    })
}

fn timeframes() -> Vec<Timeframe> {
    vec![Timeframe::MINUTE, Timeframe::from_secs(300).unwrap()]
}

fn closed_by_timeframe(ticks: &[Tick]) -> (CandleBuilder, Vec<Vec<Candle>>) {
    let timeframes = timeframes();
    let mut builder = CandleBuilder::new("BTCUSDT", &timeframes);
    let mut closed: Vec<Vec<Candle>> = vec![Vec::new(); timeframes.len()];

    for tick in ticks {
        for candle in builder.on_tick(tick).unwrap() {
            let idx = timeframes.iter().position(|tf| *tf == candle.timeframe).unwrap();
            closed[idx].push(candle);
        }
    }
    (builder, closed)
}

proptest! {
    #[test]
    fn test_closed_windows_are_contiguous(ticks in tick_stream()) {
        let (builder, closed) = closed_by_timeframe(&ticks);

        for (timeframe, candles) in timeframes().into_iter().zip(closed) {
            for pair in candles.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            for candle in &candles {
                prop_assert_eq!(candle.end - candle.start, timeframe.duration());
                prop_assert_eq!(candle.start.timestamp() % timeframe.seconds(), 0);
            }

            let open = builder.open_candle(timeframe).unwrap();
            if let Some(last) = candles.last() {
                prop_assert_eq!(last.end, open.start);
            }
            let last_tick = ticks.last().unwrap().timestamp;
            prop_assert!(open.start <= last_tick && last_tick < open.end);
        }
    }

    #[test]
    fn test_ohlc_bounds_hold(ticks in tick_stream()) {
        let (mut builder, closed) = closed_by_timeframe(&ticks);

        for candle in closed.into_iter().flatten().chain(builder.flush()) {
            prop_assert!(candle.low <= candle.open.min(candle.close));
            prop_assert!(candle.high >= candle.open.max(candle.close));
            prop_assert!(candle.volume >= 0.0);
        }
    }

    #[test]
    fn test_every_tick_is_counted_once(ticks in tick_stream()) {
        let (mut builder, closed) = closed_by_timeframe(&ticks);
        let open = builder.flush();

        for timeframe in timeframes() {
            let volume: f64 = closed
                .iter()
                .flatten()
                .chain(open.iter())
                .filter(|c| c.timeframe == timeframe)
                .map(|c| c.volume)
                .sum();
            prop_assert_eq!(volume, ticks.len() as f64);
        }
    }
}
