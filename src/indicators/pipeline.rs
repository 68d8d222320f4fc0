use super::{Indicator, IndicatorKind, IndicatorState, IndicatorView};
use crate::candles::CandleBuffer;
use crate::error::IndicatorError;
use crate::models::{Candle, Tick};

/// Ordered set of indicators for one asset
///
/// Indicators run in registration order. On a close, an indicator sees the
/// series of the indicators registered before it (already updated for this
/// close) and never those registered after it.
#[derive(Debug, Clone)]
pub struct IndicatorPipeline<I: Indicator = IndicatorKind> {
    indicators: Vec<I>,
    states: Vec<IndicatorState>,
}

impl<I: Indicator> Default for IndicatorPipeline<I> {
    fn default() -> Self {
        Self {
            indicators: Vec::new(),
            states: Vec::new(),
        }
    }
}

impl<I: Indicator> IndicatorPipeline<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, indicator: I) {
        self.states
            .push(IndicatorState::new(indicator.name(), indicator.timeframe()));
        self.indicators.push(indicator);
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn view(&self) -> IndicatorView<'_> {
        IndicatorView::new(&self.states)
    }

    /// Per-tick incremental updates
    ///
    /// Failures are returned and do not stop the remaining indicators.
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<IndicatorError> {
        let mut errors = Vec::new();
        for indicator in self.indicators.iter_mut() {
            if let Err(e) = indicator.on_tick(tick) {
                tracing::warn!("indicator {} tick update failed: {}", indicator.name(), e);
                errors.push(e);
            }
        }
        errors
    }

    /// Finalize every indicator bound to the candle's timeframe
    ///
    /// A failing indicator gets an empty entry for this close and its error is
    /// returned; the others still run.
    pub fn on_candle_close(&mut self, candle: &Candle, history: &CandleBuffer) -> Vec<IndicatorError> {
        let mut errors = Vec::new();

        for i in 0..self.indicators.len() {
            let indicator = &mut self.indicators[i];
            if indicator.timeframe() != candle.timeframe {
                continue;
            }

            let (earlier, rest) = self.states.split_at_mut(i);
            let result = indicator
                .on_close(candle, history, IndicatorView::new(earlier))
                .and_then(|value| match value {
                    Some(v) if !v.is_finite() => Err(IndicatorError::NonFinite {
                        name: indicator.name().to_string(),
                        value: v,
                    }),
                    other => Ok(other),
                });

            match result {
                Ok(value) => rest[0].append(value),
                Err(e) => {
                    tracing::warn!(
                        "indicator {} failed on {} close at {}: {}",
                        indicator.name(),
                        candle.timeframe,
                        candle.start,
                        e
                    );
                    rest[0].append(None);
                    errors.push(e);
                }
            }
        }

        errors
    }
}
