use chrono::{DateTime, Utc};

use crate::analytics::StrategySnapshot;
use crate::candles::{CandleBuffer, CandleBuilder};
use crate::config::{AssetDefinition, EngineSettings};
use crate::coordinator::{ErrorCategory, EventOutbox};
use crate::error::ConfigError;
use crate::execution::{ExecutionMode, OrderLifecycleManager};
use crate::indicators::{IndicatorKind, IndicatorPipeline};
use crate::models::Tick;
use crate::strategy::{MarketView, StrategyKind, StrategyRuntime};

/// Everything one asset owns: candles, indicators, strategies and their orders
#[derive(Debug)]
pub struct AssetRunner {
    symbol: String,
    builder: CandleBuilder,
    candles: CandleBuffer,
    pipeline: IndicatorPipeline,
    runtime: StrategyRuntime,
    seq: u64,
    last_tick: Option<Tick>,
    ticks_processed: u64,
    ticks_rejected: u64,
}

impl AssetRunner {
    /// Build the asset's components from its definition
    ///
    /// Indicators and strategies keep the order they are defined in.
    pub fn build(def: &AssetDefinition, settings: &EngineSettings, mode: ExecutionMode) -> Result<Self, ConfigError> {
        let builder = CandleBuilder::new(&def.symbol, &def.timeframes);

        let mut pipeline = IndicatorPipeline::new();
        for indicator in &def.indicators {
            if !def.timeframes.contains(&indicator.timeframe) {
                return Err(ConfigError::Invalid(format!(
                    "indicator '{}' uses timeframe {} which '{}' does not build",
                    indicator.name, indicator.timeframe, def.symbol
                )));
            }
            if let Some(source) = &indicator.source {
                let registered_before = def
                    .indicators
                    .iter()
                    .take_while(|i| i.name != indicator.name)
                    .any(|i| &i.name == source);
                if !registered_before {
                    return Err(ConfigError::Invalid(format!(
                        "indicator '{}' reads '{}', which must be defined before it",
                        indicator.name, source
                    )));
                }
            }
            pipeline.register(IndicatorKind::from_definition(indicator)?);
        }

        let mut runtime = StrategyRuntime::new(&def.symbol);
        for strategy in &def.strategies {
            let book = OrderLifecycleManager::new(
                &strategy.id,
                &def.symbol,
                strategy.allocation,
                strategy.leverage,
                mode,
                settings.fee_rate,
            );
            runtime.register(&strategy.id, StrategyKind::from_definition(strategy)?, book);
        }

        Ok(Self {
            symbol: def.symbol.clone(),
            builder,
            candles: CandleBuffer::new(settings.candle_buffer),
            pipeline,
            runtime,
            seq: 0,
            last_tick: None,
            ticks_processed: 0,
            ticks_rejected: 0,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn candles(&self) -> &CandleBuffer {
        &self.candles
    }

    pub fn pipeline(&self) -> &IndicatorPipeline {
        &self.pipeline
    }

    pub fn runtime(&self) -> &StrategyRuntime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut StrategyRuntime {
        &mut self.runtime
    }

    pub fn last_tick(&self) -> Option<&Tick> {
        self.last_tick.as_ref()
    }

    pub fn ticks_processed(&self) -> u64 {
        self.ticks_processed
    }

    pub fn ticks_rejected(&self) -> u64 {
        self.ticks_rejected
    }

    pub fn snapshots(&self) -> Vec<StrategySnapshot> {
        self.runtime.snapshots()
    }

    /// Feed one tick through candles, indicators and strategies
    ///
    /// Invalid or out-of-order ticks are dropped and reported; returns whether
    /// the tick was accepted.
    pub fn process_tick(&mut self, tick: &Tick, can_open: bool, outbox: &mut EventOutbox) -> bool {
        let closed = match tick.validate(&self.symbol).and_then(|_| self.builder.on_tick(tick)) {
            Ok(closed) => closed,
            Err(e) => {
                self.ticks_rejected += 1;
                tracing::warn!("⚠️  {}: tick dropped: {}", self.symbol, e);
                outbox.error(ErrorCategory::Data, Some(&self.symbol), e.to_string());
                return false;
            }
        };

        self.seq += 1;
        self.ticks_processed += 1;
        self.last_tick = Some(*tick);
        let seq = self.seq;

        for e in self.pipeline.on_tick(tick) {
            outbox.error(ErrorCategory::Indicator, Some(&self.symbol), e.to_string());
        }

        let market = MarketView {
            symbol: &self.symbol,
            candles: &self.candles,
            indicators: self.pipeline.view(),
        };
        self.runtime.on_tick(tick, seq, market, can_open, outbox);

        for candle in closed {
            self.candles.push(candle.clone());
            for e in self.pipeline.on_candle_close(&candle, &self.candles) {
                outbox.error(ErrorCategory::Indicator, Some(&self.symbol), e.to_string());
            }

            let market = MarketView {
                symbol: &self.symbol,
                candles: &self.candles,
                indicators: self.pipeline.view(),
            };
            self.runtime.on_candle_close(&candle, tick, seq, market, can_open, outbox);
        }

        true
    }

    /// Deliver order changes made by a gateway sync
    pub fn dispatch_transactions(&mut self, can_open: bool, outbox: &mut EventOutbox) {
        let Some(tick) = self.last_tick else {
            return;
        };
        let market = MarketView {
            symbol: &self.symbol,
            candles: &self.candles,
            indicators: self.pipeline.view(),
        };
        self.runtime.dispatch_transactions(&tick, self.seq, market, can_open, outbox);
    }

    /// Run the end-of-run hooks
    pub fn finish(&mut self, at: DateTime<Utc>, outbox: &mut EventOutbox) {
        let Some(tick) = self.last_tick else {
            return;
        };
        let market = MarketView {
            symbol: &self.symbol,
            candles: &self.candles,
            indicators: self.pipeline.view(),
        };
        self.runtime.on_end(&tick, self.seq, market, at, outbox);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndicatorDefinition, StrategyDefinition, StrategyParams, TickSourceDefinition};
    use crate::models::Timeframe;
    use uuid::Uuid;

    fn asset(indicators: Vec<IndicatorDefinition>) -> AssetDefinition {
        AssetDefinition {
            symbol: "BTCUSDT".to_string(),
            timeframes: vec![Timeframe::MINUTE],
            ticks: TickSourceDefinition::Csv {
                path: "ticks.csv".into(),
            },
            warmup: None,
            indicators,
            strategies: vec![StrategyDefinition {
                id: "s1".to_string(),
                kind: "interval".to_string(),
                allocation: 1_000.0,
                leverage: 1.0,
                params: StrategyParams::default(),
            }],
        }
    }

    fn indicator(name: &str, kind: &str, timeframe: Timeframe, source: Option<&str>) -> IndicatorDefinition {
        IndicatorDefinition {
            name: name.to_string(),
            kind: kind.to_string(),
            timeframe,
            period: Some(2),
            source: source.map(str::to_string),
        }
    }

    #[test]
    fn test_build_rejects_unbuilt_timeframe() {
        let def = asset(vec![indicator("sma", "sma", Timeframe::HOUR, None)]);
        assert!(AssetRunner::build(&def, &EngineSettings::default(), ExecutionMode::Simulated).is_err());
    }

    #[test]
    fn test_build_rejects_forward_source() {
        let def = asset(vec![
            indicator("acc", "acceleration", Timeframe::MINUTE, Some("vel")),
            indicator("vel", "velocity", Timeframe::MINUTE, None),
        ]);
        assert!(AssetRunner::build(&def, &EngineSettings::default(), ExecutionMode::Simulated).is_err());
    }

    #[test]
    fn test_process_ticks_builds_candles_and_indicators() {
        let def = asset(vec![indicator("sma", "sma", Timeframe::MINUTE, None)]);
        let mut runner = AssetRunner::build(&def, &EngineSettings::default(), ExecutionMode::Simulated).unwrap();
        let mut outbox = EventOutbox::new(Uuid::new_v4());

        for tick in [
            Tick::at_secs(0, 100.0, 101.0),
            Tick::at_secs(30, 102.0, 103.0),
            Tick::at_secs(61, 101.0, 102.0),
        ] {
            assert!(runner.process_tick(&tick, true, &mut outbox));
        }

        let candle = runner.candles().last(Timeframe::MINUTE).unwrap();
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.close, 103.0);
        assert_eq!(runner.pipeline().view().get("sma").unwrap().len(), 1);

        // Out of order: dropped and reported
        assert!(!runner.process_tick(&Tick::at_secs(50, 101.0, 102.0), true, &mut outbox));
        assert_eq!(runner.ticks_rejected(), 1);
        assert_eq!(runner.ticks_processed(), 3);
        assert!(outbox.events().iter().any(|e| matches!(
            e,
            crate::coordinator::Event::Error {
                category: ErrorCategory::Data,
                ..
            }
        )));
    }

    #[test]
    fn test_spread_window_excludes_tick_that_closes_it() {
        let def = asset(vec![indicator("spread", "spread", Timeframe::MINUTE, None)]);
        let mut runner = AssetRunner::build(&def, &EngineSettings::default(), ExecutionMode::Simulated).unwrap();
        let mut outbox = EventOutbox::new(Uuid::new_v4());

        for tick in [
            Tick::at_secs(0, 100.0, 101.0),
            Tick::at_secs(30, 102.0, 103.0),
            Tick::at_secs(61, 100.0, 109.0),
        ] {
            assert!(runner.process_tick(&tick, true, &mut outbox));
        }

        let spread = runner.pipeline().view().get("spread").unwrap();
        assert_eq!(spread.values(), &[Some(1.0)]);
    }
}
