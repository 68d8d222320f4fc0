use chrono::NaiveDate;
use quantbot::analytics::SnapshotTrigger;
use quantbot::config::{
    AssetDefinition, EngineSettings, ParamValue, PortfolioDefinition, StrategyDefinition, StrategyParams,
    TickSourceDefinition,
};
use quantbot::coordinator::{channels, Command, ControlHandle, ErrorCategory, Event, LifecycleStage, RunParameters};
use quantbot::engine::{Engine, EngineService, RunSummary};
use quantbot::error::EngineError;
use quantbot::execution::OrderStatus;
use quantbot::gateway::{PaperGateway, SymbolInfo};
use quantbot::models::{Tick, Timeframe};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// 2024-01-01T00:00:00Z
const DAY_ONE: i64 = 1_704_067_200;

fn write_ticks(path: &Path, count: i64, step_secs: i64) {
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "timestamp,bid,ask").unwrap();
    for i in 0..count {
        let mid = 100.0 + (i % 7) as f64 * 0.5;
        writeln!(file, "{},{:.2},{:.2}", DAY_ONE + i * step_secs, mid - 0.05, mid + 0.05).unwrap();
    }
}

fn interval_strategy(id: &str) -> StrategyDefinition {
    let mut params = StrategyParams::default();
    params.insert("interval_minutes", ParamValue::Number(1.0));
    params.insert("volume", ParamValue::Number(1.0));
    StrategyDefinition {
        id: id.to_string(),
        kind: "interval".to_string(),
        allocation: 10_000.0,
        leverage: 1.0,
        params,
    }
}

fn asset(symbol: &str, ticks: TickSourceDefinition) -> AssetDefinition {
    AssetDefinition {
        symbol: symbol.to_string(),
        timeframes: vec![Timeframe::MINUTE],
        ticks,
        warmup: None,
        indicators: Vec::new(),
        strategies: vec![interval_strategy("s1")],
    }
}

fn portfolio(assets: Vec<AssetDefinition>) -> PortfolioDefinition {
    PortfolioDefinition {
        name: "test".to_string(),
        assets,
    }
}

fn day_one() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

async fn collect(control: &mut ControlHandle) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = control.next_event().await {
        events.push(event);
    }
    events
}

fn stages(events: &[Event]) -> Vec<LifecycleStage> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Lifecycle { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

fn snapshot_count(events: &[Event], trigger: SnapshotTrigger) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::Snapshot(s) if s.trigger == trigger))
        .count()
}

/// Queue `commands` first, then run the service once and gather every event
async fn run_service(
    engine: Engine,
    commands: Vec<Command>,
) -> (Result<Option<RunSummary>, EngineError>, Vec<Event>) {
    let (mut control, endpoint) = channels(8, 4096);
    for command in commands {
        control.send(command).await.unwrap();
    }

    let service = tokio::spawn(EngineService::new(engine, endpoint).exit_after_run(true).run());
    let events = collect(&mut control).await;
    (service.await.unwrap(), events)
}

#[tokio::test]
async fn test_backtest_run_from_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc.csv");
    write_ticks(&path, 60, 10);

    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset("BTCUSDT", TickSourceDefinition::Csv { path })]),
    )
    .unwrap();

    let params = RunParameters::backtest(Some(day_one()), None);
    let (result, events) = run_service(engine, vec![Command::Execute(params)]).await;
    let summary = result.unwrap().unwrap();

    assert_eq!(summary.ticks_processed, 60);
    assert_eq!(summary.ticks_rejected, 0);
    assert!(!summary.killed);
    assert_eq!(summary.final_snapshot.trigger, SnapshotTrigger::End);

    assert_eq!(stages(&events), vec![LifecycleStage::RunStarted, LifecycleStage::RunCompleted]);
    assert!(matches!(
        events.first(),
        Some(Event::Lifecycle {
            stage: LifecycleStage::RunStarted,
            ..
        })
    ));
    assert!(matches!(
        events.last(),
        Some(Event::Lifecycle {
            stage: LifecycleStage::RunCompleted,
            ..
        })
    ));
    assert_eq!(snapshot_count(&events, SnapshotTrigger::Start), 1);
    assert_eq!(snapshot_count(&events, SnapshotTrigger::End), 1);

    // Entries every minute, filled on the following tick
    let filled = events
        .iter()
        .filter(|e| matches!(e, Event::OrderUpdate { order, .. } if order.status == OrderStatus::Filled))
        .count();
    assert!(filled >= 2, "expected filled orders, got {}", filled);
    assert!(events.iter().all(|e| e.run_id() == Some(summary.run_id)));
}

#[tokio::test]
async fn test_backtest_end_closes_open_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc.csv");
    // The last entry is filled a few ticks before the data runs out
    write_ticks(&path, 60, 10);

    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset("BTCUSDT", TickSourceDefinition::Csv { path })]),
    )
    .unwrap();

    let params = RunParameters::backtest(Some(day_one()), None);
    let (result, events) = run_service(engine, vec![Command::Execute(params)]).await;
    let summary = result.unwrap().unwrap();

    let closing = events
        .iter()
        .filter(|e| matches!(
            e,
            Event::OrderUpdate { order, .. }
                if order.status == OrderStatus::Filled
                    && order.reason.as_deref() == Some("position closed at end of run")
        ))
        .count();
    assert_eq!(closing, 1);

    let end = events
        .iter()
        .find_map(|e| match e {
            Event::Snapshot(s) if s.trigger == SnapshotTrigger::End => Some(s),
            _ => None,
        })
        .unwrap();
    for strategy in end.strategies.iter().chain(summary.final_snapshot.strategies.iter()) {
        assert_eq!(strategy.position_volume, 0.0);
        assert_eq!(strategy.exposure, 0.0);
        assert_eq!(strategy.unrealized_pnl, 0.0);
    }
}

#[tokio::test]
async fn test_backtest_date_range_filters_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc.csv");
    // Two days of hourly ticks
    write_ticks(&path, 48, 3_600);

    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset("BTCUSDT", TickSourceDefinition::Csv { path })]),
    )
    .unwrap();

    let day_two = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let params = RunParameters::backtest(Some(day_two), Some(day_two));
    let (result, events) = run_service(engine, vec![Command::Execute(params)]).await;

    assert_eq!(result.unwrap().unwrap().ticks_processed, 24);
    assert_eq!(snapshot_count(&events, SnapshotTrigger::NewDay), 0);
}

#[tokio::test]
async fn test_new_day_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc.csv");
    write_ticks(&path, 48, 3_600);

    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset("BTCUSDT", TickSourceDefinition::Csv { path })]),
    )
    .unwrap();

    let params = RunParameters::backtest(Some(day_one()), None);
    let (_, events) = run_service(engine, vec![Command::Execute(params)]).await;

    assert_eq!(snapshot_count(&events, SnapshotTrigger::Start), 1);
    assert_eq!(snapshot_count(&events, SnapshotTrigger::NewDay), 1);
    assert_eq!(snapshot_count(&events, SnapshotTrigger::End), 1);
}

#[tokio::test]
async fn test_synthetic_backtest_is_reproducible() {
    let source = TickSourceDefinition::Synthetic {
        scenario: "volatile".to_string(),
        start_price: 100.0,
        spread: 0.02,
        count: 300,
        interval_secs: Some(5),
        seed: Some(9),
    };

    let mut navs = Vec::new();
    for _ in 0..2 {
        let engine = Engine::new(
            EngineSettings::default(),
            portfolio(vec![asset("ETHUSDT", source.clone())]),
        )
        .unwrap();
        let params = RunParameters::backtest(Some(day_one()), None);
        let (result, _) = run_service(engine, vec![Command::Execute(params)]).await;
        let summary = result.unwrap().unwrap();
        assert_eq!(summary.ticks_processed, 300);
        navs.push(summary.final_snapshot.total_nav);
    }
    assert_eq!(navs[0], navs[1]);
}

#[tokio::test]
async fn test_kill_stops_run_with_one_final_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc.csv");
    write_ticks(&path, 100, 10);

    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset("BTCUSDT", TickSourceDefinition::Csv { path })]),
    )
    .unwrap();

    let params = RunParameters::backtest(Some(day_one()), None);
    let (result, events) = run_service(
        engine,
        vec![
            Command::Execute(params),
            Command::Kill,
        ],
    )
    .await;
    let summary = result.unwrap().unwrap();

    assert!(summary.killed);
    assert!(summary.ticks_processed < 100);
    assert_eq!(stages(&events), vec![LifecycleStage::RunStarted, LifecycleStage::RunKilled]);
    assert_eq!(snapshot_count(&events, SnapshotTrigger::End), 1);
}

#[tokio::test]
async fn test_second_execute_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc.csv");
    write_ticks(&path, 20, 10);

    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset("BTCUSDT", TickSourceDefinition::Csv { path })]),
    )
    .unwrap();

    let params = RunParameters::backtest(Some(day_one()), None);
    let (result, events) = run_service(
        engine,
        vec![
            Command::Execute(params),
            Command::Execute(params),
        ],
    )
    .await;
    let summary = result.unwrap().unwrap();

    let refusals: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::AlreadyRunning { active_run } => Some(*active_run),
            _ => None,
        })
        .collect();
    assert_eq!(refusals, vec![summary.run_id]);
    assert_eq!(stages(&events), vec![LifecycleStage::RunStarted, LifecycleStage::RunCompleted]);
}

#[tokio::test]
async fn test_out_of_order_tick_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btc.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "timestamp,bid,ask").unwrap();
    for offset in [0, 30, 20, 61] {
        writeln!(file, "{},100.0,100.1", DAY_ONE + offset).unwrap();
    }
    drop(file);

    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset("BTCUSDT", TickSourceDefinition::Csv { path })]),
    )
    .unwrap();

    let params = RunParameters::backtest(Some(day_one()), None);
    let (result, events) = run_service(engine, vec![Command::Execute(params)]).await;
    let summary = result.unwrap().unwrap();

    assert_eq!(summary.ticks_processed, 3);
    assert_eq!(summary.ticks_rejected, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Error {
            category: ErrorCategory::Data,
            ..
        }
    )));
}

#[tokio::test]
async fn test_missing_tick_file_fails_the_run() {
    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset(
            "BTCUSDT",
            TickSourceDefinition::Csv {
                path: "/no/such/file.csv".into(),
            },
        )]),
    )
    .unwrap();

    let params = RunParameters::backtest(Some(day_one()), None);
    let (result, events) = run_service(engine, vec![Command::Execute(params)]).await;

    assert!(matches!(result, Err(EngineError::Data(_))));
    assert_eq!(stages(&events), vec![LifecycleStage::RunFailed]);
    assert_eq!(snapshot_count(&events, SnapshotTrigger::End), 0);
}

#[test]
fn test_unknown_strategy_kind_is_rejected_up_front() {
    let mut def = asset(
        "BTCUSDT",
        TickSourceDefinition::Csv {
            path: "ticks.csv".into(),
        },
    );
    def.strategies[0].kind = "martingale".to_string();

    assert!(Engine::new(EngineSettings::default(), portfolio(vec![def])).is_err());
}

// ============================================================================
// Production against the paper exchange
// ============================================================================

fn paper_symbol(symbol: &str) -> SymbolInfo {
    SymbolInfo {
        symbol: symbol.to_string(),
        base_asset: "BTC".to_string(),
        quote_asset: "USDT".to_string(),
        step_size: 0.001,
        min_quantity: 0.001,
        tick_size: 0.01,
    }
}

fn live_ticks(start: i64, count: i64) -> Vec<Tick> {
    (0..count)
        .map(|i| {
            let mid = 100.0 + (i % 5) as f64;
            Tick::at_secs(start + i * 10, mid - 0.05, mid + 0.05)
        })
        .collect()
}

#[tokio::test]
async fn test_production_run_on_paper_exchange() {
    // Streamed ticks start a day after the warm-up ticks
    let gateway =
        PaperGateway::new(50_000.0, 0.001).with_symbol(paper_symbol("BTCUSDT"), live_ticks(DAY_ONE + 86_400, 40));

    let mut def = asset(
        "BTCUSDT",
        TickSourceDefinition::Csv {
            path: "unused.csv".into(),
        },
    );
    def.warmup = Some(TickSourceDefinition::Synthetic {
        scenario: "sideways".to_string(),
        start_price: 100.0,
        spread: 0.1,
        count: 10,
        interval_secs: Some(60),
        seed: Some(1),
    });

    let engine = Engine::new(EngineSettings::default(), portfolio(vec![def]))
        .unwrap()
        .with_gateway(Arc::new(gateway));

    let (result, events) = run_service(
        engine,
        vec![Command::Execute(RunParameters::production())],
    )
    .await;
    let summary = result.unwrap().unwrap();

    assert_eq!(summary.ticks_processed, 50);
    assert_eq!(
        stages(&events),
        vec![
            LifecycleStage::RunStarted,
            LifecycleStage::WarmupStarted,
            LifecycleStage::WarmupFinished,
            LifecycleStage::RunCompleted,
        ]
    );
    assert_eq!(snapshot_count(&events, SnapshotTrigger::End), 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::OrderUpdate { order, .. } if order.status == OrderStatus::Filled)));
}

#[tokio::test]
async fn test_production_without_gateway_fails() {
    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset(
            "BTCUSDT",
            TickSourceDefinition::Csv {
                path: "unused.csv".into(),
            },
        )]),
    )
    .unwrap();

    let (result, events) = run_service(
        engine,
        vec![Command::Execute(RunParameters::production())],
    )
    .await;

    assert!(matches!(result, Err(EngineError::Config(_))));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Error {
            category: ErrorCategory::Config,
            ..
        }
    )));
    assert_eq!(stages(&events), vec![LifecycleStage::RunFailed]);
}

#[tokio::test]
async fn test_production_startup_rejects_unknown_symbol() {
    let gateway = PaperGateway::new(50_000.0, 0.001).with_symbol(paper_symbol("ETHUSDT"), Vec::new());
    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset(
            "BTCUSDT",
            TickSourceDefinition::Csv {
                path: "unused.csv".into(),
            },
        )]),
    )
    .unwrap()
    .with_gateway(Arc::new(gateway));

    let (result, _) = run_service(
        engine,
        vec![Command::Execute(RunParameters::production())],
    )
    .await;
    assert!(matches!(result, Err(EngineError::Config(_))));
}

fn gateway_errors(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Error {
                category: ErrorCategory::Gateway,
                message,
                ..
            } => Some(message.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_production_replayed_ticks_never_open_positions() {
    // The stream hands out ticks still flagged as simulated
    let gateway = PaperGateway::new(50_000.0, 0.001)
        .with_symbol(paper_symbol("BTCUSDT"), live_ticks(DAY_ONE, 40))
        .keep_simulated_flag();

    let engine = Engine::new(
        EngineSettings::default(),
        portfolio(vec![asset(
            "BTCUSDT",
            TickSourceDefinition::Csv {
                path: "unused.csv".into(),
            },
        )]),
    )
    .unwrap()
    .with_gateway(Arc::new(gateway));

    let (result, events) = run_service(
        engine,
        vec![Command::Execute(RunParameters::production())],
    )
    .await;
    let summary = result.unwrap().unwrap();

    assert_eq!(summary.ticks_processed, 40);
    assert!(!events.iter().any(|e| matches!(e, Event::OrderUpdate { .. })));
    assert_eq!(stages(&events), vec![LifecycleStage::RunStarted, LifecycleStage::RunCompleted]);
}

#[tokio::test]
async fn test_production_stream_reconnects_after_disconnect() {
    let gateway = PaperGateway::new(50_000.0, 0.001)
        .with_symbol(paper_symbol("BTCUSDT"), live_ticks(DAY_ONE, 40))
        .with_disconnect_after(15);
    let settings = EngineSettings {
        stream_reconnect_delay_ms: 1,
        ..EngineSettings::default()
    };

    let engine = Engine::new(
        settings,
        portfolio(vec![asset(
            "BTCUSDT",
            TickSourceDefinition::Csv {
                path: "unused.csv".into(),
            },
        )]),
    )
    .unwrap()
    .with_gateway(Arc::new(gateway));

    let (result, events) = run_service(
        engine,
        vec![Command::Execute(RunParameters::production())],
    )
    .await;
    let summary = result.unwrap().unwrap();

    // Resumed where it dropped: nothing lost, nothing repeated
    assert_eq!(summary.ticks_processed, 40);
    assert_eq!(summary.ticks_rejected, 0);
    let errors = gateway_errors(&events);
    assert_eq!(errors.len(), 1, "unexpected gateway errors: {:?}", errors);
    assert!(errors[0].contains("reconnecting"));
    assert_eq!(stages(&events), vec![LifecycleStage::RunStarted, LifecycleStage::RunCompleted]);
}

#[tokio::test]
async fn test_production_warmup_load_failure_keeps_started_stages() {
    let gateway = PaperGateway::new(50_000.0, 0.001).with_symbol(paper_symbol("BTCUSDT"), live_ticks(DAY_ONE, 5));

    let mut def = asset(
        "BTCUSDT",
        TickSourceDefinition::Csv {
            path: "unused.csv".into(),
        },
    );
    def.warmup = Some(TickSourceDefinition::Csv {
        path: "/no/such/warmup.csv".into(),
    });

    let engine = Engine::new(EngineSettings::default(), portfolio(vec![def]))
        .unwrap()
        .with_gateway(Arc::new(gateway));

    let (result, events) = run_service(
        engine,
        vec![Command::Execute(RunParameters::production())],
    )
    .await;

    assert!(matches!(result, Err(EngineError::Data(_))));
    assert_eq!(
        stages(&events),
        vec![
            LifecycleStage::RunStarted,
            LifecycleStage::WarmupStarted,
            LifecycleStage::RunFailed,
        ]
    );
}
