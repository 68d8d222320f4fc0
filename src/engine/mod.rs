// Run orchestration: backtest replay and live production sessions
pub mod asset;
pub mod service;
pub mod stream;

pub use asset::AssetRunner;
pub use service::EngineService;
pub use stream::{StreamEvent, StreamSettings, StreamSupervisor};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::analytics::{PortfolioSnapshot, SnapshotTrigger};
use crate::config::{AssetDefinition, EngineSettings, PortfolioDefinition, TickSourceDefinition};
use crate::coordinator::{Command, EngineEndpoint, ErrorCategory, Event, EventOutbox, LifecycleStage, RunMode, RunParameters};
use crate::error::{ConfigError, EngineError};
use crate::execution::{sync_orders, ExecutionMode, LiveSettings};
use crate::feed;
use crate::gateway::{Gateway, OrderFilter};
use crate::models::Tick;

/// First synthetic tick when a run has no start date (2024-01-01T00:00:00Z)
const DEFAULT_START_SECS: i64 = 1_704_067_200;

/// Outcome of one finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub ticks_processed: u64,
    pub ticks_rejected: u64,
    pub killed: bool,
    pub final_snapshot: PortfolioSnapshot,
}

/// Builds and drives runs for one portfolio
pub struct Engine {
    settings: EngineSettings,
    portfolio: PortfolioDefinition,
    gateway: Option<Arc<dyn Gateway>>,
}

impl Engine {
    /// Validate the configuration and every component it describes
    ///
    /// Unknown indicator or strategy kinds and bad parameters are caught here,
    /// before any run starts.
    pub fn new(settings: EngineSettings, portfolio: PortfolioDefinition) -> Result<Self, ConfigError> {
        settings.validate()?;
        portfolio.validate()?;
        for asset in &portfolio.assets {
            AssetRunner::build(asset, &settings, ExecutionMode::Simulated)?;
        }

        Ok(Self {
            settings,
            portfolio,
            gateway: None,
        })
    }

    /// Exchange used by production runs
    pub fn with_gateway(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn portfolio(&self) -> &PortfolioDefinition {
        &self.portfolio
    }

    /// Run to completion or until killed
    ///
    /// Setup failures are reported as an `Error` event followed by `RunFailed`
    /// and returned.
    pub async fn execute(&self, params: RunParameters, endpoint: &mut EngineEndpoint) -> Result<RunSummary, EngineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id, mode = ?params.mode);

        async move {
            tracing::info!("🚀 Starting {:?} run for portfolio '{}'", params.mode, self.portfolio.name);

            let result = match params.mode {
                RunMode::Backtest => self.run_backtest(run_id, params, endpoint).await,
                RunMode::Production => self.run_production(run_id, params, endpoint).await,
            };

            if let Err(e) = &result {
                tracing::error!("❌ Run failed: {}", e);
                let mut outbox = EventOutbox::new(run_id);
                outbox.error(error_category(e), None, e.to_string());
                outbox.lifecycle(LifecycleStage::RunFailed, Utc::now());
                outbox.flush(endpoint).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    fn build_assets(&self, mode: ExecutionMode) -> Result<Vec<AssetRunner>, ConfigError> {
        self.portfolio
            .assets
            .iter()
            .map(|asset| AssetRunner::build(asset, &self.settings, mode))
            .collect()
    }

    // ========================================================================
    // BACKTEST
    // ========================================================================

    async fn run_backtest(
        &self,
        run_id: Uuid,
        params: RunParameters,
        endpoint: &mut EngineEndpoint,
    ) -> Result<RunSummary, EngineError> {
        let assets = self.build_assets(ExecutionMode::Simulated)?;
        let start = params.from.map(start_of_day).unwrap_or_else(default_start);

        let mut series = Vec::with_capacity(assets.len());
        for def in &self.portfolio.assets {
            let ticks: Vec<Tick> = feed::load_ticks(&def.ticks, &def.symbol, &self.settings, start)?
                .into_iter()
                .filter(|tick| params.contains(tick.timestamp))
                .collect();
            tracing::info!("📊 {}: {} ticks in range", def.symbol, ticks.len());
            series.push(ticks);
        }
        let merged = merge_by_time(series);

        let mut session = Session::new(run_id, assets);
        session.outbox.lifecycle(LifecycleStage::RunStarted, Utc::now());

        if !session.safe_point(endpoint).await {
            for (idx, tick) in &merged {
                session.process(*idx, tick, true);
                if session.safe_point(endpoint).await {
                    break;
                }
            }
        }

        Ok(session.finish(endpoint).await)
    }

    // ========================================================================
    // PRODUCTION
    // ========================================================================

    async fn run_production(
        &self,
        run_id: Uuid,
        _params: RunParameters,
        endpoint: &mut EngineEndpoint,
    ) -> Result<RunSummary, EngineError> {
        let gateway = self
            .gateway
            .clone()
            .ok_or_else(|| ConfigError::Invalid("production runs need a gateway".to_string()))?;

        let mut assets = self.build_assets(ExecutionMode::Live)?;
        for (def, asset) in self.portfolio.assets.iter().zip(assets.iter_mut()) {
            verify_asset(gateway.as_ref(), def, asset).await?;
        }
        verify_account(gateway.as_ref()).await?;

        let live = self.settings.live();
        let mut session = Session::new(run_id, assets);
        session.outbox.lifecycle(LifecycleStage::RunStarted, Utc::now());

        if !self.warm_up(&mut session, endpoint).await? {
            let symbols = session.assets.iter().map(|a| a.symbol().to_string()).collect();
            let mut streams = StreamSupervisor::start(Arc::clone(&gateway), symbols, self.settings.streams());

            let mut commands_open = true;
            loop {
                tokio::select! {
                    event = streams.next() => match event {
                        Some(StreamEvent::Tick(idx, tick)) => {
                            // Replayed ticks reaching a live stream never open positions
                            let can_open = !tick.simulated;
                            session.process(idx, &tick, can_open);
                            session.sync_live(idx, gateway.as_ref(), &live, can_open).await;
                        }
                        Some(event) => session.on_stream_event(event),
                        None => {
                            tracing::info!("🏁 All tick streams ended");
                            break;
                        }
                    },
                    command = endpoint.recv_command(), if commands_open => match command {
                        Some(command) => session.on_command(command),
                        None => {
                            tracing::warn!("command channel closed, run continues until streams end");
                            commands_open = false;
                        }
                    },
                }

                if session.safe_point(endpoint).await {
                    break;
                }
            }
        }

        Ok(session.finish(endpoint).await)
    }

    /// Replay historical ticks without allowing new positions
    ///
    /// Returns true when the run was killed during warm-up.
    async fn warm_up(&self, session: &mut Session, endpoint: &mut EngineEndpoint) -> Result<bool, EngineError> {
        if self.portfolio.assets.iter().all(|a| a.warmup.is_none()) {
            return Ok(session.safe_point(endpoint).await);
        }

        session.outbox.lifecycle(LifecycleStage::WarmupStarted, Utc::now());
        let mut series = Vec::with_capacity(self.portfolio.assets.len());
        for def in &self.portfolio.assets {
            let ticks = match &def.warmup {
                Some(source) => match load_warmup(source, def, &self.settings) {
                    Ok(ticks) => ticks,
                    Err(e) => {
                        // Deliver RunStarted and WarmupStarted ahead of the failure
                        session.outbox.flush(endpoint).await;
                        return Err(e);
                    }
                },
                None => Vec::new(),
            };
            series.push(ticks);
        }

        let merged = merge_by_time(series);
        tracing::info!("🔥 Warming up on {} historical ticks", merged.len());

        if session.safe_point(endpoint).await {
            return Ok(true);
        }
        for (idx, tick) in &merged {
            session.process(*idx, tick, false);
            if session.safe_point(endpoint).await {
                return Ok(true);
            }
        }

        session.outbox.lifecycle(LifecycleStage::WarmupFinished, Utc::now());
        Ok(session.safe_point(endpoint).await)
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Mutable state of one run
struct Session {
    run_id: Uuid,
    assets: Vec<AssetRunner>,
    outbox: EventOutbox,
    started: bool,
    current_day: Option<NaiveDate>,
    last_at: Option<DateTime<Utc>>,
    killed: bool,
}

impl Session {
    fn new(run_id: Uuid, assets: Vec<AssetRunner>) -> Self {
        Self {
            run_id,
            assets,
            outbox: EventOutbox::new(run_id),
            started: false,
            current_day: None,
            last_at: None,
            killed: false,
        }
    }

    fn process(&mut self, idx: usize, tick: &Tick, can_open: bool) {
        if !self.started {
            self.started = true;
            self.snapshot(SnapshotTrigger::Start, tick.timestamp);
        }

        let Some(asset) = self.assets.get_mut(idx) else {
            return;
        };
        if !asset.process_tick(tick, can_open, &mut self.outbox) {
            return;
        }

        let day = tick.timestamp.date_naive();
        match self.current_day {
            Some(current) if day > current => {
                self.current_day = Some(day);
                self.snapshot(SnapshotTrigger::NewDay, tick.timestamp);
            }
            None => self.current_day = Some(day),
            _ => {}
        }
        self.last_at = Some(tick.timestamp);
    }

    /// Reconcile the ticked asset's live orders and deliver the changes
    async fn sync_live(&mut self, idx: usize, gateway: &dyn Gateway, live: &LiveSettings, can_open: bool) {
        let Some(asset) = self.assets.get_mut(idx) else {
            return;
        };

        let symbol = asset.symbol().to_string();
        for slot in asset.runtime_mut().slots_mut() {
            for e in sync_orders(gateway, slot.book_mut(), live).await {
                self.outbox.error(ErrorCategory::Gateway, Some(&symbol), e.to_string());
            }
        }
        asset.dispatch_transactions(can_open, &mut self.outbox);
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        let idx = match &event {
            StreamEvent::Tick(idx, _) | StreamEvent::Reconnecting { idx, .. } | StreamEvent::Finished { idx, .. } => *idx,
        };
        let symbol = self
            .assets
            .get(idx)
            .map(|a| a.symbol().to_string())
            .unwrap_or_default();

        match event {
            StreamEvent::Tick(..) => {}
            StreamEvent::Reconnecting { reason, .. } => {
                self.outbox
                    .error(ErrorCategory::Gateway, Some(&symbol), format!("stream reconnecting: {}", reason));
            }
            StreamEvent::Finished { result: Ok(Some(count)), .. } => {
                tracing::info!("📴 {}: stream ended after {} ticks", symbol, count)
            }
            StreamEvent::Finished { result: Ok(None), .. } => {
                tracing::warn!("⚠️  {}: gateway has no tick stream", symbol);
                self.outbox
                    .error(ErrorCategory::Gateway, Some(&symbol), "no tick stream for symbol");
            }
            StreamEvent::Finished { result: Err(e), .. } => {
                tracing::error!("❌ {}: stream failed: {}", symbol, e);
                self.outbox.error(ErrorCategory::Gateway, Some(&symbol), e.to_string());
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Kill => {
                tracing::info!("🛑 Kill requested");
                self.killed = true;
            }
            Command::Execute(_) => {
                tracing::warn!("⚠️  Execute ignored: run {} is active", self.run_id);
                self.outbox.push(Event::AlreadyRunning {
                    active_run: self.run_id,
                });
            }
        }
    }

    /// Flush events and look at pending commands; true when the run must stop
    async fn safe_point(&mut self, endpoint: &mut EngineEndpoint) -> bool {
        while let Some(command) = endpoint.poll_command() {
            self.on_command(command);
        }
        self.outbox.flush(endpoint).await;
        self.killed
    }

    fn snapshot(&mut self, trigger: SnapshotTrigger, at: DateTime<Utc>) -> PortfolioSnapshot {
        let strategies = self.assets.iter().flat_map(AssetRunner::snapshots).collect();
        let snapshot = PortfolioSnapshot::new(self.run_id, trigger, at, strategies);
        self.outbox.snapshot(snapshot.clone());
        snapshot
    }

    async fn finish(mut self, endpoint: &EngineEndpoint) -> RunSummary {
        let at = self.last_at.unwrap_or_else(Utc::now);
        for asset in &mut self.assets {
            asset.finish(at, &mut self.outbox);
        }

        let final_snapshot = self.snapshot(SnapshotTrigger::End, at);
        let stage = if self.killed {
            LifecycleStage::RunKilled
        } else {
            LifecycleStage::RunCompleted
        };
        self.outbox.lifecycle(stage, Utc::now());
        self.outbox.flush(endpoint).await;

        let ticks_processed = self.assets.iter().map(AssetRunner::ticks_processed).sum();
        let ticks_rejected = self.assets.iter().map(AssetRunner::ticks_rejected).sum();
        tracing::info!(
            "✅ Run {} {:?}: {} ticks processed, {} rejected, NAV ${:.2}",
            self.run_id,
            stage,
            ticks_processed,
            ticks_rejected,
            final_snapshot.total_nav
        );

        RunSummary {
            run_id: self.run_id,
            ticks_processed,
            ticks_rejected,
            killed: self.killed,
            final_snapshot,
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Interleave per-asset series by timestamp
///
/// Each series keeps its own order; equal timestamps go to the lower asset
/// index first.
fn merge_by_time(series: Vec<Vec<Tick>>) -> Vec<(usize, Tick)> {
    let total = series.iter().map(Vec::len).sum();
    let mut iters: Vec<_> = series.into_iter().map(|s| s.into_iter().peekable()).collect();

    let mut heads = BinaryHeap::new();
    for (idx, iter) in iters.iter_mut().enumerate() {
        if let Some(tick) = iter.peek() {
            heads.push(Reverse((tick.timestamp, idx)));
        }
    }

    let mut merged = Vec::with_capacity(total);
    while let Some(Reverse((_, idx))) = heads.pop() {
        if let Some(tick) = iters[idx].next() {
            merged.push((idx, tick));
            if let Some(next) = iters[idx].peek() {
                heads.push(Reverse((next.timestamp, idx)));
            }
        }
    }
    merged
}

async fn verify_asset(gateway: &dyn Gateway, def: &AssetDefinition, asset: &mut AssetRunner) -> Result<(), ConfigError> {
    let symbol = def.symbol.as_str();
    let startup = |reason: String| ConfigError::Startup {
        symbol: symbol.to_string(),
        reason,
    };

    let info = gateway
        .get_symbol_info(symbol)
        .await
        .map_err(|e| startup(e.to_string()))?
        .ok_or_else(|| startup("symbol info unavailable".to_string()))?;

    let fees = gateway
        .get_trading_fees(symbol)
        .await
        .map_err(|e| startup(e.to_string()))?;
    if fees.is_none() {
        tracing::warn!("⚠️  {}: no trading fees reported, keeping configured rate", symbol);
    }

    for slot in asset.runtime_mut().slots_mut() {
        let leverage = slot.book().leverage().round().max(1.0) as u32;
        gateway
            .set_leverage(symbol, leverage)
            .await
            .map_err(|e| startup(e.to_string()))?
            .ok_or_else(|| startup(format!("leverage {}x was not applied", leverage)))?;

        let book = slot.book_mut();
        book.set_symbol_info(info.clone());
        if let Some(fees) = fees {
            book.set_fee_rate(fees.taker);
        }
    }

    match gateway.get_leverage_info(symbol).await {
        Ok(Some(leverage)) => tracing::info!(
            "⚙️  {}: leverage {}x (max {}x)",
            symbol,
            leverage.leverage,
            leverage.max_leverage
        ),
        Ok(None) => tracing::debug!("{}: no leverage info", symbol),
        Err(e) => tracing::warn!("⚠️  {}: leverage info failed: {}", symbol, e),
    }

    match gateway.get_orders(&OrderFilter::open_orders(symbol)).await {
        Ok(Some(orders)) if !orders.is_empty() => {
            tracing::warn!("⚠️  {}: {} open order(s) already on the exchange", symbol, orders.len())
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("⚠️  {}: open order lookup failed: {}", symbol, e),
    }

    tracing::info!("✅ {}: startup checks passed (step {})", symbol, info.step_size);
    Ok(())
}

async fn verify_account(gateway: &dyn Gateway) -> Result<(), ConfigError> {
    let startup = |reason: String| ConfigError::Startup {
        symbol: "account".to_string(),
        reason,
    };

    let account = gateway
        .account()
        .await
        .map_err(|e| startup(e.to_string()))?
        .ok_or_else(|| startup("account info unavailable".to_string()))?;
    if account.total_balance <= 0.0 {
        return Err(startup(format!("balance {:.2} is not positive", account.total_balance)));
    }
    tracing::info!(
        "💰 Account balance ${:.2} (${:.2} available)",
        account.total_balance,
        account.available_balance
    );

    match gateway.positions().await {
        Ok(Some(positions)) => {
            for position in positions {
                tracing::info!(
                    "  📌 {} {:.6} @ {:.4}",
                    position.symbol,
                    position.volume,
                    position.entry_price
                );
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("⚠️  position lookup failed: {}", e),
    }
    Ok(())
}

fn load_warmup(
    source: &TickSourceDefinition,
    def: &AssetDefinition,
    settings: &EngineSettings,
) -> Result<Vec<Tick>, EngineError> {
    let ticks = feed::load_ticks(source, &def.symbol, settings, default_start())?;
    Ok(ticks.into_iter().map(|t| Tick { simulated: true, ..t }).collect())
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn default_start() -> DateTime<Utc> {
    DateTime::from_timestamp(DEFAULT_START_SECS, 0).unwrap_or_default()
}

fn error_category(error: &EngineError) -> ErrorCategory {
    match error {
        EngineError::Data(_) => ErrorCategory::Data,
        EngineError::Indicator(_) => ErrorCategory::Indicator,
        EngineError::Strategy(_) => ErrorCategory::Strategy,
        EngineError::Gateway(_) => ErrorCategory::Gateway,
        EngineError::Config(_) => ErrorCategory::Config,
        EngineError::Order(_) | EngineError::AlreadyRunning | EngineError::ChannelClosed(_) => ErrorCategory::Engine,
    }
}
