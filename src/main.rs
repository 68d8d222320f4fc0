use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use quantbot::config::{EngineSettings, PortfolioDefinition};
use quantbot::coordinator::{channels, follow_run, EventJournal, RunParameters};
use quantbot::engine::{Engine, EngineService};
use quantbot::feed;
use quantbot::gateway::{PaperGateway, SymbolInfo};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Quote assets recognised when splitting a symbol like BTCUSDT
const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "USD", "EUR", "BTC"];

#[derive(Parser, Debug)]
#[command(name = "quantbot", about = "Run a portfolio live against the paper exchange")]
struct Args {
    /// Portfolio definition (TOML)
    #[arg(long)]
    portfolio_path: PathBuf,

    /// Engine settings file. Defaults to ./quantbot.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write every event as a JSON line to this file
    #[arg(long)]
    events_out: Option<PathBuf>,

    /// Starting balance of the paper account
    #[arg(long, default_value_t = 10_000.0)]
    paper_balance: f64,

    /// Pause between streamed paper ticks, in milliseconds
    #[arg(long, default_value_t = 0)]
    tick_delay_ms: u64,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let settings = EngineSettings::load(args.config.as_deref()).context("loading engine settings")?;
    setup_logging(&settings.log_filter);

    tracing::info!("🚀 quantbot starting in production mode");

    let portfolio = PortfolioDefinition::load(&args.portfolio_path)
        .with_context(|| format!("loading portfolio {}", args.portfolio_path.display()))?;
    let gateway = paper_gateway(&portfolio, &settings, &args)?;
    let engine = Engine::new(settings.clone(), portfolio)?.with_gateway(Arc::new(gateway));

    let (mut control, endpoint) = channels(settings.command_capacity, settings.event_capacity);
    let service = tokio::spawn(EngineService::new(engine, endpoint).exit_after_run(true).run());
    control.execute(RunParameters::production()).await?;

    let mut journal = args
        .events_out
        .as_deref()
        .map(EventJournal::create)
        .transpose()
        .context("creating event journal")?;

    tracing::info!("\nPress Ctrl+C to stop...\n");
    let report = follow_run(&mut control, journal.as_mut()).await;

    let summary = service.await.context("engine task panicked")??;
    if let Some(report) = report {
        report.print_report();
    }
    if let Some(summary) = summary {
        tracing::info!(
            "👋 quantbot stopped ({} ticks, killed: {})",
            summary.ticks_processed,
            summary.killed
        );
    }
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(default_filter: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Paper exchange streaming each asset's configured ticks
fn paper_gateway(portfolio: &PortfolioDefinition, settings: &EngineSettings, args: &Args) -> Result<PaperGateway> {
    let mut gateway = PaperGateway::new(args.paper_balance, settings.fee_rate)
        .with_tick_delay(Duration::from_millis(args.tick_delay_ms));

    for asset in &portfolio.assets {
        let ticks = feed::load_ticks(&asset.ticks, &asset.symbol, settings, Utc::now())
            .with_context(|| format!("loading paper ticks for {}", asset.symbol))?;
        tracing::info!("📡 {}: paper exchange will stream {} ticks", asset.symbol, ticks.len());
        gateway = gateway.with_symbol(paper_symbol(&asset.symbol), ticks);
    }
    Ok(gateway)
}

fn paper_symbol(symbol: &str) -> SymbolInfo {
    let (base, quote) = QUOTE_ASSETS
        .iter()
        .find_map(|quote| {
            symbol
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(|base| (base.to_string(), quote.to_string()))
        })
        .unwrap_or_else(|| (symbol.to_string(), "USD".to_string()));

    SymbolInfo {
        symbol: symbol.to_string(),
        base_asset: base,
        quote_asset: quote,
        step_size: 0.000_001,
        min_quantity: 0.000_001,
        tick_size: 0.01,
    }
}
