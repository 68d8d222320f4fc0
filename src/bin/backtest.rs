use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use quantbot::config::{EngineSettings, PortfolioDefinition};
use quantbot::coordinator::{channels, follow_run, EventJournal, RunParameters};
use quantbot::engine::{Engine, EngineService};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Replay a portfolio over historical or synthetic ticks")]
struct Args {
    /// Portfolio definition (TOML)
    #[arg(long)]
    portfolio_path: PathBuf,

    /// First day of the run (YYYY-MM-DD)
    #[arg(long)]
    from_date: NaiveDate,

    /// Last day of the run, inclusive (YYYY-MM-DD). Defaults to the end of the data.
    #[arg(long)]
    to_date: Option<NaiveDate>,

    /// Engine settings file. Defaults to ./quantbot.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write every event as a JSON line to this file
    #[arg(long)]
    events_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Some(to) = args.to_date {
        if to < args.from_date {
            bail!("--to-date {} is before --from-date {}", to, args.from_date);
        }
    }

    let settings = EngineSettings::load(args.config.as_deref()).context("loading engine settings")?;
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_filter.clone());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║               QUANTBOT BACKTEST                       ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let portfolio = PortfolioDefinition::load(&args.portfolio_path)
        .with_context(|| format!("loading portfolio {}", args.portfolio_path.display()))?;
    let engine = Engine::new(settings.clone(), portfolio)?;

    let (mut control, endpoint) = channels(settings.command_capacity, settings.event_capacity);
    let service = tokio::spawn(EngineService::new(engine, endpoint).exit_after_run(true).run());
    control
        .execute(RunParameters::backtest(Some(args.from_date), args.to_date))
        .await?;

    let mut journal = args
        .events_out
        .as_deref()
        .map(EventJournal::create)
        .transpose()
        .context("creating event journal")?;

    let report = follow_run(&mut control, journal.as_mut()).await;
    let summary = service.await.context("engine task panicked")??;

    if let Some(report) = report {
        report.print_report();
    }
    if let Some(summary) = summary {
        println!(
            "Ticks processed: {}  rejected: {}{}",
            summary.ticks_processed,
            summary.ticks_rejected,
            if summary.killed { "  (killed)" } else { "" }
        );
    }
    Ok(())
}
