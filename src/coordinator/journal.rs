use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::channel::ControlHandle;
use super::messages::{Command, Event, LifecycleStage};
use crate::analytics::{PortfolioSnapshot, SnapshotTrigger};

/// Writes events as JSON lines
pub struct EventJournal {
    writer: BufWriter<File>,
}

impl EventJournal {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn record(&mut self, event: &Event) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// One log line per event
pub fn log_event(event: &Event) {
    match event {
        Event::OrderUpdate {
            strategy_id, order, ..
        } => tracing::info!(
            "📝 [{}] {} {:?} {:?} {:.6} @ {:?} -> {:?}",
            strategy_id,
            order.symbol,
            order.side,
            order.order_type,
            order.volume,
            order.executed_price.or(order.price),
            order.status
        ),
        Event::Lifecycle { stage, at, .. } => match stage {
            LifecycleStage::RunFailed => tracing::error!("🔴 {:?} at {}", stage, at),
            _ => tracing::info!("🔵 {:?} at {}", stage, at),
        },
        Event::Snapshot(snapshot) => tracing::info!(
            "📸 {:?} snapshot at {}: NAV ${:.2} ({:+.2}%)",
            snapshot.trigger,
            snapshot.at,
            snapshot.total_nav,
            snapshot.total_return_pct()
        ),
        Event::Error {
            category,
            symbol,
            message,
            ..
        } => tracing::warn!(
            "⚠️  {:?} error{}: {}",
            category,
            symbol.as_deref().map(|s| format!(" ({})", s)).unwrap_or_default(),
            message
        ),
        Event::AlreadyRunning { active_run } => {
            tracing::warn!("⚠️  Run {} already active, command ignored", active_run)
        }
    }
}

/// Follow a run from the control side until the engine hangs up
///
/// Logs every event, writes it to the journal when there is one and turns
/// Ctrl+C into a KILL. Returns the run's final snapshot.
pub async fn follow_run(control: &mut ControlHandle, mut journal: Option<&mut EventJournal>) -> Option<PortfolioSnapshot> {
    let kill = control.command_sender();
    let mut kill_sent = false;
    let mut last = None;

    loop {
        tokio::select! {
            event = control.next_event() => {
                let Some(event) = event else {
                    break;
                };
                log_event(&event);
                if let Some(journal) = journal.as_deref_mut() {
                    if let Err(e) = journal.record(&event) {
                        tracing::warn!("⚠️  could not write event: {}", e);
                    }
                }
                if let Event::Snapshot(snapshot) = event {
                    if snapshot.trigger == SnapshotTrigger::End {
                        last = Some(snapshot);
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !kill_sent => {
                tracing::info!("\n⚠️  Received Ctrl+C, stopping run...");
                kill_sent = true;
                if kill.send(Command::Kill).await.is_err() {
                    tracing::warn!("engine is gone, nothing to stop");
                }
            }
        }
    }

    if let Some(journal) = journal {
        if let Err(e) = journal.flush() {
            tracing::warn!("⚠️  could not flush event journal: {}", e);
        }
    }
    last
}
