// Supervised gateway tick streams for production runs
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::models::Tick;

/// Ticks buffered between a gateway stream and the engine loop
const STREAM_BUFFER: usize = 256;

/// Watchdog and reconnect policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSettings {
    /// A stream without ticks for this long is restarted
    pub stale_after: Duration,
    /// Consecutive failed connections before a stream is given up
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(10),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// What the engine loop hears from the supervisor
#[derive(Debug)]
pub enum StreamEvent {
    Tick(usize, Tick),
    /// The stream dropped or went quiet and is being reopened
    Reconnecting { idx: usize, reason: String },
    /// The stream will not deliver again
    Finished {
        idx: usize,
        result: Result<Option<u64>, GatewayError>,
    },
}

enum StreamItem {
    Tick {
        idx: usize,
        tick: Tick,
    },
    Ended {
        idx: usize,
        generation: u64,
        result: Result<Option<u64>, GatewayError>,
    },
}

#[derive(Debug)]
struct StreamSlot {
    symbol: String,
    handle: Option<JoinHandle<()>>,
    /// Bumped on every reconnect; endings of older connections are ignored
    generation: u64,
    last_seen: Instant,
    failures: u32,
    done: bool,
}

/// Keeps one gateway stream per asset alive
///
/// A stream that fails or stays silent past `stale_after` is aborted and
/// reopened after `reconnect_delay`, up to `reconnect_attempts` times in a
/// row. A delivered tick resets the count. A stream that ends cleanly is
/// not reopened.
pub struct StreamSupervisor {
    gateway: Arc<dyn Gateway>,
    settings: StreamSettings,
    tx: mpsc::Sender<StreamItem>,
    rx: mpsc::Receiver<StreamItem>,
    slots: Vec<StreamSlot>,
}

impl StreamSupervisor {
    /// Open one stream per symbol; the index of a symbol tags its ticks
    pub fn start(gateway: Arc<dyn Gateway>, symbols: Vec<String>, settings: StreamSettings) -> Self {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let now = Instant::now();
        let slots = symbols
            .into_iter()
            .map(|symbol| StreamSlot {
                symbol,
                handle: None,
                generation: 0,
                last_seen: now,
                failures: 0,
                done: false,
            })
            .collect();

        let mut supervisor = Self {
            gateway,
            settings,
            tx,
            rx,
            slots,
        };
        for idx in 0..supervisor.slots.len() {
            supervisor.connect(idx, Duration::ZERO);
        }
        supervisor
    }

    /// Next tick or stream state change; None once every stream is finished
    ///
    /// Cancel safe: state only changes after an item has been taken.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        loop {
            let deadline = self
                .slots
                .iter()
                .filter(|slot| !slot.done)
                .map(|slot| slot.last_seen + self.settings.stale_after)
                .min()?;

            // The supervisor holds a sender, so `recv` only yields items
            let item = tokio::select! {
                item = self.rx.recv() => item,
                _ = tokio::time::sleep_until(deadline) => None,
            };
            let event = match item {
                Some(item) => self.on_item(item),
                None => self.on_stale(Instant::now()),
            };
            if event.is_some() {
                return event;
            }
        }
    }

    fn on_item(&mut self, item: StreamItem) -> Option<StreamEvent> {
        match item {
            StreamItem::Tick { idx, tick } => {
                let slot = self.slots.get_mut(idx)?;
                slot.last_seen = Instant::now();
                slot.failures = 0;
                Some(StreamEvent::Tick(idx, tick))
            }
            StreamItem::Ended {
                idx,
                generation,
                result,
            } => {
                let slot = self.slots.get(idx)?;
                if slot.done || slot.generation != generation {
                    return None;
                }
                match result {
                    Err(e) => Some(self.retry(idx, e)),
                    finished => {
                        self.finish(idx);
                        Some(StreamEvent::Finished { idx, result: finished })
                    }
                }
            }
        }
    }

    fn on_stale(&mut self, now: Instant) -> Option<StreamEvent> {
        let stale_after = self.settings.stale_after;
        let idx = self
            .slots
            .iter()
            .position(|slot| !slot.done && now >= slot.last_seen + stale_after)?;

        let symbol = &self.slots[idx].symbol;
        tracing::warn!("⚠️  {}: no tick for {:?}, restarting stream", symbol, stale_after);
        let error = GatewayError::Request(format!("{} stream silent for {:?}", symbol, stale_after));
        Some(self.retry(idx, error))
    }

    /// Reopen a failed stream, or give up once the attempts are spent
    fn retry(&mut self, idx: usize, error: GatewayError) -> StreamEvent {
        let attempts = self.settings.reconnect_attempts;
        let slot = &mut self.slots[idx];
        slot.failures += 1;

        if slot.failures > attempts {
            tracing::error!("❌ {}: giving up after {} reconnect attempts", slot.symbol, attempts);
            self.finish(idx);
            return StreamEvent::Finished { idx, result: Err(error) };
        }

        tracing::warn!(
            "🔌 {}: reconnecting ({}/{}): {}",
            slot.symbol,
            slot.failures,
            attempts,
            error
        );
        let delay = self.settings.reconnect_delay;
        self.connect(idx, delay);
        StreamEvent::Reconnecting {
            idx,
            reason: error.to_string(),
        }
    }

    fn connect(&mut self, idx: usize, delay: Duration) {
        let gateway = Arc::clone(&self.gateway);
        let out = self.tx.clone();
        let slot = &mut self.slots[idx];

        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        slot.generation += 1;
        slot.last_seen = Instant::now() + delay;
        slot.handle = Some(tokio::spawn(forward_stream(
            gateway,
            slot.symbol.clone(),
            idx,
            slot.generation,
            delay,
            out,
        )));
    }

    fn finish(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        slot.done = true;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            if let Some(handle) = slot.handle.take() {
                handle.abort();
            }
        }
    }
}

/// Run one gateway stream, tagging its ticks with the asset index
async fn forward_stream(
    gateway: Arc<dyn Gateway>,
    symbol: String,
    idx: usize,
    generation: u64,
    delay: Duration,
    out: mpsc::Sender<StreamItem>,
) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let (sink, mut source) = mpsc::channel(STREAM_BUFFER);
    let forward = async {
        while let Some(tick) = source.recv().await {
            if out.send(StreamItem::Tick { idx, tick }).await.is_err() {
                break;
            }
        }
    };

    let (result, _) = tokio::join!(gateway.stream(&symbol, sink), forward);
    let _ = out
        .send(StreamItem::Ended {
            idx,
            generation,
            result,
        })
        .await;
}
