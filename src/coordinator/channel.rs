use tokio::sync::mpsc;
use uuid::Uuid;

use super::messages::{Command, ErrorCategory, Event, LifecycleStage, RunParameters};
use crate::analytics::PortfolioSnapshot;
use crate::error::EngineError;
use crate::execution::Order;

/// Create the bounded command and event channels
///
/// # Arguments
/// * `command_capacity` - Commands buffered before `execute`/`kill` wait
/// * `event_capacity` - Events buffered before the engine waits for the consumer
pub fn channels(command_capacity: usize, event_capacity: usize) -> (ControlHandle, EngineEndpoint) {
    let (command_tx, command_rx) = mpsc::channel(command_capacity.max(1));
    let (event_tx, event_rx) = mpsc::channel(event_capacity.max(1));

    (
        ControlHandle {
            commands: command_tx,
            events: event_rx,
        },
        EngineEndpoint {
            commands: command_rx,
            events: event_tx,
        },
    )
}

/// Outer side: sends commands, receives events
#[derive(Debug)]
pub struct ControlHandle {
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<Event>,
}

impl ControlHandle {
    pub async fn execute(&self, params: RunParameters) -> Result<(), EngineError> {
        self.send(Command::Execute(params)).await
    }

    pub async fn kill(&self) -> Result<(), EngineError> {
        self.send(Command::Kill).await
    }

    pub async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::ChannelClosed("command"))
    }

    /// Extra command sender, e.g. for a signal handler
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    /// Next event; `None` once the engine side is gone and the buffer is empty
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }
}

/// Engine side: receives commands, sends events
#[derive(Debug)]
pub struct EngineEndpoint {
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Event>,
}

impl EngineEndpoint {
    /// Wait for the next command; `None` when every sender is dropped
    pub async fn recv_command(&mut self) -> Option<Command> {
        self.commands.recv().await
    }

    /// Non-blocking check used at safe points between ticks
    pub fn poll_command(&mut self) -> Option<Command> {
        self.commands.try_recv().ok()
    }

    /// Send one event, waiting for room in the channel
    ///
    /// Returns false when the consumer is gone; events are then dropped.
    pub async fn send(&self, event: Event) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Events produced while processing one tick, flushed in order at the next safe point
#[derive(Debug)]
pub struct EventOutbox {
    run_id: Uuid,
    events: Vec<Event>,
    consumer_gone: bool,
}

impl EventOutbox {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            events: Vec::new(),
            consumer_gone: false,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn order_update(&mut self, strategy_id: &str, order: Order) {
        self.events.push(Event::OrderUpdate {
            run_id: self.run_id,
            strategy_id: strategy_id.to_string(),
            symbol: order.symbol.clone(),
            order,
        });
    }

    pub fn lifecycle(&mut self, stage: LifecycleStage, at: chrono::DateTime<chrono::Utc>) {
        self.events.push(Event::Lifecycle {
            run_id: self.run_id,
            stage,
            at,
        });
    }

    pub fn snapshot(&mut self, snapshot: PortfolioSnapshot) {
        self.events.push(Event::Snapshot(snapshot));
    }

    pub fn error(&mut self, category: ErrorCategory, symbol: Option<&str>, message: impl Into<String>) {
        self.events.push(Event::Error {
            run_id: Some(self.run_id),
            category,
            symbol: symbol.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Send everything buffered, oldest first
    pub async fn flush(&mut self, endpoint: &EngineEndpoint) {
        for event in self.events.drain(..) {
            if self.consumer_gone {
                break;
            }
            if !endpoint.send(event).await {
                tracing::warn!("event consumer is gone, dropping events for run {}", self.run_id);
                self.consumer_gone = true;
            }
        }
    }
}
