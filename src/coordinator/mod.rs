// Command/event channels between the engine and its control surface
pub mod channel;
pub mod journal;
pub mod messages;

pub use channel::{channels, ControlHandle, EngineEndpoint, EventOutbox};
pub use journal::{follow_run, log_event, EventJournal};
pub use messages::{Command, ErrorCategory, Event, LifecycleStage, RunMode, RunParameters};
