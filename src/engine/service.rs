use super::{Engine, RunSummary};
use crate::coordinator::{Command, EngineEndpoint};
use crate::error::EngineError;

/// Engine side of the coordinator: idles between runs, one run at a time
pub struct EngineService {
    engine: Engine,
    endpoint: EngineEndpoint,
    exit_after_run: bool,
}

impl EngineService {
    pub fn new(engine: Engine, endpoint: EngineEndpoint) -> Self {
        Self {
            engine,
            endpoint,
            exit_after_run: false,
        }
    }

    /// Stop after the first run instead of waiting for the next EXECUTE
    pub fn exit_after_run(mut self, exit: bool) -> Self {
        self.exit_after_run = exit;
        self
    }

    /// Serve commands until the channel closes
    ///
    /// Returns the summary of the last completed run. With `exit_after_run`
    /// a failed run is returned as the error.
    pub async fn run(mut self) -> Result<Option<RunSummary>, EngineError> {
        let mut last = None;
        tracing::info!("⏳ Engine idle, waiting for commands");

        while let Some(command) = self.endpoint.recv_command().await {
            match command {
                Command::Kill => tracing::info!("🛑 Kill received with no active run, ignoring"),
                Command::Execute(params) => {
                    match self.engine.execute(params, &mut self.endpoint).await {
                        Ok(summary) => last = Some(summary),
                        Err(e) if self.exit_after_run => return Err(e),
                        Err(e) => tracing::error!("❌ Run failed, engine stays idle: {}", e),
                    }
                    if self.exit_after_run {
                        break;
                    }
                    tracing::info!("⏳ Engine idle, waiting for commands");
                }
            }
        }

        tracing::info!("👋 Engine service stopped");
        Ok(last)
    }
}
