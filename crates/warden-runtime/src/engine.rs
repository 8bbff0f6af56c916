use crate::process::KillSwitch;
use crate::RuntimeError;
use std::sync::Arc;
use tokio::sync::mpsc;
use warden_schema::{DataLayout, StarterConfig};

/// Asynchronous reports an engine delivers after `start`/`stop` return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The engine process is up.
    Started { pid: Option<u32> },
    /// The engine process is gone, whether asked to stop or not.
    Stopped { code: Option<i32> },
}

/// Sink handed to the engine on every start; the supervisor routes it into
/// its own inbox.
#[derive(Clone)]
pub struct EngineEvents {
    sink: Arc<dyn Fn(EngineEvent) + Send + Sync>,
}

impl EngineEvents {
    pub fn new(sink: impl Fn(EngineEvent) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Sink backed by an unbounded channel, for callers that want to consume
    /// the reports directly.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Self::new(move |event| {
            let _ = tx.send(event);
        });
        (events, rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        (self.sink)(event);
    }
}

impl std::fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEvents").finish_non_exhaustive()
    }
}

/// The supervised engine. `start` and `stop` only issue requests; the
/// outcome arrives later through the `EngineEvents` passed to `start`.
pub trait EngineProcess: Send {
    fn name(&self) -> &str;

    /// Launch the engine. Must report `Started` once it is up and `Stopped`
    /// when it exits, including exits nobody asked for.
    fn start(&mut self, config: &StarterConfig, events: EngineEvents) -> Result<(), RuntimeError>;

    /// Ask the engine to stop. A no-op when nothing is running.
    fn stop(&mut self) -> Result<(), RuntimeError>;

    /// Handle for killing the engine when the process must exit at once.
    /// Backends without an OS process have none.
    fn kill_switch(&self) -> Option<KillSwitch> {
        None
    }
}

pub fn select_engine(
    name: &str,
    layout: &DataLayout,
) -> Result<Box<dyn EngineProcess>, RuntimeError> {
    match name {
        "process" => Ok(Box::new(crate::process::ProcessEngine::new(layout.clone()))),
        "mock" => Ok(Box::new(crate::mock::MockEngine::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
