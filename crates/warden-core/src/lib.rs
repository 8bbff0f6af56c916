//! Lifecycle supervision for a single proxy engine instance.
//!
//! This crate ties the runtime collaborators together: the `Supervisor` actor
//! drives the engine through prepare, run, and stop, sequencing configurator
//! hooks around the `RUNNING`/`STOPPED` status markers; the
//! `ControlDispatcher` feeds it external commands one at a time. It also
//! provides the data-directory instance lock and signal-driven shutdown.

pub mod concurrency;
pub mod dispatcher;
pub mod lifecycle;
pub mod markers;
pub mod supervisor;

pub use concurrency::{install_signal_handler, InstanceLock};
pub use dispatcher::{ControlDispatcher, DispatchReport};
pub use lifecycle::validate_transition;
pub use markers::{MarkerState, StatusMarker};
pub use supervisor::{Supervisor, SupervisorHandle};

use thiserror::Error;
use warden_schema::EngineState;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("runtime error: {0}")]
    Runtime(#[from] warden_runtime::RuntimeError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: EngineState, to: EngineState },
    #[error("another supervisor already owns {0}")]
    AlreadyLocked(String),
    #[error("supervisor is no longer running")]
    SupervisorGone,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Collaborator failures caught at a lifecycle boundary. These are logged
/// and turned into state-machine decisions; they never leave the supervisor.
#[derive(Debug, Error)]
pub enum LifecycleFault {
    #[error("start denied during prepare: {0}")]
    PrepareDenied(String),
    #[error("engine launch failed: {0}")]
    LaunchFailed(String),
    #[error("post-start setup failed, stopping engine: {0}")]
    StartHookFailure(String),
    #[error("teardown failed: {0}")]
    StopHookFailure(String),
    #[error("status marker {path}: {source}")]
    MarkerIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
