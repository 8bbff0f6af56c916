//! Collaborator backends for the warden supervisor.
//!
//! This crate implements the seams the lifecycle state machine talks to: the
//! `EngineProcess` trait with a real child-process backend and an in-memory
//! mock, the `ProxyConfigurator` trait with a hook-script implementation, and
//! the `ControlChannel` trait with a polled request directory.

pub mod configurator;
pub mod control;
pub mod engine;
pub mod mock;
pub mod process;

pub use configurator::{HookKind, ProxyConfigurator, ScriptConfigurator};
pub use control::{ControlChannel, FileControlChannel};
pub use engine::{select_engine, EngineEvent, EngineEvents, EngineProcess};
pub use mock::{MockConfigurator, MockEngine};
pub use process::{KillSwitch, ProcessEngine};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine backend '{0}' is not available")]
    BackendUnavailable(String),
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("failed to launch '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{hook} hook failed: {reason}")]
    HookFailed { hook: HookKind, reason: String },
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}
