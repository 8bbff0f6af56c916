use crate::LifecycleFault;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use warden_schema::DataLayout;

/// What an external reader would conclude from the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Running,
    Stopped,
    /// Neither marker: a transition is in progress (or was interrupted).
    Unknown,
    /// Both markers. Never produced by `StatusMarker`.
    Conflict,
}

/// The two zero-byte `RUNNING`/`STOPPED` flags in the data directory.
///
/// Every write clears both flags before creating one, so the pair is never
/// present at the same time. Failures are logged and swallowed: a stale or
/// missing marker only affects outside observers, never the state machine.
#[derive(Debug, Clone)]
pub struct StatusMarker {
    running: PathBuf,
    stopped: PathBuf,
}

impl StatusMarker {
    pub fn new(layout: &DataLayout) -> Self {
        Self {
            running: layout.running_marker(),
            stopped: layout.stopped_marker(),
        }
    }

    pub fn clear_all(&self) {
        remove(&self.running);
        remove(&self.stopped);
    }

    pub fn mark_running(&self) {
        self.clear_all();
        create(&self.running);
    }

    pub fn mark_stopped(&self) {
        self.clear_all();
        create(&self.stopped);
    }

    pub fn observe(&self) -> MarkerState {
        match (self.running.exists(), self.stopped.exists()) {
            (true, false) => MarkerState::Running,
            (false, true) => MarkerState::Stopped,
            (false, false) => MarkerState::Unknown,
            (true, true) => MarkerState::Conflict,
        }
    }
}

fn remove(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed marker {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => report(path, e),
    }
}

fn create(path: &Path) {
    let result = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path);
    match result {
        Ok(_) => debug!("created marker {}", path.display()),
        Err(e) => report(path, e),
    }
}

fn report(path: &Path, source: std::io::Error) {
    let fault = LifecycleFault::MarkerIo {
        path: path.display().to_string(),
        source,
    };
    warn!("{fault}");
}
