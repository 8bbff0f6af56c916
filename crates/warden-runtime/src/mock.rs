use crate::configurator::{HookKind, ProxyConfigurator};
use crate::engine::{EngineEvent, EngineEvents, EngineProcess};
use crate::RuntimeError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use warden_schema::StarterConfig;

const MOCK_PID: u32 = 99999;

#[derive(Default)]
struct MockEngineState {
    running: bool,
    launches: u32,
    stop_requests: u32,
    fail_launch: bool,
    defer_stop: bool,
    events: Option<EngineEvents>,
}

/// In-memory engine. Reports `Started` synchronously from `start` and
/// `Stopped` synchronously from `stop` (unless stop reports are deferred).
///
/// Clones share state, so a test can keep one clone for inspection while
/// the supervisor owns another.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockEngineState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockEngineState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
    }

    fn with<T>(&self, f: impl FnOnce(&mut MockEngineState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Make the next launches fail before anything is spawned.
    pub fn fail_launches(&self, fail: bool) {
        self.with(|s| s.fail_launch = fail);
    }

    /// Hold back `Stopped` reports until `complete_stop` is called.
    pub fn defer_stop_reports(&self, defer: bool) {
        self.with(|s| s.defer_stop = defer);
    }

    /// Deliver a held-back `Stopped` report.
    pub fn complete_stop(&self) {
        let events = self.with(|s| {
            s.running = false;
            s.events.take()
        });
        if let Some(events) = events {
            events.emit(EngineEvent::Stopped { code: Some(0) });
        }
    }

    /// Simulate the engine dying on its own.
    pub fn crash(&self, code: i32) {
        let events = self.with(|s| {
            s.running = false;
            s.events.take()
        });
        if let Some(events) = events {
            events.emit(EngineEvent::Stopped { code: Some(code) });
        }
    }

    pub fn is_running(&self) -> bool {
        self.with(|s| s.running)
    }

    pub fn launches(&self) -> u32 {
        self.with(|s| s.launches)
    }

    pub fn stop_requests(&self) -> u32 {
        self.with(|s| s.stop_requests)
    }
}

impl EngineProcess for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn start(&mut self, _config: &StarterConfig, events: EngineEvents) -> Result<(), RuntimeError> {
        {
            let mut state = self.lock()?;
            if state.running {
                return Err(RuntimeError::AlreadyRunning);
            }
            if state.fail_launch {
                return Err(RuntimeError::ExecFailed("mock launch failure".to_owned()));
            }
            state.running = true;
            state.launches += 1;
            state.events = Some(events.clone());
        }
        events.emit(EngineEvent::Started { pid: Some(MOCK_PID) });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        let events = {
            let mut state = self.lock()?;
            state.stop_requests += 1;
            if !state.running || state.defer_stop {
                return Ok(());
            }
            state.running = false;
            state.events.take()
        };
        if let Some(events) = events {
            events.emit(EngineEvent::Stopped { code: Some(0) });
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockConfiguratorState {
    calls: Vec<HookKind>,
    failing: HashSet<HookKind>,
}

/// Configurator that records every hook call and fails selected hooks.
#[derive(Clone, Default)]
pub struct MockConfigurator {
    state: Arc<Mutex<MockConfiguratorState>>,
}

impl MockConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut MockConfiguratorState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn fail(&self, hook: HookKind, fail: bool) {
        self.with(|s| {
            if fail {
                s.failing.insert(hook);
            } else {
                s.failing.remove(&hook);
            }
        });
    }

    pub fn calls(&self) -> Vec<HookKind> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, hook: HookKind) -> usize {
        self.with(|s| s.calls.iter().filter(|h| **h == hook).count())
    }

    fn record(&self, hook: HookKind) -> Result<(), RuntimeError> {
        self.with(|s| {
            s.calls.push(hook);
            if s.failing.contains(&hook) {
                Err(RuntimeError::HookFailed {
                    hook,
                    reason: "mock failure".to_owned(),
                })
            } else {
                Ok(())
            }
        })
    }
}

impl ProxyConfigurator for MockConfigurator {
    fn on_prepare(&self, _config: &StarterConfig) -> Result<(), RuntimeError> {
        self.record(HookKind::Prepare)
    }

    fn on_started(&self, _config: &StarterConfig) -> Result<(), RuntimeError> {
        self.record(HookKind::Started)
    }

    fn on_stopped(&self, _config: &StarterConfig) -> Result<(), RuntimeError> {
        self.record(HookKind::Stopped)
    }
}
