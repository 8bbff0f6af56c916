use crate::RuntimeError;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};
use warden_schema::{DataLayout, StarterConfig};

/// Lifecycle boundary a hook runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Prepare,
    Started,
    Stopped,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::Prepare => "prepare",
            HookKind::Started => "started",
            HookKind::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network/routing setup around the engine. Hooks are blocking and may fail;
/// the supervisor decides what a failure means for each boundary.
pub trait ProxyConfigurator: Send + Sync {
    /// Runs before launch. An error denies the start.
    fn on_prepare(&self, config: &StarterConfig) -> Result<(), RuntimeError>;

    /// Runs once the engine reports it is up. An error stops the engine.
    fn on_started(&self, config: &StarterConfig) -> Result<(), RuntimeError>;

    /// Runs after the engine exited. Errors are only logged.
    fn on_stopped(&self, config: &StarterConfig) -> Result<(), RuntimeError>;

    fn run(&self, hook: HookKind, config: &StarterConfig) -> Result<(), RuntimeError> {
        match hook {
            HookKind::Prepare => self.on_prepare(config),
            HookKind::Started => self.on_started(config),
            HookKind::Stopped => self.on_stopped(config),
        }
    }
}

const HOOK_SHELL: &str = "/bin/sh";

/// Runs the scripts named in the `[hooks]` section through `/bin/sh`. A hook
/// without a script succeeds trivially.
pub struct ScriptConfigurator {
    layout: DataLayout,
}

impl ScriptConfigurator {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    fn exec(&self, hook: HookKind, script: Option<&Path>) -> Result<(), RuntimeError> {
        let Some(script) = script else {
            debug!("no {hook} hook configured");
            return Ok(());
        };
        let script = self.layout.resolve_in_core(script);
        info!("running {hook} hook {}", script.display());

        let output = Command::new(HOOK_SHELL)
            .arg(&script)
            .current_dir(self.layout.core_dir())
            .env("WARDEN_HOOK", hook.as_str())
            .env("WARDEN_CORE_DIR", self.layout.core_dir())
            .env("WARDEN_DATA_DIR", self.layout.data_dir())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RuntimeError::HookFailed {
                hook,
                reason: format!("cannot execute {}: {e}", script.display()),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(RuntimeError::HookFailed {
            hook,
            reason: format!(
                "{} exited with {}: {}",
                script.display(),
                output.status,
                stderr.trim()
            ),
        })
    }
}

impl ProxyConfigurator for ScriptConfigurator {
    fn on_prepare(&self, config: &StarterConfig) -> Result<(), RuntimeError> {
        self.exec(HookKind::Prepare, config.hooks.prepare.as_deref())
    }

    fn on_started(&self, config: &StarterConfig) -> Result<(), RuntimeError> {
        self.exec(HookKind::Started, config.hooks.started.as_deref())
    }

    fn on_stopped(&self, config: &StarterConfig) -> Result<(), RuntimeError> {
        self.exec(HookKind::Stopped, config.hooks.stopped.as_deref())
    }
}
