use crate::engine::{EngineEvent, EngineEvents, EngineProcess};
use crate::RuntimeError;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use warden_schema::{DataLayout, StarterConfig};

/// Runs the engine as a child process of the supervisor.
///
/// Each launch gets a waiter task that owns the `Child`; `stop` signals the
/// waiter, which sends SIGTERM, waits `engine.stop_timeout_secs`, and then
/// falls back to SIGKILL. The waiter reports `Stopped` whatever the cause of
/// the exit. Must be used from inside a tokio runtime.
pub struct ProcessEngine {
    layout: DataLayout,
    stop_tx: Option<oneshot::Sender<()>>,
    kill_switch: KillSwitch,
}

/// SIGKILLs the current engine child from outside the runtime, for exits
/// that cannot wait for the graceful stop path. Holds pid 0 while no child
/// is alive.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    pid: Arc<AtomicU32>,
}

impl KillSwitch {
    fn arm(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    fn disarm(&self, pid: u32) {
        let _ = self
            .pid
            .compare_exchange(pid, 0, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.pid.load(Ordering::SeqCst) != 0
    }

    /// Kill the child if one is alive. Returns whether a signal was sent.
    pub fn fire(&self) -> bool {
        match self.pid.swap(0, Ordering::SeqCst) {
            0 => false,
            pid => send_signal(pid, libc::SIGKILL),
        }
    }
}

impl ProcessEngine {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            stop_tx: None,
            kill_switch: KillSwitch::default(),
        }
    }

    fn child_alive(&self) -> bool {
        self.stop_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn command(&self, config: &StarterConfig) -> Command {
        let program = self
            .layout
            .resolve_in_core(self.layout.expand(&config.engine.program));
        let mut cmd = Command::new(program);
        cmd.args(config.engine.args.iter().map(|a| self.layout.expand(a)))
            .current_dir(self.layout.core_dir())
            .env("WARDEN_CORE_DIR", self.layout.core_dir())
            .env("WARDEN_DATA_DIR", self.layout.data_dir())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl EngineProcess for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    fn start(&mut self, config: &StarterConfig, events: EngineEvents) -> Result<(), RuntimeError> {
        if self.child_alive() {
            return Err(RuntimeError::AlreadyRunning);
        }

        let mut child = self
            .command(config)
            .spawn()
            .map_err(|source| RuntimeError::SpawnFailed {
                program: config.engine.program.clone(),
                source,
            })?;
        let pid = child.id();
        info!("engine process spawned (pid {pid:?})");
        if let Some(pid) = pid {
            self.kill_switch.arm(pid);
        }
        let kill_switch = self.kill_switch.clone();

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        events.emit(EngineEvent::Started { pid });

        let grace = config.engine.stop_timeout();
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = stop_rx => None,
            };
            let status = match exited {
                Some(status) => status,
                None => terminate(&mut child, grace).await,
            };
            if let Some(pid) = pid {
                kill_switch.disarm(pid);
            }
            let code = match status {
                Ok(status) => {
                    info!("engine process exited: {status}");
                    status.code()
                }
                Err(e) => {
                    warn!("failed to reap engine process: {e}");
                    None
                }
            };
            events.emit(EngineEvent::Stopped { code });
        });

        Ok(())
    }

    fn kill_switch(&self) -> Option<KillSwitch> {
        Some(self.kill_switch.clone())
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        match self.stop_tx.take() {
            // The waiter may already be gone if the child exited on its own;
            // its Stopped report is then already on the way.
            Some(tx) => {
                let _ = tx.send(());
            }
            None => debug!("stop requested but no engine process was launched"),
        }
        Ok(())
    }
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        send_signal(pid, libc::SIGTERM);
    }
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status;
    }
    warn!(
        "engine did not exit within {}s after SIGTERM, sending SIGKILL",
        grace.as_secs()
    );
    child.start_kill()?;
    child.wait().await
}

fn send_signal(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else {
        warn!("invalid pid {pid}: exceeds i32 range");
        return false;
    };
    debug!("sending signal {signal} to pid {pid}");
    // SAFETY: kill() with a valid pid and signal is safe; pid validated via i32::try_from above.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid_i32, signal) };
    if ret != 0 {
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() != Some(libc::ESRCH) {
            warn!("failed to send signal {signal} to pid {pid}: {errno}");
        }
        return false;
    }
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sleep_config(args: &[&str]) -> StarterConfig {
        let mut config = StarterConfig::default();
        config.engine.program = "/bin/sh".to_owned();
        config.engine.args = args.iter().map(|a| (*a).to_owned()).collect();
        config.engine.stop_timeout_secs = 2;
        config
    }

    #[tokio::test]
    async fn start_reports_started_then_stop_reports_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ProcessEngine::new(DataLayout::new(dir.path(), dir.path()));
        let (events, mut rx) = EngineEvents::channel();

        engine
            .start(&sleep_config(&["-c", "sleep 30"]), events)
            .unwrap();
        let started = rx.recv().await.unwrap();
        assert!(matches!(started, EngineEvent::Started { pid: Some(_) }));

        engine.stop().unwrap();
        let stopped = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(stopped, EngineEvent::Stopped { .. }));
    }

    #[tokio::test]
    async fn second_start_while_alive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ProcessEngine::new(DataLayout::new(dir.path(), dir.path()));
        let config = sleep_config(&["-c", "sleep 30"]);
        let (events, mut rx) = EngineEvents::channel();

        engine.start(&config, events.clone()).unwrap();
        assert!(matches!(
            engine.start(&config, events),
            Err(RuntimeError::AlreadyRunning)
        ));

        engine.stop().unwrap();
        while let Some(event) = timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
            if matches!(event, EngineEvent::Stopped { .. }) {
                break;
            }
        }
    }

    #[tokio::test]
    async fn unsolicited_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ProcessEngine::new(DataLayout::new(dir.path(), dir.path()));
        let (events, mut rx) = EngineEvents::channel();

        engine.start(&sleep_config(&["-c", "exit 3"]), events).unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::Started { .. }
        ));
        let stopped = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stopped, EngineEvent::Stopped { code: Some(3) });

        // Stopping after the child is gone is harmless.
        engine.stop().unwrap();
    }

    #[tokio::test]
    async fn args_are_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let layout = DataLayout::new(dir.path(), &data);
        let mut engine = ProcessEngine::new(layout);
        let (events, mut rx) = EngineEvents::channel();

        engine
            .start(
                &sleep_config(&["-c", "touch \"$0/launched\"", "{data_dir}"]),
                events,
            )
            .unwrap();
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, EngineEvent::Stopped { .. }) {
                break;
            }
        }
        assert!(data.join("launched").exists());
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ProcessEngine::new(DataLayout::new(dir.path(), dir.path()));
        let mut config = StarterConfig::default();
        config.engine.program = "does-not-exist".to_owned();
        let (events, _rx) = EngineEvents::channel();

        assert!(matches!(
            engine.start(&config, events),
            Err(RuntimeError::SpawnFailed { .. })
        ));
    }

    #[tokio::test]
    async fn kill_switch_kills_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ProcessEngine::new(DataLayout::new(dir.path(), dir.path()));
        let switch = engine.kill_switch().unwrap();
        assert!(!switch.is_armed());
        assert!(!switch.fire());

        let (events, mut rx) = EngineEvents::channel();
        engine
            .start(&sleep_config(&["-c", "sleep 30"]), events)
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::Started { .. }
        ));
        assert!(switch.is_armed());

        assert!(switch.fire());
        let stopped = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        // Killed by a signal, so there is no exit code.
        assert_eq!(stopped, EngineEvent::Stopped { code: None });
        assert!(!switch.is_armed());
        assert!(!switch.fire());
    }

    #[tokio::test]
    async fn kill_switch_disarms_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ProcessEngine::new(DataLayout::new(dir.path(), dir.path()));
        let switch = engine.kill_switch().unwrap();
        let (events, mut rx) = EngineEvents::channel();

        engine.start(&sleep_config(&["-c", "exit 0"]), events).unwrap();
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, EngineEvent::Stopped { .. }) {
                break;
            }
        }
        assert!(!switch.is_armed());
        assert!(!switch.fire());
    }
}
