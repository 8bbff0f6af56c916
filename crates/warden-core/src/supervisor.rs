use crate::lifecycle::validate_transition;
use crate::markers::StatusMarker;
use crate::{CoreError, LifecycleFault};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_runtime::{
    EngineEvent, EngineEvents, EngineProcess, HookKind, ProxyConfigurator, RuntimeError,
};
use warden_schema::{
    load_config, ControlCommand, DataLayout, EngineSection, EngineState, StarterConfig,
};

/// Extra wait on shutdown beyond the engine's own SIGTERM grace period.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(1);

enum Message {
    Command {
        command: ControlCommand,
        reply: Option<oneshot::Sender<EngineState>>,
    },
    Engine(EngineEvent),
}

/// Cloneable front door to a `Supervisor`.
#[derive(Clone)]
pub struct SupervisorHandle {
    inbox: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<EngineState>,
}

impl SupervisorHandle {
    /// Queue a command and wait until the supervisor has applied it. Returns
    /// the engine state right after the command was applied; the engine may
    /// still be on its way up or down.
    pub async fn submit(&self, command: ControlCommand) -> Result<EngineState, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(Message::Command {
                command,
                reply: Some(reply),
            })
            .map_err(|_| CoreError::SupervisorGone)?;
        rx.await.map_err(|_| CoreError::SupervisorGone)
    }

    /// Queue a command without waiting for it to be applied.
    pub fn post(&self, command: ControlCommand) -> Result<(), CoreError> {
        self.inbox
            .send(Message::Command {
                command,
                reply: None,
            })
            .map_err(|_| CoreError::SupervisorGone)
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }
}

/// Single-writer actor owning the engine state machine.
///
/// Control commands and engine reports share one FIFO inbox and are handled
/// strictly one at a time. Hooks run on the blocking pool but are awaited
/// before the next message is taken, so hook calls and marker writes of one
/// transition never interleave with another. The restart flag is a plain
/// field: only this actor touches it, and consuming it is a single
/// `mem::take`.
pub struct Supervisor {
    engine: Box<dyn EngineProcess>,
    configurator: Arc<dyn ProxyConfigurator>,
    markers: StatusMarker,
    config_path: PathBuf,
    /// Config the current engine instance was launched with.
    active: Option<StarterConfig>,
    state: EngineState,
    restart_pending: bool,
    state_tx: watch::Sender<EngineState>,
    inbox: mpsc::UnboundedReceiver<Message>,
    outbox: mpsc::UnboundedSender<Message>,
}

impl Supervisor {
    /// Build a stopped supervisor. Markers left over from a previous boot are
    /// reset so that only `STOPPED` is present.
    pub fn new(
        layout: &DataLayout,
        engine: Box<dyn EngineProcess>,
        configurator: Arc<dyn ProxyConfigurator>,
    ) -> (Self, SupervisorHandle) {
        let markers = StatusMarker::new(layout);
        markers.clear_all();
        markers.mark_stopped();

        let (outbox, inbox) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::Stopped);
        let handle = SupervisorHandle {
            inbox: outbox.clone(),
            state: state_rx,
        };
        let supervisor = Self {
            engine,
            configurator,
            markers,
            config_path: layout.config_file(),
            active: None,
            state: EngineState::Stopped,
            restart_pending: false,
            state_tx,
            inbox,
            outbox,
        };
        (supervisor, handle)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    pub fn markers(&self) -> &StatusMarker {
        &self.markers
    }

    /// Process messages until `shutdown` fires, then stop the engine and wait
    /// (bounded) for its stop report.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("supervisor running (engine backend: {})", self.engine.name());
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                message = self.inbox.recv() => match message {
                    Some(message) => self.process(message).await,
                    None => break,
                },
            }
        }
        self.wind_down().await;
        info!("supervisor exited with engine {}", self.state);
    }

    /// Handle every queued message, including messages queued while
    /// handling. Returns how many were handled.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.inbox.try_recv() {
            self.process(message).await;
            handled += 1;
        }
        handled
    }

    async fn process(&mut self, message: Message) {
        match message {
            Message::Command { command, reply } => {
                self.apply(command).await;
                if let Some(reply) = reply {
                    let _ = reply.send(self.state);
                }
            }
            Message::Engine(event) => self.on_engine_event(event).await,
        }
    }

    async fn apply(&mut self, command: ControlCommand) {
        info!("control command {command} (engine {})", self.state);
        match command {
            ControlCommand::Start => self.start().await,
            ControlCommand::Stop => {
                if std::mem::take(&mut self.restart_pending) {
                    info!("pending restart cancelled by STOP");
                }
                self.stop();
            }
            ControlCommand::Restart => {
                self.restart_pending = true;
                self.stop();
                // Nothing is shutting down, so the restart is due now.
                if self.state == EngineState::Stopped && std::mem::take(&mut self.restart_pending)
                {
                    self.start().await;
                }
            }
        }
    }

    async fn start(&mut self) {
        if self.state != EngineState::Stopped {
            debug!("start ignored: engine is {}", self.state);
            return;
        }
        self.transition(EngineState::Preparing);

        let config = match load_config(&self.config_path) {
            Ok(config) => config,
            Err(e) => return self.deny(&e.to_string()),
        };
        if let Err(e) = self.run_hook(HookKind::Prepare, &config).await {
            return self.deny(&e.to_string());
        }

        let events = self.engine_events();
        match self.engine.start(&config, events) {
            Ok(()) => {
                self.active = Some(config);
                self.transition(EngineState::Running);
            }
            Err(e) => {
                warn!("{}", LifecycleFault::LaunchFailed(e.to_string()));
                // Undo whatever prepare set up.
                self.teardown(Some(&config)).await;
            }
        }
    }

    fn deny(&mut self, reason: &str) {
        warn!("{}", LifecycleFault::PrepareDenied(reason.to_owned()));
        self.transition(EngineState::Stopped);
    }

    fn stop(&mut self) {
        if self.state != EngineState::Running {
            debug!("stop ignored: engine is {}", self.state);
            return;
        }
        self.transition(EngineState::Stopping);
        if let Err(e) = self.engine.stop() {
            warn!("failed to request engine stop: {e}");
        }
    }

    async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Started { pid } => self.on_started(pid).await,
            EngineEvent::Stopped { code } => self.on_stopped(code).await,
        }
    }

    async fn on_started(&mut self, pid: Option<u32>) {
        if self.state != EngineState::Running {
            debug!("ignoring start report (pid {pid:?}) while engine is {}", self.state);
            return;
        }
        let Some(config) = self.active.clone() else {
            return;
        };
        info!("engine started (pid {pid:?})");

        self.markers.clear_all();
        match self.run_hook(HookKind::Started, &config).await {
            Ok(()) => self.markers.mark_running(),
            Err(e) => {
                warn!("{}", LifecycleFault::StartHookFailure(e.to_string()));
                self.stop();
            }
        }
    }

    async fn on_stopped(&mut self, code: Option<i32>) {
        match self.state {
            EngineState::Stopping => info!("engine stopped (exit code {code:?})"),
            EngineState::Running => warn!("engine exited unexpectedly (exit code {code:?})"),
            EngineState::Stopped | EngineState::Preparing => {
                debug!("ignoring stop report while engine is {}", self.state);
                return;
            }
        }

        let config = self.active.take();
        self.teardown(config.as_ref()).await;

        if std::mem::take(&mut self.restart_pending) {
            info!("restarting engine");
            self.start().await;
        }
    }

    /// Stop-completion sequence: clear markers, run the stop hook, write
    /// `STOPPED`, enter `Stopped`.
    async fn teardown(&mut self, config: Option<&StarterConfig>) {
        self.markers.clear_all();
        if let Some(config) = config {
            if let Err(e) = self.run_hook(HookKind::Stopped, config).await {
                warn!("{}", LifecycleFault::StopHookFailure(e.to_string()));
            }
        }
        self.markers.mark_stopped();
        self.transition(EngineState::Stopped);
    }

    /// The returned future owns everything it needs, so the actor stays
    /// `Send` while a hook runs. A hook that outlives `hooks.timeout_secs`
    /// is reported as failed and left to finish on the blocking pool.
    fn run_hook(
        &self,
        hook: HookKind,
        config: &StarterConfig,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send + 'static {
        let configurator = Arc::clone(&self.configurator);
        let limit = config.hooks.timeout();
        let config = config.clone();
        async move {
            let task = tokio::task::spawn_blocking(move || configurator.run(hook, &config));
            match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined.map_err(|e| RuntimeError::HookFailed {
                    hook,
                    reason: format!("hook task failed: {e}"),
                })?,
                Err(_) => Err(RuntimeError::HookFailed {
                    hook,
                    reason: format!("still running after {}s", limit.as_secs()),
                }),
            }
        }
    }

    fn engine_events(&self) -> EngineEvents {
        let outbox = self.outbox.clone();
        EngineEvents::new(move |event| {
            let _ = outbox.send(Message::Engine(event));
        })
    }

    fn transition(&mut self, to: EngineState) {
        if let Err(e) = validate_transition(self.state, to) {
            error!("{e}");
            return;
        }
        debug!("engine {} -> {to}", self.state);
        self.state = to;
        self.state_tx.send_replace(to);
    }

    async fn wind_down(&mut self) {
        self.restart_pending = false;
        self.stop();
        if self.state == EngineState::Stopped {
            return;
        }

        let grace = self
            .active
            .as_ref()
            .map_or_else(
                || EngineSection::default().stop_timeout(),
                |c| c.engine.stop_timeout(),
            )
            + SHUTDOWN_SLACK;
        info!("waiting up to {}s for engine to stop", grace.as_secs());

        // The deadline covers the stop hook too, not just the engine report.
        if tokio::time::timeout(grace, self.await_stopped()).await.is_err() {
            warn!(
                "engine did not finish stopping within {}s (engine {})",
                grace.as_secs(),
                self.state
            );
            self.markers.mark_stopped();
        }
    }

    async fn await_stopped(&mut self) {
        while self.state != EngineState::Stopped {
            match self.inbox.recv().await {
                Some(Message::Engine(event)) => self.on_engine_event(event).await,
                Some(Message::Command { command, reply }) => {
                    debug!("dropping {command} during shutdown");
                    if let Some(reply) = reply {
                        let _ = reply.send(self.state);
                    }
                }
                None => break,
            }
        }
    }
}
