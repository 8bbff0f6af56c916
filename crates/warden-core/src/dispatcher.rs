use crate::supervisor::SupervisorHandle;
use crate::CoreError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_runtime::ControlChannel;
use warden_schema::ControlCommand;

/// Counts of what a dispatcher run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub applied: u64,
    pub ignored: u64,
}

/// Feeds control requests to the supervisor one at a time.
///
/// A request is read only after the previous one has been applied by the
/// supervisor, so commands take effect in delivery order. Applying a command
/// does not wait for the engine to finish starting or stopping.
pub struct ControlDispatcher<C> {
    channel: C,
    supervisor: SupervisorHandle,
}

impl<C: ControlChannel> ControlDispatcher<C> {
    pub fn new(channel: C, supervisor: SupervisorHandle) -> Self {
        Self {
            channel,
            supervisor,
        }
    }

    /// Run until `shutdown` fires or the channel closes.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<DispatchReport, CoreError> {
        let mut report = DispatchReport::default();
        loop {
            let request = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                request = self.channel.recv() => request,
            };
            let Some(request) = request else {
                info!("control channel closed");
                break;
            };

            match request.parse::<ControlCommand>() {
                Ok(command) => {
                    let state = self.supervisor.submit(command).await?;
                    debug!("{command} applied, engine {state}");
                    report.applied += 1;
                }
                Err(e) => {
                    warn!("ignoring control request: {e}");
                    report.ignored += 1;
                }
            }
        }
        Ok(report)
    }
}
