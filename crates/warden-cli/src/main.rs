use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_core::{
    install_signal_handler, ControlDispatcher, CoreError, InstanceLock, StatusMarker, Supervisor,
};
use warden_runtime::{select_engine, FileControlChannel, ScriptConfigurator};
use warden_schema::{load_config, ControlCommand, DataLayout, StarterConfig};

const BLOCKING_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(
    name = "warden",
    about = "Keeps a single proxy engine instance running and reports its status"
)]
struct Cli {
    /// Directory holding the engine binary and hook scripts.
    core_dir: PathBuf,

    /// Directory for status markers, starter.toml, and control requests.
    data_dir: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("WARDEN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // A hook that overran its timeout may still hold a blocking thread.
    runtime.shutdown_timeout(BLOCKING_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CoreError> {
    // Engine and hooks run from inside the core directory.
    let layout = DataLayout::new(cli.core_dir, cli.data_dir).absolute()?;
    layout.initialize()?;
    let _lock = InstanceLock::acquire(&layout.lock_file())?;

    info!("core directory: {}", layout.core_dir().display());
    info!("data directory: {}", layout.data_dir().display());

    // The supervisor re-reads the file on every start, so a broken file here
    // only costs the boot-time choices below.
    let config = load_config(layout.config_file()).unwrap_or_else(|e| {
        warn!("{e}, using defaults");
        StarterConfig::default()
    });

    let engine = select_engine(&config.engine.backend, &layout)?;
    let kill_switch = engine.kill_switch();
    let configurator = Arc::new(ScriptConfigurator::new(layout.clone()));
    let (supervisor, handle) = Supervisor::new(&layout, engine, configurator);

    let shutdown = CancellationToken::new();
    let markers = StatusMarker::new(&layout);
    install_signal_handler(shutdown.clone(), move || {
        if let Some(switch) = &kill_switch {
            switch.fire();
        }
        markers.mark_stopped();
    })?;

    let actor = tokio::spawn(supervisor.run(shutdown.clone()));

    let channel = FileControlChannel::from_config(&layout, &config);
    info!("watching {} for control requests", channel.dir().display());
    let dispatcher =
        tokio::spawn(ControlDispatcher::new(channel, handle.clone()).run(shutdown.clone()));

    if config.auto_start {
        handle.post(ControlCommand::Start)?;
    }

    shutdown.cancelled().await;

    match dispatcher.await {
        Ok(Ok(report)) => info!(
            "control dispatcher finished ({} applied, {} ignored)",
            report.applied, report.ignored
        ),
        Ok(Err(e)) => warn!("control dispatcher stopped early: {e}"),
        Err(e) => warn!("control dispatcher task failed: {e}"),
    }
    actor
        .await
        .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;

    info!("warden stopped");
    Ok(())
}
