use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Exclusive lock on the data directory: one supervisor per data dir.
pub struct InstanceLock {
    lock_file: File,
}

impl InstanceLock {
    /// Take the lock or fail immediately if another process holds it.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        Self::try_acquire(lock_path)?
            .ok_or_else(|| CoreError::AlreadyLocked(lock_path.display().to_string()))
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("acquired instance lock {}", lock_path.display());
                Ok(Some(Self { lock_file: file }))
            }
            Err(_) => Ok(None),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Cancel `shutdown` on SIGINT/SIGTERM/SIGHUP. A second signal while the
/// graceful shutdown is still running calls `on_force_exit` and exits the
/// process immediately.
pub fn install_signal_handler(
    shutdown: CancellationToken,
    on_force_exit: impl Fn() + Send + 'static,
) -> Result<(), CoreError> {
    let requested = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if requested.swap(true, Ordering::SeqCst) {
            warn!("second signal, exiting without graceful shutdown");
            on_force_exit();
            std::process::exit(1);
        }
        info!("shutdown requested, stopping engine...");
        shutdown.cancel();
    })
    .map_err(|e| CoreError::Io(std::io::Error::other(e)))
}
