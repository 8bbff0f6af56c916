use crate::RuntimeError;
use std::collections::VecDeque;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use warden_schema::{DataLayout, StarterConfig};

/// Source of raw control requests (`START`, `STOP`, `RESTART`, or anything
/// else, which the dispatcher ignores).
pub trait ControlChannel: Send {
    /// Next request in arrival order, or `None` once the channel is closed.
    fn recv(&mut self) -> impl Future<Output = Option<String>> + Send;
}

impl ControlChannel for mpsc::Receiver<String> {
    fn recv(&mut self) -> impl Future<Output = Option<String>> + Send {
        mpsc::Receiver::recv(self)
    }
}

impl ControlChannel for mpsc::UnboundedReceiver<String> {
    fn recv(&mut self) -> impl Future<Output = Option<String>> + Send {
        mpsc::UnboundedReceiver::recv(self)
    }
}

/// Request directory polled for command files.
///
/// Every regular file whose name does not start with `.` is one request.
/// The command is the file name, or the part after its last `-`: `RESTART`
/// and `0042-RESTART` both ask for a restart. Requests are delivered oldest
/// first (by modification time, then name) and each file is removed once
/// picked up, so a writer can `touch control/RESTART` from a shell.
///
/// Two requests with the same file name inside one poll interval collapse
/// into one. Writers that may repeat a command quickly should give each
/// request a unique, sortable prefix such as a sequence number.
pub struct FileControlChannel {
    dir: PathBuf,
    poll_interval: Duration,
    pending: VecDeque<String>,
}

impl FileControlChannel {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval,
            pending: VecDeque::new(),
        }
    }

    pub fn from_config(layout: &DataLayout, config: &StarterConfig) -> Self {
        Self::new(
            layout.resolve_in_data(&config.control.dir),
            config.control.poll_interval(),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pick up every request currently in the directory. Returns how many
    /// were queued.
    pub fn scan(&mut self) -> Result<usize, RuntimeError> {
        fs::create_dir_all(&self.dir)?;

        let mut requests: Vec<(SystemTime, String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            requests.push((modified, name, entry.path()));
        }
        requests.sort();

        let mut queued = 0;
        for (_, name, path) in requests {
            // A request that cannot be consumed would be redelivered forever.
            if let Err(e) = fs::remove_file(&path) {
                warn!("cannot consume control request {}: {e}", path.display());
                continue;
            }
            debug!("control request picked up: {name}");
            self.pending.push_back(command_of(&name).to_owned());
            queued += 1;
        }
        Ok(queued)
    }
}

impl ControlChannel for FileControlChannel {
    async fn recv(&mut self) -> Option<String> {
        loop {
            if let Some(request) = self.pending.pop_front() {
                return Some(request);
            }
            if let Err(e) = self.scan() {
                warn!("control directory scan failed: {e}");
            }
            if self.pending.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}

fn command_of(name: &str) -> &str {
    name.rsplit_once('-').map_or(name, |(_, command)| command)
}
