use std::path::{Path, PathBuf};

pub const RUNNING_MARKER: &str = "RUNNING";
pub const STOPPED_MARKER: &str = "STOPPED";
pub const CONFIG_FILE: &str = "starter.toml";
const LOCK_FILE: &str = "warden.lock";

/// Directory layout shared by the supervisor and external observers.
///
/// The core directory holds the engine binary and hook scripts; the data
/// directory holds the status markers, the optional configuration file, the
/// instance lock, and the default control request directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    core_dir: PathBuf,
    data_dir: PathBuf,
}

impl DataLayout {
    pub fn new(core_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            core_dir: core_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    #[inline]
    pub fn core_dir(&self) -> &Path {
        &self.core_dir
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[inline]
    pub fn running_marker(&self) -> PathBuf {
        self.data_dir.join(RUNNING_MARKER)
    }

    #[inline]
    pub fn stopped_marker(&self) -> PathBuf {
        self.data_dir.join(STOPPED_MARKER)
    }

    #[inline]
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }

    /// Resolve a possibly relative path against the core directory.
    pub fn resolve_in_core(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve(&self.core_dir, path.as_ref())
    }

    /// Resolve a possibly relative path against the data directory.
    pub fn resolve_in_data(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve(&self.data_dir, path.as_ref())
    }

    /// Anchor both directories to the current working directory.
    ///
    /// The engine and the hooks run with the core directory as their working
    /// directory, so relative paths must be fixed before anything is spawned.
    pub fn absolute(&self) -> Result<Self, std::io::Error> {
        Ok(Self {
            core_dir: std::path::absolute(&self.core_dir)?,
            data_dir: std::path::absolute(&self.data_dir)?,
        })
    }

    /// Create the data directory if it does not exist yet.
    pub fn initialize(&self) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(&self.data_dir)
    }

    /// Substitute `{core_dir}` and `{data_dir}` placeholders in a config value.
    pub fn expand(&self, value: &str) -> String {
        value
            .replace("{core_dir}", &self.core_dir.to_string_lossy())
            .replace("{data_dir}", &self.data_dir.to_string_lossy())
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
