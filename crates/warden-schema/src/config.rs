use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("engine.program must not be empty")]
    EmptyProgram,
    #[error("engine.stop_timeout_secs must be greater than zero")]
    ZeroStopTimeout,
    #[error("hooks.timeout_secs must be greater than zero")]
    ZeroHookTimeout,
    #[error("control.poll_interval_ms must be greater than zero")]
    ZeroPollInterval,
}

/// Contents of `starter.toml`. Every field has a default, so an absent
/// file is equivalent to an empty one.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StarterConfig {
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub hooks: HooksSection,
    #[serde(default)]
    pub control: ControlSection,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            auto_start: default_auto_start(),
            engine: EngineSection::default(),
            hooks: HooksSection::default(),
            control: ControlSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            program: default_program(),
            args: default_args(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl EngineSection {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Hook scripts; relative paths resolve against the core directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HooksSection {
    #[serde(default)]
    pub prepare: Option<PathBuf>,
    #[serde(default)]
    pub started: Option<PathBuf>,
    #[serde(default)]
    pub stopped: Option<PathBuf>,
    /// A hook still running after this long counts as failed.
    #[serde(default = "default_hook_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HooksSection {
    fn default() -> Self {
        Self {
            prepare: None,
            started: None,
            stopped: None,
            timeout_secs: default_hook_timeout_secs(),
        }
    }
}

impl HooksSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ControlSection {
    #[serde(default = "default_control_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            dir: default_control_dir(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ControlSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_auto_start() -> bool {
    true
}

fn default_backend() -> String {
    "process".to_owned()
}

fn default_program() -> String {
    "clash".to_owned()
}

fn default_args() -> Vec<String> {
    vec!["-d".to_owned(), "{data_dir}".to_owned()]
}

fn default_stop_timeout_secs() -> u64 {
    10
}

fn default_hook_timeout_secs() -> u64 {
    30
}

fn default_control_dir() -> PathBuf {
    PathBuf::from("control")
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl StarterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        if self.engine.stop_timeout_secs == 0 {
            return Err(ConfigError::ZeroStopTimeout);
        }
        if self.hooks.timeout_secs == 0 {
            return Err(ConfigError::ZeroHookTimeout);
        }
        if self.control.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }
}

pub fn parse_config_str(input: &str) -> Result<StarterConfig, ConfigError> {
    let config: StarterConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration file, falling back to defaults when it is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<StarterConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => parse_config_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StarterConfig::default()),
        Err(e) => Err(ConfigError::Io(e)),
    }
}
