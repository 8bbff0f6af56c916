use std::str::FromStr;
use thiserror::Error;

/// Lifecycle state of the supervised engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EngineState {
    #[default]
    Stopped,
    Preparing,
    Running,
    Stopping,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Preparing => write!(f, "preparing"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized control command: '{0}'")]
    Unknown(String),
}

/// A discrete request delivered by the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    Start,
    Stop,
    Restart,
}

impl ControlCommand {
    pub const ALL: [ControlCommand; 3] = [
        ControlCommand::Start,
        ControlCommand::Stop,
        ControlCommand::Restart,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::Start => "START",
            ControlCommand::Stop => "STOP",
            ControlCommand::Restart => "RESTART",
        }
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlCommand {
    type Err = CommandError;

    /// Commands are matched exactly (upper case) after trimming whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == trimmed)
            .ok_or_else(|| CommandError::Unknown(trimmed.to_owned()))
    }
}
