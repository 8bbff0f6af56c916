//! Configuration, data directory layout, and control vocabulary for warden.
//!
//! This crate holds the plain data the supervisor works with: the optional
//! `starter.toml` configuration (`StarterConfig`), the marker/lock/control
//! paths inside the data directory (`DataLayout`), the commands accepted on
//! the control channel (`ControlCommand`), and the engine state enum
//! (`EngineState`).

pub mod config;
pub mod layout;
pub mod types;

pub use config::{
    load_config, parse_config_str, ConfigError, ControlSection, EngineSection, HooksSection,
    StarterConfig,
};
pub use layout::DataLayout;
pub use types::{CommandError, ControlCommand, EngineState};
