//! SAS Server
//!
//! Host process pieces around `sas_core`: configuration sources, logging
//! bootstrap and the server start/stop sequence.

pub mod config;
pub mod logging;
pub mod server;

pub use config::{ConfigError, EnvConfigReader, HostSettings, LayeredConfigReader, TomlConfigReader};
pub use logging::LogOptions;
pub use server::Server;
