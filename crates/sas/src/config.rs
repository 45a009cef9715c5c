//! Host configuration sources
//!
//! Three [`ConfigReader`] implementations for the server binary: process
//! environment, a TOML file, and an ordered stack of both. Entry paths are
//! `/`-separated (`SAS/COMPONENTS`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sas_core::ConfigReader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid host settings: {0}")]
    Settings(#[source] toml::de::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

/// `A/B/C` reads the variable `A__B__C`; lists are `;`-separated
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigReader;

impl EnvConfigReader {
    pub fn new() -> Self {
        Self
    }

    /// Environment variable that holds `path`
    pub fn variable_name(path: &str) -> String {
        path.split('/').collect::<Vec<_>>().join("__")
    }
}

impl ConfigReader for EnvConfigReader {
    fn entry(&self, path: &str) -> Option<Vec<String>> {
        let name = Self::variable_name(path);
        let value = std::env::var(&name).ok()?;
        tracing::trace!(variable = %name, "Environment entry found");
        Some(split_list(&value))
    }
}

fn split_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(';').map(|s| s.trim().to_string()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// TOML
// ─────────────────────────────────────────────────────────────────────────────

/// Host-level settings that live next to the component entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive
    pub filter: Option<String>,
    #[serde(default)]
    pub json: bool,
}

/// Path segments index nested tables. Arrays become lists, other scalars
/// single-element lists; tables are not entries.
#[derive(Debug, Clone)]
pub struct TomlConfigReader {
    root: toml::Value,
}

impl TomlConfigReader {
    /// Parse a configuration held in memory
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<string>")
    }

    /// Read and parse a configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let root = content
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse {
                origin: origin.to_string(),
                source,
            })?;
        Ok(Self {
            root: toml::Value::Table(root),
        })
    }

    /// Host-level settings from the same document
    pub fn settings(&self) -> Result<HostSettings, ConfigError> {
        self.root.clone().try_into().map_err(ConfigError::Settings)
    }

    fn lookup(&self, path: &str) -> Option<&toml::Value> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |value, segment| value.get(segment))
    }
}

fn scalar(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

impl ConfigReader for TomlConfigReader {
    fn entry(&self, path: &str) -> Option<Vec<String>> {
        match self.lookup(path)? {
            toml::Value::Array(items) => Some(items.iter().filter_map(scalar).collect()),
            toml::Value::Table(_) => None,
            value => scalar(value).map(|s| vec![s]),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Layers
// ─────────────────────────────────────────────────────────────────────────────

/// The first layer that has an entry wins
#[derive(Default, Clone)]
pub struct LayeredConfigReader {
    layers: Vec<Arc<dyn ConfigReader>>,
}

impl LayeredConfigReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer consulted after the existing ones
    pub fn with_layer(mut self, layer: Arc<dyn ConfigReader>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ConfigReader for LayeredConfigReader {
    fn entry(&self, path: &str) -> Option<Vec<String>> {
        self.layers.iter().find_map(|layer| layer.entry(path))
    }
}
