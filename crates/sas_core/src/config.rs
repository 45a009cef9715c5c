//! Configuration contract
//!
//! Entries are addressed by `/`-separated paths such as `SAS/COMPONENTS`.
//! A reader only has to answer the raw list lookup; the typed getters are
//! provided on top of it.

use std::collections::BTreeMap;

use crate::error::{CoreError, ErrorCollector};

pub trait ConfigReader: Send + Sync {
    /// Raw lookup; `None` if the entry is not set
    fn entry(&self, path: &str) -> Option<Vec<String>>;

    /// First element of the entry; an empty list reads as an empty string
    fn string_entry(&self, path: &str, ec: &mut dyn ErrorCollector) -> Option<String> {
        match self.entry(path) {
            Some(values) => Some(values.into_iter().next().unwrap_or_default()),
            None => {
                ec.add_error(&CoreError::MissingConfigEntry(path.to_string()));
                None
            }
        }
    }

    fn string_entry_or(&self, path: &str, default: &str) -> String {
        self.entry(path)
            .map(|values| values.into_iter().next().unwrap_or_default())
            .unwrap_or_else(|| default.to_string())
    }

    fn string_list_entry(&self, path: &str, ec: &mut dyn ErrorCollector) -> Option<Vec<String>> {
        let values = self.entry(path);
        if values.is_none() {
            ec.add_error(&CoreError::MissingConfigEntry(path.to_string()));
        }
        values
    }

    fn string_list_entry_or(&self, path: &str, default: &[&str]) -> Vec<String> {
        self.entry(path)
            .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
    }

    fn number_entry(&self, path: &str, ec: &mut dyn ErrorCollector) -> Option<i64> {
        let value = self.string_entry(path, ec)?;
        match value.trim().parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => {
                ec.add_error(&CoreError::InvalidConfigEntry {
                    path: path.to_string(),
                    value,
                });
                None
            }
        }
    }

    fn number_entry_or(&self, path: &str, default: i64) -> i64 {
        let Some(value) = self.entry(path).and_then(|v| v.into_iter().next()) else {
            return default;
        };
        value.trim().parse::<i64>().unwrap_or_else(|_| {
            tracing::warn!(path = %path, value = %value, default, "Invalid number entry, using default");
            default
        })
    }

    fn bool_entry(&self, path: &str, ec: &mut dyn ErrorCollector) -> Option<bool> {
        let value = self.string_entry(path, ec)?;
        let parsed = parse_bool(&value);
        if parsed.is_none() {
            ec.add_error(&CoreError::InvalidConfigEntry {
                path: path.to_string(),
                value,
            });
        }
        parsed
    }

    fn bool_entry_or(&self, path: &str, default: bool) -> bool {
        let Some(value) = self.entry(path).and_then(|v| v.into_iter().next()) else {
            return default;
        };
        parse_bool(&value).unwrap_or_else(|| {
            tracing::warn!(path = %path, value = %value, default, "Invalid bool entry, using default");
            default
        })
    }
}

/// `"true"` or any non-zero integer is true
pub fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => value.parse::<i64>().ok().map(|n| n != 0),
    }
}

/// Join path segments with `/`
pub fn config_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Config Reader
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigReader {
    entries: BTreeMap<String, Vec<String>>,
}

impl MemoryConfigReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single-value entry
    pub fn with_entry(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(path.into(), vec![value.into()]);
        self
    }

    /// Set a list entry
    pub fn with_list<I, S>(mut self, path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .insert(path.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Replace an entry in place
    pub fn set(&mut self, path: impl Into<String>, values: Vec<String>) {
        self.entries.insert(path.into(), values);
    }
}

impl ConfigReader for MemoryConfigReader {
    fn entry(&self, path: &str) -> Option<Vec<String>> {
        self.entries.get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorList, codes};

    fn reader() -> MemoryConfigReader {
        MemoryConfigReader::new()
            .with_entry("A/NAME", "alpha")
            .with_list("A/LIST", ["x", "y"])
            .with_list("A/EMPTY", Vec::<String>::new())
            .with_entry("A/NUM", "42")
            .with_entry("A/BAD", "4x")
            .with_entry("A/ON", "true")
            .with_entry("A/ONE", "3")
            .with_entry("A/OFF", "0")
    }

    #[test]
    fn test_string_entries() {
        let r = reader();
        let mut ec = ErrorList::new();
        assert_eq!(r.string_entry("A/NAME", &mut ec).as_deref(), Some("alpha"));
        assert_eq!(r.string_entry("A/LIST", &mut ec).as_deref(), Some("x"));
        assert_eq!(r.string_entry("A/EMPTY", &mut ec).as_deref(), Some(""));
        assert!(ec.is_empty());

        assert!(r.string_entry("A/NONE", &mut ec).is_none());
        assert!(ec.contains_code(codes::MISSING_CONFIG_ENTRY));
        assert_eq!(r.string_entry_or("A/NONE", "dflt"), "dflt");
    }

    #[test]
    fn test_list_entries() {
        let r = reader();
        let mut ec = ErrorList::new();
        assert_eq!(r.string_list_entry("A/LIST", &mut ec).unwrap(), ["x", "y"]);
        assert_eq!(r.string_list_entry_or("A/NONE", &["d"]), ["d"]);
    }

    #[test]
    fn test_number_entries() {
        let r = reader();
        let mut ec = ErrorList::new();
        assert_eq!(r.number_entry("A/NUM", &mut ec), Some(42));
        assert_eq!(r.number_entry("A/BAD", &mut ec), None);
        assert!(ec.contains_code(codes::INVALID_CONFIG_ENTRY));
        assert_eq!(r.number_entry_or("A/BAD", 7), 7);
        assert_eq!(r.number_entry_or("A/NONE", 9), 9);
    }

    #[test]
    fn test_bool_entries() {
        let r = reader();
        let mut ec = ErrorList::new();
        assert_eq!(r.bool_entry("A/ON", &mut ec), Some(true));
        assert_eq!(r.bool_entry("A/ONE", &mut ec), Some(true));
        assert_eq!(r.bool_entry("A/OFF", &mut ec), Some(false));
        assert!(r.bool_entry_or("A/NONE", true));
        assert!(!r.bool_entry_or("A/NAME", false));
    }

    #[test]
    fn test_config_path() {
        assert_eq!(config_path("SAS/BYPASS", "MODULES"), "SAS/BYPASS/MODULES");
        assert_eq!(config_path("SAS/", "X"), "SAS/X");
        assert_eq!(config_path("", "X"), "X");
    }
}
