//! Configuration management.
//!
//! The host is configured by a single TOML file. `Settings` is the serde
//! model of that file; each `[gcode_macro.<name>]` table becomes a
//! [`ConfigSection`], a named group of validated string options with the
//! lookup operations the macro loader needs (required get, prefix
//! enumeration). Scalar values are carried as their literal text with no
//! type coercion; interpreting them is up to the consumer.

use crate::error::{HostError, HostResult};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level host configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Log level for the tracing subscriber (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// One `[gcode_macro.<name>]` table per operator-defined macro.
    #[serde(default)]
    pub gcode_macro: HashMap<String, toml::Table>,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> HostResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> HostResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// The macro config sections, in deterministic (sorted) load order.
    ///
    /// Each `[gcode_macro.<name>]` table maps to a section named
    /// `"gcode_macro <name>"`.
    pub fn macro_sections(&self) -> HostResult<Vec<ConfigSection>> {
        let mut names: Vec<&String> = self.gcode_macro.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| ConfigSection::new(format!("gcode_macro {name}"), &self.gcode_macro[name]))
            .collect()
    }
}

/// One named group of configuration options.
#[derive(Debug, Clone)]
pub struct ConfigSection {
    name: String,
    options: BTreeMap<String, String>,
}

impl ConfigSection {
    /// Build a section from a TOML table, stringifying scalar values as-is.
    pub fn new(name: String, table: &toml::Table) -> HostResult<Self> {
        let mut options = BTreeMap::new();
        for (key, value) in table {
            let text = match value {
                toml::Value::String(text) => text.clone(),
                toml::Value::Integer(number) => number.to_string(),
                toml::Value::Float(number) => number.to_string(),
                toml::Value::Boolean(flag) => flag.to_string(),
                _ => {
                    return Err(HostError::Config(format!(
                        "Option '{key}' in section '{name}' must be a scalar value"
                    )))
                }
            };
            options.insert(key.clone(), text);
        }
        Ok(ConfigSection { name, options })
    }

    /// The full section name, including the section-type prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch a required option.
    pub fn get(&self, option: &str) -> HostResult<&str> {
        self.options.get(option).map(String::as_str).ok_or_else(|| {
            HostError::Config(format!(
                "Option '{}' in section '{}' must be specified",
                option, self.name
            ))
        })
    }

    /// Option names sharing `prefix`, in sorted order.
    pub fn get_prefix_options(&self, prefix: &str) -> Vec<&str> {
        self.options
            .keys()
            .filter(|key| key.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }
}
