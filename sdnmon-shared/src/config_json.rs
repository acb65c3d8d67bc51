//! JSON5 parsing for sdnmon configuration files.
//!
//! A configuration file is a set of named sections, each holding scalar
//! parameters:
//!
//! ```json5
//! {
//!   NETWORK: { CONTROLLER_MAC: "00:00:00:00:00:fe", CONTROLLER_IP: "10.0.0.254",
//!              ARP_REFRESH: "1m", IP_POOL: "10.0.0.1:10.0.0.20" },
//!   MONITOR: { PERIOD: 2, SAMPLES: 5 },
//! }
//! ```
//!
//! Sections are flattened to `SECTION_PARAM` keys, the same names used for
//! environment variable overrides. Durations accept plain seconds or
//! `duration-string` forms such as "500ms", "5s", "1m30s".

use duration_string::DurationString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;

/// A scalar parameter value as written in the file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl ConfigValue {
    /// Text form, or `None` for null
    pub fn as_text(&self) -> Option<String> {
        match self {
            ConfigValue::Bool(b) => Some(b.to_string()),
            ConfigValue::Number(n) => Some(n.to_string()),
            ConfigValue::Text(s) => Some(s.clone()),
            ConfigValue::Null => None,
        }
    }
}

type Sections = BTreeMap<String, BTreeMap<String, ConfigValue>>;

/// Parse JSON5 text into flattened `SECTION_PARAM -> value` pairs.
///
/// Null parameters are dropped so that defaults apply to them.
pub fn parse_config_json5(json5_content: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let sections: Sections =
        json5::from_str(json5_content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut flat = BTreeMap::new();
    for (section, params) in sections {
        for (param, value) in params {
            if let Some(text) = value.as_text() {
                flat.insert(format!("{}_{}", section, param), text);
            }
        }
    }
    Ok(flat)
}

/// Parse a configuration file from a path
pub fn parse_config_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config_json5(&content)
}

/// Parse "2", "0.5", "500ms", "1m30s" into a [`Duration`]
pub fn parse_duration_value(s: &str) -> Result<Duration, String> {
    let trimmed = s.trim();
    if let Ok(secs) = trimmed.parse::<f64>() {
        return Duration::try_from_secs_f64(secs)
            .map_err(|e| format!("Invalid duration '{}': {}", s, e));
    }

    let duration: DurationString = trimmed
        .parse()
        .map_err(|e| format!("Invalid duration '{}': {}", s, e))?;
    Ok(duration.into())
}
