//! Layering of configuration sources.
//!
//! Parameters are merged as flat `SECTION_PARAM` keys: the JSON5 file first,
//! then environment variables of the same name, then command line flags.

use std::collections::BTreeMap;
use tracing::debug;

use sdnmon_shared::config_json::parse_config_file;
use sdnmon_shared::errors::ConfigResult;

use super::cli::CliConfig;
use super::keys;

/// Merge every configuration source, later sources overriding earlier ones
pub fn merge_parameters(
    cli: &CliConfig,
    env: &dyn Fn(&str) -> Option<String>,
) -> ConfigResult<BTreeMap<String, String>> {
    let mut params = match &cli.config_path {
        Some(path) => {
            let params = parse_config_file(path)?;
            debug!(path = %path.display(), count = params.len(), "Loaded configuration file");
            params
        }
        None => BTreeMap::new(),
    };

    for name in keys::ALL {
        if let Some(value) = env(name) {
            debug!(parameter = name, "Overridden from environment");
            params.insert(name.to_string(), value);
        }
    }

    for (name, value) in cli.overrides() {
        params.insert(name.to_string(), value);
    }

    Ok(params)
}
