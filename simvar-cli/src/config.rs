//! Configuration loading and parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use simvar_sync::{DataType, SyncConfig, Value, VariableSpec};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Variables tracked from the start, in addition to `sync.variables`
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Client name announced to the simulator
    #[serde(default = "default_client_name")]
    pub name: String,
    /// Extra directory searched first for the client library
    pub library_path: Option<PathBuf>,
}

fn default_client_name() -> String {
    "simvar-cli".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            library_path: None,
        }
    }
}

impl AppConfig {
    /// Engine configuration with both variable lists merged
    pub fn sync_config(&self) -> SyncConfig {
        let mut sync = self.sync.clone();
        sync.variables.extend(self.variables.iter().cloned());
        sync
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .sync_config()
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Parse a `NAME,UNIT,TYPE` triple from the command line
///
/// The unit may be empty (`TITLE,,string256`).
pub fn parse_variable(arg: &str) -> Result<VariableSpec, String> {
    let mut parts = arg.rsplitn(3, ',');
    let (Some(data_type), Some(unit), Some(name)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected NAME,UNIT,TYPE, got '{}'", arg));
    };

    let data_type: DataType = data_type.trim().parse().map_err(|e| format!("{}", e))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty variable name in '{}'", arg));
    }
    Ok(VariableSpec::new(name, unit.trim(), data_type))
}

/// A value to write once the session is open
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub spec: VariableSpec,
    pub value: Value,
}

/// Parse a `NAME,UNIT,TYPE=VALUE` assignment from the command line
///
/// Numeric types take a number; string types take the text as is.
pub fn parse_assignment(arg: &str) -> Result<Assignment, String> {
    let Some((variable, value)) = arg.split_once('=') else {
        return Err(format!("expected NAME,UNIT,TYPE=VALUE, got '{}'", arg));
    };
    let spec = parse_variable(variable)?;

    let value = if spec.data_type.is_string() {
        Value::VariableString(value.to_string())
    } else {
        let number: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number for {}", value, spec.data_type))?;
        Value::Float64(number)
    };
    Ok(Assignment { spec, value })
}

/// Variables watched when nothing else is configured
pub fn default_variables() -> Vec<VariableSpec> {
    vec![
        VariableSpec::new("AIRSPEED INDICATED", "knot", DataType::Float64),
        VariableSpec::new("PLANE LATITUDE", "degrees", DataType::Float64),
        VariableSpec::new("PLANE LONGITUDE", "degrees", DataType::Float64),
        VariableSpec::new("PLANE HEADING DEGREES MAGNETIC", "degrees", DataType::Float64),
        VariableSpec::new("TITLE", "", DataType::String256),
        VariableSpec::new("ATC ID", "", DataType::String64),
    ]
}
