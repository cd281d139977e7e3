//! Root and per-node configuration: YAML parsing plus `${VAR}` / `${VAR:-default}`
//! environment expansion.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid yaml in {path}: {source}")]
    InvalidYaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required environment variable '{0}'")]
    MissingEnvVar(String),

    #[error("missing required field '{0}' in {1}")]
    MissingField(String, String),

    #[error("unknown callback '{callback}' declared by node '{node}' for topic '{topic}'")]
    UnknownCallback {
        node: String,
        topic: String,
        callback: String,
    },

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: f64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: f64,
    #[serde(default)]
    pub startup_delay: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_health_check_interval() -> f64 {
    5.0
}
fn default_shutdown_timeout() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LaunchSettings {
    pub startup_order: Vec<String>,
    #[serde(default)]
    pub parallel_launch: bool,
    #[serde(default)]
    pub wait_for_healthy: bool,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout: f64,
}

fn default_ready_timeout() -> f64 {
    30.0
}

/// The root descriptor (spec §6): `version`, `system`, `launch`, `environment`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RootConfig {
    pub version: String,
    pub system: SystemSettings,
    pub launch: LaunchSettings,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishDecl {
    pub topic: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscribeDecl {
    pub topic: String,
    pub callback: String,
}

/// A per-node descriptor (spec §6): declared publishes/subscribes plus a
/// free-form `configuration` block the node itself interprets.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeDescriptor {
    #[serde(default)]
    pub publishes: Vec<PublishDecl>,
    #[serde(default)]
    pub subscribes: Vec<SubscribeDecl>,
    #[serde(default)]
    pub configuration: serde_yaml::Value,
}

/// Parse the root descriptor from YAML text, expanding environment
/// references in every string value first.
pub fn load_root_config(path: impl AsRef<Path>) -> Result<RootConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let expanded = expand_env(&raw)?;
    serde_yaml::from_str(&expanded).map_err(|source| ConfigError::InvalidYaml {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_node_descriptor(path: impl AsRef<Path>) -> Result<NodeDescriptor, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let expanded = expand_env(&raw)?;
    serde_yaml::from_str(&expanded).map_err(|source| ConfigError::InvalidYaml {
        path: path.display().to_string(),
        source,
    })
}

/// Expand `${VAR}` (required — missing is a hard error) and `${VAR:-default}`
/// (optional) references in `text` using the process environment.
pub fn expand_env(text: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            let close = text[i + 2..]
                .find('}')
                .map(|p| i + 2 + p)
                .ok_or_else(|| ConfigError::MissingField("}".to_string(), "env expansion".into()))?;
            let inner = &text[i + 2..close];
            let value = if let Some((var, default)) = inner.split_once(":-") {
                std::env::var(var).unwrap_or_else(|_| default.to_string())
            } else {
                std::env::var(inner).map_err(|_| ConfigError::MissingEnvVar(inner.to_string()))?
            };
            out.push_str(&value);
            i = close + 1;
        } else {
            let ch_len = utf8_char_len(bytes[i]);
            out.push_str(&text[i..i + ch_len]);
            i += ch_len;
        }
    }
    Ok(out)
}

fn utf8_char_len(lead: u8) -> usize {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}
