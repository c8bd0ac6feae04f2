//! file: core/src/config.rs
//! description: lowering configuration and where it is read from.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BridgeError, BridgeResult};

/// Environment variable naming a JSON config file for `hlir_init`.
pub const CONFIG_ENV_VAR: &str = "HLIR_BRIDGE_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Function whose `EmitElement` ops form the document body.
    #[serde(default = "default_document_entry")]
    pub document_entry: String,
    /// Blank out function and global names in the string table.
    #[serde(default)]
    pub strip_names: bool,
    /// Upper bound on a serialized buffer, in bytes.
    #[serde(default)]
    pub max_output_bytes: Option<u64>,
}

fn default_document_entry() -> String {
    "__document".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            document_entry: default_document_entry(),
            strip_names: false,
            max_output_bytes: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(raw: &str) -> BridgeResult<BridgeConfig> {
        serde_json::from_str(raw).map_err(|e| BridgeError::invalid_input(format!("parse config: {}", e)))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> BridgeResult<BridgeConfig> {
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            BridgeError::invalid_input(format!("read config {}: {}", path.as_ref().display(), e))
        })?;
        BridgeConfig::from_json_str(&raw)
    }

    /// Config for the process-wide context: the file named by
    /// `HLIR_BRIDGE_CONFIG` when set and readable, defaults otherwise.
    pub fn from_env() -> BridgeConfig {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => match BridgeConfig::load_from_file(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    log::warn!("ignoring {}: {}", CONFIG_ENV_VAR, e);
                    BridgeConfig::default()
                }
            },
            None => BridgeConfig::default(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
