// Dispatcher configuration
// Loaded from JSON; every field has a default so an empty object is valid

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What to do with START TRANSACTION while a transaction is already active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestedBeginPolicy {
    /// Fail with a transaction conflict and keep the open transaction
    #[default]
    Reject,
    /// Begin a new transaction and drop the old handle without finishing it
    Replace,
}

/// What to do with statements that are neither DML nor transaction control
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedPolicy {
    /// Fail with an unsupported-statement error
    #[default]
    Reject,
    /// Return an empty outcome
    Ignore,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub nested_begin: NestedBeginPolicy,
    pub unsupported: UnsupportedPolicy,
}

impl DispatchConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid dispatch configuration")
    }

    /// Read a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&json)
    }
}
