//! Audit configuration loaded from YAML
//!
//! ```yaml
//! targets:
//!   - example.com
//!   - 10.0.0.1
//! include_subdomains: true
//! depth: 0
//! local: false
//! database: /var/lib/auditgraph/audit.db
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading an audit configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration has no targets")]
    NoTargets,
}

fn default_true() -> bool {
    true
}

/// Settings describing one audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Domains, addresses or URLs that define the scope
    pub targets: Vec<String>,
    /// Treat subdomains of target domains as in scope
    #[serde(default = "default_true")]
    pub include_subdomains: bool,
    /// Depth assigned to records created at the start of the audit
    #[serde(default)]
    pub depth: u32,
    /// Plugins run out of process; the local reconciliation cache is disabled
    #[serde(default)]
    pub local: bool,
    /// Path of the audit database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

impl AuditConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        if config.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }
}
