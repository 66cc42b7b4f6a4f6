//! Mapping configuration.
//!
//! Default file names, environment overrides and the explicit startup
//! loader for the register schema and unit id table.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;
use crate::pipeline::PipelineConfig;
use crate::schema::RegisterSchema;
use crate::unit_id::UnitIdTable;

/// Default attributes file, relative to the configuration directory.
pub const ATTRIBUTES_FILE: &str = "attributes.csv";

/// Default unit id mapping file, relative to the configuration directory.
pub const UNIT_ID_FILE: &str = "unitid2di.csv";

/// Default limit on waiting for property readiness.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable names.
pub mod env_vars {
    pub const ATTRIBUTES: &str = "NEOMIND_REGMAP_ATTRIBUTES";
    pub const UNIT_IDS: &str = "NEOMIND_REGMAP_UNIT_IDS";
    /// Milliseconds; `0` waits forever
    pub const READY_TIMEOUT_MS: &str = "NEOMIND_REGMAP_READY_TIMEOUT_MS";

    /// Attributes path from the environment.
    pub fn attributes() -> Option<std::path::PathBuf> {
        std::env::var(ATTRIBUTES).ok().map(Into::into)
    }

    /// Unit id table path from the environment.
    pub fn unit_ids() -> Option<std::path::PathBuf> {
        std::env::var(UNIT_IDS).ok().map(Into::into)
    }

    /// Readiness timeout from the environment. `Some(None)` means no timeout.
    pub fn ready_timeout() -> Option<Option<std::time::Duration>> {
        std::env::var(READY_TIMEOUT_MS)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|ms| (ms > 0).then_some(std::time::Duration::from_millis(ms)))
    }
}

/// Where the mapping tables come from and how requests wait.
#[derive(Debug, Clone, PartialEq)]
pub struct RegmapConfig {
    pub attributes_path: PathBuf,
    pub unit_id_path: PathBuf,
    pub ready_timeout: Option<Duration>,
}

impl Default for RegmapConfig {
    fn default() -> Self {
        Self::in_dir(".")
    }
}

impl RegmapConfig {
    /// Default file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            attributes_path: dir.join(ATTRIBUTES_FILE),
            unit_id_path: dir.join(UNIT_ID_FILE),
            ready_timeout: Some(DEFAULT_READY_TIMEOUT),
        }
    }

    /// Defaults inside `dir`, overridden by environment variables.
    pub fn from_env(dir: impl AsRef<Path>) -> Self {
        let mut config = Self::in_dir(dir);
        if let Some(path) = env_vars::attributes() {
            config.attributes_path = path;
        }
        if let Some(path) = env_vars::unit_ids() {
            config.unit_id_path = path;
        }
        if let Some(timeout) = env_vars::ready_timeout() {
            config.ready_timeout = timeout;
        }
        config
    }

    pub fn with_attributes(mut self, path: impl Into<PathBuf>) -> Self {
        self.attributes_path = path.into();
        self
    }

    pub fn with_unit_ids(mut self, path: impl Into<PathBuf>) -> Self {
        self.unit_id_path = path.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ready_timeout: self.ready_timeout,
        }
    }

    /// Load both tables.
    ///
    /// The schema is mandatory and must not be empty. A missing unit id file
    /// only disables explicit overrides.
    pub fn load(&self) -> Result<(RegisterSchema, UnitIdTable), ConfigError> {
        let schema = RegisterSchema::load(&self.attributes_path)?;
        let unit_ids = match UnitIdTable::load(&self.unit_id_path) {
            Ok(table) => table,
            Err(e) => {
                warn!("{}; using identity unit id mapping", e);
                UnitIdTable::new()
            }
        };
        Ok((schema, unit_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = RegmapConfig::in_dir("/etc/neomind");
        assert_eq!(config.attributes_path, PathBuf::from("/etc/neomind/attributes.csv"));
        assert_eq!(config.unit_id_path, PathBuf::from("/etc/neomind/unitid2di.csv"));
        assert_eq!(config.ready_timeout, Some(DEFAULT_READY_TIMEOUT));
    }

    #[test]
    fn test_load_without_unit_id_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ATTRIBUTES_FILE),
            "battery,/Soc,d,%,266,uint16,10,R\n",
        )
        .unwrap();

        let (schema, unit_ids) = RegmapConfig::in_dir(dir.path()).load().unwrap();
        assert_eq!(schema.len(), 1);
        assert!(unit_ids.is_empty());
    }

    #[test]
    fn test_load_fails_without_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let result = RegmapConfig::in_dir(dir.path()).load();
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_builder_overrides() {
        let config = RegmapConfig::default()
            .with_attributes("/tmp/a.csv")
            .with_unit_ids("/tmp/u.csv")
            .with_ready_timeout(None);
        assert_eq!(config.attributes_path, PathBuf::from("/tmp/a.csv"));
        assert_eq!(config.unit_id_path, PathBuf::from("/tmp/u.csv"));
        assert!(config.pipeline_config().ready_timeout.is_none());
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var(env_vars::ATTRIBUTES, "/data/attributes.csv");
        std::env::set_var(env_vars::READY_TIMEOUT_MS, "0");
        let config = RegmapConfig::from_env("/etc/neomind");
        std::env::remove_var(env_vars::ATTRIBUTES);
        std::env::remove_var(env_vars::READY_TIMEOUT_MS);

        assert_eq!(config.attributes_path, PathBuf::from("/data/attributes.csv"));
        assert_eq!(config.unit_id_path, PathBuf::from("/etc/neomind/unitid2di.csv"));
        assert!(config.ready_timeout.is_none());
    }
}
