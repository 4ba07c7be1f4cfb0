//! Host configuration parsing

use orrery_types::{ServiceTag, SolidAngle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for one scripting host, usually loaded from `orrery.yml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Service every connected presence binds for script messages
    #[serde(default = "default_messaging_service")]
    pub messaging_service: ServiceTag,

    /// Service bound by the first presence for entity creation
    #[serde(default = "default_create_entity_service")]
    pub create_entity_service: ServiceTag,

    /// Mesh given to presences the script creates without one
    #[serde(default)]
    pub default_mesh: String,

    #[serde(default = "default_bounds_radius")]
    pub default_bounds_radius: f32,

    #[serde(default)]
    pub default_query_angle: SolidAngle,

    /// Load a persisted restore record on start instead of the initial script
    #[serde(default = "default_true")]
    pub restore_on_start: bool,

    /// Inline script source, used when `script_path` is unset
    #[serde(default)]
    pub script: String,

    /// Script file, resolved relative to the config file
    #[serde(default)]
    pub script_path: Option<PathBuf>,

    /// Longest the async driver sleeps when no timer is pending
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,

    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_messaging_service() -> ServiceTag {
    ServiceTag::MESSAGING
}

fn default_create_entity_service() -> ServiceTag {
    ServiceTag::CREATE_ENTITY
}

fn default_bounds_radius() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_idle_tick_ms() -> u64 {
    1000
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            messaging_service: default_messaging_service(),
            create_entity_service: default_create_entity_service(),
            default_mesh: String::new(),
            default_bounds_radius: default_bounds_radius(),
            default_query_angle: SolidAngle::default(),
            restore_on_start: default_true(),
            script: String::new(),
            script_path: None,
            idle_tick_ms: default_idle_tick_ms(),
            config_path: None,
        }
    }
}

impl HostConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_bounds_radius.is_nan() || self.default_bounds_radius <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "default_bounds_radius must be positive, got {}",
                self.default_bounds_radius
            )));
        }
        if self.messaging_service == self.create_entity_service {
            return Err(ConfigError::Invalid(format!(
                "messaging and create-entity services share tag {}",
                self.messaging_service
            )));
        }
        if self.idle_tick_ms == 0 {
            return Err(ConfigError::Invalid("idle_tick_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// The initial script source: the script file if one is configured,
    /// otherwise the inline source
    pub fn script_source(&self) -> Result<String, ConfigError> {
        match &self.script_path {
            Some(path) => Ok(std::fs::read_to_string(self.resolve_path(path))?),
            None => Ok(self.script.clone()),
        }
    }

    pub fn idle_tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_tick_ms)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.config_path.as_ref().and_then(|p| p.parent()) {
            Some(parent) => parent.join(path),
            None => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = HostConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.messaging_service, ServiceTag::MESSAGING);
        assert_eq!(config.create_entity_service, ServiceTag::CREATE_ENTITY);
        assert_eq!(config.default_bounds_radius, 1.0);
        assert_eq!(config.default_query_angle, SolidAngle::MAX);
        assert!(config.restore_on_start);
        assert_eq!(config.idle_tick_ms, 1000);
    }

    #[test]
    fn test_overrides() {
        let yaml = r#"
messaging_service: 40
default_mesh: "meshes/cube.dae"
default_bounds_radius: 2.5
restore_on_start: false
script: "system.print('hi')"
"#;
        let config = HostConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.messaging_service, ServiceTag(40));
        assert_eq!(config.default_mesh, "meshes/cube.dae");
        assert_eq!(config.default_bounds_radius, 2.5);
        assert!(!config.restore_on_start);
        assert_eq!(config.script_source().unwrap(), "system.print('hi')");
    }

    #[test]
    fn test_rejects_colliding_services() {
        let err = HostConfig::from_yaml_str("messaging_service: 13").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_non_positive_radius() {
        let err = HostConfig::from_yaml_str("default_bounds_radius: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_script_path_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.em"), "onStart()").unwrap();

        let config_path = dir.path().join("orrery.yml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "script_path: main.em").unwrap();

        let config = HostConfig::from_file(&config_path).unwrap();
        assert_eq!(config.script_source().unwrap(), "onStart()");
    }

    #[test]
    fn test_missing_file() {
        let err = HostConfig::from_file("/nonexistent/orrery.yml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
