//! Configuration management for the authorization state service.
//!
//! Configuration is loaded from multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over config file values, which take precedence over
//! defaults.
//!
//! # Example
//!
//! ```ignore
//! use authstate_server::config::ServerConfig;
//!
//! let config = ServerConfig::load("authstate.yaml")?;
//! let state = config.build_external_state()?;
//! state.initialize().await?;
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::Level;

use authstate_domain::ResolverConfig;
use authstate_storage::MemoryDocumentStore;

use crate::external_state::{AuthzExternalState, ExternalState, Topology};
use crate::logging::LoggingConfig;
use crate::observer::NoopOpObserver;

const ENV_PREFIX: &str = "AUTHSTATE";

/// Service configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Deployment settings
    #[serde(default)]
    pub deployment: DeploymentSettings,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Role resolution limits
    #[serde(default)]
    pub resolver: ResolverSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where this process runs and how it identifies itself.
///
/// Environment variables: `AUTHSTATE_DEPLOYMENT__TOPOLOGY`, `AUTHSTATE_DEPLOYMENT__PROCESS_ID`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DeploymentSettings {
    /// `storage` or `router`.
    #[serde(default)]
    pub topology: Topology,

    /// Holder id written into router-tier lock documents.
    #[serde(default = "default_process_id")]
    pub process_id: String,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            process_id: default_process_id(),
        }
    }
}

fn default_process_id() -> String {
    format!("authstate-{}", ulid::Ulid::new())
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend (only "memory" is built in)
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

/// Role resolution limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResolverSettings {
    /// Maximum roles one resolution may expand
    #[serde(default = "default_max_roles")]
    pub max_roles: usize,

    /// Deadline for one resolution in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_roles: default_max_roles(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_max_roles() -> usize {
    10_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl ResolverSettings {
    pub fn to_resolver_config(&self) -> ResolverConfig {
        ResolverConfig::default()
            .with_max_roles(self.max_roles)
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingSettings {
    /// Logging configuration for [`crate::logging::init_logging`].
    pub fn to_logging_config(&self) -> LoggingConfig {
        let level = self
            .level
            .to_lowercase()
            .parse::<Level>()
            .unwrap_or(Level::INFO);
        let config = if self.json {
            LoggingConfig::json()
        } else {
            LoggingConfig::text()
        };
        config.with_level(level)
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `AUTHSTATE_` and use `__` as separator, e.g.
    /// `AUTHSTATE_RESOLVER__MAX_ROLES=500` overrides `resolver.max_roles`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let valid_backends = ["memory"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    valid_backends, self.storage.backend
                ),
            });
        }

        if self.deployment.topology == Topology::Router
            && self.deployment.process_id.trim().is_empty()
        {
            return Err(ConfigLoadError::Invalid {
                message: "deployment.process_id is required when topology is 'router'"
                    .to_string(),
            });
        }

        if self.resolver.max_roles == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "resolver.max_roles must be greater than 0".to_string(),
            });
        }

        if self.resolver.timeout_ms == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "resolver.timeout_ms must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }

    /// Builds the external state for the configured topology and backend.
    pub fn build_external_state(&self) -> Result<Arc<dyn ExternalState>, ConfigLoadError> {
        self.validate()?;

        let store = match self.storage.backend.as_str() {
            "memory" => MemoryDocumentStore::new_shared(),
            other => {
                return Err(ConfigLoadError::Invalid {
                    message: format!("unsupported storage backend: {other}"),
                })
            }
        };

        let state = match self.deployment.topology {
            Topology::Storage => {
                AuthzExternalState::for_storage_tier(store, Arc::new(NoopOpObserver))
            }
            Topology::Router => {
                AuthzExternalState::for_router_tier(store, self.deployment.process_id.clone())
            }
        };

        Ok(Arc::new(
            state.with_resolver_config(self.resolver.to_resolver_config()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Test: Can load config from YAML file
    #[test]
    #[serial]
    fn test_can_load_config_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
deployment:
  topology: router
  process_id: router-7

storage:
  backend: memory

resolver:
  max_roles: 250
  timeout_ms: 1500

logging:
  level: debug
  json: true
"#
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();

        assert_eq!(config.deployment.topology, Topology::Router);
        assert_eq!(config.deployment.process_id, "router-7");
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.resolver.max_roles, 250);
        assert_eq!(config.resolver.timeout_ms, 1500);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);

        let resolver = config.resolver.to_resolver_config();
        assert_eq!(resolver.max_roles, 250);
        assert_eq!(resolver.timeout, Duration::from_millis(1500));
    }

    /// Test: Can override config with env vars
    #[test]
    #[serial]
    fn test_can_override_config_with_env_vars() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
resolver:
  max_roles: 100
  timeout_ms: 2000
"#
        )
        .unwrap();

        std::env::set_var("AUTHSTATE_RESOLVER__MAX_ROLES", "42");
        std::env::set_var("AUTHSTATE_LOGGING__LEVEL", "warn");

        let config = ServerConfig::load(file.path());

        std::env::remove_var("AUTHSTATE_RESOLVER__MAX_ROLES");
        std::env::remove_var("AUTHSTATE_LOGGING__LEVEL");

        let config = config.unwrap();
        assert_eq!(config.resolver.max_roles, 42);
        assert_eq!(config.resolver.timeout_ms, 2000);
        assert_eq!(config.logging.level, "warn");
    }

    /// Test: Config validation catches errors
    #[test]
    fn test_config_validation_catches_errors() {
        let mut config = ServerConfig::default();
        config.storage.backend = "postgres".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.backend"));

        let mut config = ServerConfig::default();
        config.deployment.topology = Topology::Router;
        config.deployment.process_id = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("process_id"));

        let mut config = ServerConfig::default();
        config.resolver.max_roles = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("resolver.max_roles"));

        let mut config = ServerConfig::default();
        config.resolver.timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("resolver.timeout_ms"));

        let mut config = ServerConfig::default();
        config.logging.level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));
    }

    /// Test: Invalid config returns clear error
    #[test]
    fn test_invalid_config_returns_clear_error() {
        let result = ServerConfig::load("/nonexistent/path/authstate.yaml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigLoadError::FileNotFound { .. }));
        assert!(err.to_string().contains("not found"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: syntax: [").unwrap();
        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load(_)));
    }

    /// Test: Default config is valid
    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.deployment.topology, Topology::Storage);
        assert!(config.deployment.process_id.starts_with("authstate-"));
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.resolver.max_roles, 10_000);
        assert_eq!(config.resolver.timeout_ms, 30_000);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    /// Test: from_env loads defaults with env overrides
    #[test]
    #[serial]
    fn test_from_env_loads_defaults_with_env_overrides() {
        std::env::set_var("AUTHSTATE_DEPLOYMENT__TOPOLOGY", "router");

        let config = ServerConfig::from_env();

        std::env::remove_var("AUTHSTATE_DEPLOYMENT__TOPOLOGY");

        let config = config.unwrap();
        assert_eq!(config.deployment.topology, Topology::Router);
        assert_eq!(config.resolver.max_roles, 10_000);
    }

    #[test]
    fn test_logging_settings_map_to_logging_config() {
        let settings = LoggingSettings {
            level: "DEBUG".to_string(),
            json: true,
        };
        let logging = settings.to_logging_config();
        assert!(logging.json_format);
        assert_eq!(logging.default_level, Level::DEBUG);
    }

    #[tokio::test]
    async fn test_build_external_state_for_each_topology() {
        let mut config = ServerConfig::default();
        let storage = config.build_external_state().unwrap();
        assert!(storage.try_acquire_update_lock("t1", "test").await.unwrap());
        storage.release_update_lock("t1").await.unwrap();

        config.deployment.topology = Topology::Router;
        config.deployment.process_id = "router-1".to_string();
        let router = config.build_external_state().unwrap();
        router.initialize().await.unwrap();
        assert!(router.try_acquire_update_lock("t1", "test").await.unwrap());
        let databases = router.get_all_database_names().await.unwrap();
        assert!(databases.contains(&"config".to_string()));
        router.release_update_lock("t1").await.unwrap();
    }
}
