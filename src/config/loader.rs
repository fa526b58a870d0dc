//! Configuration Loader
//!
//! Environment-aware layered loading: built-in defaults, an optional
//! configuration file, then `PORTER__<FIELD>` environment variables, and
//! finally the `PORTER_AWS_REGION` region override.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::ConfigurationError;
use super::PorterConfig;
use crate::constants;

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: PorterConfig,
    environment: String,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> Result<Arc<ConfigManager>, ConfigurationError> {
        Self::load_from_file(None)
    }

    /// Load configuration from an explicit file, still layering environment overrides
    pub fn load_from_file(path: Option<&Path>) -> Result<Arc<ConfigManager>, ConfigurationError> {
        let environment = Self::detect_environment();
        let config_file = path
            .map(Path::to_path_buf)
            .or_else(|| Self::default_config_file(&environment));

        debug!(
            environment = %environment,
            config_file = ?config_file,
            "Loading porter configuration"
        );

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&PorterConfig::default())?);

        if let Some(file) = &config_file {
            builder = builder.add_source(config::File::from(file.as_path()).required(path.is_some()));
        }

        let mut config: PorterConfig = builder
            .add_source(
                config::Environment::with_prefix(constants::CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Self::apply_region_override(&mut config);
        config.validate()?;

        info!(
            environment = %environment,
            source = %config.source,
            region = %config.region,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_file,
        }))
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(mut config: PorterConfig) -> Result<Arc<ConfigManager>, ConfigurationError> {
        Self::apply_region_override(&mut config);
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_file: None,
        }))
    }

    pub fn config(&self) -> &PorterConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Get current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("PORTER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn apply_region_override(config: &mut PorterConfig) {
        if let Ok(region) = env::var(constants::REGION_ENV_VAR) {
            if !region.is_empty() {
                config.region = region;
            }
        }
    }

    fn default_config_file(environment: &str) -> Option<PathBuf> {
        let candidates = [
            PathBuf::from(format!("config/porter.{environment}.toml")),
            PathBuf::from("config/porter.toml"),
            PathBuf::from("porter.toml"),
        ];
        candidates.into_iter().find(|p| p.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "source = \"billing\"\nprefix = \"dev\"\nretries_before_dead_letter = 5\npolling_interval_seconds = 2.5\nraise_exceptions = true"
        )
        .expect("write config");

        let manager = ConfigManager::load_from_file(Some(file.path())).expect("config loads");
        let config = manager.config();

        assert_eq!(config.source, "billing");
        assert_eq!(config.prefix, "dev");
        assert_eq!(config.retries_before_dead_letter, 5);
        assert_eq!(config.polling_interval_seconds, 2.5);
        assert!(config.raise_exceptions);
        // untouched keys keep their defaults
        assert_eq!(config.queue_max_receive_count, 5);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = ConfigManager::load_from_file(Some(Path::new("/nonexistent/porter.toml")));
        assert!(matches!(result, Err(ConfigurationError::LoadError { .. })));
    }

    #[test]
    fn test_from_config_validates() {
        assert!(ConfigManager::from_config(PorterConfig::default()).is_err());
        assert!(ConfigManager::from_config(PorterConfig::with_source("orders")).is_ok());
    }
}
