//! Runtime configuration: where each dataset lives and where the API binds.
//!
//! Resolution order, lowest to highest precedence:
//!
//! 1. Defaults (`default_locator` of each embedded dataset definition,
//!    `127.0.0.1:8080`).
//! 2. An optional TOML file (`--config` or `VAN311_CONFIG`).
//! 3. Environment variables (`VAN311_SERVICE_REQUESTS`,
//!    `VAN311_INQUIRY_VOLUME`, `VAN311_CONTACT_CENTRE`, `BIND_ADDR`, `PORT`).
//! 4. Command-line flags, applied by the binaries through [`SourceLocators::set`].
//!
//! ```toml
//! [sources]
//! service_requests = "https://opendata.vancouver.ca/.../3-1-1-service-requests.csv"
//! inquiry_volume = "data/inquiry-volume.csv"
//!
//! [server]
//! port = 9000
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use van311_dataset_models::DatasetKind;

use crate::registry;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "VAN311_CONFIG";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`DashboardConfig`].
    #[error("Invalid config file {}: {message}", path.display())]
    Parse {
        /// Path of the configuration file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// An environment variable holds an unusable value.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Complete dashboard configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Dataset locators.
    pub sources: SourceLocators,
    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Locator overrides per dataset. `None` falls back to the dataset
/// definition's `default_locator`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceLocators {
    /// Service-requests CSV (path or URL).
    pub service_requests: Option<String>,
    /// Inquiry-volume CSV (path or URL).
    pub inquiry_volume: Option<String>,
    /// Contact-centre metrics CSV (path or URL).
    pub contact_centre: Option<String>,
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_addr: String,
    /// Port to bind.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Returns the environment variable that overrides a dataset's locator.
#[must_use]
pub const fn locator_env(kind: DatasetKind) -> &'static str {
    match kind {
        DatasetKind::ServiceRequests => "VAN311_SERVICE_REQUESTS",
        DatasetKind::InquiryVolume => "VAN311_INQUIRY_VOLUME",
        DatasetKind::ContactCentre => "VAN311_CONTACT_CENTRE",
    }
}

impl SourceLocators {
    /// Returns the configured override for `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: DatasetKind) -> Option<&str> {
        match kind {
            DatasetKind::ServiceRequests => self.service_requests.as_deref(),
            DatasetKind::InquiryVolume => self.inquiry_volume.as_deref(),
            DatasetKind::ContactCentre => self.contact_centre.as_deref(),
        }
    }

    /// Overrides the locator for `kind`.
    pub fn set(&mut self, kind: DatasetKind, locator: String) {
        let slot = match kind {
            DatasetKind::ServiceRequests => &mut self.service_requests,
            DatasetKind::InquiryVolume => &mut self.inquiry_volume,
            DatasetKind::ContactCentre => &mut self.contact_centre,
        };
        *slot = Some(locator);
    }

    /// Returns the locator to load for `kind`: the override if set,
    /// otherwise the dataset definition's default.
    #[must_use]
    pub fn resolve(&self, kind: DatasetKind) -> String {
        self.get(kind).map_or_else(
            || registry::definition(kind).default_locator,
            str::to_string,
        )
    }
}

impl DashboardConfig {
    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(path: &Path, toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Reads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(path, &contents)
    }

    /// Applies overrides from a variable lookup (normally the process
    /// environment, see [`Self::apply_env`]).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if `PORT` is not a valid port.
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        for kind in DatasetKind::all() {
            if let Some(locator) = lookup(locator_env(*kind)).filter(|v| !v.trim().is_empty()) {
                self.sources.set(*kind, locator);
            }
        }

        if let Some(bind_addr) = lookup("BIND_ADDR") {
            self.server.bind_addr = bind_addr;
        }

        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: "PORT",
                    value: port,
                })?;
        }

        Ok(self)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if `PORT` is not a valid port.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Loads configuration from `path` (or the file named by
    /// `VAN311_CONFIG`, or defaults when neither is given), then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or an
    /// environment override is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let config = match path.or(from_env.as_deref()) {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        config.apply_env()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn defaults_come_from_dataset_definitions() {
        let config = DashboardConfig::default();
        assert_eq!(
            config.sources.resolve(DatasetKind::ServiceRequests),
            "data/311service-requests.csv"
        );
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_addr, "127.0.0.1");
    }

    #[test]
    fn parses_partial_toml() {
        let config = DashboardConfig::from_toml_str(
            Path::new("test.toml"),
            r#"
                [sources]
                inquiry_volume = "https://example.org/inquiry.csv"

                [server]
                port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(
            config.sources.resolve(DatasetKind::InquiryVolume),
            "https://example.org/inquiry.csv"
        );
        assert!(config.sources.get(DatasetKind::ContactCentre).is_none());
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_addr, "127.0.0.1");
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = DashboardConfig::from_toml_str(Path::new("bad.toml"), "[server]\nport = \"x\"")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: BTreeMap<&str, &str> = [
            ("VAN311_CONTACT_CENTRE", "/tmp/calls.csv"),
            ("VAN311_INQUIRY_VOLUME", "  "),
            ("PORT", "3000"),
        ]
        .into_iter()
        .collect();

        let config = DashboardConfig::default()
            .apply_overrides(|k| env.get(k).map(ToString::to_string))
            .unwrap();

        assert_eq!(
            config.sources.get(DatasetKind::ContactCentre),
            Some("/tmp/calls.csv")
        );
        assert!(config.sources.get(DatasetKind::InquiryVolume).is_none());
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = DashboardConfig::default()
            .apply_overrides(|k| (k == "PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: "PORT", .. }));
    }

    #[test]
    fn set_overrides_locator() {
        let mut locators = SourceLocators::default();
        locators.set(DatasetKind::ServiceRequests, "requests.csv".to_string());
        assert_eq!(locators.resolve(DatasetKind::ServiceRequests), "requests.csv");
    }
}
