//! Provider configuration loaded via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::scope::Environment;

/// Azure settings merged from defaults, `azrig.toml`, and `AZURE_*`
/// environment variables.
///
/// The environment fields are optional so scope files can carry their own
/// values; when set here they take precedence.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AZURE",
    discovery(
        app_name = "azrig",
        env_var = "AZRIG_CONFIG_PATH",
        config_file_name = "azrig.toml",
        dotfile_name = ".azrig.toml",
        project_file_name = "azrig.toml"
    )
)]
pub struct ProviderConfig {
    /// Subscription identifier.
    pub subscription_id: Option<String>,
    /// Region, for example `westeurope`.
    pub location: Option<String>,
    /// Resource group holding the cluster's resources.
    pub resource_group: Option<String>,
    /// Upper bound on a whole pass, in seconds. Defaults to ten minutes.
    #[ortho_config(default = 600)]
    pub operation_timeout_secs: u64,
    /// `tracing` filter applied when `RUST_LOG` is unset.
    #[ortho_config(default = "azrig=info".to_owned())]
    pub log_filter: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to [azure] in azrig.toml",
            self.env_var, self.toml_key
        )
    }
}

const SUBSCRIPTION_ID: FieldMetadata =
    FieldMetadata::new("subscription ID", "AZURE_SUBSCRIPTION_ID", "subscription_id");
const LOCATION: FieldMetadata = FieldMetadata::new("location", "AZURE_LOCATION", "location");
const RESOURCE_GROUP: FieldMetadata =
    FieldMetadata::new("resource group", "AZURE_RESOURCE_GROUP", "resource_group");
const OPERATION_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "operation timeout",
    "AZURE_OPERATION_TIMEOUT_SECS",
    "operation_timeout_secs",
);
const LOG_FILTER: FieldMetadata = FieldMetadata::new("log filter", "AZURE_LOG_FILTER", "log_filter");

impl ProviderConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("azrig")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that provide the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a set field is blank, the
    /// timeout is zero, or the log filter is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, metadata) in [
            (self.subscription_id.as_deref(), &SUBSCRIPTION_ID),
            (self.location.as_deref(), &LOCATION),
            (self.resource_group.as_deref(), &RESOURCE_GROUP),
            (Some(self.log_filter.as_str()), &LOG_FILTER),
        ] {
            if value.is_some_and(|text| text.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "{} must not be blank: {}",
                    metadata.description,
                    metadata.hint()
                )));
            }
        }
        if self.operation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be greater than zero: {}",
                OPERATION_TIMEOUT.description,
                OPERATION_TIMEOUT.hint()
            )));
        }
        Ok(())
    }

    /// Upper bound on a whole pass.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Builds a complete [`Environment`] from the configured fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first unset field.
    pub fn environment(&self) -> Result<Environment, ConfigError> {
        Ok(Environment {
            subscription_id: Self::require(self.subscription_id.as_deref(), &SUBSCRIPTION_ID)?,
            location: Self::require(self.location.as_deref(), &LOCATION)?,
            resource_group: Self::require(self.resource_group.as_deref(), &RESOURCE_GROUP)?,
        })
    }

    /// Overlays the configured fields onto `env`, leaving unset ones alone.
    pub fn apply_to(&self, env: &mut Environment) {
        if let Some(subscription_id) = &self.subscription_id {
            env.subscription_id.clone_from(subscription_id);
        }
        if let Some(location) = &self.location {
            env.location.clone_from(location);
        }
        if let Some(resource_group) = &self.resource_group {
            env.resource_group.clone_from(resource_group);
        }
    }

    fn require(value: Option<&str>, metadata: &FieldMetadata) -> Result<String, ConfigError> {
        match value.map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_owned()),
            _ => Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            ))),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
