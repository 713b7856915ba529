//! Configuration loading via `ortho-config`.
//!
//! Provider credentials live in [`ScalewayConfig`] (prefix `SCW`), workflow
//! tuning in [`BackupConfig`] (prefix `SHARESNAP`).

mod backup;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

pub use backup::{BackupConfig, DEFAULT_CREDENTIAL_NAME, DEFAULT_RULE_SET_PREFIX};

/// Scaleway specific configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not required for API
    /// calls.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Availability zone for instances, rule sets and snapshots.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Region queried for file shares.
    #[ortho_config(default = "fr-par".to_owned())]
    pub default_region: String,
    /// Commercial type for the copy instance.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Image label or identifier for the copy instance.
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
pub(crate) struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    pub(crate) const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

pub(crate) fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in sharesnap.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sharesnap")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                self.secret_key.as_str(),
                FieldMetadata::new(
                    "Scaleway API secret key",
                    "SCW_SECRET_KEY",
                    "secret_key",
                    "scaleway",
                ),
            ),
            (
                self.default_project_id.as_str(),
                FieldMetadata::new(
                    "Scaleway project ID",
                    "SCW_DEFAULT_PROJECT_ID",
                    "default_project_id",
                    "scaleway",
                ),
            ),
            (
                self.default_image.as_str(),
                FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image", "scaleway"),
            ),
            (
                self.default_instance_type.as_str(),
                FieldMetadata::new(
                    "instance type",
                    "SCW_DEFAULT_INSTANCE_TYPE",
                    "default_instance_type",
                    "scaleway",
                ),
            ),
            (
                self.default_zone.as_str(),
                FieldMetadata::new(
                    "availability zone",
                    "SCW_DEFAULT_ZONE",
                    "default_zone",
                    "scaleway",
                ),
            ),
            (
                self.default_region.as_str(),
                FieldMetadata::new(
                    "file storage region",
                    "SCW_DEFAULT_REGION",
                    "default_region",
                    "scaleway",
                ),
            ),
            (
                self.default_architecture.as_str(),
                FieldMetadata::new(
                    "CPU architecture",
                    "SCW_DEFAULT_ARCHITECTURE",
                    "default_architecture",
                    "scaleway",
                ),
            ),
        ];
        for (value, metadata) in &fields {
            require_field(value, metadata)?;
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid configuration value for {field}: {message}")]
    InvalidValue {
        /// Field holding the value.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn scaleway() -> ScalewayConfig {
        ScalewayConfig {
            access_key: None,
            secret_key: String::from("secret"),
            default_organization_id: None,
            default_project_id: String::from("project"),
            default_zone: String::from("fr-par-1"),
            default_region: String::from("fr-par"),
            default_instance_type: String::from("DEV1-S"),
            default_image: String::from("Ubuntu 24.04 Noble Numbat"),
            default_architecture: String::from("x86_64"),
        }
    }

    #[rstest]
    fn complete_scaleway_config_validates(scaleway: ScalewayConfig) {
        assert!(scaleway.validate().is_ok());
    }

    #[rstest]
    fn missing_secret_key_names_env_var(mut scaleway: ScalewayConfig) {
        scaleway.secret_key = String::from("   ");
        let err = scaleway.validate().expect_err("blank secret should fail");
        let message = err.to_string();
        assert!(message.contains("SCW_SECRET_KEY"), "message: {message}");
        assert!(message.contains("sharesnap.toml"), "message: {message}");
    }

    #[rstest]
    fn missing_region_is_reported(mut scaleway: ScalewayConfig) {
        scaleway.default_region = String::new();
        let err = scaleway.validate().expect_err("blank region should fail");
        assert!(err.to_string().contains("SCW_DEFAULT_REGION"));
    }
}
