//! Provider-wide configuration.
//!
//! Settings are layered with the `config` crate: built-in defaults, then
//! `KUBE_CRD_*` environment variables, then the configuration block passed
//! to `configure`. Later layers win.
//!
//! | Key               | Environment variable       | Default             |
//! |-------------------|----------------------------|---------------------|
//! | `kubeconfig`      | `KUBE_CRD_KUBECONFIG`      | inferred            |
//! | `context`         | `KUBE_CRD_CONTEXT`         | current context     |
//! | `field_manager`   | `KUBE_CRD_FIELD_MANAGER`   | `kube-crd-provider` |
//! | `force_conflicts` | `KUBE_CRD_FORCE_CONFLICTS` | `false`             |

use std::path::PathBuf;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::resource::prune_nulls;
use crate::schema::{Attribute, Schema, Validator};
use crate::types::{ApplyDefaults, DEFAULT_FIELD_MANAGER};

/// Prefix of the environment variables read by [`ProviderConfig::load`].
pub const ENV_PREFIX: &str = "KUBE_CRD";

/// Resolved provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Explicit kubeconfig file; inferred from the environment when unset.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use instead of the current one.
    #[serde(default)]
    pub context: Option<String>,
    /// Default field manager for server-side apply.
    pub field_manager: String,
    /// Default for taking over fields owned by other managers.
    pub force_conflicts: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            context: None,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            force_conflicts: false,
        }
    }
}

impl ProviderConfig {
    /// Layer defaults, the process environment and `explicit`.
    pub fn load(explicit: &Value) -> Result<Self, ProviderError> {
        Self::load_from(explicit, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(explicit: &Value, env: Environment) -> Result<Self, ProviderError> {
        let explicit = match prune_nulls(explicit) {
            None => Value::Object(Default::default()),
            Some(obj @ Value::Object(_)) => obj,
            Some(other) => {
                return Err(ProviderError::Configuration(format!(
                    "provider configuration must be an object, got {}",
                    other
                )))
            },
        };

        let config: Self = Config::builder()
            .set_default("field_manager", DEFAULT_FIELD_MANAGER)?
            .set_default("force_conflicts", false)?
            .add_source(env.prefix_separator("_").try_parsing(true))
            .add_source(File::from_str(&explicit.to_string(), FileFormat::Json))
            .build()?
            .try_deserialize()?;

        if config.field_manager.trim().is_empty() {
            return Err(ProviderError::Configuration(
                "field_manager must not be empty".to_string(),
            ));
        }
        Ok(config)
    }

    /// Apply defaults for resources that do not set their own.
    pub fn apply_defaults(&self) -> ApplyDefaults {
        ApplyDefaults {
            field_manager: self.field_manager.clone(),
            force_conflicts: self.force_conflicts,
        }
    }

    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Manage Kubernetes custom resources with server-side apply.")
            .with_attribute(
                "kubeconfig",
                Attribute::optional_string().with_description("Path to a kubeconfig file."),
            )
            .with_attribute(
                "context",
                Attribute::optional_string().with_description("Kubeconfig context to use."),
            )
            .with_attribute(
                "field_manager",
                Attribute::optional_string()
                    .with_description("Default field manager for server-side apply.")
                    .with_validator(Validator::NotEmpty),
            )
            .with_attribute(
                "force_conflicts",
                Attribute::optional_bool()
                    .with_description("Take ownership of conflicting fields by default."),
            )
    }
}
