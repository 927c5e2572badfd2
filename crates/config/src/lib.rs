//! Configuration loading, validation and env substitution.
//!
//! Config files: `funcall.toml`, `funcall.yaml`, `funcall.yml` or `funcall.json`,
//! searched in `./` then `~/.config/funcall/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        ConfigError, apply_env_overrides, config_dir, discover_and_load, find_config_file,
        load_config, load_or_discover,
    },
    schema::{
        FuncallConfig, HandlerErrorPolicy, OrchestratorConfig, ProviderConfig, ToolsConfig,
        WebConfig, WebFetchConfig, WebSearchConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
