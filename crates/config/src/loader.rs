use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    thiserror::Error,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::FuncallConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "funcall.toml",
    "funcall.yaml",
    "funcall.yml",
    "funcall.json",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config format: .{0}")]
    UnsupportedFormat(String),
}

/// Load config from the given path (any supported format), applying env
/// substitution and env overrides.
pub fn load_config(path: &Path) -> Result<FuncallConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./funcall.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/funcall/funcall.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults (plus env overrides) when nothing is found or the
/// file fails to load.
pub fn discover_and_load() -> FuncallConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = FuncallConfig::default();
    apply_env_overrides(&mut config);
    config
}

/// Load `explicit` when given (errors propagate), otherwise discover.
pub fn load_or_discover(explicit: Option<&Path>) -> Result<FuncallConfig, ConfigError> {
    match explicit {
        Some(path) => load_config(path),
        None => Ok(discover_and_load()),
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/funcall/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "funcall").map(|d| d.config_dir().to_path_buf())
}

/// Override provider settings from `FUNCALL_API_KEY`, `FUNCALL_BASE_URL` and
/// `FUNCALL_MODEL`.
pub fn apply_env_overrides(config: &mut FuncallConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut FuncallConfig, lookup: impl Fn(&str) -> Option<String>) {
    let lookup = |name: &str| lookup(name).filter(|v| !v.is_empty());
    if let Some(key) = lookup("FUNCALL_API_KEY") {
        config.provider.api_key = Some(Secret::new(key));
    }
    if let Some(url) = lookup("FUNCALL_BASE_URL") {
        config.provider.base_url = url;
    }
    if let Some(model) = lookup("FUNCALL_MODEL") {
        config.provider.model = model;
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<FuncallConfig, ConfigError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}
