//! Semantic checks on a loaded configuration.

use std::path::{Path, PathBuf};

use crate::{loader, schema::FuncallConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "orchestrator.tip_role"
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Load and check the config at `path`, or the discovered one when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(loader::find_config_file);

    let Some(actual_path) = config_path else {
        let mut result = validate_config(&loader::discover_and_load());
        result.push(Severity::Info, "", "no config file found; using defaults");
        return result;
    };

    match loader::load_config(&actual_path) {
        Ok(config) => {
            let mut result = validate_config(&config);
            result.config_path = Some(actual_path);
            result
        },
        Err(e) => {
            let mut result = ValidationResult {
                config_path: Some(actual_path),
                ..Default::default()
            };
            result.push(Severity::Error, "", e.to_string());
            result
        },
    }
}

/// Check an already-parsed config.
#[must_use]
pub fn validate_config(config: &FuncallConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    let orch = &config.orchestrator;
    let tip_role = orch.tip_role.trim();
    if tip_role.is_empty() {
        result.push(
            Severity::Error,
            "orchestrator.tip_role",
            "tip role must not be empty",
        );
    } else if ["system", "user", "assistant", "tool"].contains(&tip_role) {
        result.push(
            Severity::Error,
            "orchestrator.tip_role",
            format!("tip role \"{tip_role}\" collides with a conversation role"),
        );
    }
    if orch.max_turns == 0 {
        result.push(
            Severity::Warning,
            "orchestrator.max_turns",
            "max_turns is 0; the default limit will be used",
        );
    }
    for (path, value) in [
        ("orchestrator.relay_buffer", orch.relay_buffer),
        ("orchestrator.output_buffer", orch.output_buffer),
    ] {
        if value == 0 {
            result.push(Severity::Warning, path, "buffer size 0 is raised to 1");
        }
    }

    let provider = &config.provider;
    match url::Url::parse(&provider.base_url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {},
        Ok(u) => result.push(
            Severity::Error,
            "provider.base_url",
            format!("unsupported URL scheme \"{}\"", u.scheme()),
        ),
        Err(e) => result.push(
            Severity::Error,
            "provider.base_url",
            format!("invalid URL: {e}"),
        ),
    }
    if provider.model.trim().is_empty() {
        result.push(Severity::Error, "provider.model", "model must not be empty");
    }
    if provider.api_key.is_none() {
        result.push(
            Severity::Warning,
            "provider.api_key",
            "no API key configured (set provider.api_key or FUNCALL_API_KEY)",
        );
    }

    let web = &config.tools.web;
    if web.search.enabled && web.search.api_key.is_none() {
        result.push(
            Severity::Warning,
            "tools.web.search.api_key",
            "web search is enabled but has no API key; the tool will not be registered",
        );
    }
    if web.fetch.enabled && web.fetch.max_chars == 0 {
        result.push(
            Severity::Error,
            "tools.web.fetch.max_chars",
            "max_chars must be greater than 0",
        );
    }

    result
}
