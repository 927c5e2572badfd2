/// Config schema types (provider, orchestrator, tools).
use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FuncallConfig {
    pub provider: ProviderConfig,
    pub orchestrator: OrchestratorConfig,
    pub tools: ToolsConfig,
}

impl FuncallConfig {
    /// Copy of the config with every secret replaced by a placeholder, for
    /// display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        redact(&mut cfg.provider.api_key);
        redact(&mut cfg.tools.web.search.api_key);
        cfg
    }
}

fn redact(secret: &mut Option<Secret<String>>) {
    if secret.is_some() {
        *secret = Some(Secret::new(REDACTED.to_string()));
    }
}

const REDACTED: &str = "********";

/// OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
    pub model: String,
    /// HTTP request timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            timeout_secs: 120,
            temperature: None,
        }
    }
}

/// What happens when a tool handler returns an error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    /// The error text becomes the tool's result and the conversation goes on.
    #[default]
    Report,
    /// The first error ends the run; sibling calls still in flight are
    /// cancelled.
    Abort,
}

/// Tool-loop behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Role tag for out-of-band status events emitted by tools.
    pub tip_role: String,
    /// Maximum provider calls per run (0 falls back to the default).
    pub max_turns: usize,
    /// Capacity of the per-turn relay queue.
    pub relay_buffer: usize,
    /// Capacity of the caller-visible output queue.
    pub output_buffer: usize,
    pub handler_errors: HandlerErrorPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tip_role: "tip".into(),
            max_turns: 25,
            relay_buffer: 100,
            output_buffer: 100,
            handler_errors: HandlerErrorPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub web: WebConfig,
}

/// Web tools configuration (search, fetch).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub search: WebSearchConfig,
    pub fetch: WebFetchConfig,
}

/// Web search tool configuration (Bing Web Search v7 API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Subscription key sent as `Ocp-Apim-Subscription-Key`.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
    /// Number of results requested per query.
    pub count: u8,
    /// Market code, e.g. "en-US".
    pub market: Option<String>,
    /// "Off", "Moderate" or "Strict".
    pub safe_search: String,
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.bing.microsoft.com/v7.0/search".into(),
            api_key: None,
            count: 8,
            market: None,
            safe_search: "Strict".into(),
            timeout_secs: 30,
        }
    }
}

/// Page fetch tools configuration (`open_url`, `web_click`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebFetchConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    /// Maximum characters returned per page.
    pub max_chars: usize,
    pub accept_language: Option<String>,
    /// Optional HTTP(S) proxy URL for page fetches.
    pub proxy: Option<String>,
}

impl Default for WebFetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            max_chars: 50_000,
            accept_language: None,
            proxy: None,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
