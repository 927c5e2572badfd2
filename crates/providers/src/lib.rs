//! Chat providers for the tool loop.

pub mod openai;
pub mod openai_compat;

use std::sync::Arc;

use {
    funcall_config::ProviderConfig,
    funcall_orchestrator::ChatProvider,
};

pub use openai::OpenAiCompatProvider;

/// Shared HTTP client for providers built without custom timeouts.
///
/// Reusing one client shares connection pools, DNS cache and TLS sessions.
pub fn shared_http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::LazyLock<reqwest::Client> =
        std::sync::LazyLock::new(reqwest::Client::new);
    &CLIENT
}

/// Build the configured provider.
pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Arc<dyn ChatProvider>> {
    let provider = OpenAiCompatProvider::from_config(config)?;
    tracing::info!(
        provider = provider.name(),
        model = provider.id(),
        base_url = %config.base_url,
        "chat provider ready"
    );
    Ok(Arc::new(provider))
}
