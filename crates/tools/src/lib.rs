//! Web tools for the funcall tool loop.
//!
//! `web_search` queries the Bing Web Search API, `open_url` reads one page,
//! `web_click` reads several pages at once. All three are safe to run
//! concurrently.

pub mod web_fetch;
pub mod web_search;

use std::sync::Arc;

use {
    funcall_config::WebConfig,
    funcall_orchestrator::Tool,
    tracing::{info, warn},
};

pub use {
    web_fetch::{OpenUrlTool, PageFetcher, WebClickTool},
    web_search::WebSearchTool,
};

/// Append the enabled web tools to `tools`.
pub fn register_web_tools(tools: &mut Vec<Arc<dyn Tool>>, config: &WebConfig) {
    if let Some(search) = WebSearchTool::from_config(&config.search) {
        tools.push(Arc::new(search));
    }

    if config.fetch.enabled {
        match PageFetcher::from_config(&config.fetch) {
            Ok(fetcher) => {
                let fetcher = Arc::new(fetcher);
                tools.push(Arc::new(OpenUrlTool::new(Arc::clone(&fetcher))));
                tools.push(Arc::new(WebClickTool::new(fetcher)));
            },
            Err(e) => warn!(error = %e, "page fetch tools disabled"),
        }
    }

    info!(
        tools = ?tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
        "web tools registered"
    );
}
