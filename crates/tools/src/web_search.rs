use std::time::Duration;

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use {
    funcall_config::WebSearchConfig,
    funcall_orchestrator::{Args, EventSink, Tool, ToolContext},
};

/// Web search tool backed by the Bing Web Search v7 API.
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
    api_key: Secret<String>,
    count: u8,
    market: Option<String>,
    safe_search: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "webPages")]
    web_pages: Option<WebPages>,
}

#[derive(Debug, Deserialize)]
struct WebPages {
    #[serde(default)]
    value: Vec<WebPage>,
}

#[derive(Debug, Deserialize)]
struct WebPage {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

/// One hit as handed back to the model.
#[derive(Debug, Serialize, PartialEq)]
struct SearchHit {
    name: String,
    url: String,
}

impl WebSearchTool {
    /// Build from config. Returns `None` when search is disabled or no
    /// subscription key is available.
    pub fn from_config(config: &WebSearchConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let Some(api_key) = config
            .api_key
            .as_ref()
            .filter(|k| !k.expose_secret().trim().is_empty())
        else {
            warn!("web_search enabled but no api_key configured; tool not registered");
            return None;
        };
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "web_search: failed to build HTTP client");
                return None;
            },
        };
        Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.clone(),
            count: config.count,
            market: config.market.clone().filter(|m| !m.is_empty()),
            safe_search: config.safe_search.clone(),
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let mut params = vec![
            ("q", query.to_string()),
            ("count", self.count.to_string()),
            ("safeSearch", self.safe_search.clone()),
        ];
        if let Some(market) = &self.market {
            params.push(("mkt", market.clone()));
        }

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .header("Accept", "application/json")
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("search API returned {status}: {body}");
        }

        let body_text = resp
            .text()
            .await
            .map_err(|error| anyhow::anyhow!("failed to read search response body: {error}"))?;
        let body: SearchResponse = serde_json::from_str(&body_text).map_err(|error| {
            let snippet: String = body_text.chars().take(400).collect();
            anyhow::anyhow!("failed to parse search JSON body: {error}; body starts with: {snippet}")
        })?;

        let hits: Vec<SearchHit> = body
            .web_pages
            .map(|p| p.value)
            .unwrap_or_default()
            .into_iter()
            .map(|page| SearchHit {
                name: page.name,
                url: page.url,
            })
            .collect();
        debug!(query, hits = hits.len(), "web search finished");
        Ok(hits)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a list of results with page titles and URLs. \
         Use open_url or web_click to read the pages themselves."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    fn is_concurrency_safe(&self) -> bool {
        true
    }

    async fn call(&self, _ctx: ToolContext, args: Args, sink: EventSink) -> Result<String> {
        let query = args
            .get_str("query")
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing 'query' parameter"))?;
        sink.tip(format!("Searching: {query}")).await;

        let hits = self.search(query).await?;
        Ok(serde_json::to_string(&hits)?)
    }
}
