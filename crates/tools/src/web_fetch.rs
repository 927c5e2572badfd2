//! Page fetching tools: `open_url` reads one page, `web_click` reads several
//! at once.

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    futures::future::{BoxFuture, FutureExt},
    regex::Regex,
    serde::Serialize,
    tracing::{debug, warn},
    url::Url,
};

use {
    funcall_config::WebFetchConfig,
    funcall_orchestrator::{Args, EventSink, Tool, ToolContext},
};

#[allow(clippy::expect_used)]
static NEWLINE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n+").expect("newline pattern compiles"));
#[allow(clippy::expect_used)]
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("blank pattern compiles"));

/// Fetches pages and reduces them to plain text.
///
/// With a proxy configured, every page is requested directly and through the
/// proxy at the same time; the first successful response wins.
pub struct PageFetcher {
    clients: Vec<reqwest::Client>,
    max_chars: usize,
    accept_language: Option<String>,
}

impl PageFetcher {
    pub fn from_config(config: &WebFetchConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut clients = vec![
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .context("failed to build HTTP client")?,
        ];
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy).context("invalid fetch proxy URL")?;
            clients.push(
                reqwest::Client::builder()
                    .timeout(timeout)
                    .proxy(proxy)
                    .build()
                    .context("failed to build proxied HTTP client")?,
            );
        }
        Ok(Self {
            clients,
            max_chars: config.max_chars,
            accept_language: config.accept_language.clone(),
        })
    }

    /// Fetch `url` and return its readable text.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        let url = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
        match url.scheme() {
            "http" | "https" => {},
            s => bail!("unsupported URL scheme: {s}"),
        }

        let attempts: Vec<BoxFuture<'_, Result<String>>> = self
            .clients
            .iter()
            .map(|client| self.fetch_with(client, url.clone()).boxed())
            .collect();
        let (body, _) = futures::future::select_ok(attempts).await?;

        let text = normalize_whitespace(&html_to_text(&body));
        Ok(truncate_chars(&text, self.max_chars))
    }

    async fn fetch_with(&self, client: &reqwest::Client, url: Url) -> Result<String> {
        debug!(url = %url, "fetching page");
        let mut req = client.get(url.as_str());
        if let Some(lang) = &self.accept_language {
            req = req.header("Accept-Language", lang);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {status} from {url}");
        }
        Ok(resp.text().await?)
    }
}

/// Strip tags, drop script/style bodies and decode the common entities.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let lower = html.to_ascii_lowercase();
    let mut skip_until: Option<&str> = None;
    let mut rest = 0;

    while rest < html.len() {
        let tail = &html[rest..];
        let lower_tail = &lower[rest..];

        if let Some(close) = skip_until {
            match lower_tail.find(close) {
                Some(pos) => {
                    rest += pos + close.len();
                    skip_until = None;
                },
                None => break,
            }
            continue;
        }

        if tail.starts_with('<') {
            if lower_tail.starts_with("<script") {
                skip_until = Some("</script>");
            } else if lower_tail.starts_with("<style") {
                skip_until = Some("</style>");
            } else if ["<br", "<p", "</p", "<div", "</div", "<li", "<h", "</h", "<tr"]
                .iter()
                .any(|t| lower_tail.starts_with(t))
            {
                out.push('\n');
            }
            match tail.find('>') {
                Some(end) => rest += end + 1,
                None => break,
            }
            continue;
        }

        if tail.starts_with('&')
            && let Some(semi) = tail.bytes().take(10).position(|b| b == b';')
        {
            let decoded = match &tail[..=semi] {
                "&amp;" => Some("&"),
                "&lt;" => Some("<"),
                "&gt;" => Some(">"),
                "&quot;" => Some("\""),
                "&apos;" | "&#39;" => Some("'"),
                "&nbsp;" | "&#160;" => Some(" "),
                _ => None,
            };
            if let Some(decoded) = decoded {
                out.push_str(decoded);
                rest += semi + 1;
                continue;
            }
        }

        let Some(ch) = tail.chars().next() else {
            break;
        };
        out.push(ch);
        rest += ch.len_utf8();
    }

    out
}

/// Collapse newline runs to one newline and space/tab runs to one space, then
/// trim.
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = NEWLINE_RUNS.replace_all(&text, "\n");
    let text = BLANK_RUNS.replace_all(&text, " ");
    text.trim().to_string()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}

// ── open_url ────────────────────────────────────────────────────────────────

pub struct OpenUrlTool {
    fetcher: Arc<PageFetcher>,
}

impl OpenUrlTool {
    pub fn new(fetcher: Arc<PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for OpenUrlTool {
    fn name(&self) -> &str {
        "open_url"
    }

    fn description(&self) -> &str {
        "Open a web page directly and return its text content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Full URL of the page to open (http or https)"
                }
            },
            "required": ["url"]
        })
    }

    fn is_concurrency_safe(&self) -> bool {
        true
    }

    async fn call(&self, _ctx: ToolContext, args: Args, sink: EventSink) -> Result<String> {
        let url = args
            .get_str("url")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing 'url' parameter"))?;
        sink.tip(format!("Opening: {url}")).await;
        self.fetcher.fetch(url).await
    }
}

// ── web_click ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ClickResult {
    url: String,
    content: String,
}

pub struct WebClickTool {
    fetcher: Arc<PageFetcher>,
}

impl WebClickTool {
    pub fn new(fetcher: Arc<PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for WebClickTool {
    fn name(&self) -> &str {
        "web_click"
    }

    fn description(&self) -> &str {
        "Open several web pages at once, e.g. the most promising search results, \
         and return the text of each page that loaded."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "urls": {
                    "type": "array",
                    "description": "URLs of the pages to read in more detail",
                    "items": { "type": "string", "description": "Page URL" }
                }
            },
            "required": ["urls"]
        })
    }

    fn is_concurrency_safe(&self) -> bool {
        true
    }

    async fn call(&self, _ctx: ToolContext, args: Args, sink: EventSink) -> Result<String> {
        let urls = args.get_strings("urls");
        if urls.is_empty() {
            bail!("missing 'urls' parameter");
        }
        for url in &urls {
            sink.tip(format!("Opening: {url}")).await;
        }

        let pages = futures::future::join_all(urls.iter().map(|url| self.fetcher.fetch(url))).await;
        let results: Vec<ClickResult> = urls
            .into_iter()
            .zip(pages)
            .filter_map(|(url, page)| match page {
                Ok(content) => Some(ClickResult { url, content }),
                Err(e) => {
                    warn!(url = %url, error = %e, "web_click: page failed to load");
                    None
                },
            })
            .collect();

        Ok(serde_json::to_string(&results)?)
    }
}
