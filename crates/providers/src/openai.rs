use std::time::Duration;

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    futures::StreamExt,
    secrecy::{ExposeSecret, Secret},
    tokio_util::sync::CancellationToken,
    tracing::{debug, trace, warn},
};

use {
    funcall_config::ProviderConfig,
    funcall_orchestrator::{ChatProvider, ChatRequest, ChunkStream},
};

use crate::openai_compat::{SseLineResult, process_openai_sse_line, sse_data, to_openai_tools};

/// Streaming provider for any endpoint speaking the OpenAI Chat Completions
/// protocol (OpenAI, Azure-style gateways, vLLM, Ollama, ...).
pub struct OpenAiCompatProvider {
    api_key: Secret<String>,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: Secret<String>, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: None,
            client: crate::shared_http_client().clone(),
        }
    }

    /// Build from the `[provider]` config section.
    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let Some(api_key) = config.api_key.clone() else {
            bail!("no API key configured (set provider.api_key or FUNCALL_API_KEY)");
        };
        let mut builder = reqwest::Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client,
        })
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let model = if request.model.is_empty() {
            &self.model
        } else {
            &request.model
        };
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| m.to_openai_value())
            .collect();
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });
        if !request.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(to_openai_tools(&request.tools));
        }
        if let Some(temperature) = request.temperature.or(self.temperature) {
            body["temperature"] = serde_json::json!(temperature);
        }
        body
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn id(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        let body = self.request_body(&request);
        debug!(
            model = %body["model"],
            messages_count = request.messages.len(),
            tools_count = request.tools.len(),
            "openai-compat stream request"
        );
        trace!(body = %body, "openai-compat stream request body");

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let resp = tokio::select! {
            biased;
            () = cancel.cancelled() => bail!("request cancelled"),
            resp = send => resp.context("chat completions request failed")?,
        };

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat completions request rejected");
            bail!("HTTP {}: {}", status.as_u16(), body_text.trim());
        }

        let mut byte_stream = resp.bytes_stream();
        Ok(Box::pin(async_stream::stream! {
            // Bytes, not text: a read can end inside a multi-byte character.
            let mut buf: Vec<u8> = Vec::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context("stream read failed"));
                        return;
                    },
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim();

                    let Some(data) = sse_data(line) else {
                        continue;
                    };
                    match process_openai_sse_line(data) {
                        SseLineResult::Done => return,
                        SseLineResult::Chunk(chunk) => yield Ok(chunk),
                        SseLineResult::Skip => {},
                    }
                }
            }

            // Some servers close without `[DONE]` or a trailing newline.
            let line = String::from_utf8_lossy(&buf);
            if let Some(data) = sse_data(line.trim())
                && let SseLineResult::Chunk(chunk) = process_openai_sse_line(data)
            {
                yield Ok(chunk);
            }
        }))
    }
}
