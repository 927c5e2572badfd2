use {
    anyhow::Result,
    async_trait::async_trait,
    std::{collections::HashMap, future::Future, sync::Arc},
    tokio_util::sync::CancellationToken,
};

use crate::{args::Args, output::EventSink};

/// Execution context handed to a tool handler for one call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub tool_name: String,
    /// Opaque caller-supplied session tag, passed through untouched.
    pub session_id: Option<String>,
    /// Cancelled when the caller abandons the run.
    pub cancel: CancellationToken,
}

/// Model-callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Whether calls to this tool may run in parallel with the other calls of
    /// the same batch. One unsafe tool makes its whole batch sequential.
    fn is_concurrency_safe(&self) -> bool {
        false
    }

    /// Run the tool. An `Err` is reported to the model as the call's result
    /// text, not raised as a run failure.
    async fn call(&self, ctx: ToolContext, args: Args, sink: EventSink) -> Result<String>;
}

/// A [`Tool`] backed by an async closure.
pub struct FnTool<F> {
    name: String,
    description: String,
    schema: serde_json::Value,
    concurrent: bool,
    handler: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(ToolContext, Args, EventSink) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schema: serde_json::json!({ "type": "object", "properties": {} }),
            concurrent: false,
            handler,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = schema;
        self
    }

    #[must_use]
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(ToolContext, Args, EventSink) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn is_concurrency_safe(&self) -> bool {
        self.concurrent
    }

    async fn call(&self, ctx: ToolContext, args: Args, sink: EventSink) -> Result<String> {
        (self.handler)(ctx, args, sink).await
    }
}

/// Registry of the tools available to one run.
///
/// Keyed by name: registering a second tool under an existing name replaces
/// the first. Schemas are listed in first-registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// `Some(flag)` for registered tools, `None` for unknown names.
    pub fn is_concurrency_safe(&self, name: &str) -> Option<bool> {
        self.tools.get(name).map(|t| t.is_concurrency_safe())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list_schemas(&self) -> Vec<serde_json::Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }
}
