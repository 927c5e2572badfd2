use std::{io::Write, path::Path, sync::Arc};

use {
    anyhow::Result,
    clap::Args,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {
    funcall_orchestrator::{ChatMessage, ChatRequest, RunOptions, Tool, ToolRegistry, run_tool_loop},
    funcall_tools::register_web_tools,
};

#[derive(Args)]
pub struct ChatArgs {
    /// The user message.
    #[arg(short, long)]
    message: String,
    /// Optional system prompt sent before the message.
    #[arg(long)]
    system: Option<String>,
    /// Session tag attached to logs and tool contexts.
    #[arg(long)]
    session: Option<String>,
    /// Model override for this run.
    #[arg(long)]
    model: Option<String>,
    /// Do not offer any tools to the model.
    #[arg(long, default_value_t = false)]
    no_tools: bool,
}

pub async fn handle_chat(config_path: Option<&Path>, args: ChatArgs) -> Result<()> {
    let config = funcall_config::load_or_discover(config_path)?;
    let provider = funcall_providers::from_config(&config.provider)?;

    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    if !args.no_tools {
        register_web_tools(&mut tools, &config.tools.web);
    }
    let registry = ToolRegistry::from_tools(tools);

    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(args.message));
    let mut request = ChatRequest::new(
        args.model.unwrap_or_else(|| config.provider.model.clone()),
        messages,
    );
    request.temperature = config.provider.temperature;

    let cancel = CancellationToken::new();
    let mut options = RunOptions::from_config(&config.orchestrator).with_cancel(cancel.clone());
    if let Some(session) = args.session {
        options = options.with_session_id(session);
    }

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling run");
            cancel.cancel();
        }
    });

    let mut rx = run_tool_loop(provider, request, registry, options).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        if event.is_assistant() {
            print!("{}", event.content);
            stdout.flush()?;
        } else {
            eprint!("{}", event.content);
        }
    }
    println!();
    ctrl_c.abort();

    info!(messages = rx.transcript().await.len(), "chat finished");
    Ok(())
}
