#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    funcall_orchestrator::{
        Args, ChatChunk, ChatMessage, ChatProvider, ChatReceiver, ChatRequest, ChunkStream, Error,
        EventSink, FnTool, HandlerErrorPolicy, OutputEvent, Role, RunOptions, SequentialIds, Tool,
        ToolCall, ToolContext, ToolRegistry, run_tool_loop,
    },
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
};

// ── Scripted provider ───────────────────────────────────────────────────────

enum Turn {
    Chunks(Vec<anyhow::Result<ChatChunk>>),
    /// Yields the chunks, then never ends.
    Hang(Vec<ChatChunk>),
    FailToStart(&'static str),
    /// Blocks opening the stream until the run is cancelled, then fails the
    /// way an aborted HTTP request does.
    StartUntilCancelled,
}

#[derive(Default)]
struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn id(&self) -> &str {
        "test-model"
    }

    async fn stream(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        self.requests.lock().unwrap().push(request);
        let turn = self.turns.lock().unwrap().pop_front();
        match turn {
            Some(Turn::Chunks(items)) => Ok(Box::pin(futures::stream::iter(items))),
            Some(Turn::Hang(chunks)) => Ok(Box::pin(async_stream::stream! {
                for chunk in chunks {
                    yield Ok::<_, anyhow::Error>(chunk);
                }
                futures::future::pending::<()>().await;
            })),
            Some(Turn::FailToStart(message)) => Err(anyhow::anyhow!(message)),
            Some(Turn::StartUntilCancelled) => {
                cancel.cancelled().await;
                Err(anyhow::anyhow!("request cancelled"))
            },
            None => Err(anyhow::anyhow!("script exhausted")),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn text(s: &str) -> anyhow::Result<ChatChunk> {
    Ok(ChatChunk::text(s))
}

fn call(provider_id: &str, name: &str, args: &str) -> anyhow::Result<ChatChunk> {
    Ok(ChatChunk::tool_call_start(provider_id, name, args))
}

fn args(fragment: &str) -> anyhow::Result<ChatChunk> {
    Ok(ChatChunk::tool_call_args(fragment))
}

fn reply(name: &str, result: &'static str, concurrent: bool) -> Arc<dyn Tool> {
    Arc::new(
        FnTool::new(name, move |_, _, _| async move {
            Ok::<_, anyhow::Error>(result.to_string())
        })
        .concurrent(concurrent),
    )
}

fn sleeper(name: &str, millis: u64) -> Arc<dyn Tool> {
    Arc::new(
        FnTool::new(name, move |_, _, _| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, anyhow::Error>(format!("slept {millis}"))
        })
        .concurrent(true),
    )
}

fn user_request() -> ChatRequest {
    ChatRequest::new("test-model", vec![ChatMessage::user("question")])
}

fn options() -> RunOptions {
    RunOptions::default().with_ids(Arc::new(SequentialIds::default()))
}

async fn start(
    provider: &Arc<ScriptedProvider>,
    tools: Vec<Arc<dyn Tool>>,
    options: RunOptions,
) -> ChatReceiver {
    let provider: Arc<dyn ChatProvider> = Arc::clone(provider) as Arc<dyn ChatProvider>;
    run_tool_loop(
        provider,
        user_request(),
        ToolRegistry::from_tools(tools),
        options,
    )
    .await
    .unwrap()
}

async fn drain(rx: &mut ChatReceiver) -> Vec<OutputEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn tool_messages(request: &ChatRequest) -> Vec<(String, String)> {
    request
        .messages
        .iter()
        .filter_map(|m| match m {
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => Some((tool_call_id.clone(), content.clone())),
            _ => None,
        })
        .collect()
}

// ── Streaming ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn plain_answer_passes_through_unchanged() {
    let provider = ScriptedProvider::new(vec![Turn::Chunks(vec![
        text("Hel"),
        text(""),
        text("lo"),
    ])]);
    let mut rx = start(&provider, vec![reply("f", "x", true)], options()).await;

    assert_eq!(drain(&mut rx).await, vec![
        OutputEvent::assistant("Hel"),
        OutputEvent::assistant("lo"),
    ]);
    assert!(rx.is_finished());
    assert_eq!(rx.recv().await, None);

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0]["name"], "f");
}

#[tokio::test]
async fn registry_replaces_request_tools() {
    let provider = ScriptedProvider::new(vec![Turn::Chunks(vec![text("ok")])]);
    let mut request = user_request();
    request.tools = vec![serde_json::json!({ "name": "stale" })];
    let mut rx = run_tool_loop(
        Arc::clone(&provider) as Arc<dyn ChatProvider>,
        request,
        ToolRegistry::from_tools([reply("fresh", "", true)]),
        options(),
    )
    .await
    .unwrap();
    drain(&mut rx).await;
    assert_eq!(provider.requests()[0].tools[0]["name"], "fresh");
}

#[tokio::test]
async fn mid_stream_failure_becomes_final_content() {
    let provider = ScriptedProvider::new(vec![Turn::Chunks(vec![
        text("partial"),
        Err(anyhow::anyhow!("connection reset")),
    ])]);
    let mut rx = start(&provider, vec![], options()).await;
    assert_eq!(drain(&mut rx).await, vec![
        OutputEvent::assistant("partial"),
        OutputEvent::assistant("connection reset"),
    ]);
}

// ── Continuation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_result_feeds_the_next_turn() {
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "f", "{\"x\":"), args("1}")]),
        Turn::Chunks(vec![text("Answer: 42")]),
    ]);
    let mut rx = start(&provider, vec![reply("f", "42", false)], options()).await;

    assert_eq!(drain(&mut rx).await, vec![OutputEvent::assistant("Answer: 42")]);

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages, vec![
        ChatMessage::user("question"),
        ChatMessage::assistant_with_tools(None, vec![ToolCall::new(
            "call_1",
            "f",
            "{\"x\":1}"
        )]),
        ChatMessage::tool("call_1", "42"),
    ]);
    assert_eq!(requests[1].tools, requests[0].tools);

    // The final plain turn adds nothing to the transcript.
    assert_eq!(rx.transcript().await, requests[1].messages);
}

#[tokio::test]
async fn handler_errors_are_reported_to_the_model() {
    let failing: Arc<dyn Tool> = Arc::new(FnTool::new("lookup", |_, _, _| async {
        Err::<String, _>(anyhow::anyhow!("not found"))
    }));
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "lookup", "{}")]),
        Turn::Chunks(vec![text("sorry")]),
    ]);
    let mut rx = start(&provider, vec![failing], options()).await;

    assert_eq!(drain(&mut rx).await, vec![OutputEvent::assistant("sorry")]);
    assert_eq!(tool_messages(&provider.requests()[1]), vec![(
        "call_1".to_string(),
        "not found".to_string()
    )]);
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "missing", "{}")]),
        Turn::Chunks(vec![text("done")]),
    ]);
    let mut rx = start(&provider, vec![], options()).await;
    drain(&mut rx).await;
    assert_eq!(tool_messages(&provider.requests()[1]), vec![(
        "call_1".to_string(),
        "unknown tool: missing".to_string()
    )]);
}

#[tokio::test]
async fn several_tool_turns_chain() {
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "f", "{}")]),
        Turn::Chunks(vec![text("still working"), call("p2", "f", "{}")]),
        Turn::Chunks(vec![text("done")]),
    ]);
    let mut rx = start(&provider, vec![reply("f", "r", true)], options()).await;

    assert_eq!(drain(&mut rx).await, vec![
        OutputEvent::assistant("still working"),
        OutputEvent::assistant("done"),
    ]);
    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(tool_messages(&requests[2]), vec![
        ("call_1".to_string(), "r".to_string()),
        ("call_2".to_string(), "r".to_string()),
    ]);
}

// ── Batch execution ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_batch_costs_the_slowest_handler() {
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "fast", "{}"), call("p2", "slow", "{}")]),
        Turn::Chunks(vec![text("done")]),
    ]);
    let started = Instant::now();
    let mut rx = start(
        &provider,
        vec![sleeper("fast", 100), sleeper("slow", 300)],
        options(),
    )
    .await;
    drain(&mut rx).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    assert_eq!(tool_messages(&provider.requests()[1]).len(), 2);
}

#[tokio::test]
async fn one_unsafe_tool_serializes_the_batch() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let tracer = |name: &str, millis: u64, concurrent: bool| -> Arc<dyn Tool> {
        let trace = Arc::clone(&trace);
        Arc::new(
            FnTool::new(name, move |ctx: ToolContext, _, _| {
                let trace = Arc::clone(&trace);
                async move {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    trace.lock().unwrap().push(ctx.call_id);
                    Ok::<_, anyhow::Error>(String::new())
                }
            })
            .concurrent(concurrent),
        )
    };
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![
            call("p1", "slow", "{}"),
            call("p2", "fast", "{}"),
            call("p3", "locked", "{}"),
            call("p4", "fast", "{}"),
        ]),
        Turn::Chunks(vec![text("done")]),
    ]);
    let mut rx = start(
        &provider,
        vec![
            tracer("slow", 60, true),
            tracer("fast", 0, true),
            tracer("locked", 10, false),
        ],
        options(),
    )
    .await;
    drain(&mut rx).await;

    assert_eq!(*trace.lock().unwrap(), vec![
        "call_1", "call_2", "call_3", "call_4"
    ]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wide_concurrent_batch_loses_no_results() {
    const N: usize = 32;
    let echo: Arc<dyn Tool> = Arc::new(
        FnTool::new("echo", |ctx: ToolContext, _, _| async move {
            tokio::task::yield_now().await;
            Ok::<_, anyhow::Error>(format!("result for {}", ctx.call_id))
        })
        .concurrent(true),
    );
    let batch = (0..N)
        .map(|i| call(&format!("p{i}"), "echo", "{}"))
        .collect();
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(batch),
        Turn::Chunks(vec![text("done")]),
    ]);
    let mut rx = start(&provider, vec![echo], options()).await;
    drain(&mut rx).await;

    let results = tool_messages(&provider.requests()[1]);
    assert_eq!(results.len(), N);
    let ids: HashSet<_> = results.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(ids.len(), N);
    for (id, content) in &results {
        assert_eq!(content, &format!("result for {id}"));
    }
}

#[tokio::test]
async fn tool_tips_reach_the_caller_under_the_run_role() {
    let searcher: Arc<dyn Tool> = Arc::new(
        FnTool::new("search", |_, args: Args, sink: EventSink| async move {
            let query = args.get_str("q").unwrap_or_default().to_string();
            sink.tip(format!("Searching: {query}\n\n")).await;
            Ok::<_, anyhow::Error>("[]".to_string())
        })
        .concurrent(true),
    );
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "search", r#"{"q":"rust"}"#)]),
        Turn::Chunks(vec![text("nothing found")]),
    ]);
    let mut rx = start(
        &provider,
        vec![searcher],
        options().with_tip_role("status"),
    )
    .await;

    assert_eq!(drain(&mut rx).await, vec![
        OutputEvent {
            role: Role::Custom("status".into()),
            content: "Searching: rust\n".into(),
        },
        OutputEvent::assistant("nothing found"),
    ]);
}

#[tokio::test]
async fn session_tag_reaches_handlers_and_receiver() {
    let seen = Arc::new(Mutex::new(None));
    let recorder: Arc<dyn Tool> = {
        let seen = Arc::clone(&seen);
        Arc::new(FnTool::new("record", move |ctx: ToolContext, _, _| {
            let seen = Arc::clone(&seen);
            async move {
                *seen.lock().unwrap() = ctx.session_id;
                Ok::<_, anyhow::Error>(String::new())
            }
        }))
    };
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "record", "{}")]),
        Turn::Chunks(vec![text("ok")]),
    ]);
    let mut rx = start(&provider, vec![recorder], options().with_session_id("s-42")).await;
    assert_eq!(rx.session_id(), Some("s-42"));
    drain(&mut rx).await;
    assert_eq!(seen.lock().unwrap().as_deref(), Some("s-42"));
}

// ── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_failure_is_returned_synchronously() {
    let provider = ScriptedProvider::new(vec![Turn::FailToStart("401 unauthorized")]);
    let err = run_tool_loop(
        provider as Arc<dyn ChatProvider>,
        user_request(),
        ToolRegistry::new(),
        options(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::ProviderStart(_)));
    assert!(err.to_string().contains("401 unauthorized"));
}

#[tokio::test]
async fn continuation_failure_ends_with_an_error_event() {
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![text("checking"), call("p1", "f", "{}")]),
        Turn::FailToStart("quota exceeded"),
    ]);
    let mut rx = start(&provider, vec![reply("f", "r", true)], options()).await;

    let events = drain(&mut rx).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], OutputEvent::assistant("checking"));
    assert!(events[1].is_assistant());
    assert!(events[1].content.contains("quota exceeded"));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn max_turns_stops_before_dispatching() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter: Arc<dyn Tool> = {
        let invoked = Arc::clone(&invoked);
        Arc::new(FnTool::new("f", move |_, _, _| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, anyhow::Error>(String::new()) }
        }))
    };
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "f", "{}")]),
        Turn::Chunks(vec![call("p2", "f", "{}")]),
        Turn::Chunks(vec![text("never")]),
    ]);
    let mut rx = start(&provider, vec![counter], options().with_max_turns(2)).await;

    assert_eq!(drain(&mut rx).await, vec![OutputEvent::assistant(
        "tool loop exceeded max turns (2)"
    )]);
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    assert_eq!(provider.requests().len(), 2);
}

#[tokio::test]
async fn abort_policy_ends_the_run_on_handler_failure() {
    let failing: Arc<dyn Tool> = Arc::new(FnTool::new("broken", |_, _, _| async {
        Err::<String, _>(anyhow::anyhow!("disk full"))
    }));
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "broken", "{}")]),
        Turn::Chunks(vec![text("never")]),
    ]);
    let mut rx = start(
        &provider,
        vec![failing],
        options().with_handler_errors(HandlerErrorPolicy::Abort),
    )
    .await;

    assert_eq!(drain(&mut rx).await, vec![OutputEvent::assistant(
        "tool broken failed: disk full"
    )]);
    assert_eq!(provider.requests().len(), 1);
}

// ── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelling_mid_stream_closes_the_output() {
    let cancel = CancellationToken::new();
    let provider = ScriptedProvider::new(vec![Turn::Hang(vec![ChatChunk::text("thinking")])]);
    let mut rx = start(&provider, vec![], options().with_cancel(cancel.clone())).await;

    assert_eq!(rx.recv().await, Some(OutputEvent::assistant("thinking")));
    cancel.cancel();
    let end = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap();
    assert_eq!(end, None);
}

#[tokio::test]
async fn cancelling_during_dispatch_records_no_results() {
    let cancel = CancellationToken::new();
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "slow", "{}")]),
        Turn::Chunks(vec![text("never")]),
    ]);
    let mut rx = start(
        &provider,
        vec![sleeper("slow", 10_000)],
        options().with_cancel(cancel.clone()),
    )
    .await;

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let events = tokio::time::timeout(Duration::from_secs(2), drain(&mut rx))
        .await
        .unwrap();
    assert!(events.is_empty());
    assert_eq!(provider.requests().len(), 1);
    let transcript = rx.transcript().await;
    assert!(
        transcript
            .iter()
            .all(|m| !matches!(m, ChatMessage::Tool { .. }))
    );
}

#[tokio::test]
async fn cancelling_while_the_next_turn_starts_is_silent() {
    let cancel = CancellationToken::new();
    let provider = ScriptedProvider::new(vec![
        Turn::Chunks(vec![call("p1", "f", "{}")]),
        Turn::StartUntilCancelled,
    ]);
    let mut rx = start(
        &provider,
        vec![reply("f", "r", true)],
        options().with_cancel(cancel.clone()),
    )
    .await;

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let events = tokio::time::timeout(Duration::from_secs(2), drain(&mut rx))
        .await
        .unwrap();
    assert!(events.is_empty(), "{events:?}");
    assert_eq!(provider.requests().len(), 2);
}

#[tokio::test]
async fn cancelling_before_the_first_turn_starts_reports_cancellation() {
    let cancel = CancellationToken::new();
    let provider = ScriptedProvider::new(vec![Turn::StartUntilCancelled]);
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = run_tool_loop(
        provider as Arc<dyn ChatProvider>,
        user_request(),
        ToolRegistry::new(),
        options().with_cancel(cancel),
    )
    .await
    .unwrap_err();
    assert!(err.is_cancelled(), "{err}");
}

#[tokio::test]
async fn dropping_the_receiver_stops_the_run() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter: Arc<dyn Tool> = {
        let invoked = Arc::clone(&invoked);
        Arc::new(FnTool::new("f", move |_, _, _| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, anyhow::Error>(String::new()) }
        }))
    };
    let provider = ScriptedProvider::new(vec![Turn::Chunks(vec![
        text("a"),
        text("b"),
        call("p1", "f", "{}"),
    ])]);
    let options = RunOptions {
        output_buffer: 1,
        ..options()
    };
    let rx = start(&provider, vec![counter], options).await;
    drop(rx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn dropping_the_receiver_stops_tool_only_turns() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter: Arc<dyn Tool> = {
        let invoked = Arc::clone(&invoked);
        Arc::new(
            FnTool::new("f", move |_, _, _| {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, anyhow::Error>(String::new()) }
            })
            .concurrent(true),
        )
    };
    let turns = (0..10)
        .map(|i| Turn::Chunks(vec![call(&format!("p{i}"), "f", "{}")]))
        .collect();
    let provider = ScriptedProvider::new(turns);

    let rx = start(&provider, vec![counter], options()).await;
    drop(rx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(provider.requests().len(), 1);
}
