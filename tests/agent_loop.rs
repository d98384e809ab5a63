//! Agent loop integration tests against a scripted provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use anvil_cli::core::agent::{
    Agent, AgentError, ChatEvent, CompletionEvent, CompletionRequest, CompletionStream,
    ConfirmationResponse, Confirmer, ContentBlock, LlmProvider, SafetyPolicy, StopReason,
};
use anvil_cli::core::tools::{Sandbox, builtin_registry};

/// Provider that replays scripted turns; when the script runs dry it repeats
/// the fallback turn forever (a model stuck on the same call).
struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<CompletionEvent>>>,
    fallback: Option<Vec<CompletionEvent>>,
}

impl ScriptedProvider {
    fn new(turns: Vec<Vec<CompletionEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            fallback: None,
        }
    }

    fn repeating(turn: Vec<CompletionEvent>) -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            fallback: Some(turn),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<CompletionStream, AgentError> {
        let events = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .expect("script ran out of turns");

        Ok(Box::pin(tokio_stream::iter(
            events.into_iter().map(Ok::<_, AgentError>),
        )))
    }
}

/// A turn where the model answers in plain text.
fn text_turn(text: &str) -> Vec<CompletionEvent> {
    vec![
        CompletionEvent::TextDelta(text.to_string()),
        CompletionEvent::ContentBlockDone {
            index: 0,
            block: ContentBlock::Text {
                text: text.to_string(),
            },
        },
        CompletionEvent::Done {
            stop_reason: Some(StopReason::EndTurn),
            usage: None,
        },
    ]
}

/// A turn where the model requests the given tool calls.
fn tool_turn(calls: &[(&str, &str, serde_json::Value)]) -> Vec<CompletionEvent> {
    let mut events = Vec::new();
    for (i, (id, name, args)) in calls.iter().enumerate() {
        let index = i + 1;
        events.push(CompletionEvent::ToolUseStart {
            index,
            id: (*id).to_string(),
            name: (*name).to_string(),
        });
        events.push(CompletionEvent::ContentBlockDone {
            index,
            block: ContentBlock::ToolUse {
                id: (*id).to_string(),
                name: (*name).to_string(),
                input: args.clone(),
            },
        });
    }
    events.push(CompletionEvent::Done {
        stop_reason: Some(StopReason::ToolUse),
        usage: None,
    });
    events
}

struct Fixture {
    agent: Agent,
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
}

fn fixture(provider: ScriptedProvider, yolo: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(Sandbox::new(dir.path(), Duration::from_secs(5), 200).unwrap());
    let root = sandbox.root().to_path_buf();
    let registry = builtin_registry(&sandbox).unwrap();
    let policy = SafetyPolicy::new(yolo);

    let agent = Agent::new(Box::new(provider), "test-model", 1024, registry, policy);
    Fixture {
        agent,
        _dir: dir,
        root,
    }
}

/// Collect tool events while running one chat turn.
async fn chat(agent: &mut Agent, message: &str) -> (Result<String, AgentError>, Vec<ChatEvent>) {
    let mut events = Vec::new();
    let result = agent
        .chat_with_events(message, |event| events.push(event))
        .await;
    (result, events)
}

fn tool_results(events: &[ChatEvent]) -> Vec<(String, String, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::ToolCall {
                name,
                output,
                is_error,
                ..
            } => Some((name.clone(), output.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn plain_answer_ends_the_loop() {
    let provider = ScriptedProvider::new(vec![text_turn("All done.")]);
    let mut fx = fixture(provider, false);

    let (result, events) = chat(&mut fx.agent, "hello").await;
    assert_eq!(result.unwrap(), "All done.");
    assert!(tool_results(&events).is_empty());
}

#[tokio::test]
async fn tool_call_result_feeds_back_into_next_turn() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[(
            "call_1",
            "create_directory",
            serde_json::json!({"path": "out"}),
        )]),
        text_turn("created"),
    ]);
    let mut fx = fixture(provider, false);

    let (result, events) = chat(&mut fx.agent, "make a dir").await;
    assert_eq!(result.unwrap(), "created");
    assert!(fx.root.join("out").is_dir());

    let results = tool_results(&events);
    assert_eq!(results.len(), 1);
    assert!(!results[0].2);
}

#[tokio::test]
async fn later_calls_run_after_an_earlier_failure() {
    // A fails (missing file), B must still execute; results stay in call order.
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[
            ("call_a", "read_file", serde_json::json!({"path": "missing.txt"})),
            ("call_b", "create_directory", serde_json::json!({"path": "made"})),
        ]),
        text_turn("recovered"),
    ]);
    let mut fx = fixture(provider, false);

    let (result, events) = chat(&mut fx.agent, "go").await;
    assert_eq!(result.unwrap(), "recovered");

    let results = tool_results(&events);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "read_file");
    assert!(results[0].2, "first call should fail");
    assert_eq!(results[1].0, "create_directory");
    assert!(!results[1].2, "second call should still run");
    assert!(fx.root.join("made").is_dir());
}

#[tokio::test]
async fn turn_limit_stops_a_looping_model() {
    let provider = ScriptedProvider::repeating(tool_turn(&[(
        "call_1",
        "list_directory",
        serde_json::json!({"path": "."}),
    )]));
    let mut fx = fixture(provider, false);
    fx.agent = fx.agent.with_max_turns(3);

    let (result, events) = chat(&mut fx.agent, "loop forever").await;
    match result {
        Err(AgentError::TurnLimitExceeded(limit)) => assert_eq!(limit, 3),
        other => panic!("expected turn limit error, got {other:?}"),
    }

    // Exactly the configured number of dispatches ran, no more.
    assert_eq!(tool_results(&events).len(), 3);
}

#[tokio::test]
async fn schema_violation_is_reported_not_fatal() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[("call_1", "read_file", serde_json::json!({}))]),
        text_turn("adjusted"),
    ]);
    let mut fx = fixture(provider, false);

    let (result, events) = chat(&mut fx.agent, "read").await;
    assert_eq!(result.unwrap(), "adjusted");

    let results = tool_results(&events);
    assert!(results[0].2);
    assert!(results[0].1.contains("missing required field `path`"));
}

#[tokio::test]
async fn unknown_tool_is_reported_not_fatal() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[("call_1", "launch_rockets", serde_json::json!({}))]),
        text_turn("sorry"),
    ]);
    let mut fx = fixture(provider, false);

    let (result, events) = chat(&mut fx.agent, "go").await;
    assert_eq!(result.unwrap(), "sorry");

    let results = tool_results(&events);
    assert!(results[0].2);
    assert!(results[0].1.contains("unknown tool"));
}

#[tokio::test]
async fn blocked_command_never_runs_even_in_yolo_mode() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[(
            "call_1",
            "run_command",
            serde_json::json!({"command": "rm -rf / && echo done > proof.txt"}),
        )]),
        text_turn("refused"),
    ]);
    let mut fx = fixture(provider, true);

    let (result, events) = chat(&mut fx.agent, "wipe it").await;
    assert_eq!(result.unwrap(), "refused");

    let results = tool_results(&events);
    assert!(results[0].2);
    assert!(results[0].1.contains("blocked by safety policy"));
    assert!(!fx.root.join("proof.txt").exists());
}

#[tokio::test]
async fn declined_confirmation_leaves_no_side_effect() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[(
            "call_1",
            "write_file",
            serde_json::json!({"path": "secret.txt", "content": "x"}),
        )]),
        text_turn("understood"),
    ]);
    let mut fx = fixture(provider, false);

    let (confirmer, mut rx) = Confirmer::new();
    fx.agent.set_confirmer(confirmer);

    // Simulated user always says no.
    let responder = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let _ = request.response_tx.send(ConfirmationResponse::Deny);
        }
    });

    let (result, events) = chat(&mut fx.agent, "write the file").await;
    assert_eq!(result.unwrap(), "understood");

    let results = tool_results(&events);
    assert!(results[0].2);
    assert!(results[0].1.contains("declined"));
    assert!(!fx.root.join("secret.txt").exists());
    responder.abort();
}

#[tokio::test]
async fn approved_confirmation_executes_the_tool() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[(
            "call_1",
            "write_file",
            serde_json::json!({"path": "ok.txt", "content": "yes"}),
        )]),
        text_turn("written"),
    ]);
    let mut fx = fixture(provider, false);

    let (confirmer, mut rx) = Confirmer::new();
    fx.agent.set_confirmer(confirmer);

    let responder = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            // The prompt must state the concrete effect.
            assert!(request.detail.contains("ok.txt"), "detail: {}", request.detail);
            let _ = request.response_tx.send(ConfirmationResponse::Allow);
        }
    });

    let (result, _events) = chat(&mut fx.agent, "write it").await;
    assert_eq!(result.unwrap(), "written");
    assert_eq!(
        std::fs::read_to_string(fx.root.join("ok.txt")).unwrap(),
        "yes"
    );
    responder.abort();
}

#[tokio::test]
async fn no_confirmer_means_destructive_calls_are_declined() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(&[(
            "call_1",
            "delete_file",
            serde_json::json!({"path": "keep.txt"}),
        )]),
        text_turn("kept"),
    ]);
    let mut fx = fixture(provider, false);
    std::fs::write(fx.root.join("keep.txt"), "important").unwrap();

    let (result, events) = chat(&mut fx.agent, "delete it").await;
    assert_eq!(result.unwrap(), "kept");

    let results = tool_results(&events);
    assert!(results[0].2);
    assert!(fx.root.join("keep.txt").exists());
}

#[tokio::test]
async fn cancelled_turn_stops_before_the_next_tool_call() {
    let provider = ScriptedProvider::new(vec![tool_turn(&[(
        "call_1",
        "list_directory",
        serde_json::json!({"path": "."}),
    )])]);
    let mut fx = fixture(provider, false);

    // Cancel before the turn starts dispatching: chat resets the token, so
    // flip it from the event callback once streaming has begun.
    let cancel = fx.agent.cancel_token();
    let result = fx
        .agent
        .chat_with_events("slow task", |_| cancel.cancel())
        .await;

    assert!(matches!(result, Err(AgentError::Cancelled)));
    // The un-started call was still answered so the history stays valid;
    // nothing further to observe from outside.
}
