//! Agent implementation: the tool-call execution loop.

mod conversation;
mod error;
mod provider;
pub mod providers;
mod registry;
pub mod safety;
mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;

pub use conversation::Conversation;
pub use error::{AgentError, Result};
pub use provider::{CompletionEvent, CompletionRequest, CompletionStream, LlmProvider};
pub use providers::OpenAiProvider;
pub use registry::{ToolHandler, ToolRegistry, ToolSpec};
pub use safety::{
    Authorization, ConfirmationRequest, ConfirmationResponse, Confirmer, SafetyPolicy,
};
pub use types::{
    ChatEvent, Content, ContentBlock, Message, Role, StopReason, Tool, ToolCall, ToolOutcome,
    Usage,
};

/// Default bound on tool-dispatch round-trips per user request.
pub const DEFAULT_MAX_TURNS: usize = 25;

/// Cooperative cancellation flag, observed between streamed chunks and
/// between tool calls. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next suspension point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Re-arm the token for a new turn.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Agent that orchestrates conversation with an LLM and executes its tool
/// calls.
pub struct Agent {
    provider: Box<dyn LlmProvider>,
    conversation: Conversation,
    registry: ToolRegistry,
    policy: SafetyPolicy,
    confirmer: Option<Confirmer>,
    model: String,
    max_tokens: u32,
    max_turns: usize,
    cancel: CancelToken,
}

impl Agent {
    /// Create a new agent.
    pub fn new(
        provider: Box<dyn LlmProvider>,
        model: impl Into<String>,
        max_tokens: u32,
        registry: ToolRegistry,
        policy: SafetyPolicy,
    ) -> Self {
        Self {
            provider,
            conversation: Conversation::new(),
            registry,
            policy,
            confirmer: None,
            model: model.into(),
            max_tokens,
            max_turns: DEFAULT_MAX_TURNS,
            cancel: CancelToken::new(),
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.conversation = Conversation::with_system(system);
        self
    }

    /// Bound the number of tool-dispatch round-trips per user request.
    #[must_use]
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Attach the confirmation front end.
    pub fn set_confirmer(&mut self, confirmer: Confirmer) {
        self.confirmer = Some(confirmer);
    }

    /// Handle for interrupting the current turn.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Get the current model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Trim conversation history to at most `max_messages`.
    pub fn trim_history(&mut self, max_messages: usize) {
        self.conversation.trim(max_messages);
    }

    /// Clear conversation history.
    pub fn clear(&mut self) {
        self.conversation.clear();
    }

    /// Send a message and run the full loop, emitting events for rendering.
    ///
    /// Streams the model response, executes any tool calls in emission order,
    /// feeds results back, and repeats until the model answers in plain text
    /// or the turn limit is hit.
    ///
    /// # Errors
    ///
    /// Returns `Transport`/`Http`/`Api` if the model backend fails,
    /// `TurnLimitExceeded` if the model keeps requesting tools past the
    /// configured bound, and `Cancelled` on user interrupt. Failures of
    /// individual tool calls are not errors here; they are reported to the
    /// model as error tool results.
    pub async fn chat_with_events<F>(&mut self, message: &str, mut on_event: F) -> Result<String>
    where
        F: FnMut(ChatEvent),
    {
        self.cancel.reset();
        self.conversation.add_user_message(message);

        let mut turns = 0_usize;

        loop {
            // No new model request once cancellation has been observed.
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let (content_blocks, stop_reason) = self.stream_response(&mut on_event).await?;

            if !content_blocks.is_empty() {
                self.conversation
                    .add_assistant_blocks(content_blocks.clone());
            }

            if stop_reason == Some(StopReason::ToolUse) {
                turns += 1;
                if turns > self.max_turns {
                    return Err(AgentError::TurnLimitExceeded(self.max_turns));
                }
                self.dispatch_tool_calls(&content_blocks, &mut on_event)
                    .await?;
            } else {
                let text = content_blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("");

                return Ok(text);
            }
        }
    }

    /// Stream one completion, assembling content blocks from deltas.
    async fn stream_response<F>(
        &self,
        on_event: &mut F,
    ) -> Result<(Vec<ContentBlock>, Option<StopReason>)>
    where
        F: FnMut(ChatEvent),
    {
        let request = CompletionRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: self.conversation.messages().to_vec(),
            system: self.conversation.system().map(String::from),
            tools: Some(self.registry.schemas()),
        };

        let stream = self.provider.stream(request).await?;
        futures::pin_mut!(stream);

        let mut content_blocks: Vec<ContentBlock> = Vec::new();
        let mut current_tool_inputs: HashMap<usize, String> = HashMap::new();
        let mut stop_reason = None;

        while let Some(event) = stream.next().await {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let event = event?;

            match event {
                CompletionEvent::TextDelta(text) => {
                    on_event(ChatEvent::Text(text.clone()));
                    if let Some(ContentBlock::Text { text: t }) = content_blocks.last_mut() {
                        t.push_str(&text);
                    } else {
                        content_blocks.push(ContentBlock::Text { text });
                    }
                }
                CompletionEvent::ToolUseStart { index, id, name } => {
                    while content_blocks.len() <= index {
                        content_blocks.push(ContentBlock::Text {
                            text: String::new(),
                        });
                    }
                    content_blocks[index] = ContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::Value::Null,
                    };
                }
                CompletionEvent::ToolInputDelta {
                    index,
                    partial_json,
                } => {
                    current_tool_inputs
                        .entry(index)
                        .or_default()
                        .push_str(&partial_json);
                }
                CompletionEvent::ContentBlockDone { index, block } => {
                    if let Some(ContentBlock::ToolUse { input, .. }) = content_blocks.get_mut(index)
                    {
                        if let Some(json_str) = current_tool_inputs.remove(&index) {
                            *input =
                                serde_json::from_str(&json_str).unwrap_or(serde_json::Value::Null);
                        }
                    }
                    if let ContentBlock::ToolUse {
                        input: event_input, ..
                    } = &block
                    {
                        if let Some(ContentBlock::ToolUse { input, .. }) =
                            content_blocks.get_mut(index)
                        {
                            if input.is_null() {
                                *input = event_input.clone();
                            }
                        }
                    }
                }
                CompletionEvent::Done {
                    stop_reason: sr, ..
                } => {
                    stop_reason = sr;
                }
                CompletionEvent::Error(msg) => {
                    return Err(AgentError::Api {
                        status: 0,
                        message: msg,
                    });
                }
            }
        }

        // Drop placeholder blocks left by sparse tool indices.
        content_blocks.retain(|b| !matches!(b, ContentBlock::Text { text } if text.is_empty()));

        Ok((content_blocks, stop_reason))
    }

    /// Execute the turn's tool calls strictly in emission order.
    ///
    /// A failing call does not stop later calls in the same turn; every call
    /// gets a result message. On cancellation, calls not yet started are
    /// answered with an error result so the history stays valid, then the
    /// turn ends with `Cancelled`.
    async fn dispatch_tool_calls<F>(
        &mut self,
        content_blocks: &[ContentBlock],
        on_event: &mut F,
    ) -> Result<()>
    where
        F: FnMut(ChatEvent),
    {
        let calls: Vec<ToolCall> = content_blocks
            .iter()
            .filter_map(ToolCall::from_block)
            .collect();

        let mut cancelled_at = None;

        for (i, call) in calls.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled_at = Some(i);
                break;
            }

            let invocation = safety::describe_call(call);
            on_event(ChatEvent::ToolStart {
                name: call.name.clone(),
                invocation: invocation.clone(),
            });

            let outcome = self.run_tool(call).await;

            on_event(ChatEvent::ToolCall {
                name: call.name.clone(),
                invocation,
                output: outcome.content.clone(),
                is_error: outcome.is_error,
            });

            self.conversation
                .add_tool_result(outcome.call_id, outcome.content, outcome.is_error);
        }

        if let Some(start) = cancelled_at {
            for call in &calls[start..] {
                self.conversation.add_tool_result(
                    call.id.clone(),
                    "Cancelled before execution.".to_string(),
                    true,
                );
            }
            return Err(AgentError::Cancelled);
        }

        Ok(())
    }

    /// Validate, authorize, and execute a single call.
    ///
    /// Never fails: every failure mode is folded into an error outcome for
    /// the model to react to.
    async fn run_tool(&self, call: &ToolCall) -> ToolOutcome {
        let error_outcome = |e: AgentError| ToolOutcome {
            call_id: call.id.clone(),
            content: e.to_string(),
            is_error: true,
        };

        if let Err(e) = self.registry.validate(&call.name, &call.arguments) {
            tracing::debug!(tool = %call.name, error = %e, "tool call rejected by schema");
            return error_outcome(e);
        }

        match self.policy.authorize(call) {
            Authorization::Blocked(pattern) => {
                tracing::warn!(tool = %call.name, pattern = %pattern, "tool call blocked");
                return error_outcome(AgentError::BlockedCommand(pattern));
            }
            Authorization::NeedsConfirmation => {
                let approved = match &self.confirmer {
                    Some(confirmer) => {
                        confirmer
                            .confirm(&call.name, &safety::describe_call(call))
                            .await
                    }
                    None => false,
                };
                if !approved {
                    return error_outcome(AgentError::ConfirmationDeclined);
                }
            }
            Authorization::Allowed => {}
        }

        let handler = match self.registry.resolve(&call.name) {
            Ok(handler) => handler,
            Err(e) => return error_outcome(e),
        };

        tracing::info!(tool = %call.name, "executing tool");

        match handler.execute(&call.arguments).await {
            Ok(output) => ToolOutcome {
                call_id: call.id.clone(),
                content: output,
                is_error: false,
            },
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "tool execution failed");
                error_outcome(e)
            }
        }
    }
}
