//! OpenAI-compatible provider implementation.
//!
//! Streams completions from any Chat Completions endpoint (LM Studio, Ollama,
//! vLLM, or the real thing). Local servers typically need no API key.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::core::agent::error::{AgentError, Result};
use crate::core::agent::provider::{
    CompletionEvent, CompletionRequest, CompletionStream, LlmProvider,
};
use crate::core::agent::types::{Content, ContentBlock, Message, Role, StopReason, Tool};

const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";

/// LLM provider for OpenAI-compatible chat-completions endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a provider with optional API key and base URL.
    ///
    /// Local servers (the default) need no API key; a hosted endpoint takes
    /// both.
    #[must_use]
    pub fn with_config(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .map_or_else(|| DEFAULT_BASE_URL.to_string(), |u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Get the configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .map_err(|_| AgentError::Config("invalid API key".to_string()))?,
            );
        }

        Ok(headers)
    }

    /// List model ids available at the endpoint.
    ///
    /// Used by the health check and for model auto-detection.
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is unreachable or answers non-2xx.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ModelList = response
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;

        Ok(body.data.into_iter().map(|m| m.id).collect())
    }

    /// Resolve the model to use: the configured one, or the first the server
    /// advertises.
    ///
    /// # Errors
    ///
    /// Returns error if no model is configured and the server lists none.
    pub async fn ensure_model(&self, configured: Option<String>) -> Result<String> {
        if let Some(model) = configured {
            return Ok(model);
        }

        let models = self.list_models().await?;
        models.into_iter().next().ok_or_else(|| {
            AgentError::Config("no models available from the server; pass --model".to_string())
        })
    }
}

// Wire request types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Wire response types for SSE parsing

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Convert internal messages to the chat-completions wire format.
///
/// Tool-use blocks become assistant `tool_calls`; tool-result blocks become
/// `role: "tool"` messages carrying their `tool_call_id`.
fn convert_messages(messages: &[Message], system: Option<&str>) -> Vec<WireMessage> {
    let mut result = Vec::new();

    if let Some(sys) = system {
        result.push(WireMessage {
            role: "system",
            content: Some(sys.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for msg in messages {
        match &msg.content {
            Content::Text(text) => {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                result.push(WireMessage {
                    role,
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            Content::Blocks(blocks) => {
                let mut text_parts = Vec::new();
                let mut tool_calls = Vec::new();
                let mut tool_results = Vec::new();

                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            text_parts.push(text.clone());
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            tool_calls.push(WireToolCall {
                                id: id.clone(),
                                call_type: "function",
                                function: WireFunctionCall {
                                    name: name.clone(),
                                    arguments: serde_json::to_string(input).unwrap_or_default(),
                                },
                            });
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => {
                            tool_results.push((tool_use_id.clone(), content.clone()));
                        }
                    }
                }

                if !tool_calls.is_empty() {
                    let content = if text_parts.is_empty() {
                        None
                    } else {
                        Some(text_parts.join(""))
                    };
                    result.push(WireMessage {
                        role: "assistant",
                        content,
                        tool_calls: Some(tool_calls),
                        tool_call_id: None,
                    });
                } else if !text_parts.is_empty() {
                    let role = match msg.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    };
                    result.push(WireMessage {
                        role,
                        content: Some(text_parts.join("")),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }

                for (tool_use_id, content) in tool_results {
                    result.push(WireMessage {
                        role: "tool",
                        content: Some(content),
                        tool_calls: None,
                        tool_call_id: Some(tool_use_id),
                    });
                }
            }
        }
    }

    result
}

/// Convert tool specs to the function-calling wrapper.
fn convert_tools(tools: &[Tool]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            tool_type: "function",
            function: WireFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Parse a single SSE event from the buffer.
///
/// Returns the parsed chunk (if any) and the remaining buffer content.
fn parse_sse_event(buffer: &str) -> Option<(Option<ChatChunk>, String)> {
    // Find double newline (end of event)
    let end = buffer.find("\n\n")?;
    let event_str = &buffer[..end];
    let remainder = buffer[end + 2..].to_string();

    let mut data = None;
    for line in event_str.lines() {
        if let Some(rest) = line.strip_prefix("data: ") {
            data = Some(rest.to_string());
        }
    }

    // Skip non-data events
    let Some(data) = data else {
        return Some((None, remainder));
    };

    if data.trim() == "[DONE]" {
        return Some((None, remainder));
    }

    match serde_json::from_str::<ChatChunk>(&data) {
        Ok(chunk) => Some((Some(chunk), remainder)),
        Err(e) => {
            tracing::debug!(data = %data, error = %e, "failed to parse SSE event");
            Some((None, remainder))
        }
    }
}

/// Convert a chat-completions finish reason to our stop reason.
fn convert_stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "stop" => Some(StopReason::EndTurn),
        "tool_calls" => Some(StopReason::ToolUse),
        "length" => Some(StopReason::MaxTokens),
        _ => None,
    }
}

/// Some local servers omit tool-call ids; synthesize one so results can still
/// reference their call.
fn ensure_call_id(id: &str) -> String {
    if id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        id.to_string()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let tools = request.tools.as_ref().map(|t| convert_tools(t));
        let has_tools = tools.is_some();

        let wire_request = ChatRequest {
            model: request.model,
            max_tokens: request.max_tokens,
            messages: convert_messages(&request.messages, request.system.as_deref()),
            tools,
            tool_choice: has_tools.then_some("auto"),
            stream: true,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&wire_request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            // Tool calls being assembled: index -> (id, name, arguments)
            let mut pending_tool_calls: std::collections::HashMap<usize, (String, String, String)> =
                std::collections::HashMap::new();
            let text_block_index = 0_usize;
            let mut current_text = String::new();
            let mut finished = false;

            futures::pin_mut!(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        // Terminal: the connection died mid-stream.
                        yield Err(AgentError::from(e));
                        finished = true;
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE events
                while let Some((chunk_opt, remainder)) = parse_sse_event(&buffer) {
                    buffer = remainder;

                    let Some(chunk) = chunk_opt else {
                        continue;
                    };

                    for choice in chunk.choices {
                        if let Some(text) = choice.delta.content {
                            if !text.is_empty() {
                                current_text.push_str(&text);
                                yield Ok(CompletionEvent::TextDelta(text));
                            }
                        }

                        if let Some(tool_calls) = choice.delta.tool_calls {
                            for tc in tool_calls {
                                let entry = pending_tool_calls.entry(tc.index).or_insert_with(|| {
                                    (String::new(), String::new(), String::new())
                                });

                                if let Some(id) = tc.id {
                                    entry.0 = id;
                                }

                                if let Some(func) = tc.function {
                                    if let Some(name) = func.name {
                                        entry.1.push_str(&name);
                                        let tool_index = text_block_index + 1 + tc.index;
                                        yield Ok(CompletionEvent::ToolUseStart {
                                            index: tool_index,
                                            id: ensure_call_id(&entry.0),
                                            name: entry.1.clone(),
                                        });
                                    }
                                    if let Some(args) = func.arguments {
                                        entry.2.push_str(&args);
                                        let tool_index = text_block_index + 1 + tc.index;
                                        yield Ok(CompletionEvent::ToolInputDelta {
                                            index: tool_index,
                                            partial_json: args,
                                        });
                                    }
                                }
                            }
                        }

                        if let Some(reason) = choice.finish_reason {
                            if !current_text.is_empty() {
                                yield Ok(CompletionEvent::ContentBlockDone {
                                    index: text_block_index,
                                    block: ContentBlock::Text { text: current_text.clone() },
                                });
                            }

                            for (idx, (id, name, args)) in &pending_tool_calls {
                                let tool_index = text_block_index + 1 + idx;
                                let input = serde_json::from_str(args).unwrap_or(serde_json::Value::Null);
                                yield Ok(CompletionEvent::ContentBlockDone {
                                    index: tool_index,
                                    block: ContentBlock::ToolUse {
                                        id: ensure_call_id(id),
                                        name: name.clone(),
                                        input,
                                    },
                                });
                            }

                            let stop_reason = convert_stop_reason(&reason);
                            finished = true;
                            yield Ok(CompletionEvent::Done { stop_reason, usage: None });
                        }
                    }
                }
            }

            if !finished {
                yield Err(AgentError::Transport(
                    "stream ended without a finish reason".to_string(),
                ));
            }
        };

        Ok(Box::pin(stream))
    }
}
