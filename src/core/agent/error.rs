//! Agent error types.

/// Agent-specific errors.
///
/// Failures raised by a single tool call (schema, path, edit conflict,
/// timeout, blocked, declined, execution) are captured as error tool results
/// and fed back to the model; the transport family, the turn limit, and
/// cancellation end the turn instead.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Transport-level error (endpoint unreachable, stream cut short).
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Failed to parse API response.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Tool name not present in the registry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A tool with this name is already registered.
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// Tool arguments do not satisfy the declared schema.
    #[error("invalid arguments for `{tool}`: {violations}")]
    SchemaValidation { tool: String, violations: String },

    /// Resolved path lies outside the sandbox root.
    #[error("path escapes the working directory: {0}")]
    PathEscape(String),

    /// Edit anchor no longer matches the file content.
    #[error("edit conflict: {0}")]
    EditConflict(String),

    /// Subprocess exceeded its timeout and was killed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Command text matched the safety blocklist.
    #[error("blocked by safety policy: {0}")]
    BlockedCommand(String),

    /// User declined the action at the confirmation prompt.
    #[error("action declined by user")]
    ConfirmationDeclined,

    /// The model kept requesting tool calls past the configured limit.
    #[error("turn limit exceeded after {0} tool round-trips")]
    TurnLimitExceeded(usize),

    /// User interrupted the turn.
    #[error("cancelled by user")]
    Cancelled,

    /// Tool execution failed.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// Configuration or file I/O error.
    #[error("config error: {0}")]
    Config(String),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
