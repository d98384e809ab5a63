//! Safety gate: blocklist, destructive-tool confirmation, session grants.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tokio::sync::{mpsc, oneshot};

use super::error::{AgentError, Result};
use super::types::ToolCall;

/// Verdict for a pending tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Safe to execute without asking.
    Allowed,
    /// Matched the blocklist; never executed, even in yolo mode.
    Blocked(String),
    /// Destructive; the user must approve before execution.
    NeedsConfirmation,
}

/// Tools whose effect is irreversible or broad.
const DEFAULT_DESTRUCTIVE_TOOLS: &[&str] = &[
    "write_file",
    "edit_file",
    "delete_file",
    "move_file",
    "run_command",
    "run_python",
];

/// Command patterns considered too dangerous to run even with confirmation
/// disabled. Policy, not mechanism: callers can supply their own list via
/// [`SafetyPolicy::with_rules`]. Matching is best-effort pattern search over
/// the literal command text, not a sandbox guarantee.
const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    // Filesystem creation on raw devices
    r"(?i)\bmkfs(\.\w+)?\b",
    r"(?i)\bdd\b.*\bof=/dev/",
    // Recursive deletion of the root or home tree
    r"(?i)\brm\s+(-\w+\s+)*-\w*[rf]\w*\s+(/|~)[/*]*(\s|$)",
    // Host power control
    r"(?i)\bshutdown\b",
    r"(?i)\breboot\b",
];

/// Safety policy for tool execution.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    destructive: HashSet<String>,
    blocked: Vec<Regex>,
    yolo: bool,
}

impl SafetyPolicy {
    /// Create a policy with the default destructive set and blocklist.
    ///
    /// # Panics
    ///
    /// Does not panic: the default patterns are verified by tests.
    #[must_use]
    pub fn new(yolo: bool) -> Self {
        Self::with_rules(
            DEFAULT_DESTRUCTIVE_TOOLS.iter().map(ToString::to_string),
            DEFAULT_BLOCKED_PATTERNS,
            yolo,
        )
        .expect("default blocklist patterns compile")
    }

    /// Create a policy with explicit destructive tools and blocklist patterns.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a pattern fails to compile.
    pub fn with_rules<I, S>(destructive: I, patterns: &[S], yolo: bool) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
        S: AsRef<str>,
    {
        let blocked = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref())
                    .map_err(|e| AgentError::Config(format!("invalid blocklist pattern: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            destructive: destructive.into_iter().collect(),
            blocked,
            yolo,
        })
    }

    /// Whether confirmation prompts are disabled.
    #[must_use]
    pub const fn yolo(&self) -> bool {
        self.yolo
    }

    /// Whether a tool is classified destructive.
    #[must_use]
    pub fn is_destructive(&self, tool_name: &str) -> bool {
        self.destructive.contains(tool_name)
    }

    /// First blocklist pattern matching the command text, if any.
    #[must_use]
    pub fn blocked_reason(&self, command: &str) -> Option<String> {
        self.blocked
            .iter()
            .find(|pattern| pattern.is_match(command))
            .map(|pattern| pattern.as_str().to_string())
    }

    /// Classify a validated tool call.
    ///
    /// The blocklist check runs first and is never skipped: a match yields
    /// `Blocked` regardless of the yolo flag.
    #[must_use]
    pub fn authorize(&self, call: &ToolCall) -> Authorization {
        if let Some(command) = command_text(call) {
            if let Some(pattern) = self.blocked_reason(command) {
                return Authorization::Blocked(pattern);
            }
        }

        if self.is_destructive(&call.name) && !self.yolo {
            return Authorization::NeedsConfirmation;
        }

        Authorization::Allowed
    }
}

/// Literal command text carried by shell/code tool calls.
fn command_text(call: &ToolCall) -> Option<&str> {
    call.arguments
        .get("command")
        .or_else(|| call.arguments.get("code"))
        .and_then(|v| v.as_str())
}

/// Human-readable description of a call's concrete effect, shown at the
/// confirmation prompt: the literal command for shell tools, the target
/// path(s) for filesystem tools.
#[must_use]
pub fn describe_call(call: &ToolCall) -> String {
    const PREVIEW_MAX_CHARS: usize = 300;

    let detail = match call.name.as_str() {
        "run_command" => call
            .arguments
            .get("command")
            .and_then(|v| v.as_str())
            .map(|c| format!("run `{c}`")),
        "run_python" => call
            .arguments
            .get("code")
            .and_then(|v| v.as_str())
            .map(|c| format!("run python: {c}")),
        "delete_file" => path_arg(call, "path").map(|p| format!("delete {p}")),
        "write_file" => path_arg(call, "path").map(|p| format!("write {p}")),
        "edit_file" => path_arg(call, "path").map(|p| format!("edit {p}")),
        "move_file" => {
            match (path_arg(call, "source"), path_arg(call, "destination")) {
                (Some(src), Some(dst)) => Some(format!("move {src} -> {dst}")),
                _ => None,
            }
        }
        _ => None,
    };

    let rendered = detail.unwrap_or_else(|| {
        serde_json::to_string(&call.arguments).unwrap_or_else(|_| call.arguments.to_string())
    });

    if rendered.chars().count() > PREVIEW_MAX_CHARS {
        let truncated: String = rendered.chars().take(PREVIEW_MAX_CHARS - 3).collect();
        format!("{truncated}...")
    } else {
        rendered
    }
}

fn path_arg<'a>(call: &'a ToolCall, key: &str) -> Option<&'a str> {
    call.arguments.get(key).and_then(|v| v.as_str())
}

/// User's response to a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResponse {
    /// Allow this single operation.
    Allow,
    /// Allow this tool for the rest of the session.
    AllowForSession,
    /// Deny the operation.
    Deny,
}

/// A pending confirmation, delivered to the console front end.
#[derive(Debug)]
pub struct ConfirmationRequest {
    /// Name of the tool awaiting approval.
    pub tool_name: String,
    /// Concrete effect description (command text, target path).
    pub detail: String,
    /// Channel for the decision.
    pub response_tx: oneshot::Sender<ConfirmationResponse>,
}

/// Lightweight handle the agent uses to request confirmations.
///
/// Requests flow over an mpsc channel to whatever front end is attached; the
/// agent suspends on the oneshot reply. `AllowForSession` decisions are
/// cached per tool name.
#[derive(Clone)]
pub struct Confirmer {
    tx: mpsc::UnboundedSender<ConfirmationRequest>,
    session_grants: Arc<RwLock<HashSet<String>>>,
}

impl Confirmer {
    /// Create a confirmer and the receiving end for the front end to service.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConfirmationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                session_grants: Arc::new(RwLock::new(HashSet::new())),
            },
            rx,
        )
    }

    /// Ask the user to approve a destructive call.
    ///
    /// Returns `true` if approved. A closed channel (no front end attached)
    /// denies: destructive work never proceeds unobserved.
    pub async fn confirm(&self, tool_name: &str, detail: &str) -> bool {
        if self.session_grants.read().contains(tool_name) {
            return true;
        }

        let (response_tx, response_rx) = oneshot::channel();
        let request = ConfirmationRequest {
            tool_name: tool_name.to_string(),
            detail: detail.to_string(),
            response_tx,
        };

        if self.tx.send(request).is_err() {
            tracing::warn!(tool = tool_name, "no confirmation front end attached, denying");
            return false;
        }

        match response_rx.await {
            Ok(ConfirmationResponse::Allow) => true,
            Ok(ConfirmationResponse::AllowForSession) => {
                self.session_grants.write().insert(tool_name.to_string());
                true
            }
            Ok(ConfirmationResponse::Deny) | Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: args,
        }
    }

    #[test]
    fn read_only_tool_is_allowed() {
        let policy = SafetyPolicy::new(false);
        let verdict = policy.authorize(&call("read_file", serde_json::json!({"path": "a.txt"})));
        assert_eq!(verdict, Authorization::Allowed);
    }

    #[test]
    fn destructive_tool_needs_confirmation() {
        let policy = SafetyPolicy::new(false);
        let verdict = policy.authorize(&call(
            "delete_file",
            serde_json::json!({"path": "a.txt"}),
        ));
        assert_eq!(verdict, Authorization::NeedsConfirmation);
    }

    #[test]
    fn yolo_skips_confirmation() {
        let policy = SafetyPolicy::new(true);
        let verdict = policy.authorize(&call(
            "run_command",
            serde_json::json!({"command": "cargo build"}),
        ));
        assert_eq!(verdict, Authorization::Allowed);
    }

    #[test]
    fn blocklist_matches_disk_format() {
        let policy = SafetyPolicy::new(false);
        let verdict = policy.authorize(&call(
            "run_command",
            serde_json::json!({"command": "mkfs.ext4 /dev/sda1"}),
        ));
        assert!(matches!(verdict, Authorization::Blocked(_)));
    }

    #[test]
    fn blocklist_matches_recursive_root_delete() {
        let policy = SafetyPolicy::new(false);
        for cmd in ["rm -rf /", "rm -fr ~", "sudo rm -rf /*", "rm -r -f /"] {
            let verdict =
                policy.authorize(&call("run_command", serde_json::json!({"command": cmd})));
            assert!(matches!(verdict, Authorization::Blocked(_)), "not blocked: {cmd}");
        }
    }

    #[test]
    fn blocklist_ignores_scoped_deletes() {
        let policy = SafetyPolicy::new(false);
        let verdict = policy.authorize(&call(
            "run_command",
            serde_json::json!({"command": "rm -rf target/debug"}),
        ));
        assert_eq!(verdict, Authorization::NeedsConfirmation);
    }

    #[test]
    fn blocklist_overrides_yolo() {
        let policy = SafetyPolicy::new(true);
        let verdict = policy.authorize(&call(
            "run_command",
            serde_json::json!({"command": "shutdown -h now"}),
        ));
        assert!(matches!(verdict, Authorization::Blocked(_)));
    }

    #[test]
    fn blocklist_checks_python_code_too() {
        let policy = SafetyPolicy::new(true);
        let verdict = policy.authorize(&call(
            "run_python",
            serde_json::json!({"code": "import os; os.system('reboot')"}),
        ));
        assert!(matches!(verdict, Authorization::Blocked(_)));
    }

    #[test]
    fn describe_call_shows_command() {
        let detail = describe_call(&call(
            "run_command",
            serde_json::json!({"command": "ls -la"}),
        ));
        assert_eq!(detail, "run `ls -la`");
    }

    #[test]
    fn describe_call_shows_delete_target() {
        let detail = describe_call(&call(
            "delete_file",
            serde_json::json!({"path": "src/main.rs", "recursive": false}),
        ));
        assert_eq!(detail, "delete src/main.rs");
    }

    #[test]
    fn describe_call_truncates_long_payloads() {
        let long = "x".repeat(1000);
        let detail = describe_call(&call("write_file", serde_json::json!({"content": long})));
        assert!(detail.chars().count() <= 300);
        assert!(detail.ends_with("..."));
    }

    #[tokio::test]
    async fn confirmer_allow_approves() {
        let (confirmer, mut rx) = Confirmer::new();

        let handle = tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            assert_eq!(req.tool_name, "delete_file");
            req.response_tx.send(ConfirmationResponse::Allow).unwrap();
        });

        assert!(confirmer.confirm("delete_file", "delete a.txt").await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn confirmer_deny_refuses() {
        let (confirmer, mut rx) = Confirmer::new();

        let handle = tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            req.response_tx.send(ConfirmationResponse::Deny).unwrap();
        });

        assert!(!confirmer.confirm("delete_file", "delete a.txt").await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn confirmer_caches_session_grant() {
        let (confirmer, mut rx) = Confirmer::new();

        let handle = tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            req.response_tx
                .send(ConfirmationResponse::AllowForSession)
                .unwrap();
            // Second confirm must not produce another request.
            assert!(rx.recv().await.is_none());
        });

        assert!(confirmer.confirm("run_command", "run `make`").await);
        assert!(confirmer.confirm("run_command", "run `make test`").await);
        drop(confirmer);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn confirmer_denies_without_front_end() {
        let (confirmer, rx) = Confirmer::new();
        drop(rx);

        assert!(!confirmer.confirm("delete_file", "delete a.txt").await);
    }
}
