//! Shell and code execution tools.
//!
//! Both run in their own subprocess inside the sandbox root, bounded by a
//! timeout; a hung process is killed, never leaked. Stdout and stderr are
//! captured separately and tail-truncated to the sandbox's output limit.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{Sandbox, required_str};
use crate::core::agent::{AgentError, Result, ToolHandler, ToolSpec};

/// How long to wait for output pipes to drain after killing a timed-out
/// child. A grandchild may still hold the pipes open; after the grace period
/// whatever was captured so far is returned.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Captured result of a bounded subprocess run.
struct CommandOutcome {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    timed_out: bool,
    truncated: bool,
}

impl CommandOutcome {
    fn render(&self) -> String {
        let mut parts = Vec::new();

        match self.exit_code {
            Some(0) => {}
            Some(code) => parts.push(format!("exit code {code}")),
            None => parts.push("killed".to_string()),
        }
        if !self.stdout.is_empty() {
            parts.push(format!("stdout:\n{}", self.stdout));
        }
        if !self.stderr.is_empty() {
            parts.push(format!("stderr:\n{}", self.stderr));
        }
        if self.truncated {
            parts.push("(output truncated to the most recent lines)".to_string());
        }
        if parts.is_empty() {
            parts.push("(no output)".to_string());
        }

        parts.join("\n")
    }
}

/// Keep the last `max_lines` lines of `text`.
fn truncate_output(text: &str, max_lines: usize) -> (String, bool) {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return (text.trim_end_matches('\n').to_string(), false);
    }
    (lines[lines.len() - max_lines..].join("\n"), true)
}

/// Drain a pipe incrementally into a shared buffer, so partial output stays
/// observable even if the reader never reaches end-of-file.
fn spawn_reader<R>(pipe: Option<R>) -> (JoinHandle<()>, Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&buffer);

    let handle = tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0_u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => shared.lock().extend_from_slice(&chunk[..n]),
            }
        }
    });

    (handle, buffer)
}

/// Run a spawned child to completion under `timeout`.
///
/// Output pipes are drained by separate tasks so a timed-out child still
/// yields whatever it printed before the kill.
async fn run_bounded(
    mut child: Child,
    timeout: Duration,
    max_output_lines: usize,
) -> Result<CommandOutcome> {
    let (stdout_task, stdout_buf) = spawn_reader(child.stdout.take());
    let (stderr_task, stderr_buf) = spawn_reader(child.stderr.take());

    let (timed_out, exit_code) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status.map_err(|e| AgentError::ToolExecution(e.to_string()))?;
            // Writers are gone; let the readers hit end-of-file.
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            (false, status.code())
        }
        Err(_) => {
            // Kill and reap so nothing leaks. A grandchild may keep the
            // pipes open past the kill, so only wait out the grace period.
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = tokio::time::timeout(KILL_DRAIN_GRACE, stdout_task).await;
            let _ = tokio::time::timeout(KILL_DRAIN_GRACE, stderr_task).await;
            (true, None)
        }
    };

    let stdout_bytes = stdout_buf.lock().clone();
    let stderr_bytes = stderr_buf.lock().clone();

    let (stdout, stdout_truncated) =
        truncate_output(&String::from_utf8_lossy(&stdout_bytes), max_output_lines);
    let (stderr, stderr_truncated) =
        truncate_output(&String::from_utf8_lossy(&stderr_bytes), max_output_lines);

    Ok(CommandOutcome {
        exit_code,
        stdout,
        stderr,
        timed_out,
        truncated: stdout_truncated || stderr_truncated,
    })
}

/// Per-call timeout override, capped by nothing but bounded below at 1s.
fn effective_timeout(args: &serde_json::Value, sandbox: &Sandbox) -> Duration {
    args.get("timeout_seconds")
        .and_then(serde_json::Value::as_u64)
        .map_or_else(|| sandbox.command_timeout(), |s| {
            Duration::from_secs(s.max(1))
        })
}

/// Execute a shell command.
pub struct RunCommand {
    sandbox: Arc<Sandbox>,
}

impl RunCommand {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for RunCommand {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_command".to_string(),
            description: "Run a shell command in the working directory and return stdout/stderr."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The shell command to execute" },
                    "timeout_seconds": { "type": "integer" }
                },
                "required": ["command"]
            }),
            destructive: true,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let command = required_str(args, "command")?;
        let timeout = effective_timeout(args, &self.sandbox);

        tracing::info!(command = %command, "executing shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.sandbox.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        let outcome = run_bounded(child, timeout, self.sandbox.max_output_lines()).await?;

        if outcome.timed_out {
            return Err(AgentError::Timeout(format!(
                "command killed after {}s\n{}",
                timeout.as_secs(),
                outcome.render()
            )));
        }

        Ok(outcome.render())
    }
}

/// Execute a Python snippet in an isolated interpreter process.
pub struct RunPython {
    sandbox: Arc<Sandbox>,
}

impl RunPython {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }

    /// Locate an interpreter; snippets never run inside the agent process.
    fn interpreter() -> Result<std::path::PathBuf> {
        which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|_| AgentError::ToolExecution("no python interpreter found".to_string()))
    }
}

#[async_trait]
impl ToolHandler for RunPython {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_python".to_string(),
            description:
                "Run a Python snippet in a separate process and return its output. Uncaught exceptions are captured as text."
                    .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "The Python code to execute" },
                    "timeout_seconds": { "type": "integer" }
                },
                "required": ["code"]
            }),
            destructive: true,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let code = required_str(args, "code")?;
        let timeout = effective_timeout(args, &self.sandbox);
        let interpreter = Self::interpreter()?;

        tracing::info!(interpreter = %interpreter.display(), "executing python snippet");

        let child = Command::new(interpreter)
            .arg("-c")
            .arg(code)
            .current_dir(self.sandbox.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        let outcome = run_bounded(child, timeout, self.sandbox.max_output_lines()).await?;

        if outcome.timed_out {
            return Err(AgentError::Timeout(format!(
                "snippet killed after {}s\n{}",
                timeout.as_secs(),
                outcome.render()
            )));
        }

        Ok(outcome.render())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sandbox() -> (tempfile::TempDir, Arc<Sandbox>) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(Sandbox::new(dir.path(), Duration::from_secs(5), 200).unwrap());
        (dir, sandbox)
    }

    #[tokio::test]
    async fn command_captures_stdout() {
        let (_dir, sandbox) = sandbox();
        let tool = RunCommand::new(&sandbox);

        let output = tool
            .execute(&serde_json::json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(output.contains("hello"));
    }

    #[tokio::test]
    async fn command_reports_nonzero_exit_as_result() {
        let (_dir, sandbox) = sandbox();
        let tool = RunCommand::new(&sandbox);

        // A failing command is tool output, not an execution error.
        let output = tool
            .execute(&serde_json::json!({"command": "echo oops >&2; exit 3"}))
            .await
            .unwrap();
        assert!(output.contains("exit code 3"));
        assert!(output.contains("oops"));
    }

    #[tokio::test]
    async fn command_runs_in_sandbox_root() {
        let (_dir, sandbox) = sandbox();
        let tool = RunCommand::new(&sandbox);

        let output = tool
            .execute(&serde_json::json!({"command": "pwd"}))
            .await
            .unwrap();
        assert!(output.contains(sandbox.root().to_str().unwrap()));
    }

    #[tokio::test]
    async fn timeout_kills_hung_command() {
        let (_dir, sandbox) = sandbox();
        let tool = RunCommand::new(&sandbox);

        let start = Instant::now();
        let err = tool
            .execute(&serde_json::json!({"command": "sleep 10", "timeout_seconds": 1}))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, AgentError::Timeout(_)));
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn timeout_keeps_partial_output() {
        let (_dir, sandbox) = sandbox();
        let tool = RunCommand::new(&sandbox);

        let err = tool
            .execute(&serde_json::json!({
                "command": "echo before-the-hang; sleep 10",
                "timeout_seconds": 1
            }))
            .await
            .unwrap_err();

        match err {
            AgentError::Timeout(msg) => assert!(msg.contains("before-the-hang"), "got: {msg}"),
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn output_is_tail_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(Sandbox::new(dir.path(), Duration::from_secs(5), 10).unwrap());
        let tool = RunCommand::new(&sandbox);

        let output = tool
            .execute(&serde_json::json!({"command": "seq 1 100"}))
            .await
            .unwrap();
        assert!(output.contains("100"));
        assert!(!output.contains("\n50\n"));
        assert!(output.contains("truncated"));
    }

    #[tokio::test]
    async fn python_captures_exception_text() {
        let (_dir, sandbox) = sandbox();
        if RunPython::interpreter().is_err() {
            return;
        }
        let tool = RunPython::new(&sandbox);

        let output = tool
            .execute(&serde_json::json!({"code": "raise ValueError('boom')"}))
            .await
            .unwrap();
        assert!(output.contains("ValueError"));
        assert!(output.contains("boom"));
    }

    #[test]
    fn truncate_output_keeps_tail() {
        let text = "1\n2\n3\n4\n5";
        let (kept, truncated) = truncate_output(text, 2);
        assert!(truncated);
        assert_eq!(kept, "4\n5");

        let (kept, truncated) = truncate_output(text, 10);
        assert!(!truncated);
        assert_eq!(kept, text);
    }
}
