//! Console rendering and confirmation prompts.

use std::io::Write as _;

use dialoguer::Select;

use crate::core::agent::{ChatEvent, ConfirmationResponse};

/// Print the startup banner.
pub fn print_banner(model: &str, url: &str, cwd: &str, yolo: bool) {
    let mode = if yolo {
        "yolo (no confirmations)"
    } else {
        "safe (confirm destructive tools)"
    };
    println!("anvil - local agent");
    println!("  model: {model}");
    println!("  url:   {url}");
    println!("  cwd:   {cwd}");
    println!("  mode:  {mode}");
    println!("Type `exit` or `quit` to leave.");
}

/// Render a chat event to stdout.
pub fn render_event(event: &ChatEvent) {
    match event {
        ChatEvent::Text(text) => {
            print!("{text}");
            std::io::stdout().flush().ok();
        }
        ChatEvent::ToolStart { name, invocation } => {
            println!("\n[{name}] {invocation}");
        }
        ChatEvent::ToolCall { name, is_error, .. } => {
            if *is_error {
                println!("[{name}] failed");
            } else {
                println!("[{name}] ok");
            }
        }
    }
}

/// Ask the user to approve a destructive tool call.
///
/// Blocking; call from `spawn_blocking`. Falls back to deny if the terminal
/// interaction fails.
#[must_use]
pub fn prompt_confirmation(tool_name: &str, detail: &str) -> ConfirmationResponse {
    println!("\n{tool_name} wants to: {detail}");

    let selection = Select::new()
        .with_prompt("Allow this action?")
        .items(&["Yes", "Yes, for the rest of the session", "No"])
        .default(0)
        .interact();

    match selection {
        Ok(0) => ConfirmationResponse::Allow,
        Ok(1) => ConfirmationResponse::AllowForSession,
        _ => ConfirmationResponse::Deny,
    }
}
