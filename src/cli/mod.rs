//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Anvil - local agentic CLI for OpenAI-compatible model servers.
#[derive(Parser)]
#[command(name = "anvil")]
#[command(about = "Local agentic CLI for OpenAI-compatible model servers")]
#[command(version)]
pub struct Cli {
    /// One-shot prompt; starts the interactive REPL when omitted.
    pub prompt: Option<String>,

    /// Base URL of the model server.
    #[arg(long, env = "ANVIL_BASE_URL")]
    pub url: Option<String>,

    /// Model id (auto-detected from the server if omitted).
    #[arg(long, env = "ANVIL_MODEL")]
    pub model: Option<String>,

    /// Working directory for tools (sandbox root).
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Skip confirmation prompts for destructive tools.
    /// Blocklisted commands are still refused.
    #[arg(long)]
    pub yolo: bool,

    /// Default timeout for run_command/run_python tools in seconds.
    #[arg(long)]
    pub command_timeout: Option<u64>,

    /// Maximum tool round-trips per request.
    #[arg(long)]
    pub max_turns: Option<usize>,

    /// Check server connectivity and list models, then exit.
    #[arg(long)]
    pub health: bool,

    /// Increase logging verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_no_args() {
        let cli = Cli::parse_from(["anvil"]);
        assert!(cli.prompt.is_none());
        assert!(!cli.yolo);
        assert!(!cli.health);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn cli_parses_one_shot_prompt() {
        let cli = Cli::parse_from(["anvil", "list the rust files"]);
        assert_eq!(cli.prompt.as_deref(), Some("list the rust files"));
    }

    #[test]
    fn cli_parses_url_and_model() {
        let cli = Cli::parse_from([
            "anvil",
            "--url",
            "http://localhost:11434/v1",
            "--model",
            "llama3",
        ]);
        assert_eq!(cli.url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(cli.model.as_deref(), Some("llama3"));
    }

    #[test]
    fn cli_parses_cwd() {
        let cli = Cli::parse_from(["anvil", "--cwd", "/tmp/project"]);
        assert_eq!(cli.cwd, Some(PathBuf::from("/tmp/project")));
    }

    #[test]
    fn cli_parses_yolo_flag() {
        let cli = Cli::parse_from(["anvil", "--yolo"]);
        assert!(cli.yolo);
    }

    #[test]
    fn cli_parses_command_timeout() {
        let cli = Cli::parse_from(["anvil", "--command-timeout", "60"]);
        assert_eq!(cli.command_timeout, Some(60));
    }

    #[test]
    fn cli_parses_health_flag() {
        let cli = Cli::parse_from(["anvil", "--health"]);
        assert!(cli.health);
    }

    #[test]
    fn cli_parses_verbose_flag() {
        let cli = Cli::parse_from(["anvil", "-v"]);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::parse_from(["anvil", "-vv"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn cli_debug_assert() {
        // Verify the CLI is correctly configured
        Cli::command().debug_assert();
    }
}
