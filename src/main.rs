use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncBufReadExt as _;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use anvil_cli::core::agent::{
    Agent, AgentError, ConfirmationRequest, Confirmer, OpenAiProvider, SafetyPolicy,
};
use anvil_cli::core::tools::{Sandbox, builtin_registry};
use anvil_cli::{Config, cli::Cli, console};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    config.apply_cli(&cli);

    let provider = OpenAiProvider::with_config(None, Some(config.base_url.clone()));

    if cli.health {
        return run_health_check(&provider).await;
    }

    let model = provider
        .ensure_model(config.model.clone())
        .await
        .map_err(|e| anyhow::anyhow!("failed to reach model server: {e}"))?;

    let working_dir = config.working_dir()?;
    let sandbox = Arc::new(Sandbox::new(
        &working_dir,
        Duration::from_secs(config.command_timeout_seconds),
        config.max_output_lines,
    )?);
    let registry = builtin_registry(&sandbox)?;
    let policy = SafetyPolicy::new(config.yolo);
    let (confirmer, mut confirm_rx) = Confirmer::new();

    let mut agent = Agent::new(
        Box::new(provider),
        &model,
        config.max_tokens,
        registry,
        policy,
    )
    .with_system(anvil_cli::config::SYSTEM_PROMPT)
    .with_max_turns(config.max_turns);
    agent.set_confirmer(confirmer);

    // One-shot mode
    if let Some(prompt) = cli.prompt {
        run_turn(&mut agent, &mut confirm_rx, &prompt).await;
        return Ok(());
    }

    console::print_banner(
        &model,
        &config.base_url,
        &sandbox.root().display().to_string(),
        config.yolo,
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!(">>> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        run_turn(&mut agent, &mut confirm_rx, input).await;
        agent.trim_history(config.max_history_messages);
    }

    Ok(())
}

/// Drive one user turn: the agent loop, confirmation prompts, and Ctrl-C.
///
/// The agent suspends while a confirmation is pending; both are serviced
/// from this single select loop, and Ctrl-C flips the cancel token so the
/// loop stops at its next suspension point.
async fn run_turn(
    agent: &mut Agent,
    confirm_rx: &mut mpsc::UnboundedReceiver<ConfirmationRequest>,
    input: &str,
) {
    let cancel = agent.cancel_token();

    let chat = agent.chat_with_events(input, |event| console::render_event(&event));
    tokio::pin!(chat);

    let result = loop {
        tokio::select! {
            result = &mut chat => break result,

            Some(request) = confirm_rx.recv() => {
                let ConfirmationRequest { tool_name, detail, response_tx } = request;
                let response = tokio::task::spawn_blocking(move || {
                    console::prompt_confirmation(&tool_name, &detail)
                })
                .await
                .unwrap_or(anvil_cli::core::agent::ConfirmationResponse::Deny);
                let _ = response_tx.send(response);
            }

            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            }
        }
    };

    match result {
        Ok(_) => println!(),
        Err(AgentError::Cancelled) => println!("\n(cancelled)"),
        Err(e) => eprintln!("\nerror: {e}"),
    }
}

async fn run_health_check(provider: &OpenAiProvider) -> anyhow::Result<()> {
    let models = provider
        .list_models()
        .await
        .map_err(|e| anyhow::anyhow!("health check failed: {e}"))?;

    println!(
        "server reachable at {}: {} model(s) available",
        provider.base_url(),
        models.len()
    );
    for model in models {
        println!("- {model}");
    }

    Ok(())
}
