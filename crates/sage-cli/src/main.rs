//! sage - directive-driven streaming assistant CLI

mod config;
mod runner;

use clap::Parser;
use futures::StreamExt;
use sage_ai::SseClient;
use sage_core::{directive, BatchPipeline, Conversation, Orchestrator, OrchestratorConfig};
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

/// sage - streaming assistant with tool directives
#[derive(Parser, Debug)]
#[command(name = "sage")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: deepseek-chat)
    #[arg(short, long)]
    model: Option<String>,

    /// Completion endpoint base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Show raw tool directives instead of stripping them
    #[arg(long)]
    show_directives: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// `--verbose` filter; the tracing calls live in the library crates,
/// not just the binary target.
const VERBOSE_FILTER: &str = "sage=debug,sage_core=debug,sage_ai=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(VERBOSE_FILTER)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Load config file
    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let hide = !args.show_directives && cfg.hide_directives.unwrap_or(true);
    directive::set_hide_default(hide);

    let Some(api_key) = cfg.get_api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set your API key with: export SAGE_API_KEY=your-key");
        eprintln!("Or add it to the config file: sage --init-config");
        std::process::exit(1);
    };

    let base_url = args
        .base_url
        .or(cfg.base_url.clone())
        .unwrap_or_else(|| "https://api.deepseek.com/v1".to_string());
    let model = args
        .model
        .or(cfg.model.clone())
        .unwrap_or_else(|| "deepseek-chat".to_string());

    let orchestrator_config = OrchestratorConfig {
        model,
        task_ceiling: Duration::from_secs(cfg.task_timeout_secs.unwrap_or(300)),
        ..OrchestratorConfig::default()
    };

    let client = Arc::new(SseClient::new(api_key, base_url));
    let factory = Arc::new(runner::CommandRunnerFactory::from_config(&cfg));
    let workdir = cfg.pipeline_workdir.clone().unwrap_or_else(|| ".".to_string());
    let pipeline = BatchPipeline::analysis_default(workdir);

    let orchestrator = Orchestrator::new(orchestrator_config, client, factory, pipeline);

    // Non-interactive mode
    if let Some(command) = args.command {
        println!("sage> {}", command);
        println!();
        stream_turn(&orchestrator, Vec::new(), &command).await?;
        return Ok(());
    }

    run_interactive(&orchestrator).await
}

async fn run_interactive(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if io::stderr().is_terminal() {
        eprintln!("sage ({})", orchestrator.config().model);
        eprintln!("Type /clear to reset the conversation, /exit to quit.");
        eprintln!();
    }

    let mut conversation: Conversation = Vec::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/exit" | "/quit" => break,
            "/clear" => {
                conversation.clear();
                println!("Cleared conversation.");
                continue;
            }
            _ => {}
        }

        conversation = stream_turn(orchestrator, conversation, input).await?;
        println!();
    }

    Ok(())
}

/// Drive one turn, printing the pending assistant message as it grows.
///
/// Snapshot contents are prefix-consistent while text streams, so only
/// the new suffix is printed; when a section is restructured the whole
/// message is reprinted after a separator.
async fn stream_turn(
    orchestrator: &Orchestrator,
    conversation: Conversation,
    input: &str,
) -> anyhow::Result<Conversation> {
    let mut snapshots = orchestrator.respond(conversation.clone(), input, false);

    let mut latest = conversation;
    let mut printed = String::new();
    while let Some(snapshot) = snapshots.next().await {
        let content = snapshot
            .conversation
            .last()
            .map(|message| message.content.as_str())
            .unwrap_or("");
        match content.strip_prefix(&printed) {
            Some(suffix) => print!("{}", suffix),
            None => print!("\n---\n{}", content),
        }
        io::stdout().flush()?;
        printed = content.to_string();
        latest = snapshot.conversation;
    }
    println!();

    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_filter_covers_library_crates() {
        for target in ["sage=", "sage_core=", "sage_ai="] {
            assert!(VERBOSE_FILTER.contains(target));
        }
    }
}
