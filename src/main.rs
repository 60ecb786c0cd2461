use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use chatloop::config::Config;
use chatloop::events::NormalizedEvent;
use chatloop::llm::types::ChatRequest;
use chatloop::server::{self, AppState};
use chatloop::service::ChatService;
use cli::Cli;
use cli::commands::Commands;

fn setup_logging(log_stderr: bool) -> Result<()> {
    if log_stderr {
        env_logger::Builder::from_default_env()
            .target(env_logger::Target::Stderr)
            .init();
        info!("Logging initialized, writing to stderr");
        return Ok(());
    }

    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("chatloop.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Serve { bind } => handle_serve_command(bind.as_deref(), config).await,
        Commands::Ask {
            message,
            model,
            tools,
            token,
            theme_context,
        } => {
            let mut request = ChatRequest::from_user_message(message);
            request.model = model.clone();
            request.enable_tools = *tools;
            request.theme_context = theme_context.clone();
            handle_ask_command(request, token.as_deref(), config, cli.is_verbose()).await
        }
        Commands::Providers { token, model } => handle_providers_command(token.as_deref(), model, config).await,
    }
}

async fn handle_serve_command(bind: Option<&str>, config: Config) -> Result<()> {
    let bind = bind.map(str::to_string).unwrap_or_else(|| config.server.bind.clone());
    let service = ChatService::from_config(config).context("Failed to create chat service")?;

    println!("{} {}", "Serving on".green(), bind);
    server::serve(Arc::new(AppState::new(service)), &bind)
        .await
        .context("Server failed")?;
    Ok(())
}

async fn handle_ask_command(request: ChatRequest, token: Option<&str>, config: Config, verbose: bool) -> Result<()> {
    let caller = config.access.caller_for_token(token);
    info!("Ask as {} caller with model {}", caller.access_level, request.model);

    let service = ChatService::from_config(config).context("Failed to create chat service")?;
    let mut events = service
        .start_turn(request, caller)
        .await
        .map_err(|e| eyre::eyre!("{}", e.client_message()))?;

    while let Some(event) = events.recv().await {
        match event {
            NormalizedEvent::Content(text) => {
                print!("{}", text);
                std::io::stdout().flush().context("Failed to flush stdout")?;
            }
            NormalizedEvent::Thinking(text) => {
                if verbose {
                    print!("{}", text.dimmed());
                }
            }
            NormalizedEvent::ToolCall { name, .. } => println!("\n{} {}", "[tool]".cyan(), name),
            NormalizedEvent::ToolResult { name, result, .. } => {
                println!("{} {} {}", "[result]".green(), name, result)
            }
            NormalizedEvent::ToolDenied { name, reason, .. } => {
                println!("\n{} {}: {}", "[denied]".yellow(), name, reason)
            }
            NormalizedEvent::ToolError { name, error, .. } => println!("{} {}: {}", "[tool error]".red(), name, error),
            NormalizedEvent::Error(message) => println!("\n{} {}", "Error:".red(), message),
            NormalizedEvent::Done => {
                println!();
                break;
            }
        }
    }
    Ok(())
}

async fn handle_providers_command(token: Option<&str>, model: &str, config: Config) -> Result<()> {
    let caller = config.access.caller_for_token(token);
    let service = ChatService::new(config.clone(), chatloop::service::ProviderKeys::from_config(&config));
    let report = service.select(model, &caller).await;

    println!("{} {}", "Caller:".green(), caller.access_level);
    println!("  OpenAI key:    {}", yes_no(report.availability.openai_key));
    println!("  Anthropic key: {}", yes_no(report.availability.anthropic_key));
    println!("  Tunnel:        {:?}", report.availability.tunnel);
    if let Some(health) = report.health {
        println!(
            "  Tunnel health: {}",
            serde_json::to_string(&health).context("Failed to render tunnel health")?
        );
    }

    match report.choice {
        Ok(choice) => println!("{} {:?} for model {}", "Selected:".green(), choice, model),
        Err(e) => println!("{} {}", "No provider:".red(), e.client_message()),
    }
    Ok(())
}

fn yes_no(present: bool) -> ColoredString {
    if present { "yes".green() } else { "no".red() }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging first
    setup_logging(cli.log_stderr).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
