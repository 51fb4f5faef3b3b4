use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod chat;
mod cli;
mod cmd_parser;
mod commands;
mod config;
mod context;
mod controller;
mod error;
mod input;
mod llm;
mod prompts;
mod security;
mod thinking;

use context::ContextManager;
use controller::ConversationController;
use prompts::{PromptFormatter, PromptsConfig};
use security::{CommandValidator, ExecutionGate, ShellExecutor};

#[derive(Parser, Debug)]
#[command(name = "scli")]
#[command(about = "Turns natural-language requests into shell commands you confirm before they run")]
struct Args {
    /// Config file (defaults to ~/.smartcli/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// LLM provider: ollama, openai, groq, gemini or openrouter
    #[arg(long)]
    provider: Option<String>,

    /// Model name for the selected provider
    #[arg(long)]
    model: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Vec<(String, String)> {
        let mut overrides = Vec::new();
        if let Some(provider) = &self.provider {
            overrides.push(("provider".to_string(), provider.clone()));
        }
        // after provider, which resets the model
        if let Some(model) = &self.model {
            overrides.push(("model".to_string(), model.clone()));
        }
        if self.verbose {
            overrides.push(("log_level".to_string(), "debug".to_string()));
        }
        overrides
    }
}

fn init_logging(log_level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(log_level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = config::load_or_create_config(args.config.as_deref())?;
    config.merge_overrides(args.overrides())?;
    config.validate()?;

    init_logging(&config.general.log_level, args.verbose);
    info!(provider = %config.llm.provider, model = %config.llm.model, "starting session");

    let os_name = whoami::platform().to_string();
    let prompts = PromptsConfig::load().context("Failed to load prompts.toml")?;
    let formatter = PromptFormatter::new(prompts, os_name.clone(), config.session.file_char_limit);

    let llm = llm::build_client(&config.llm)?;
    let runner = thinking::ThinkingRunner::new(Box::new(ShellExecutor::new()));
    let gate = ExecutionGate::new(Box::new(input::ConsolePrompter::new()), Box::new(runner));

    let controller = ConversationController::new(
        ContextManager::with_limits(config.session.token_budget, config.session.max_file_bytes),
        formatter,
        Box::new(thinking::ThinkingClient::new(llm)),
        CommandValidator::new(config.security.allow_list.iter()),
        gate,
    );

    cli::run_classic_cli(controller, &os_name).await
}
