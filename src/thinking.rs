use async_trait::async_trait;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::context::ChatMessage;
use crate::error::{ExecutionError, LlmTransportError};
use crate::llm::LlmClient;
use crate::security::{ExecutionResult, ShellRunner};

pub struct ThinkingIndicator {
    spinner: ProgressBar,
}

impl ThinkingIndicator {
    pub fn new(message: &str) -> Self {
        let spinner = ProgressBar::new_spinner();

        let style = ProgressStyle::with_template("{spinner:.bright_cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);

        spinner.set_style(style);
        spinner.set_message(message.dimmed().to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));

        Self { spinner }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

// Cleared on drop so an interrupted call never leaves a spinner behind.
impl Drop for ThinkingIndicator {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}

pub fn show_llm_thinking(provider: &str) -> ThinkingIndicator {
    ThinkingIndicator::new(&format!("Thinking ({})...", provider))
}

pub fn show_running(command: &str) -> ThinkingIndicator {
    ThinkingIndicator::new(&format!("Running {}", command))
}

/// Wraps a client so every model call shows a spinner on the terminal.
pub struct ThinkingClient {
    inner: Box<dyn LlmClient>,
}

impl ThinkingClient {
    pub fn new(inner: Box<dyn LlmClient>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LlmClient for ThinkingClient {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, LlmTransportError> {
        let spinner = show_llm_thinking(self.inner.name());
        let reply = self.inner.generate(prompt, history).await;
        spinner.finish();
        reply
    }
}

/// Same for shell commands; output is captured so the spinner never
/// interleaves with it.
pub struct ThinkingRunner {
    inner: Box<dyn ShellRunner>,
}

impl ThinkingRunner {
    pub fn new(inner: Box<dyn ShellRunner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ShellRunner for ThinkingRunner {
    async fn run(&self, command: &str) -> Result<ExecutionResult, ExecutionError> {
        let spinner = show_running(command);
        let result = self.inner.run(command).await;
        spinner.finish();
        result
    }
}
