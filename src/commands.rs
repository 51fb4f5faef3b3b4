use anyhow::Result;
use async_trait::async_trait;
use colored::*;

use crate::chat::ChatSession;
use crate::cli::render_markdown;
use crate::controller::ConversationController;
use crate::input::read_chat_line;

/// Represents the result of executing a meta-command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    /// The session should end after this result is shown.
    pub exit: bool,
}

impl CommandResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
            exit: false,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
            exit: false,
        }
    }

    pub fn exit() -> Self {
        Self {
            exit: true,
            ..Self::success(String::new())
        }
    }
}

/// Trait for handling the session's meta-commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &str;
    /// Other spellings that dispatch to this handler, e.g. bare `exit`.
    fn aliases(&self) -> &[&str] {
        &[]
    }
    fn usage(&self) -> &str;
    fn description(&self) -> &str;
    async fn execute(&self, arg: &str, controller: &mut ConversationController) -> Result<CommandResult>;
}

/// Registry for managing all available meta-commands
pub struct CommandRegistry {
    handlers: Vec<Box<dyn CommandHandler>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: Vec::new(),
        };

        registry.register(Box::new(RunCommand));
        registry.register(Box::new(ContextCommand));
        registry.register(Box::new(FilesCommand));
        registry.register(Box::new(ClearCommand));
        registry.register(Box::new(ChatCommand));
        registry.register(Box::new(HelpCommand));
        registry.register(Box::new(ExitCommand));

        registry
    }

    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.push(handler);
    }

    fn find(&self, command: &str) -> Option<&dyn CommandHandler> {
        self.handlers
            .iter()
            .find(|h| h.name() == command || h.aliases().contains(&command))
            .map(|h| h.as_ref())
    }

    /// Whether `input` should be handled here rather than sent to the model.
    /// The first word must name a known command. Bare aliases such as `exit`
    /// only count when typed alone, so `/var/log is full` and
    /// `help me find large files` stay queries.
    pub fn is_command(&self, input: &str) -> bool {
        let input = input.trim();
        let (first, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
        let name = first.to_lowercase();
        self.find(&name).is_some() && (name.starts_with('/') || rest.trim().is_empty())
    }

    /// Dispatches a meta-command line. Unknown commands are reported as an
    /// error result.
    pub async fn execute(&self, input: &str, controller: &mut ConversationController) -> Result<CommandResult> {
        let input = input.trim();
        let (command, arg) = match input.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (input, ""),
        };
        let command = command.to_lowercase();

        if command == "/help" || command == "help" {
            return Ok(CommandResult::success(self.get_help()));
        }

        match self.find(&command) {
            Some(handler) => handler.execute(arg, controller).await,
            None => Ok(CommandResult::error(format!(
                "Unknown command: {}. Type '/help' for available commands.",
                command
            ))),
        }
    }

    pub fn get_help(&self) -> String {
        let mut help = String::new();
        help.push_str(&format!("{}\n", "─".repeat(60).bright_blue()));
        help.push_str(&format!("{}\n", "smartcli Commands".bright_white().bold()));
        help.push_str(&format!("{}\n\n", "─".repeat(60).bright_blue()));

        for handler in &self.handlers {
            help.push_str(&format!("  {} - {}\n", handler.usage().cyan(), handler.description()));
        }

        help.push_str(&format!("\n{}:\n", "Queries".bright_yellow().bold()));
        help.push_str(&format!(
            "  {} - {}\n",
            "Type any request".cyan(),
            "The assistant suggests one shell command for it"
        ));
        help.push_str(&format!(
            "  {}\n",
            "Answer with y (run), yy (run and analyze), c (edit first) or n (skip)".dimmed()
        ));

        help
    }
}

struct RunCommand;

#[async_trait]
impl CommandHandler for RunCommand {
    fn name(&self) -> &str {
        "/run"
    }
    fn usage(&self) -> &str {
        "/run <command>"
    }
    fn description(&self) -> &str {
        "Run a shell command directly and record its output"
    }
    async fn execute(&self, arg: &str, controller: &mut ConversationController) -> Result<CommandResult> {
        if arg.is_empty() {
            return Ok(CommandResult::error("Usage: /run <shell_command_here>".to_string()));
        }

        match controller.run_direct(arg).await {
            Ok(result) => {
                let mut output = result.combined_output();
                if !result.succeeded {
                    output.push_str(&format!("\n{}", format!("exit code {}", result.exit_code).red()));
                }
                Ok(CommandResult::success(output))
            }
            Err(e) => Ok(CommandResult::error(e.to_string())),
        }
    }
}

struct ContextCommand;

#[async_trait]
impl CommandHandler for ContextCommand {
    fn name(&self) -> &str {
        "/context"
    }
    fn usage(&self) -> &str {
        "/context"
    }
    fn description(&self) -> &str {
        "Show history size, token estimate and files in context"
    }
    async fn execute(&self, _arg: &str, controller: &mut ConversationController) -> Result<CommandResult> {
        let context = controller.context();
        let mut output = format!(
            "{} {} messages, ~{} of {} tokens",
            "History:".bright_blue().bold(),
            context.len(),
            context.estimate_tokens(),
            context.token_budget()
        );
        if context.is_over_budget() {
            output.push_str(&format!("\n{}", "Over budget. Use /clear to continue.".red()));
        }
        output.push_str(&format!("\n{}", list_files(controller)));
        Ok(CommandResult::success(output))
    }
}

struct FilesCommand;

#[async_trait]
impl CommandHandler for FilesCommand {
    fn name(&self) -> &str {
        "/files"
    }
    fn usage(&self) -> &str {
        "/files [path...]"
    }
    fn description(&self) -> &str {
        "Replace the file context with the given files, or list it"
    }
    async fn execute(&self, arg: &str, controller: &mut ConversationController) -> Result<CommandResult> {
        if arg.is_empty() {
            return Ok(CommandResult::success(list_files(controller)));
        }

        let paths: Vec<&str> = arg.split_whitespace().collect();
        let failures = controller.replace_files(&paths);
        if failures.is_empty() {
            return Ok(CommandResult::success(list_files(controller)));
        }

        let errors: Vec<String> = failures
            .iter()
            .map(|(path, e)| format!("{}: {:#}", path, e))
            .collect();
        Ok(CommandResult::error(format!(
            "Some files could not be added:\n{}\n{}",
            errors.join("\n"),
            list_files(controller)
        )))
    }
}

fn list_files(controller: &ConversationController) -> String {
    let files = controller.context().files();
    if files.is_empty() {
        return format!("{} none", "Files:".bright_blue().bold());
    }
    let mut out = format!("{}", "Files:".bright_blue().bold());
    for (path, content) in files {
        out.push_str(&format!("\n  {} {}", path.cyan(), format!("({} bytes)", content.len()).dimmed()));
    }
    out
}

struct ClearCommand;

#[async_trait]
impl CommandHandler for ClearCommand {
    fn name(&self) -> &str {
        "/clear"
    }
    fn usage(&self) -> &str {
        "/clear"
    }
    fn description(&self) -> &str {
        "Clear conversation history and file context"
    }
    async fn execute(&self, _arg: &str, controller: &mut ConversationController) -> Result<CommandResult> {
        controller.clear();
        Ok(CommandResult::success("Context cleared".to_string()))
    }
}

struct ChatCommand;

#[async_trait]
impl CommandHandler for ChatCommand {
    fn name(&self) -> &str {
        "/chat"
    }
    fn usage(&self) -> &str {
        "/chat"
    }
    fn description(&self) -> &str {
        "Talk freely with the model; 'exit' or 'back' returns here"
    }
    async fn execute(&self, _arg: &str, controller: &mut ConversationController) -> Result<CommandResult> {
        println!("{}", "Chat mode. Type 'exit' or 'back' to return.".cyan());
        let mut session = controller.chat_session();

        while let Some(line) = read_chat_line()? {
            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            if ChatSession::is_leave(message) {
                break;
            }
            if session.is_long() {
                println!(
                    "{}",
                    "Chat history is long. Replies may lose track; leave and re-enter to start fresh.".yellow()
                );
            }
            match controller.chat(&mut session, message).await {
                Ok(reply) => render_markdown(&reply),
                Err(e) => println!("{} {}", "Model unavailable:".red().bold(), e),
            }
            println!();
        }

        let summary = if session.is_empty() {
            "Left chat mode".to_string()
        } else {
            format!("Left chat mode after {} messages", session.len())
        };
        Ok(CommandResult::success(summary.dimmed().to_string()))
    }
}

struct HelpCommand;

// Output is built by the registry, which knows every handler.
#[async_trait]
impl CommandHandler for HelpCommand {
    fn name(&self) -> &str {
        "/help"
    }
    fn aliases(&self) -> &[&str] {
        &["help"]
    }
    fn usage(&self) -> &str {
        "/help"
    }
    fn description(&self) -> &str {
        "Show this help"
    }
    async fn execute(&self, _arg: &str, _controller: &mut ConversationController) -> Result<CommandResult> {
        Ok(CommandResult::success(String::new()))
    }
}

struct ExitCommand;

#[async_trait]
impl CommandHandler for ExitCommand {
    fn name(&self) -> &str {
        "/exit"
    }
    fn aliases(&self) -> &[&str] {
        &["/quit", "exit", "quit"]
    }
    fn usage(&self) -> &str {
        "/exit"
    }
    fn description(&self) -> &str {
        "End the session"
    }
    async fn execute(&self, _arg: &str, _controller: &mut ConversationController) -> Result<CommandResult> {
        Ok(CommandResult::exit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;

    use crate::context::{ChatMessage, ContextManager};
    use crate::error::{ExecutionError, InputError, LlmTransportError};
    use crate::llm::LlmClient;
    use crate::prompts::{PromptFormatter, PromptsConfig, DEFAULT_FILE_CHAR_LIMIT};
    use crate::security::{
        CommandValidator, ExecutionGate, ExecutionResult, Prompter, RiskLevel, ShellRunner,
    };
    use crate::cmd_parser::CommandSuggestion;

    struct NoLlm;

    #[async_trait]
    impl LlmClient for NoLlm {
        fn name(&self) -> &str {
            "none"
        }
        async fn generate(&self, _: &str, _: &[ChatMessage]) -> Result<String, LlmTransportError> {
            panic!("meta-commands never call the model");
        }
    }

    struct NoPrompter;

    impl Prompter for NoPrompter {
        fn choose_action(&mut self, _: &CommandSuggestion, _: RiskLevel) -> Result<String, InputError> {
            Err(InputError::Interrupted)
        }
        fn edit_command(&mut self, _: &str) -> Result<String, InputError> {
            Err(InputError::Interrupted)
        }
        fn confirm_pre_command(&mut self, _: &str, _: &str) -> Result<bool, InputError> {
            Err(InputError::Interrupted)
        }
    }

    struct EchoRunner;

    #[async_trait]
    impl ShellRunner for EchoRunner {
        async fn run(&self, command: &str) -> Result<ExecutionResult, ExecutionError> {
            Ok(ExecutionResult {
                stdout: format!("echo: {}", command),
                stderr: String::new(),
                exit_code: 0,
                succeeded: true,
            })
        }
    }

    fn controller() -> ConversationController {
        ConversationController::new(
            ContextManager::new(),
            PromptFormatter::new(PromptsConfig::default(), "Linux", DEFAULT_FILE_CHAR_LIMIT),
            Box::new(NoLlm),
            CommandValidator::unrestricted(),
            ExecutionGate::new(Box::new(NoPrompter), Box::new(EchoRunner)),
        )
    }

    #[test]
    fn test_is_command() {
        let registry = CommandRegistry::new();
        assert!(registry.is_command("/clear"));
        assert!(registry.is_command("/run ls -la"));
        assert!(registry.is_command("/chat"));
        assert!(registry.is_command("exit"));
        assert!(registry.is_command("  QUIT "));
        assert!(registry.is_command("help"));
        assert!(!registry.is_command("help me find large files"));
        assert!(!registry.is_command("list docker containers"));
        assert!(!registry.is_command("exit vim without saving"));
    }

    #[test]
    fn test_path_like_queries_go_to_the_model() {
        let registry = CommandRegistry::new();
        assert!(!registry.is_command("/var/log is full, clean old logs"));
        assert!(!registry.is_command("/etc/hosts: add an entry for db"));
        assert!(!registry.is_command("/nonsense"));
    }

    #[tokio::test]
    async fn test_exit_aliases() {
        let registry = CommandRegistry::new();
        let mut controller = controller();
        for input in ["/exit", "/quit", "exit", "quit"] {
            let result = registry.execute(input, &mut controller).await.unwrap();
            assert!(result.exit, "{} should exit", input);
        }
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let registry = CommandRegistry::new();
        let result = registry.execute("/frobnicate", &mut controller()).await.unwrap();
        assert!(!result.success);
        assert!(!result.exit);
        assert!(result.error.unwrap().contains("/frobnicate"));
    }

    #[tokio::test]
    async fn test_help_lists_commands() {
        let registry = CommandRegistry::new();
        let result = registry.execute("help", &mut controller()).await.unwrap();
        for name in ["/run", "/context", "/files", "/clear", "/chat", "/exit"] {
            assert!(result.output.contains(name));
        }
    }

    #[tokio::test]
    async fn test_run_records_output() {
        let registry = CommandRegistry::new();
        let mut controller = controller();

        let result = registry.execute("/run", &mut controller).await.unwrap();
        assert!(!result.success);

        let result = registry.execute("/run uname -a", &mut controller).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "echo: uname -a");
        assert_eq!(controller.context().len(), 1);
    }

    #[tokio::test]
    async fn test_files_and_clear() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[package]").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let registry = CommandRegistry::new();
        let mut controller = controller();

        let result = registry
            .execute(&format!("/files {}", path), &mut controller)
            .await
            .unwrap();
        assert!(result.success);
        assert!(controller.context().is_file_in_context(&path));

        let result = registry
            .execute("/files /definitely/not/here.txt", &mut controller)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("/definitely/not/here.txt"));

        registry.execute(&format!("/files {}", path), &mut controller).await.unwrap();
        registry.execute("/run ls", &mut controller).await.unwrap();
        registry.execute("/clear", &mut controller).await.unwrap();
        assert!(controller.context().files().is_empty());
        assert!(controller.context().is_empty());
    }

    #[tokio::test]
    async fn test_context_summary() {
        let registry = CommandRegistry::new();
        let mut controller = controller();
        registry.execute("/run ls", &mut controller).await.unwrap();
        let result = registry.execute("/context", &mut controller).await.unwrap();
        assert!(result.output.contains("1 messages"));
        assert!(result.output.contains("of 3500 tokens"));
    }
}
