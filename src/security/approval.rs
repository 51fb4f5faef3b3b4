// Human confirmation of suggested commands.

use std::str::FromStr;

use colored::Color;
use tracing::debug;

use crate::cmd_parser::CommandSuggestion;
use crate::error::{ExecutionError, InputError};
use super::executor::{ExecutionResult, ShellRunner};

/// What the user chose to do with a suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run,
    RunAndAnalyze,
    /// Carries the edited command line.
    EditThenRun(String),
    Skip,
}

/// A single keystroke or line typed at the confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Run,
    RunAndAnalyze,
    Edit,
    Skip,
}

impl FromStr for Choice {
    type Err = std::convert::Infallible;

    /// Anything unrecognised, including an empty line, is `Skip`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "y" | "yes" | "r" | "run" => Choice::Run,
            "yy" | "a" | "analyze" => Choice::RunAndAnalyze,
            "c" | "e" | "edit" => Choice::Edit,
            _ => Choice::Skip,
        })
    }
}

/// Terminal side of the gate.
pub trait Prompter: Send + Sync {
    /// Shows `suggestion` and reads the user's choice as raw text.
    fn choose_action(&mut self, suggestion: &CommandSuggestion, risk: RiskLevel) -> Result<String, InputError>;

    /// Reads a line pre-filled with `initial`.
    fn edit_command(&mut self, initial: &str) -> Result<String, InputError>;

    /// Asks permission to run an inspection command the model requested.
    fn confirm_pre_command(&mut self, pre_command: &str, explanation: &str) -> Result<bool, InputError>;
}

/// Coarse, informational risk hint shown next to a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn assess(command: &str) -> Self {
        let mut tokens = command.split_whitespace();
        let program = tokens.next().unwrap_or("");
        let args: Vec<&str> = tokens.collect();

        let critical = ["rm", "sudo", "chmod", "chown", "mkfs", "dd", "shutdown", "reboot"];
        if critical.contains(&program) {
            return RiskLevel::Critical;
        }

        if args.iter().any(|a| *a == "--force" || *a == "-rf" || *a == "-fr") {
            return RiskLevel::High;
        }

        let medium = ["mv", "cp", "ln", "touch", "mkdir", "kill", "docker", "git"];
        if medium.contains(&program) || command.contains('>') {
            return RiskLevel::Medium;
        }

        RiskLevel::Low
    }

    pub fn color(&self) -> Color {
        match self {
            RiskLevel::Low => Color::Green,
            RiskLevel::Medium => Color::Yellow,
            RiskLevel::High => Color::BrightRed,
            RiskLevel::Critical => Color::Red,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            RiskLevel::Low => "✓",
            RiskLevel::Medium => "!",
            RiskLevel::High => "⚠",
            RiskLevel::Critical => "✗",
        }
    }
}

/// Collects a decision for each suggestion and runs what was approved.
pub struct ExecutionGate {
    prompter: Box<dyn Prompter>,
    runner: Box<dyn ShellRunner>,
}

impl ExecutionGate {
    pub fn new(prompter: Box<dyn Prompter>, runner: Box<dyn ShellRunner>) -> Self {
        Self { prompter, runner }
    }

    /// `EditThenRun` with an empty edit degrades to `Skip`.
    pub fn decide(&mut self, suggestion: &CommandSuggestion) -> Result<Action, InputError> {
        let risk = RiskLevel::assess(&suggestion.command);
        let raw = self.prompter.choose_action(suggestion, risk)?;
        let choice: Choice = raw.parse().unwrap_or(Choice::Skip);

        let action = match choice {
            Choice::Run => Action::Run,
            Choice::RunAndAnalyze => Action::RunAndAnalyze,
            Choice::Skip => Action::Skip,
            Choice::Edit => {
                let edited = self.prompter.edit_command(&suggestion.command)?;
                let edited = edited.trim();
                if edited.is_empty() {
                    Action::Skip
                } else {
                    Action::EditThenRun(edited.to_string())
                }
            }
        };
        debug!(?action, "decision");
        Ok(action)
    }

    pub fn permit_pre_command(&mut self, suggestion: &CommandSuggestion) -> Result<bool, InputError> {
        self.prompter
            .confirm_pre_command(&suggestion.pre_command, &suggestion.explanation)
    }

    pub async fn execute(&self, command: &str) -> Result<ExecutionResult, ExecutionError> {
        self.runner.run(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct ScriptedPrompter {
        choice: &'static str,
        edit: &'static str,
    }

    impl Prompter for ScriptedPrompter {
        fn choose_action(&mut self, _: &CommandSuggestion, _: RiskLevel) -> Result<String, InputError> {
            Ok(self.choice.to_string())
        }

        fn edit_command(&mut self, initial: &str) -> Result<String, InputError> {
            assert_eq!(initial, "docker ps");
            Ok(self.edit.to_string())
        }

        fn confirm_pre_command(&mut self, _: &str, _: &str) -> Result<bool, InputError> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct NullRunner {
        ran: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ShellRunner for NullRunner {
        async fn run(&self, command: &str) -> Result<ExecutionResult, ExecutionError> {
            self.ran.lock().unwrap().push(command.to_string());
            Ok(ExecutionResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                succeeded: true,
            })
        }
    }

    fn gate(choice: &'static str, edit: &'static str) -> ExecutionGate {
        ExecutionGate::new(
            Box::new(ScriptedPrompter { choice, edit }),
            Box::new(NullRunner::default()),
        )
    }

    fn suggestion() -> CommandSuggestion {
        CommandSuggestion {
            command: "docker ps".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_choice_parsing() {
        assert_eq!("y".parse::<Choice>().unwrap(), Choice::Run);
        assert_eq!(" YY ".parse::<Choice>().unwrap(), Choice::RunAndAnalyze);
        assert_eq!("c".parse::<Choice>().unwrap(), Choice::Edit);
        assert_eq!("n".parse::<Choice>().unwrap(), Choice::Skip);
        assert_eq!("".parse::<Choice>().unwrap(), Choice::Skip);
        assert_eq!("whatever".parse::<Choice>().unwrap(), Choice::Skip);
    }

    #[test]
    fn test_decide() {
        assert_eq!(gate("y", "").decide(&suggestion()).unwrap(), Action::Run);
        assert_eq!(gate("yy", "").decide(&suggestion()).unwrap(), Action::RunAndAnalyze);
        assert_eq!(gate("n", "").decide(&suggestion()).unwrap(), Action::Skip);
        assert_eq!(
            gate("c", " docker ps -a ").decide(&suggestion()).unwrap(),
            Action::EditThenRun("docker ps -a".to_string())
        );
    }

    #[test]
    fn test_empty_edit_degrades_to_skip() {
        assert_eq!(gate("c", "   ").decide(&suggestion()).unwrap(), Action::Skip);
    }

    #[tokio::test]
    async fn test_execute_delegates_to_runner() {
        let runner = NullRunner::default();
        let ran = runner.ran.clone();
        let gate = ExecutionGate::new(
            Box::new(ScriptedPrompter { choice: "y", edit: "" }),
            Box::new(runner),
        );
        gate.execute("docker ps").await.unwrap();
        assert_eq!(*ran.lock().unwrap(), vec!["docker ps".to_string()]);
    }

    #[test]
    fn test_risk_assessment() {
        assert_eq!(RiskLevel::assess("rm -rf /"), RiskLevel::Critical);
        assert_eq!(RiskLevel::assess("git push --force"), RiskLevel::High);
        assert_eq!(RiskLevel::assess("mv a b"), RiskLevel::Medium);
        assert_eq!(RiskLevel::assess("echo hi > out.txt"), RiskLevel::Medium);
        assert_eq!(RiskLevel::assess("ls -la"), RiskLevel::Low);
    }
}
