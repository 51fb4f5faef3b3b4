use crate::cmd_parser::CommandSuggestion;
use crate::error::{ExecutionError, InputError, LlmTransportError, ParseError, ValidationError};
use crate::security::ExecutionResult;

/// Where the controller is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    AwaitingQuery,
    AwaitingModel,
    AwaitingFollowUpInfo,
    AwaitingConfirmation,
    Executing,
}

/// Result of the optional analysis pass after `RunAndAnalyze`.
#[derive(Debug)]
pub enum Analysis {
    Done(String),
    Failed(LlmTransportError),
    /// The command's output pushed history over the token budget.
    OverBudget { used: usize, budget: usize },
}

/// How a turn ended. Every variant leaves the controller in `Idle`.
#[derive(Debug)]
pub enum TurnOutcome {
    /// History is over the token budget; the model was not called.
    BudgetExceeded { used: usize, budget: usize },
    TransportFailed(LlmTransportError),
    ParseFailed(ParseError),
    /// The model needs an answer from the user before it can continue.
    Question { explanation: String, question: String },
    /// Parsed fine but carried neither a command nor a question.
    NoCommand { explanation: String },
    /// The allow-list rejected the command; it is still shown.
    Blocked {
        suggestion: CommandSuggestion,
        error: ValidationError,
    },
    Skipped { suggestion: CommandSuggestion },
    /// The user refused to run the model's inspection command.
    FollowUpDeclined { pre_command: String },
    /// The model asked for more output after its one follow-up round.
    FollowUpExhausted { suggestion: CommandSuggestion },
    Executed {
        command: String,
        result: ExecutionResult,
        analysis: Option<Analysis>,
    },
    ExecutionFailed(ExecutionError),
    InputFailed(InputError),
    Interrupted,
}

impl TurnOutcome {
    pub fn executed_command(&self) -> Option<&str> {
        match self {
            TurnOutcome::Executed { command, .. } => Some(command),
            _ => None,
        }
    }
}
