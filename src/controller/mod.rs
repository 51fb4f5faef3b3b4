// Request / response / execute loop for one user query at a time.
//
// The controller is the only owner of the conversation context and file
// context. Each call to `handle_query` runs one turn to completion and
// leaves the controller in `Idle`.

mod types;

use std::future::Future;

use tracing::{debug, info, warn};

pub use types::{Analysis, ControllerState, TurnOutcome};

use crate::chat::ChatSession;
use crate::cmd_parser::{self, CommandSuggestion};
use crate::context::{ChatMessage, ContextManager};
use crate::error::{ExecutionError, InputError, LlmTransportError};
use crate::llm::LlmClient;
use crate::prompts::PromptFormatter;
use crate::security::{Action, CommandValidator, ExecutionGate, ExecutionResult};

pub struct ConversationController {
    context: ContextManager,
    formatter: PromptFormatter,
    llm: Box<dyn LlmClient>,
    validator: CommandValidator,
    gate: ExecutionGate,
    state: ControllerState,
    trace: Vec<ControllerState>,
    pending_question: Option<String>,
}

impl ConversationController {
    pub fn new(
        context: ContextManager,
        formatter: PromptFormatter,
        llm: Box<dyn LlmClient>,
        validator: CommandValidator,
        gate: ExecutionGate,
    ) -> Self {
        Self {
            context,
            formatter,
            llm,
            validator,
            gate,
            state: ControllerState::Idle,
            trace: vec![ControllerState::Idle],
            pending_question: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// States visited during the most recent turn, in order.
    pub fn last_trace(&self) -> &[ControllerState] {
        &self.trace
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn provider_name(&self) -> &str {
        self.llm.name()
    }

    /// Question the model asked in the previous turn, if any.
    pub fn pending_question(&self) -> Option<&str> {
        self.pending_question.as_deref()
    }

    /// Resets history, file context and any pending question together.
    pub fn clear(&mut self) {
        self.context.clear();
        self.pending_question = None;
        info!("session cleared");
    }

    pub fn replace_files(&mut self, paths: &[&str]) -> Vec<(String, anyhow::Error)> {
        self.context.replace_files(paths)
    }

    fn transition(&mut self, next: ControllerState) {
        debug!(from = ?self.state, to = ?next, "transition");
        self.state = next;
        self.trace.push(next);
    }

    fn finish(&mut self, outcome: TurnOutcome) -> TurnOutcome {
        if self.state != ControllerState::Idle {
            self.transition(ControllerState::Idle);
        }
        outcome
    }

    /// Runs `handle_query` but abandons it as soon as `interrupt` resolves.
    ///
    /// Dropping the turn discards any partial model reply and kills a
    /// running child process. Context entries already appended stay, and
    /// nothing is half-written since every append is a single push.
    pub async fn handle_query_until<F>(&mut self, query: &str, interrupt: F) -> TurnOutcome
    where
        F: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            outcome = self.handle_query(query) => outcome,
            _ = interrupt => TurnOutcome::Interrupted,
        };
        if matches!(outcome, TurnOutcome::Interrupted) {
            warn!("turn interrupted");
            return self.finish(TurnOutcome::Interrupted);
        }
        outcome
    }

    pub async fn handle_query(&mut self, query: &str) -> TurnOutcome {
        let query = query.trim();
        self.trace.clear();
        self.trace.push(self.state);
        self.transition(ControllerState::AwaitingQuery);
        self.pending_question = None;

        let history = self.context.snapshot();
        self.context.append(ChatMessage::user(query));

        if let Err(outcome) = self.check_budget() {
            return self.finish(outcome);
        }

        self.transition(ControllerState::AwaitingModel);
        let mut suggestion = match self.ask_model(query, None, history).await {
            Ok(s) => s,
            Err(outcome) => return self.finish(outcome),
        };

        if suggestion.is_incomplete() {
            return self.ask_user(suggestion);
        }

        if suggestion.wants_output() {
            suggestion = match self.follow_up(query, suggestion).await {
                Ok(s) => s,
                Err(outcome) => return self.finish(outcome),
            };
            if suggestion.is_incomplete() {
                return self.ask_user(suggestion);
            }
            if suggestion.wants_output() && !suggestion.has_command() {
                warn!("model requested output again after its follow-up round");
                return self.finish(TurnOutcome::FollowUpExhausted { suggestion });
            }
        }

        if suggestion.is_declined() {
            return self.finish(TurnOutcome::NoCommand {
                explanation: suggestion.explanation,
            });
        }

        if let Err(error) = self.validator.check(&suggestion.command) {
            warn!(%error, "suggestion blocked");
            return self.finish(TurnOutcome::Blocked { suggestion, error });
        }

        self.transition(ControllerState::AwaitingConfirmation);
        let action = match self.gate.decide(&suggestion) {
            Ok(action) => action,
            Err(e) => return self.finish(input_outcome(e)),
        };

        let (command, analyze) = match action {
            Action::Skip => return self.finish(TurnOutcome::Skipped { suggestion }),
            Action::Run => (suggestion.command.clone(), false),
            Action::RunAndAnalyze => (suggestion.command.clone(), true),
            Action::EditThenRun(edited) => {
                if let Err(error) = self.validator.check(&edited) {
                    warn!(%error, "edited command blocked");
                    let suggestion = CommandSuggestion {
                        command: edited,
                        ..suggestion
                    };
                    return self.finish(TurnOutcome::Blocked { suggestion, error });
                }
                (edited, false)
            }
        };

        self.transition(ControllerState::Executing);
        let outcome = self.execute(command, analyze).await;
        self.finish(outcome)
    }

    /// Every model call is refused once history is over budget.
    fn check_budget(&self) -> Result<(), TurnOutcome> {
        if !self.context.is_over_budget() {
            return Ok(());
        }
        let used = self.context.estimate_tokens();
        let budget = self.context.token_budget();
        warn!(used, budget, "token budget exceeded, model not called");
        Err(TurnOutcome::BudgetExceeded { used, budget })
    }

    /// Renders, sends and parses one model round. The raw reply is recorded
    /// even when it fails to parse; a failed call records nothing.
    async fn ask_model(
        &mut self,
        query: &str,
        prior_output: Option<&str>,
        history: Vec<ChatMessage>,
    ) -> Result<CommandSuggestion, TurnOutcome> {
        let files = Some(self.context.files()).filter(|f| !f.is_empty());
        let prompt = self.formatter.render(query, prior_output, files);

        let reply = self
            .generate(&prompt, history)
            .await
            .map_err(TurnOutcome::TransportFailed)?;
        self.context.append(ChatMessage::assistant(reply.clone()));

        cmd_parser::parse_suggestion(&reply).map_err(|e| {
            warn!(reason = %e.reason, "could not parse model reply");
            TurnOutcome::ParseFailed(e)
        })
    }

    async fn generate(
        &self,
        prompt: &str,
        history: Vec<ChatMessage>,
    ) -> Result<String, LlmTransportError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.formatter.system_prompt()));
        messages.extend(history);

        info!(provider = self.llm.name(), history = messages.len(), "calling model");
        self.llm.generate(prompt, &messages).await
    }

    /// The single follow-up round: run the inspection command with the
    /// user's permission and ask again with its output.
    async fn follow_up(
        &mut self,
        query: &str,
        suggestion: CommandSuggestion,
    ) -> Result<CommandSuggestion, TurnOutcome> {
        self.transition(ControllerState::AwaitingFollowUpInfo);
        let pre_command = suggestion.pre_command.clone();

        match self.gate.permit_pre_command(&suggestion) {
            Ok(true) => {}
            Ok(false) => return Err(TurnOutcome::FollowUpDeclined { pre_command }),
            Err(e) => return Err(input_outcome(e)),
        }

        let inspection = CommandSuggestion {
            command: pre_command.clone(),
            ..suggestion
        };
        if let Err(error) = self.validator.check(&pre_command) {
            return Err(TurnOutcome::Blocked {
                suggestion: inspection,
                error,
            });
        }

        let result = self
            .gate
            .execute(&pre_command)
            .await
            .map_err(TurnOutcome::ExecutionFailed)?;
        self.context
            .append(ChatMessage::system(result.to_context_entry(&pre_command)));
        self.check_budget()?;

        self.transition(ControllerState::AwaitingModel);
        let history = self.context.snapshot();
        self.ask_model(query, Some(&result.combined_output()), history).await
    }

    fn ask_user(&mut self, suggestion: CommandSuggestion) -> TurnOutcome {
        self.pending_question = Some(suggestion.next_question.clone());
        self.finish(TurnOutcome::Question {
            explanation: suggestion.explanation,
            question: suggestion.next_question,
        })
    }

    async fn execute(&mut self, command: String, analyze: bool) -> TurnOutcome {
        let result = match self.record_execution(&command).await {
            Ok(result) => result,
            Err(e) => return TurnOutcome::ExecutionFailed(e),
        };

        let analysis = if analyze {
            Some(self.analyze(&command, &result).await)
        } else {
            None
        };

        TurnOutcome::Executed {
            command,
            result,
            analysis,
        }
    }

    async fn record_execution(&mut self, command: &str) -> Result<ExecutionResult, ExecutionError> {
        match self.gate.execute(command).await {
            Ok(result) => {
                self.context
                    .append(ChatMessage::system(result.to_context_entry(command)));
                Ok(result)
            }
            Err(e) => {
                self.context.append(ChatMessage::system(format!("Command: {}\n{}", command, e)));
                Err(e)
            }
        }
    }

    /// Second, independent prompt cycle over an execution result. The reply
    /// is free text and is not parsed.
    async fn analyze(&mut self, command: &str, result: &ExecutionResult) -> Analysis {
        if let Err(TurnOutcome::BudgetExceeded { used, budget }) = self.check_budget() {
            return Analysis::OverBudget { used, budget };
        }
        let prompt = self
            .formatter
            .render_analysis(command, &result.stdout, &result.stderr);
        let history = self.context.snapshot();
        match self.generate(&prompt, history).await {
            Ok(text) => {
                self.context.append(ChatMessage::assistant(text.clone()));
                Analysis::Done(text)
            }
            Err(e) => {
                warn!(error = %e, "analysis failed");
                Analysis::Failed(e)
            }
        }
    }

    /// Runs a user-typed command directly, outside the state machine, and
    /// records the result.
    pub async fn run_direct(&mut self, command: &str) -> Result<ExecutionResult, ExecutionError> {
        self.record_execution(command).await
    }

    /// Starts a chat session with the same budget as the command history.
    pub fn chat_session(&self) -> ChatSession {
        ChatSession::new(self.context.token_budget())
    }

    /// Sends one chat message. The command history is not touched.
    pub async fn chat(&self, session: &mut ChatSession, message: &str) -> Result<String, LlmTransportError> {
        session
            .send(self.llm.as_ref(), &self.formatter.system_prompt(), message)
            .await
    }
}

fn input_outcome(e: InputError) -> TurnOutcome {
    match e {
        InputError::Interrupted => TurnOutcome::Interrupted,
        other => TurnOutcome::InputFailed(other),
    }
}
