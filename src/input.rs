use std::borrow::Cow;

use colored::*;
use reedline::{
    default_vi_insert_keybindings, default_vi_normal_keybindings, EditCommand, KeyCode, KeyModifiers, Prompt,
    PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus, PromptViMode, Reedline, ReedlineEvent, Signal,
    Vi,
};

use crate::cmd_parser::CommandSuggestion;
use crate::error::InputError;
use crate::security::{Prompter, RiskLevel};

/// Prompt with an optional label on the left, e.g. a follow-up question.
pub struct SmartPrompt {
    label: String,
}

impl SmartPrompt {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }

    pub fn plain() -> Self {
        Self::new("")
    }
}

impl Prompt for SmartPrompt {
    fn render_prompt_left(&self) -> Cow<str> {
        self.label.as_str().into()
    }

    fn render_prompt_right(&self) -> Cow<str> {
        "".into()
    }

    fn render_prompt_indicator(&self, edit_mode: PromptEditMode) -> Cow<str> {
        match edit_mode {
            PromptEditMode::Vi(PromptViMode::Normal) => "[N] ".dimmed().to_string().into(),
            PromptEditMode::Vi(PromptViMode::Insert) => "› ".green().to_string().into(),
            _ => "› ".bright_green().bold().to_string().into(),
        }
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        "... ".dimmed().to_string().into()
    }

    fn render_prompt_history_search_indicator(&self, history_search: PromptHistorySearch) -> Cow<str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        format!("({}reverse-search: {}) ", prefix, history_search.term).into()
    }
}

fn vi_editor() -> Reedline {
    let mut normal_keybindings = default_vi_normal_keybindings();
    let mut insert_keybindings = default_vi_insert_keybindings();

    // Ctrl+L clears the screen in both modes
    normal_keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('l'), ReedlineEvent::ClearScreen);
    insert_keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('l'), ReedlineEvent::ClearScreen);

    Reedline::create().with_edit_mode(Box::new(Vi::new(insert_keybindings, normal_keybindings)))
}

fn read_signal(editor: &mut Reedline, prompt: &SmartPrompt) -> Result<String, InputError> {
    match editor.read_line(prompt)? {
        Signal::Success(buffer) => Ok(buffer),
        _ => Err(InputError::Interrupted),
    }
}

/// Line editor for user queries. Keeps its own in-memory history.
pub struct QueryReader {
    editor: Reedline,
}

impl QueryReader {
    pub fn new() -> Self {
        Self { editor: vi_editor() }
    }

    /// Reads the next query. `None` means the user asked to leave with
    /// Ctrl-C or Ctrl-D.
    pub fn read(&mut self, pending_question: Option<&str>) -> Result<Option<String>, InputError> {
        let prompt = match pending_question {
            Some(q) => SmartPrompt::new(format!("{} ", q.bright_yellow())),
            None => SmartPrompt::plain(),
        };
        match read_signal(&mut self.editor, &prompt) {
            Ok(line) => Ok(Some(line)),
            Err(InputError::Interrupted) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Reads one line in chat mode. `None` on Ctrl-C or Ctrl-D.
pub fn read_chat_line() -> Result<Option<String>, InputError> {
    match read_signal(&mut vi_editor(), &SmartPrompt::new("You".bright_magenta().to_string())) {
        Ok(line) => Ok(Some(line)),
        Err(InputError::Interrupted) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Confirmation prompts on the terminal. Each prompt gets a fresh editor so
/// choices never end up in the query history.
#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for ConsolePrompter {
    fn choose_action(&mut self, suggestion: &CommandSuggestion, risk: RiskLevel) -> Result<String, InputError> {
        println!();
        if !suggestion.explanation.is_empty() {
            println!("{} {}", "Explanation:".bright_blue().bold(), suggestion.explanation);
        }
        println!(
            "{} {}  {}",
            "Command:".bright_blue().bold(),
            suggestion.command.bright_cyan(),
            format!("{} {:?} risk", risk.symbol(), risk).color(risk.color())
        );
        println!(
            "{}",
            "[y] run  [yy] run and analyze  [c] edit  [n] skip".dimmed()
        );

        read_signal(&mut Reedline::create(), &SmartPrompt::new("Choice"))
    }

    fn edit_command(&mut self, initial: &str) -> Result<String, InputError> {
        let mut editor = Reedline::create();
        editor.run_edit_commands(&[EditCommand::InsertString(initial.to_string())]);
        read_signal(&mut editor, &SmartPrompt::new("Edit"))
    }

    fn confirm_pre_command(&mut self, pre_command: &str, explanation: &str) -> Result<bool, InputError> {
        println!();
        if !explanation.is_empty() {
            println!("{} {}", "Explanation:".bright_blue().bold(), explanation);
        }
        println!(
            "{} {}",
            "The assistant needs the output of:".yellow(),
            pre_command.bright_cyan()
        );
        let answer = read_signal(&mut Reedline::create(), &SmartPrompt::new("Run it? [y/N]"))?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_label() {
        let prompt = SmartPrompt::new("Which image?");
        assert_eq!(prompt.render_prompt_left(), "Which image?");
        assert_eq!(SmartPrompt::plain().render_prompt_left(), "");
    }
}
