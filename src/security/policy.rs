// Allow-list gate for suggested commands.
//
// This is a coarse safety net, not a sandbox. Only the start of the command
// string is inspected: shell metacharacters, pipes, `&&`/`;` chaining and
// subshells are not parsed, so `docker ps; rm -rf ~` passes an allow-list
// containing `docker`. Anything that gets past this check and is confirmed
// by the user runs with the user's full privileges.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How the validator treats commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMode {
    /// No allow-list configured: everything passes.
    Unrestricted,
    /// Only commands matching an entry pass.
    AllowList(BTreeSet<String>),
}

#[derive(Debug, Clone)]
pub struct CommandValidator {
    mode: ValidationMode,
}

impl CommandValidator {
    /// An empty `allow_list` selects `ValidationMode::Unrestricted`.
    pub fn new<I, S>(allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: BTreeSet<String> = allow_list
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mode = if entries.is_empty() {
            ValidationMode::Unrestricted
        } else {
            ValidationMode::AllowList(entries)
        };
        Self { mode }
    }

    pub fn unrestricted() -> Self {
        Self {
            mode: ValidationMode::Unrestricted,
        }
    }

    pub fn check(&self, command: &str) -> Result<(), ValidationError> {
        match &self.mode {
            ValidationMode::Unrestricted => Ok(()),
            ValidationMode::AllowList(entries) => {
                if is_allowed(command, entries) {
                    Ok(())
                } else {
                    Err(ValidationError {
                        command: command.to_string(),
                        program: first_token(command).to_string(),
                    })
                }
            }
        }
    }
}

/// True when `command` starts with an entry of `allow_list`, either as its
/// first whitespace-delimited token or as a literal prefix (so an entry
/// like `git status` admits `git status --short`). An empty list admits
/// everything.
pub fn is_allowed(command: &str, allow_list: &BTreeSet<String>) -> bool {
    if allow_list.is_empty() {
        return true;
    }

    let command = command.trim_start();
    let program = first_token(command);
    allow_list
        .iter()
        .any(|entry| entry == program || (entry.contains(char::is_whitespace) && starts_with_words(command, entry)))
}

fn first_token(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

// Literal prefix ending on a word boundary, so `git st` does not admit
// `git stash`.
fn starts_with_words(command: &str, prefix: &str) -> bool {
    command.starts_with(prefix)
        && command[prefix.len()..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace)
}
