use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_TOKEN_BUDGET: usize = 3500;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One entry of the conversation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Whitespace-delimited word count.
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Captured file contents keyed by path.
pub type FileContext = BTreeMap<String, String>;

/// Conversation history plus the files loaded for this session.
///
/// The token estimate is a word count, not a real tokenizer. It is
/// recomputed on every call so it can never go stale across appends.
pub struct ContextManager {
    history: Vec<ChatMessage>,
    files: FileContext,
    token_budget: usize,
    max_file_bytes: u64,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TOKEN_BUDGET, DEFAULT_MAX_FILE_BYTES)
    }

    pub fn with_limits(token_budget: usize, max_file_bytes: u64) -> Self {
        Self {
            history: Vec::new(),
            files: FileContext::new(),
            token_budget,
            max_file_bytes,
        }
    }

    pub fn append(&mut self, message: ChatMessage) {
        debug!(role = message.role.as_str(), words = message.word_count(), "context append");
        self.history.push(message);
    }

    pub fn estimate_tokens(&self) -> usize {
        self.history.iter().map(ChatMessage::word_count).sum()
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    pub fn is_over_budget(&self) -> bool {
        self.estimate_tokens() > self.token_budget
    }

    /// Drops history and file context together.
    pub fn clear(&mut self) {
        self.history.clear();
        self.files.clear();
        debug!("context cleared");
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.history.clone()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn files(&self) -> &FileContext {
        &self.files
    }

    pub fn is_file_in_context(&self, file_path: &str) -> bool {
        self.files.contains_key(file_path)
    }

    /// Reads at most `max_file_bytes` of `file_path` into the file context.
    /// Returns the number of bytes captured.
    pub fn add_file(&mut self, file_path: &str) -> anyhow::Result<usize> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path))?;
        let mut bytes = Vec::new();
        file.take(self.max_file_bytes)
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read file: {}", file_path))?;

        // The cap can land inside a multi-byte character; drop the partial tail.
        if let Err(e) = std::str::from_utf8(&bytes) {
            if e.error_len().is_none() {
                bytes.truncate(e.valid_up_to());
            }
        }

        let captured = bytes.len();
        self.files
            .insert(file_path.to_string(), String::from_utf8_lossy(&bytes).into_owned());
        debug!(path = file_path, bytes = captured, "file added to context");
        Ok(captured)
    }

    /// Replaces the file context with `paths`. Files that fail to load are
    /// skipped and reported back alongside their error.
    pub fn replace_files(&mut self, paths: &[&str]) -> Vec<(String, anyhow::Error)> {
        self.files.clear();
        let mut failures = Vec::new();
        for path in paths {
            if let Err(e) = self.add_file(path) {
                failures.push((path.to_string(), e));
            }
        }
        failures
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_estimate_counts_whitespace_words() {
        let mut cm = ContextManager::new();
        cm.append(ChatMessage::user("list   docker\ncontainers"));
        cm.append(ChatMessage::assistant("  docker ps "));
        assert_eq!(cm.estimate_tokens(), 5);

        cm.append(ChatMessage::system(""));
        assert_eq!(cm.estimate_tokens(), 5);
        assert_eq!(cm.len(), 3);
    }

    #[test]
    fn test_clear_resets_history_and_files() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "FROM alpine").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let mut cm = ContextManager::new();
        cm.append(ChatMessage::user("build an image"));
        cm.add_file(&path).unwrap();
        assert!(cm.is_file_in_context(&path));

        cm.clear();
        assert_eq!(cm.estimate_tokens(), 0);
        assert!(cm.is_empty());
        assert!(cm.files().is_empty());
    }

    #[test]
    fn test_budget_is_strictly_greater_than() {
        let mut cm = ContextManager::with_limits(3, DEFAULT_MAX_FILE_BYTES);
        cm.append(ChatMessage::user("one two three"));
        assert!(!cm.is_over_budget());
        cm.append(ChatMessage::user("four"));
        assert!(cm.is_over_budget());
    }

    #[test]
    fn test_add_file_caps_captured_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[b'a'; 100]).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let mut cm = ContextManager::with_limits(DEFAULT_TOKEN_BUDGET, 10);
        assert_eq!(cm.add_file(&path).unwrap(), 10);
        assert_eq!(cm.files()[&path].len(), 10);
    }

    #[test]
    fn test_add_file_cap_never_splits_a_character() {
        let mut file = NamedTempFile::new().unwrap();
        // 'é' is two bytes, so a 4-byte cap lands inside it
        write!(file, "abcé and more").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let mut cm = ContextManager::with_limits(DEFAULT_TOKEN_BUDGET, 4);
        assert_eq!(cm.add_file(&path).unwrap(), 3);
        assert_eq!(cm.files()[&path], "abc");
        assert!(!cm.files()[&path].contains('\u{FFFD}'));
    }

    #[test]
    fn test_replace_files_reports_failures() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "hello").unwrap();
        let good = file.path().to_string_lossy().to_string();

        let mut cm = ContextManager::new();
        let failures = cm.replace_files(&[good.as_str(), "/definitely/not/here.txt"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "/definitely/not/here.txt");
        assert_eq!(cm.files().len(), 1);
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let mut cm = ContextManager::new();
        cm.append(ChatMessage::user("first"));
        cm.append(ChatMessage::assistant("second"));
        let snap = cm.snapshot();
        assert_eq!(snap[0].content, "first");
        assert_eq!(snap[1].role, Role::Assistant);
    }
}
