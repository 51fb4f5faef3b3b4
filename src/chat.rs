// Free-form chat with the model, separate from the command conversation.

use tracing::{info, warn};

use crate::context::{ChatMessage, ContextManager};
use crate::error::LlmTransportError;
use crate::llm::LlmClient;

/// History for one `/chat` session. Replies are plain text and never parsed
/// for commands. Going over the budget only warns here.
pub struct ChatSession {
    history: ContextManager,
}

impl ChatSession {
    pub fn new(token_budget: usize) -> Self {
        Self {
            history: ContextManager::with_limits(token_budget, 0),
        }
    }

    /// `exit` or `back` ends the session.
    pub fn is_leave(input: &str) -> bool {
        matches!(input.trim().to_lowercase().as_str(), "exit" | "back")
    }

    /// History has grown past the budget; replies may degrade.
    pub fn is_long(&self) -> bool {
        self.history.is_over_budget()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Sends `message` with the session history. The exchange is recorded
    /// only when the model answers.
    pub async fn send(
        &mut self,
        llm: &dyn LlmClient,
        system_prompt: &str,
        message: &str,
    ) -> Result<String, LlmTransportError> {
        if self.is_long() {
            warn!(
                used = self.history.estimate_tokens(),
                budget = self.history.token_budget(),
                "chat history over budget"
            );
        }

        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(self.history.snapshot());

        info!(provider = llm.name(), history = messages.len(), "chat message");
        let reply = llm.generate(message, &messages).await?;

        self.history.append(ChatMessage::user(message));
        self.history.append(ChatMessage::assistant(reply.clone()));
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::context::Role;

    struct EchoLlm {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        fail: bool,
    }

    impl EchoLlm {
        fn new(fail: bool) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, LlmTransportError> {
            self.seen.lock().unwrap().push(history.to_vec());
            if self.fail {
                return Err(LlmTransportError::Timeout {
                    provider: "echo".to_string(),
                    seconds: 1,
                });
            }
            Ok(format!("you said {}", prompt))
        }
    }

    #[test]
    fn test_leave_words() {
        assert!(ChatSession::is_leave("exit"));
        assert!(ChatSession::is_leave(" Back "));
        assert!(!ChatSession::is_leave("go back to the start"));
    }

    #[tokio::test]
    async fn test_history_carries_between_messages() {
        let llm = EchoLlm::new(false);
        let mut session = ChatSession::new(3500);

        let reply = session.send(&llm, "be brief", "hello there").await.unwrap();
        assert_eq!(reply, "you said hello there");
        session.send(&llm, "be brief", "and again").await.unwrap();
        assert_eq!(session.len(), 4);

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0].len(), 1);
        assert_eq!(seen[0][0].role, Role::System);
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][1].content, "hello there");
        assert_eq!(seen[1][2].content, "you said hello there");
    }

    #[tokio::test]
    async fn test_failed_message_is_not_recorded() {
        let llm = EchoLlm::new(true);
        let mut session = ChatSession::new(3500);
        assert!(session.send(&llm, "sys", "hello").await.is_err());
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_long_history_warns_but_still_sends() {
        let llm = EchoLlm::new(false);
        let mut session = ChatSession::new(3);
        session.send(&llm, "sys", "one two three four").await.unwrap();
        assert!(session.is_long());

        session.send(&llm, "sys", "still there").await.unwrap();
        assert_eq!(llm.seen.lock().unwrap().len(), 2);
    }
}
