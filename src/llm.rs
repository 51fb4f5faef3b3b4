use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use gemini_client_api::gemini::{ask::Gemini, types::sessions::Session};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::context::{ChatMessage, Role};
use crate::error::{ConfigError, LlmTransportError};

/// The one capability the assistant needs from a model provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name for display and logging.
    fn name(&self) -> &str;

    /// Returns the model's reply to `prompt` given the prior `history`.
    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, LlmTransportError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Groq,
    Gemini,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "ollama",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Groq => "groq",
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenRouter => "openrouter",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmProvider::Ollama)
    }

    /// Conventional environment variable holding this provider's key.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Ollama => None,
            LlmProvider::OpenAi => Some("OPENAI_API_KEY"),
            LlmProvider::Groq => Some("GROQ_API_KEY"),
            LlmProvider::Gemini => Some("GEMINI_API_KEY"),
            LlmProvider::OpenRouter => Some("OPENROUTER_API_KEY"),
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com",
            LlmProvider::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "llama3",
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Groq => "llama3-8b-8192",
            LlmProvider::Gemini => "gemini-1.5-flash",
            LlmProvider::OpenRouter => "mistralai/mixtral-8x7b-instruct",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" => Ok(LlmProvider::OpenAi),
            "groq" => Ok(LlmProvider::Groq),
            "gemini" => Ok(LlmProvider::Gemini),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Builds the client for the configured provider. Called once at startup.
pub fn build_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>, ConfigError> {
    let provider = config.provider;
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| provider.default_base_url().to_string());
    let api_key = config.api_key.clone().unwrap_or_default();
    let temperature = config.temperature.unwrap_or(0.7);
    info!(%provider, model = %config.model, "initialising LLM client");

    let client: Box<dyn LlmClient> = match provider {
        LlmProvider::Ollama => Box::new(OllamaClient {
            http: http_client(config.timeout_seconds)?,
            url: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature,
            timeout_seconds: config.timeout_seconds,
        }),
        LlmProvider::OpenAi | LlmProvider::Groq | LlmProvider::OpenRouter => Box::new(OpenAiCompatibleClient {
            provider,
            http: http_client(config.timeout_seconds)?,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature,
            timeout_seconds: config.timeout_seconds,
        }),
        LlmProvider::Gemini => Box::new(GeminiClient {
            api_key,
            model: config.model.clone(),
            timeout_seconds: config.timeout_seconds,
        }),
    };
    Ok(client)
}

fn http_client(timeout_seconds: u64) -> Result<Client, ConfigError> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_seconds))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

fn map_send_error(provider: &str, e: reqwest::Error, timeout_seconds: u64) -> LlmTransportError {
    if e.is_timeout() {
        LlmTransportError::Timeout {
            provider: provider.to_string(),
            seconds: timeout_seconds,
        }
    } else if e.is_connect() {
        LlmTransportError::Connect {
            provider: provider.to_string(),
            message: e.to_string(),
        }
    } else {
        LlmTransportError::Provider {
            provider: provider.to_string(),
            message: e.to_string(),
        }
    }
}

async fn check_status(provider: &str, response: reqwest::Response) -> Result<reqwest::Response, LlmTransportError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(LlmTransportError::Status {
        provider: provider.to_string(),
        status,
        body,
    })
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn wire_messages<'a>(prompt: &'a str, history: &'a [ChatMessage]) -> Vec<WireMessage<'a>> {
    history
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .chain(std::iter::once(WireMessage {
            role: Role::User.as_str(),
            content: prompt,
        }))
        .collect()
}

// Ollama /api/chat, non-streaming

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

pub struct OllamaClient {
    http: Client,
    url: String,
    model: String,
    temperature: f32,
    timeout_seconds: u64,
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, LlmTransportError> {
        let payload = OllamaChatRequest {
            model: &self.model,
            messages: wire_messages(prompt, history),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };
        debug!(url = %self.url, messages = payload.messages.len(), "ollama request");

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_send_error(self.name(), e, self.timeout_seconds))?;
        let response = check_status(self.name(), response).await?;

        let body = response
            .json::<OllamaChatResponse>()
            .await
            .map_err(|e| LlmTransportError::Decode {
                provider: self.name().to_string(),
                message: e.to_string(),
            })?;
        Ok(body.message.content.trim().to_string())
    }
}

// OpenAI-compatible /chat/completions (OpenAI, Groq, OpenRouter)

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatibleClient {
    provider: LlmProvider,
    http: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout_seconds: u64,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        self.provider.as_str()
    }

    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, LlmTransportError> {
        let payload = ChatCompletionRequest {
            model: &self.model,
            messages: wire_messages(prompt, history),
            temperature: self.temperature,
        };
        debug!(url = %self.url, messages = payload.messages.len(), "chat completion request");

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_send_error(self.name(), e, self.timeout_seconds))?;
        let response = check_status(self.name(), response).await?;

        let body = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| LlmTransportError::Decode {
                provider: self.name().to_string(),
                message: e.to_string(),
            })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| LlmTransportError::Decode {
                provider: self.name().to_string(),
                message: "response contained no choices".to_string(),
            })
    }
}

// Gemini through gemini-client-api. The session carries no history of its
// own; prior turns are flattened into the prompt text.

pub struct GeminiClient {
    api_key: String,
    model: String,
    timeout_seconds: u64,
}

fn flatten_history(prompt: &str, history: &[ChatMessage]) -> String {
    if history.is_empty() {
        return prompt.to_string();
    }
    let mut full = history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");
    full.push_str(&format!("\nuser: {}", prompt));
    full
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, LlmTransportError> {
        let full_prompt = flatten_history(prompt, history);
        let ai = Gemini::new(self.api_key.clone(), &self.model, None);
        let mut session = Session::new(2);

        let response = tokio::time::timeout(
            Duration::from_secs(self.timeout_seconds),
            ai.ask(session.ask_string(&full_prompt)),
        )
        .await
        .map_err(|_| LlmTransportError::Timeout {
            provider: self.name().to_string(),
            seconds: self.timeout_seconds,
        })?
        .map_err(|e| LlmTransportError::Provider {
            provider: self.name().to_string(),
            message: e.to_string(),
        })?;

        Ok(response.get_text("").trim().to_string())
    }
}
