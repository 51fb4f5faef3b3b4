// Error taxonomy for a single assistant turn.
//
// Everything here is local to a turn except `ConfigError`, which is only
// produced at startup.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate the home directory")]
    NoHomeDir,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown LLM provider '{0}' (expected one of: ollama, openai, groq, gemini, openrouter)")]
    UnknownProvider(String),

    #[error("provider '{0}' requires an API key (set llm.api_key or SMARTCLI_API_KEY)")]
    MissingApiKey(String),

    #[error("temperature must be between 0.0 and 1.0, got {0}")]
    InvalidTemperature(f32),

    #[error("llm.model must not be empty")]
    EmptyModel,

    #[error("unknown config key: {0}")]
    UnknownKey(String),

    #[error("invalid value '{value}' for config key '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Failure talking to the model provider.
#[derive(Debug, Error)]
pub enum LlmTransportError {
    #[error("{provider}: could not connect ({message})")]
    Connect { provider: String, message: String },

    #[error("{provider}: request timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    #[error("{provider}: request failed with status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider}: could not decode response ({message})")]
    Decode { provider: String, message: String },

    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },
}

/// Why a model reply could not be turned into a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// No `{` anywhere in the reply.
    #[error("no JSON object found in reply")]
    NoJsonObject,
    /// An object was opened but its braces never balance.
    #[error("JSON object in reply is not closed")]
    UnbalancedBraces,
    /// Braces balance but the text is not valid JSON.
    #[error("reply contains malformed JSON")]
    InvalidJson,
    /// Valid JSON whose fields have the wrong types.
    #[error("JSON object does not match the suggestion schema")]
    SchemaMismatch,
}

/// A model reply that could not be decoded.
#[derive(Debug, Clone, Error)]
#[error("{reason}: {raw_snippet}")]
pub struct ParseError {
    pub reason: ParseFailure,
    /// Leading part of the offending reply, for display.
    pub raw_snippet: String,
}

/// A command rejected by the allow-list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{program}' is not in the allow-list; command blocked: {command}")]
pub struct ValidationError {
    pub command: String,
    pub program: String,
}

/// A command that could not be started or exited unsuccessfully.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Failure collecting input from the human.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("interrupted")]
    Interrupted,

    #[error("input error: {0}")]
    Io(#[from] std::io::Error),
}
