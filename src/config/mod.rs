use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::{DEFAULT_MAX_FILE_BYTES, DEFAULT_TOKEN_BUDGET};
use crate::error::ConfigError;
use crate::llm::LlmProvider;
use crate::prompts::DEFAULT_FILE_CHAR_LIMIT;

/// Main configuration structure. Read-only once the session starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General settings
    pub general: GeneralConfig,

    /// LLM configuration
    pub llm: LlmConfig,

    /// Conversation limits
    pub session: SessionConfig,

    /// Security settings
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level used when RUST_LOG is unset
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub model: String,
    /// 0.0 to 1.0; provider default when unset
    pub temperature: Option<f32>,
    /// Overrides the provider's default endpoint
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Word-count budget for the conversation history
    pub token_budget: usize,
    /// Characters of each file included in a prompt
    pub file_char_limit: usize,
    /// Bytes captured per file when it is added to context
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Program names or command prefixes allowed to run. Empty means no
    /// restriction.
    pub allow_list: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        let provider = LlmProvider::default();
        Self {
            provider,
            api_key: None,
            model: provider.default_model().to_string(),
            temperature: Some(0.7),
            base_url: None,
            timeout_seconds: 120,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            file_char_limit: DEFAULT_FILE_CHAR_LIMIT,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.load_env_vars();
        Ok(config)
    }

    /// Save configuration to file, without the API key
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut safe_config = self.clone();
        safe_config.sanitize_for_save();

        let content = toml::to_string_pretty(&safe_config)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the default configuration path
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".smartcli").join("config.toml"))
    }

    /// Fill a missing API key from SMARTCLI_API_KEY or the provider's own
    /// variable.
    pub fn load_env_vars(&mut self) {
        if self.llm.api_key.as_deref().map_or(false, |k| !k.trim().is_empty()) {
            return;
        }
        self.llm.api_key = std::env::var("SMARTCLI_API_KEY")
            .ok()
            .or_else(|| self.llm.provider.api_key_env().and_then(|var| std::env::var(var).ok()))
            .filter(|k| !k.trim().is_empty());
    }

    fn sanitize_for_save(&mut self) {
        self.llm.api_key = None;
    }

    /// Merge with command-line overrides
    pub fn merge_overrides(&mut self, overrides: Vec<(String, String)>) -> Result<(), ConfigError> {
        for (key, value) in overrides {
            let invalid = || ConfigError::InvalidValue {
                key: key.clone(),
                value: value.clone(),
            };
            match key.as_str() {
                "log_level" => self.general.log_level = value.clone(),
                "provider" => {
                    let provider: LlmProvider = value.parse()?;
                    if provider != self.llm.provider {
                        self.llm.provider = provider;
                        self.llm.model = provider.default_model().to_string();
                        self.llm.base_url = None;
                        self.llm.api_key = None;
                        self.load_env_vars();
                    }
                }
                "model" => self.llm.model = value.clone(),
                "temperature" => self.llm.temperature = Some(value.parse().map_err(|_| invalid())?),
                "token_budget" => self.session.token_budget = value.parse().map_err(|_| invalid())?,
                _ => return Err(ConfigError::UnknownKey(key.clone())),
            }
        }
        Ok(())
    }

    /// Startup checks. Any failure here aborts the program.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        if let Some(t) = self.llm.temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::InvalidTemperature(t));
            }
        }
        let has_key = self.llm.api_key.as_deref().map_or(false, |k| !k.trim().is_empty());
        if self.llm.provider.requires_api_key() && !has_key {
            return Err(ConfigError::MissingApiKey(self.llm.provider.to_string()));
        }
        Ok(())
    }
}

/// Load the config at `path` (or the default location), writing defaults
/// there first if no file exists.
pub fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => AppConfig::default_path()?,
    };

    if config_path.exists() {
        info!(path = %config_path.display(), "loading config");
        AppConfig::load(&config_path)
    } else {
        info!(path = %config_path.display(), "writing default config");
        let mut config = AppConfig::default();
        config.save(&config_path)?;
        config.load_env_vars();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.session.token_budget, 3500);
        assert_eq!(config.session.file_char_limit, 1000);
        assert!(config.security.allow_list.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_config_strips_api_key() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.llm.api_key = Some("secret".to_string());
        config.security.allow_list = vec!["docker".to_string()];
        config.save(&config_path).unwrap();

        let raw = std::fs::read_to_string(&config_path).unwrap();
        assert!(!raw.contains("secret"));

        let loaded = AppConfig::load(&config_path).unwrap();
        assert_eq!(loaded.security.allow_list, vec!["docker".to_string()]);
        assert_eq!(loaded.llm.model, config.llm.model);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "[llm]\nprovider = \"groq\"\nmodel = \"llama3-70b\"\napi_key = \"k\"\n").unwrap();

        let loaded = AppConfig::load(&config_path).unwrap();
        assert_eq!(loaded.llm.provider, LlmProvider::Groq);
        assert_eq!(loaded.llm.timeout_seconds, 120);
        assert_eq!(loaded.session.token_budget, 3500);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_unknown_provider_in_file_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "[llm]\nprovider = \"claude\"\n").unwrap();
        assert!(matches!(AppConfig::load(&config_path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let config = load_or_create_config(Some(&config_path)).unwrap();
        assert!(config_path.exists());
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.llm.temperature = Some(1.5);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTemperature(_))));

        let mut config = AppConfig::default();
        config.llm.model = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyModel)));

        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::OpenAi;
        config.llm.api_key = Some(" ".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey(p)) if p == "openai"));
    }

    #[test]
    fn test_merge_overrides() {
        let mut config = AppConfig::default();
        config
            .merge_overrides(vec![
                ("model".to_string(), "qwen2".to_string()),
                ("temperature".to_string(), "0.2".to_string()),
                ("log_level".to_string(), "debug".to_string()),
            ])
            .unwrap();
        assert_eq!(config.llm.model, "qwen2");
        assert_eq!(config.llm.temperature, Some(0.2));
        assert_eq!(config.general.log_level, "debug");

        assert!(matches!(
            config.merge_overrides(vec![("theme".to_string(), "dark".to_string())]),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            config.merge_overrides(vec![("provider".to_string(), "nope".to_string())]),
            Err(ConfigError::UnknownProvider(_))
        ));
        assert!(matches!(
            config.merge_overrides(vec![("token_budget".to_string(), "lots".to_string())]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
