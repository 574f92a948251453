use crate::error::ConfigError;
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub llm: LlmSection,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("invoices.db")
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("extracted_invoices.csv")
}

/// Throttling and retry knobs for the batch.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Pause after every file, to stay under the provider's rate limit.
    #[serde(default = "default_file_delay_ms")]
    pub file_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_file_delay_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_max_prompt_chars() -> usize {
    10_000
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            file_delay_ms: default_file_delay_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_prompt_chars: default_max_prompt_chars(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl PipelineSection {
    pub fn file_delay(&self) -> Duration {
        Duration::from_millis(self.file_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Longcat,
    OpenRouter,
    Ollama,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "longcat" => Ok(Self::Longcat),
            "openrouter" => Ok(Self::OpenRouter),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_longcat")]
    pub longcat: EndpointConfig,
    #[serde(default = "default_openrouter")]
    pub openrouter: EndpointConfig,
    #[serde(default = "default_ollama")]
    pub ollama: EndpointConfig,
}

fn default_provider() -> LlmProvider {
    LlmProvider::Longcat
}

fn default_temperature() -> f64 {
    0.1
}

fn default_longcat() -> EndpointConfig {
    EndpointConfig {
        base_url: "https://api.longcat.chat/openai/v1".to_string(),
        model: "LongCat-Flash-Chat".to_string(),
    }
}

fn default_openrouter() -> EndpointConfig {
    EndpointConfig {
        base_url: "https://openrouter.ai/api/v1".to_string(),
        model: "openai/gpt-4o-mini".to_string(),
    }
}

fn default_ollama() -> EndpointConfig {
    EndpointConfig {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "qwen3:8b".to_string(),
    }
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            temperature: default_temperature(),
            longcat: default_longcat(),
            openrouter: default_openrouter(),
            ollama: default_ollama(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
}

impl LlmSection {
    /// Endpoint block of the selected provider.
    pub fn active(&self) -> &EndpointConfig {
        match self.provider {
            LlmProvider::Longcat => &self.longcat,
            LlmProvider::OpenRouter => &self.openrouter,
            LlmProvider::Ollama => &self.ollama,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: default_db_path(),
            csv_path: default_csv_path(),
            pipeline: PipelineSection::default(),
            llm: LlmSection::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the file if it exists, otherwise start from defaults; then
    /// apply environment overrides.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        let overrides: [(&str, &mut String); 5] = [
            ("LONGCAT_BASE_URL", &mut self.llm.longcat.base_url),
            ("LONGCAT_MODEL", &mut self.llm.longcat.model),
            ("OPENROUTER_MODEL", &mut self.llm.openrouter.model),
            ("OLLAMA_BASE_URL", &mut self.llm.ollama.base_url),
            ("OLLAMA_MODEL", &mut self.llm.ollama.model),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
        Ok(())
    }
}
