//! Typed YAML configuration.
//!
//! The file is parsed once, validated, and then split into per-stage configs
//! that executors receive at construction.

use crate::error::{AppError, Result};
use crate::export::ExportFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/feeds.yaml";
pub const DEFAULT_DB_PATH: &str = "data/p3.db";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Openai,
    /// Keyword extraction without any model call.
    Basic,
}

impl std::str::FromStr for LlmProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::Openai),
            "basic" => Ok(Self::Basic),
            other => Err(AppError::Config(format!("unknown llm provider '{}'", other))),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ollama => "ollama",
            Self::Openai => "openai",
            Self::Basic => "basic",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub max_episodes_per_feed: usize,
    pub audio_format: AudioFormat,
    pub whisper_cli_path: PathBuf,
    pub whisper_models_dir: PathBuf,
    pub whisper_model: String,
    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub ollama_base_url: String,
    pub openai_base_url: String,
    pub export_format: Vec<ExportFormat>,
    pub max_retries: i64,
    pub stage_timeout_secs: u64,
    pub target_grade: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_episodes_per_feed: 10,
            audio_format: AudioFormat::Wav,
            whisper_cli_path: PathBuf::from("whisper-cli"),
            whisper_models_dir: PathBuf::from("models"),
            whisper_model: "base".to_string(),
            llm_provider: LlmProvider::Ollama,
            llm_model: "llama3.2:latest".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            export_format: vec![ExportFormat::Markdown],
            max_retries: 3,
            stage_timeout_secs: 3600,
            target_grade: 91.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub settings: Settings,
    /// Directory the file was loaded from; `.env` is looked up next to it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.base_dir = path
            .parent()
            .and_then(|p| p.parent().or(Some(p)))
            .map(Path::to_path_buf)
            .unwrap_or_default();
        log::info!(
            "Loaded config from {} ({} feeds)",
            path.display(),
            config.feeds.len()
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut urls = HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                return Err(AppError::Config("feed name must not be empty".into()));
            }
            if feed.url.trim().is_empty() {
                return Err(AppError::Config(format!("feed '{}' has an empty url", feed.name)));
            }
            if !names.insert(feed.name.as_str()) {
                return Err(AppError::Config(format!("duplicate feed name '{}'", feed.name)));
            }
            if !urls.insert(feed.url.as_str()) {
                return Err(AppError::Config(format!("duplicate feed url '{}'", feed.url)));
            }
        }

        let s = &self.settings;
        if s.max_retries < 1 {
            return Err(AppError::Config("max_retries must be at least 1".into()));
        }
        if s.stage_timeout_secs < 1 {
            return Err(AppError::Config("stage_timeout_secs must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&s.target_grade) {
            return Err(AppError::Config("target_grade must be between 0 and 100".into()));
        }
        if s.whisper_model.trim().is_empty() {
            return Err(AppError::Config("whisper_model must not be empty".into()));
        }
        Ok(())
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            audio_dir: expand_home(&self.settings.data_dir).join("audio"),
            max_episodes_per_feed: self.settings.max_episodes_per_feed,
            audio_format: self.settings.audio_format,
        }
    }

    pub fn transcribe_config(&self) -> TranscribeConfig {
        TranscribeConfig {
            whisper_cli_path: expand_home(&self.settings.whisper_cli_path),
            models_dir: expand_home(&self.settings.whisper_models_dir),
            model: self.settings.whisper_model.clone(),
            output_dir: expand_home(&self.settings.data_dir).join("transcripts"),
        }
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            provider: self.settings.llm_provider,
            model: self.settings.llm_model.clone(),
            ollama_base_url: self.settings.ollama_base_url.clone(),
            openai_base_url: self.settings.openai_base_url.clone(),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| load_env_value(&self.base_dir, "OPENAI_API_KEY")),
        }
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            target_grade: self.settings.target_grade,
            max_iterations: 3,
            output_dir: PathBuf::from("blog_posts"),
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.stage_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub audio_dir: PathBuf,
    pub max_episodes_per_feed: usize,
    pub audio_format: AudioFormat,
}

#[derive(Debug, Clone)]
pub struct TranscribeConfig {
    pub whisper_cli_path: PathBuf,
    pub models_dir: PathBuf,
    pub model: String,
    pub output_dir: PathBuf,
}

impl TranscribeConfig {
    pub fn model_path(&self) -> PathBuf {
        self.models_dir.join(format!("ggml-{}.bin", self.model))
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub ollama_base_url: String,
    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub target_grade: f64,
    pub max_iterations: u32,
    pub output_dir: PathBuf,
}

/// Resolve a leading `~` against the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Read `key` from a `.env` file in `dir` without touching the process
/// environment.
pub fn load_env_value(dir: &Path, key: &str) -> Option<String> {
    let iter = dotenvy::from_path_iter(dir.join(".env")).ok()?;
    for item in iter {
        match item {
            Ok((name, value)) if name == key && !value.is_empty() => return Some(value),
            Ok(_) => {}
            Err(e) => {
                log::warn!("Failed to parse .env in {}: {}", dir.display(), e);
                return None;
            }
        }
    }
    None
}

/// Starter config written by `p3 init`.
pub const SAMPLE_CONFIG: &str = r#"feeds:
  - name: "Example Show"
    url: "https://example.com/rss"
    category: tech

settings:
  data_dir: data
  max_episodes_per_feed: 10
  audio_format: wav
  whisper_cli_path: whisper-cli
  whisper_models_dir: models
  whisper_model: base
  llm_provider: ollama
  llm_model: llama3.2:latest
  ollama_base_url: http://localhost:11434
  export_format: [markdown]
  max_retries: 3
  stage_timeout_secs: 3600
  target_grade: 91.0
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sample_config_parses() {
        let config = Config::from_yaml(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.settings.llm_provider, LlmProvider::Ollama);
        assert_eq!(config.settings.export_format, vec![ExportFormat::Markdown]);
    }

    #[test]
    fn test_missing_settings_use_defaults() {
        let config = Config::from_yaml("feeds: []\n").unwrap();
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.settings.max_retries, 3);
        assert_eq!(config.transcribe_config().model_path(), PathBuf::from("models/ggml-base.bin"));
    }

    #[test]
    fn test_rejects_duplicate_feeds() {
        let yaml = r#"
feeds:
  - { name: "A", url: "http://a/rss" }
  - { name: "A", url: "http://b/rss" }
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_settings() {
        assert!(Config::from_yaml("settings:\n  max_retries: 0\n").is_err());
        assert!(Config::from_yaml("settings:\n  target_grade: 120\n").is_err());
        assert!(Config::from_yaml("settings:\n  llm_provider: claude\n").is_err());
        assert!(Config::from_yaml("settings:\n  audio_format: flac\n").is_err());
    }

    #[test]
    fn test_load_env_value() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "# comment\nOPENAI_API_KEY=\"sk-test\"\nOTHER=1\n",
        )
        .unwrap();
        assert_eq!(
            load_env_value(dir.path(), "OPENAI_API_KEY").as_deref(),
            Some("sk-test")
        );
        assert!(load_env_value(dir.path(), "MISSING").is_none());
    }

    #[test]
    fn test_load_env_value_export_and_inline_comment() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "export OPENAI_API_KEY=sk-x\nOLLAMA_TOKEN=tok # prod\n",
        )
        .unwrap();
        assert_eq!(
            load_env_value(dir.path(), "OPENAI_API_KEY").as_deref(),
            Some("sk-x")
        );
        assert_eq!(load_env_value(dir.path(), "OLLAMA_TOKEN").as_deref(), Some("tok"));
    }

    #[test]
    fn test_load_env_value_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(load_env_value(dir.path(), "OPENAI_API_KEY").is_none());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home(Path::new("models")), PathBuf::from("models"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home(Path::new("~/whisper/models")),
                home.join("whisper/models")
            );
        }
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::Openai);
        assert!("gpt".parse::<LlmProvider>().is_err());
    }
}
