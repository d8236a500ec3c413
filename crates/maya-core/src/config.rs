//! Maya configuration loaded from file and environment.
//!
//! Precedence: env `MAYA_*` > `MAYA_CONFIG` file (default `config/maya.toml`) > defaults.
//! Nested keys use `__`, e.g. `MAYA_LLM__API_KEY`, `MAYA_PROBE__TIMEOUT_SECS`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Profile key that always carries the user's identity name.
pub const IDENTITY_KEY: &str = "name";

const DEFAULT_CONFIG_PATH: &str = "config/maya";

fn default_probe_executable() -> String {
    if cfg!(windows) {
        "data_engine/search.exe".to_string()
    } else {
        "data_engine/search".to_string()
    }
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_llm_api_url() -> String {
    "http://127.0.0.1:11434/v1/chat/completions".to_string()
}

fn default_text_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_vision_model() -> String {
    "llama3.2-vision".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_max_results() -> u32 {
    5
}

fn default_search_timeout_secs() -> u64 {
    20
}

fn default_profile() -> BTreeMap<String, String> {
    [
        (IDENTITY_KEY, "User"),
        ("role", "Developer"),
        ("tech", "Rust"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Knowledge probe process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_executable")]
    pub executable: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            executable: default_probe_executable(),
            timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// OpenAI-compatible inference endpoint (Ollama by default) and the two model bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_api_url")]
    pub api_url: String,
    /// Bearer token; only sent when set.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_llm_api_url(),
            api_key: None,
            text_model: default_text_model(),
            vision_model: default_vision_model(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Web search tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// When set, Tavily backs the search tool; otherwise DuckDuckGo HTML results are used.
    #[serde(default)]
    pub tavily_api_key: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            max_results: default_max_results(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

/// Top-level configuration for the Maya backend.
///
/// | Key | Default |
/// |-----|---------|
/// | host / port | 127.0.0.1 / 8000 |
/// | allowed_origin | http://localhost:5173 |
/// | database_path | ./data/memory.db |
/// | history_limit | 20 |
/// | assistant_name | Maya |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MayaConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origin: String,
    pub database_path: String,
    pub history_limit: usize,
    pub assistant_name: String,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    /// Seeded once into the profile table (insert-or-ignore).
    #[serde(default = "default_profile")]
    pub profile_defaults: BTreeMap<String, String>,
}

impl Default for MayaConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            allowed_origin: "http://localhost:5173".to_string(),
            database_path: "./data/memory.db".to_string(),
            history_limit: 20,
            assistant_name: "Maya".to_string(),
            probe: ProbeConfig::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            profile_defaults: default_profile(),
        }
    }
}

impl MayaConfig {
    /// Load from `MAYA_CONFIG` (or `config/maya.toml`) and `MAYA_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MAYA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Some(Path::new(&path)))
    }

    /// Load with an explicit optional file. A missing file is not an error.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 8000_i64)?
            .set_default("allowed_origin", "http://localhost:5173")?
            .set_default("database_path", "./data/memory.db")?
            .set_default("history_limit", 20_i64)?
            .set_default("assistant_name", "Maya")?;

        let builder = match path {
            Some(p) => builder.add_source(config::File::from(p).required(false)),
            None => builder,
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("MAYA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: MayaConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.probe.timeout_secs == 0 {
            return Err(ConfigError::Invalid("probe.timeout_secs must be > 0".into()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid("llm.timeout_secs must be > 0".into()));
        }
        let identity = self
            .profile_defaults
            .get(IDENTITY_KEY)
            .map(|s| s.trim())
            .unwrap_or("");
        if identity.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "profile_defaults.{} must be a non-empty string",
                IDENTITY_KEY
            )));
        }
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
