//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT)
//! 2. Environment variables (APP_SERVER__PORT, APP_PIPELINE__PLAYBACK_TIMEOUT_SECS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Sections:
//! - **server**: where the HTTP/WebSocket listener binds
//! - **services**: the external generation, classification and synthesis endpoints
//! - **pipeline**: delivery timing, transcript window and prompt wording

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, services, pipeline)
/// keeps each concern small enough to validate and document on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub services: ServicesConfig,
    pub pipeline: PipelineConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept viewers from any address (streaming PC on the LAN)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Endpoints of the external collaborators.
///
/// ## Fields:
/// - `llm_base_url`: OpenAI-compatible API root (the `/chat/completions` path is appended)
/// - `llm_api_key`: bearer token sent to the generation service
/// - `llm_model`: model used for spoken replies
/// - `emotion_model`: model used for per-sentence emotion classification
/// - `tts_url`: full URL of the synthesis endpoint
/// - `tts_character`: voice preset forwarded as the `character` query parameter (empty = omit)
/// - `request_timeout_secs`: upper bound for a synthesis or classification call; for the reply
///   stream it bounds connecting and the wait for response headers, not reading the body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub emotion_model: String,
    pub tts_url: String,
    pub tts_character: String,
    pub request_timeout_secs: u64,
}

/// Delivery pipeline tuning.
///
/// ## Fields:
/// - `playback_timeout_secs`: how long a broadcast sentence may wait for a viewer acknowledgment
/// - `history_max_turns`: rolling window of user turns kept in the conversation transcript
/// - `max_send_failures`: consecutive send failures before a viewer is dropped (0 = never)
/// - `send_timeout_ms`: bound on a single per-viewer send
/// - `system_prompt` / `admin_prompt_prefix` / `chat_prompt_prefix`: prompt wording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub playback_timeout_secs: u64,
    pub history_max_turns: usize,
    pub max_send_failures: u32,
    pub send_timeout_ms: u64,
    pub system_prompt: String,
    pub admin_prompt_prefix: String,
    pub chat_prompt_prefix: String,
}

impl PipelineConfig {
    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "你是一个专业的且活泼热情的虚拟主播，能够完美的回复各类弹幕和聊天问题。\
你的回复将直接进行语音播放，所以不要含有任何多余的标志符号。\
你的管理员名称是admin，当admin发送指令时，你必须根据管理员的指令进行回复。";

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They point at services running on the local machine.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 38024,
            },
            services: ServicesConfig {
                llm_base_url: "http://127.0.0.1:11434/v1".to_string(),  // Local Ollama
                llm_api_key: "ollama".to_string(),
                llm_model: "qwen2.5:32b".to_string(),
                emotion_model: "qwen2.5:32b".to_string(),
                tts_url: "http://127.0.0.1:7860/tts/".to_string(),
                tts_character: String::new(),
                request_timeout_secs: 30,
            },
            pipeline: PipelineConfig {
                playback_timeout_secs: 30,
                history_max_turns: 20,
                max_send_failures: 3,
                send_timeout_ms: 5000,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                admin_prompt_prefix: "当前管理员指令,admin：".to_string(),
                chat_prompt_prefix: "当前弹幕：".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_SERVICES__TTS_URL=http://10.0.0.5:7860/tts/`: Point at another synthesis box
    /// - `APP_PIPELINE__PLAYBACK_TIMEOUT_SECS=45`: Allow longer sentences to finish playing
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&AppConfig::default())?)
            // required(false) means "don't error if missing"
            .add_source(::config::File::with_name("config").required(false))
            // Double underscore separates sections so field names may keep their own underscores
            .add_source(
                ::config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Every external service has a URL
    /// - Pipeline timeouts and the transcript window are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.services.llm_base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Language model base URL must not be empty"));
        }

        if self.services.tts_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Synthesis URL must not be empty"));
        }

        if self.services.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Service request timeout must be greater than 0"));
        }

        if self.pipeline.playback_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Playback timeout must be greater than 0"));
        }

        if self.pipeline.history_max_turns == 0 {
            return Err(anyhow::anyhow!("Transcript window must keep at least one turn"));
        }

        if self.pipeline.send_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Viewer send timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are touched, so `{"pipeline": {"playback_timeout_secs": 45}}`
    /// changes a single value. The result is validated before it is accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(services) = partial_config.get("services") {
            update_string(services, "llm_base_url", &mut self.services.llm_base_url);
            update_string(services, "llm_api_key", &mut self.services.llm_api_key);
            update_string(services, "llm_model", &mut self.services.llm_model);
            update_string(services, "emotion_model", &mut self.services.emotion_model);
            update_string(services, "tts_url", &mut self.services.tts_url);
            update_string(services, "tts_character", &mut self.services.tts_character);
            if let Some(secs) = services.get("request_timeout_secs").and_then(|v| v.as_u64()) {
                self.services.request_timeout_secs = secs;
            }
        }

        if let Some(pipeline) = partial_config.get("pipeline") {
            if let Some(secs) = pipeline.get("playback_timeout_secs").and_then(|v| v.as_u64()) {
                self.pipeline.playback_timeout_secs = secs;
            }
            if let Some(turns) = pipeline.get("history_max_turns").and_then(|v| v.as_u64()) {
                self.pipeline.history_max_turns = turns as usize;
            }
            if let Some(failures) = pipeline.get("max_send_failures").and_then(|v| v.as_u64()) {
                self.pipeline.max_send_failures = failures.min(u32::MAX as u64) as u32;
            }
            if let Some(ms) = pipeline.get("send_timeout_ms").and_then(|v| v.as_u64()) {
                self.pipeline.send_timeout_ms = ms;
            }
            update_string(pipeline, "system_prompt", &mut self.pipeline.system_prompt);
            update_string(pipeline, "admin_prompt_prefix", &mut self.pipeline.admin_prompt_prefix);
            update_string(pipeline, "chat_prompt_prefix", &mut self.pipeline.chat_prompt_prefix);
        }

        self.validate()?;
        Ok(())
    }
}

fn update_string(section: &serde_json::Value, key: &str, target: &mut String) {
    if let Some(value) = section.get(key).and_then(|v| v.as_str()) {
        *target = value.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 38024);
        assert_eq!(config.pipeline.playback_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.playback_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.services.tts_url = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "pipeline": {"playback_timeout_secs": 45}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.pipeline.playback_timeout_secs, 45);
        // Untouched fields keep their values
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.history_max_turns, 20);
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert!(config.update_from_json(r#"{"pipeline": {"history_max_turns": 0}}"#).is_err());
    }
}
