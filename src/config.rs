use anyhow::{Context, Result};

use crate::pipeline::BlockingCheck;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub generation_deadline_ms: u64,
    pub stream_idle_timeout_ms: u64,
    pub blocking_check: BlockingCheck,
    pub hugging_face_api_key: Option<String>,
    pub hugging_face_base_url: String,
    pub refine_model: String,
    pub refine_deadline_ms: u64,
    pub whisper_model: String,
    pub transcribe_timeout_ms: u64,
    pub node_binary: String,
    pub sandbox_timeout_ms: u64,
    pub log_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: parse_var("PORT", "3000")?,
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .context("GEMINI_API_KEY must be set")?,
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
            gemini_model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".into()),
            max_output_tokens: parse_var("MAX_OUTPUT_TOKENS", "1024")?,
            temperature: parse_var("TEMPERATURE", "0.7")?,
            generation_deadline_ms: parse_var("GENERATION_DEADLINE_MS", "15000")?,
            stream_idle_timeout_ms: parse_var("STREAM_IDLE_TIMEOUT_MS", "30000")?,
            blocking_check: std::env::var("BLOCKING_VERIFICATION")
                .unwrap_or_else(|_| "sandbox".into())
                .parse()
                .map_err(anyhow::Error::msg)
                .context("BLOCKING_VERIFICATION must be sandbox or refine")?,
            // An empty key is the same as no key: the secondary features are just unavailable.
            hugging_face_api_key: std::env::var("HUGGING_FACE_API_KEY")
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            hugging_face_base_url: std::env::var("HUGGING_FACE_BASE_URL")
                .unwrap_or_else(|_| "https://api-inference.huggingface.co".into()),
            refine_model: std::env::var("REFINE_MODEL")
                .unwrap_or_else(|_| "Qwen/Qwen2.5-Coder-32B-Instruct".into()),
            refine_deadline_ms: parse_var("REFINE_DEADLINE_MS", "8000")?,
            whisper_model: std::env::var("WHISPER_MODEL")
                .unwrap_or_else(|_| "openai/whisper-large-v3".into()),
            transcribe_timeout_ms: parse_var("TRANSCRIBE_TIMEOUT_MS", "30000")?,
            node_binary: std::env::var("NODE_BINARY").unwrap_or_else(|_| "node".into()),
            sandbox_timeout_ms: parse_var("SANDBOX_TIMEOUT_MS", "1000")?,
            log_dir: std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".into()),
        })
    }
}

/// Settings for the CLI surfaces that only talk to a running backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            backend_url: std::env::var("SPARKLES_BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000/api".into()),
        }
    }
}

fn parse_var<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .parse()
        .context(format!("{} must be a number", key))
}
