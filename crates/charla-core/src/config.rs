use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Runtime constants shared across the workspace.
pub const MAX_RETRIES: u32 = 3;
pub const LLM_TIMEOUT_SECS: u64 = 25;
pub const STALE_CLAIM_SECS: i64 = 300; // 5 minutes for buffer/follow-up claims
pub const WORKER_LOCK_TTL_SECS: i64 = 60;
pub const AGENT_HOLD_SECS: i64 = 3600; // resume gate after human takeover
pub const SESSION_WINDOW_SECS: i64 = 24 * 3600; // WhatsApp customer-service window
pub const RECENT_HISTORY_LIMIT: usize = 20;
pub const KNOWLEDGE_TOP_K: usize = 5;
pub const EXAMPLES_TOP_K: usize = 3;

/// Top-level config (charla.toml + CHARLA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharlaConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub whatsapp: WhatsappConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for CharlaConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            whatsapp: WhatsappConfig::default(),
            workers: WorkersConfig::default(),
            media: MediaConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

/// Default LLM endpoint (OpenAI-compatible). Per-tenant provider selection
/// maps onto entries like this at wiring time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_base")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_llm_base(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsappConfig {
    /// Token the platform echoes back in the GET subscription handshake.
    #[serde(default)]
    pub verify_token: String,
    /// Default Cloud API base; per-tenant credentials may override it.
    #[serde(default = "default_graph_base")]
    pub api_base: String,
    /// Optional catch-all: payloads for unknown channel ids are forwarded here.
    #[serde(default)]
    pub dispatch_url: Option<String>,
}

impl Default for WhatsappConfig {
    fn default() -> Self {
        Self {
            verify_token: String::new(),
            api_base: default_graph_base(),
            dispatch_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Idle poll interval for the debounce drain worker.
    #[serde(default = "default_debounce_poll")]
    pub debounce_poll_secs: u64,
    /// Cron-style interval for the follow-up worker.
    #[serde(default = "default_followup_poll")]
    pub followup_poll_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            debounce_poll_secs: default_debounce_poll(),
            followup_poll_secs: default_followup_poll(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Root directory for the filesystem blob store.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
        }
    }
}

fn default_port() -> u16 {
    8787
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_graph_base() -> String {
    "https://graph.facebook.com/v21.0".to_string()
}
fn default_llm_base() -> String {
    "https://api.openai.com".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_debounce_poll() -> u64 {
    5
}
fn default_followup_poll() -> u64 {
    60
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.charla/charla.db", home)
}
fn default_blob_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.charla/media", home)
}

impl CharlaConfig {
    /// Load config from a TOML file with CHARLA_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CharlaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHARLA_").split("_"))
            .extract()
            .map_err(|e| crate::error::CharlaError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.charla/charla.toml", home)
}
