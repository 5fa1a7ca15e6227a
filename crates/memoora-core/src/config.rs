use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Top-level config (memoora.toml + MEMOORA_* env overrides).
///
/// One immutable value constructed at startup and handed to every component
/// constructor. There is no module-level mutable state anywhere in the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemooraConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub signup: SignupConfig,
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub ai: AiConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dialog: DialogConfig,
    #[serde(default)]
    pub clock: ClockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL, registered with the telephony provider
    /// for webhook callbacks. No trailing slash.
    #[serde(default)]
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            public_base_url: String::new(),
        }
    }
}

/// Domain policy applied to key issuance. An empty allowlist means any
/// domain not explicitly blocked may sign up.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignupConfig {
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub account_sid: String,
    pub auth_token: String,
    #[serde(default = "default_telephony_base_url")]
    pub base_url: String,
    pub caller: CallerIdConfig,
}

/// Caller-identity policy: which "from" the provider is asked to present,
/// and the number to fall back to when an alpha label is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerIdConfig {
    #[serde(default)]
    pub use_alpha_label: bool,
    pub alpha_label: Option<String>,
    pub fallback_phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AiConfig {
    pub openai: Option<OpenAiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_transcribe_model")]
    pub transcribe_model: String,
    #[serde(default = "default_reasoning_model")]
    pub reasoning_model: String,
    /// Deadline applied to every request; responses past it are cancelled.
    #[serde(default = "default_ai_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the application backend, no trailing slash.
    pub base_url: String,
    /// Shared secret: sent as x-api-key and used as the HMAC signing key.
    pub api_key: String,
    pub account_id: Option<String>,
    #[serde(default = "default_notify_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_recording_secs")]
    pub max_recording_secs: u32,
    #[serde(default = "default_max_call_secs")]
    pub max_call_secs: u32,
    #[serde(default = "default_calls_per_hour")]
    pub calls_per_hour: u32,
    #[serde(default = "default_calls_per_day")]
    pub calls_per_day: u32,
    #[serde(default = "default_calls_per_month")]
    pub calls_per_month: u32,
    /// Concurrent turn-pipeline tasks; placements beyond this are rejected.
    #[serde(default = "default_max_concurrent_turns")]
    pub max_concurrent_turns: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_recording_secs: default_max_recording_secs(),
            max_call_secs: default_max_call_secs(),
            calls_per_hour: default_calls_per_hour(),
            calls_per_day: default_calls_per_day(),
            calls_per_month: default_calls_per_month(),
            max_concurrent_turns: default_max_concurrent_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: String,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            temp_dir: default_temp_dir(),
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
pub struct DialogConfig {
    #[serde(default = "default_questions_path")]
    pub questions_path: String,
    /// Conversations idle longer than this are discarded by the sweeper.
    #[serde(default = "default_idle_ttl_hours")]
    pub idle_ttl_hours: u64,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            questions_path: default_questions_path(),
            idle_ttl_hours: default_idle_ttl_hours(),
        }
    }
}

/// Zone used for calendar-aligned usage windows (daily and monthly resets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "default_zone")]
    pub zone: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            zone: default_zone(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_telephony_base_url() -> String {
    "https://api.twilio.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_tts_model() -> String {
    "tts-1".to_string()
}
fn default_tts_voice() -> String {
    "nova".to_string()
}
fn default_transcribe_model() -> String {
    "whisper-1".to_string()
}
fn default_reasoning_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_ai_timeout_secs() -> u64 {
    20
}
fn default_notify_timeout_secs() -> u64 {
    30
}
fn default_max_recording_secs() -> u32 {
    60
}
fn default_max_call_secs() -> u32 {
    300
}
fn default_calls_per_hour() -> u32 {
    10
}
fn default_calls_per_day() -> u32 {
    50
}
fn default_calls_per_month() -> u32 {
    1000
}
fn default_max_concurrent_turns() -> usize {
    32
}
fn default_recordings_dir() -> String {
    "./recordings".to_string()
}
fn default_temp_dir() -> String {
    "./temp_audio".to_string()
}
fn default_db_path() -> String {
    "./memoora.db".to_string()
}
fn default_questions_path() -> String {
    "./config/questions.toml".to_string()
}
fn default_idle_ttl_hours() -> u64 {
    24
}
fn default_zone() -> String {
    "UTC".to_string()
}

impl MemooraConfig {
    /// Load config from a TOML file with MEMOORA_* env var overrides, then
    /// check required values. A config that fails here aborts startup.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("memoora.toml");

        let config: MemooraConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MEMOORA_").split("_"))
            .extract()
            .map_err(|e| crate::error::MemooraError::Config(e.to_string()))?;

        config.check_required()?;
        Ok(config)
    }

    /// Reject startup when a value the core cannot run without is absent.
    fn check_required(&self) -> crate::error::Result<()> {
        let mut missing = Vec::new();
        if self.server.public_base_url.is_empty() {
            missing.push("server.public_base_url");
        }
        if self.telephony.account_sid.is_empty() {
            missing.push("telephony.account_sid");
        }
        if self.telephony.auth_token.is_empty() {
            missing.push("telephony.auth_token");
        }
        if self.telephony.caller.fallback_phone.is_empty() {
            missing.push("telephony.caller.fallback_phone");
        }
        if self.upstream.base_url.is_empty() {
            missing.push("upstream.base_url");
        }
        if self.upstream.api_key.is_empty() {
            missing.push("upstream.api_key");
        }
        if self.telephony.caller.use_alpha_label
            && self
                .telephony
                .caller
                .alpha_label
                .as_deref()
                .unwrap_or("")
                .is_empty()
        {
            missing.push("telephony.caller.alpha_label");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(crate::error::MemooraError::Config(format!(
                "missing required config values: {}",
                missing.join(", ")
            )))
        }
    }

    /// Zone for calendar-window rollover. Invalid names are a config error.
    pub fn zone(&self) -> crate::error::Result<chrono_tz::Tz> {
        self.clock
            .zone
            .parse()
            .map_err(|_| crate::error::MemooraError::Config(format!(
                "unknown clock zone '{}'",
                self.clock.zone
            )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> MemooraConfig {
        MemooraConfig {
            server: ServerConfig {
                public_base_url: "https://calls.example.com".into(),
                ..ServerConfig::default()
            },
            signup: SignupConfig::default(),
            telephony: TelephonyConfig {
                account_sid: "AC123".into(),
                auth_token: "tok".into(),
                base_url: default_telephony_base_url(),
                caller: CallerIdConfig {
                    use_alpha_label: false,
                    alpha_label: None,
                    fallback_phone: "+17085547471".into(),
                },
            },
            ai: AiConfig::default(),
            upstream: UpstreamConfig {
                base_url: "https://app.example.com".into(),
                api_key: "secret".into(),
                account_id: None,
                request_timeout_secs: 30,
            },
            limits: LimitsConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            dialog: DialogConfig::default(),
            clock: ClockConfig::default(),
        }
    }

    #[test]
    fn minimal_config_passes_required_check() {
        assert!(minimal().check_required().is_ok());
    }

    #[test]
    fn missing_upstream_secret_is_rejected() {
        let mut cfg = minimal();
        cfg.upstream.api_key.clear();
        let err = cfg.check_required().unwrap_err();
        assert!(err.to_string().contains("upstream.api_key"));
    }

    #[test]
    fn alpha_label_required_when_enabled() {
        let mut cfg = minimal();
        cfg.telephony.caller.use_alpha_label = true;
        assert!(cfg.check_required().is_err());
        cfg.telephony.caller.alpha_label = Some("Memoora".into());
        assert!(cfg.check_required().is_ok());
    }

    #[test]
    fn zone_parses() {
        let mut cfg = minimal();
        assert_eq!(cfg.zone().unwrap(), chrono_tz::UTC);
        cfg.clock.zone = "America/Chicago".into();
        assert!(cfg.zone().is_ok());
        cfg.clock.zone = "Mars/Olympus".into();
        assert!(cfg.zone().is_err());
    }
}
