use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use sms_core::MessageType;
use std::env;
use std::time::Duration;

use crate::dispatcher::DispatchSettings;

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Dispatch behaviour
    pub dispatch: DispatchConfig,
    /// Vendor gateway credentials
    pub providers: ProvidersConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Template to gateway mappings served by the static registry
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

/// Dispatch configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatchConfig {
    /// Persist requests before dispatch and reconcile outcomes (default: true)
    pub store_requests: bool,
    /// Upper bound on a single vendor call in seconds (default: 30)
    pub vendor_timeout_seconds: u64,
    /// Event stream topic for deferred traffic (default: sms.deferred)
    pub handoff_topic: String,
}

/// Vendor gateways configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    /// Hash-authenticated gateway
    pub cdac: Option<CdacConfig>,
    /// Plain-credential gateway
    pub nic: Option<NicConfig>,
}

/// CDAC gateway configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CdacConfig {
    pub username: String,
    /// Plaintext password; only its MD5 digest goes on the wire
    pub password: String,
    /// Shared secret for the per-message SHA-512 key
    pub secret_key: String,
    /// Endpoint override
    pub base_url: Option<String>,
}

/// NIC gateway configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NicConfig {
    pub username: String,
    pub pin: String,
    /// DLT entity id sent with every message
    pub entity_id: String,
    /// Endpoint override
    pub base_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level or filter directive (default: info)
    pub level: String,
    /// Log format: json or pretty (default: json)
    pub format: String,
}

/// One template registry entry
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TemplateConfig {
    pub template_id: String,
    /// Gateway wire id ("1", "2") or name
    pub gateway: String,
    pub entity_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub message_type: MessageType,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            store_requests: true,
            vendor_timeout_seconds: 30,
            handoff_topic: "sms.deferred".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn settings(&self) -> DispatchSettings {
        DispatchSettings {
            store_requests: self.store_requests,
            vendor_timeout: Duration::from_secs(self.vendor_timeout_seconds),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(Config::try_from(&AppConfig::default())?)
            // Add configuration file based on environment
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (gitignored)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (prefixed with SMSDISPATCH_)
            .add_source(Environment::with_prefix("SMSDISPATCH").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Defaults overlaid with a TOML document.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            providers: ProvidersConfig::default(),
            logging: LoggingConfig::default(),
            templates: Vec::new(),
        }
    }
}
