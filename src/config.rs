use crate::error::Result;
use crate::trust::TrustWeights;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct AppConfig {
    pub registry: RegistryConfig,
    pub session: SessionConfig,
    pub trust: TrustConfig,
    pub auth: AuthConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct RegistryConfig {
    /// Freshness window for the opt-in recency filter.
    pub freshness_window_secs: u64,
    pub default_page_size: usize,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct SessionConfig {
    pub inactivity_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    pub message_ttl_secs: u64,
    /// Fixed queued-delivery estimate returned with acknowledgments.
    pub delivery_estimate_ms: u64,
    pub event_channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct TrustConfig {
    pub recency_window_days: i64,
    pub credential_cap: u32,
    pub weights: TrustWeights,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct AuthConfig {
    pub challenge_ttl_secs: u64,
    pub nonce_bytes: usize,
    pub session_token_bytes: usize,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct AuditConfig {
    pub endpoint: Option<String>,
    pub source: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 3600,
            default_page_size: 50,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 300,
            reaper_interval_secs: 300,
            message_ttl_secs: 60,
            delivery_estimate_ms: 100,
            event_channel_capacity: 256,
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            recency_window_days: 30,
            credential_cap: 5,
            weights: TrustWeights::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            challenge_ttl_secs: 300,
            nonce_bytes: 32,
            session_token_bytes: 32,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            source: "atp-core".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Some("json".to_string()),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;

        let config: AppConfig = toml::from_str(&config_str).map_err(|e| {
            crate::error::ProtocolError::Config(format!("Failed to parse config file: {}", e))
        })?;

        Ok(config)
    }

    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;

        if let Ok(endpoint) = std::env::var("ATP_AUDIT_ENDPOINT") {
            config.audit.endpoint = Some(endpoint);
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.default_page_size == 0 {
            return Err(crate::error::ProtocolError::Config(
                "Registry page size cannot be 0".to_string(),
            ));
        }

        if self.session.inactivity_timeout_secs == 0 || self.session.reaper_interval_secs == 0 {
            return Err(crate::error::ProtocolError::Config(
                "Session timers cannot be 0".to_string(),
            ));
        }

        if self.auth.challenge_ttl_secs == 0 {
            return Err(crate::error::ProtocolError::Config(
                "Challenge TTL cannot be 0".to_string(),
            ));
        }

        if self.auth.nonce_bytes < 16 {
            return Err(crate::error::ProtocolError::Config(
                "Nonce must be at least 16 bytes".to_string(),
            ));
        }

        let weights = &self.trust.weights;
        let sum = weights.interaction + weights.recency + weights.credential + weights.success;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(crate::error::ProtocolError::Config(format!(
                "Trust factor weights must sum to 1.0, got {}",
                sum
            )));
        }

        Ok(())
    }
}

impl From<&TrustConfig> for crate::trust::ScorerConfig {
    fn from(config: &TrustConfig) -> Self {
        Self {
            weights: config.weights,
            recency_window_days: config.recency_window_days,
            credential_cap: config.credential_cap,
        }
    }
}

/// Installs the global tracing subscriber; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let default_config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&default_config).map_err(|e| {
        crate::error::ProtocolError::Config(format!("Failed to serialize default config: {}", e))
    })?;

    std::fs::write(path, toml_str)?;
    Ok(())
}
