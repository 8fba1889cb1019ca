//! Configuration module for the coaching gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use coach_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::core::context::UserSeed;
use crate::core::recovery::RecoverySettings;
use crate::core::session::SessionSettings;
use crate::core::tts::SynthesisOptions;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains everything needed to run the gateway:
/// - Server settings (host, port, TLS)
/// - Provider API keys (Deepgram, Groq)
/// - Response generation and speech settings
/// - Session tuning (audio relay, heartbeat, recovery, timeouts)
/// - Security settings (CORS, rate limiting, connection limits)
/// - Seed users for the in-memory user store
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Provider API keys
    pub deepgram_api_key: Option<String>,
    pub groq_api_key: Option<String>,

    // Response generation
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f32,

    // Speech
    pub stt_model: String,
    pub tts_voice: String,
    pub tts_sample_rate: u32,

    // Session tuning
    pub default_language: String,
    /// Audio chunks held per session before the oldest is evicted
    pub audio_buffer_capacity: usize,
    pub audio_process_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub response_timeout_ms: u64,
    pub synthesis_timeout_ms: u64,

    // Security settings
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (same-origin only)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,

    /// Users loaded into the in-memory store at startup
    pub users: Vec<UserSeed>,
}

/// Zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.deepgram_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.groq_api_key {
            key.zeroize();
        }
    }
}

/// Built-in defaults, without consulting the environment
impl Default for ServerConfig {
    fn default() -> Self {
        let session = SessionSettings::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            deepgram_api_key: None,
            groq_api_key: None,
            llm_base_url: crate::core::llm::GROQ_BASE_URL.to_string(),
            llm_model: crate::core::llm::DEFAULT_GROQ_MODEL.to_string(),
            llm_temperature: 0.7,
            stt_model: "nova-2".to_string(),
            tts_voice: session.synthesis.voice.clone(),
            tts_sample_rate: session.synthesis.sample_rate,
            default_language: session.default_language.clone(),
            audio_buffer_capacity: session.relay_capacity,
            audio_process_interval_ms: session.relay_tick.as_millis() as u64,
            heartbeat_interval_ms: session.heartbeat_interval.as_millis() as u64,
            reconnect_max_attempts: session.recovery.max_attempts,
            reconnect_delay_ms: session.recovery.delay.as_millis() as u64,
            response_timeout_ms: session.response_timeout.as_millis() as u64,
            synthesis_timeout_ms: session.synthesis_timeout.as_millis() as u64,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs at startup, so ENV already carries its values here
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if TLS configuration is present
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Session tuning derived from this configuration
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            relay_capacity: self.audio_buffer_capacity,
            relay_tick: Duration::from_millis(self.audio_process_interval_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            recovery: RecoverySettings {
                max_attempts: self.reconnect_max_attempts,
                delay: Duration::from_millis(self.reconnect_delay_ms),
            },
            default_language: self.default_language.clone(),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            synthesis_timeout: Duration::from_millis(self.synthesis_timeout_ms),
            synthesis: SynthesisOptions {
                voice: self.tts_voice.clone(),
                sample_rate: self.tts_sample_rate,
                ..SynthesisOptions::default()
            },
        }
    }
}
