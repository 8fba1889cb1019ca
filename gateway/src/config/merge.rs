use std::env;
use std::path::PathBuf;

use super::utils::{env_parsed, parse_bool};
use super::yaml::{TlsYaml, YamlConfig};
use super::{ServerConfig, TlsConfig};
use crate::core::llm::{DEFAULT_GROQ_MODEL, GROQ_BASE_URL};

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. YAML configuration values
/// 2. Environment variables
/// 3. Default values
///
/// With `None` the result is built from the environment and defaults alone.
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();

    // Helper macro to get value with priority: YAML > ENV > Default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            $yaml_value
                .or_else(|| env::var($env_var).ok())
                .unwrap_or_else(|| $default.to_string())
        };
    }

    // Helper macro for optional values: YAML > ENV
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            $yaml_value.or_else(|| env::var($env_var).ok())
        };
    }

    // Helper macro for parsed values: YAML > ENV > Default, malformed ENV is an error
    macro_rules! get_parsed {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            match $yaml_value {
                Some(value) => value,
                None => env_parsed($env_var)?.unwrap_or($default),
            }
        };
    }

    let server = yaml.server.as_ref();
    let providers = yaml.providers.as_ref();
    let llm = yaml.llm.as_ref();
    let speech = yaml.speech.as_ref();
    let session = yaml.session.as_ref();
    let security = yaml.security.as_ref();

    // Server configuration
    let host = get_value!("HOST", server.and_then(|s| s.host.clone()), "0.0.0.0");
    let port: u16 = get_parsed!("PORT", server.and_then(|s| s.port), 3001);
    let tls = merge_tls_config(server.and_then(|s| s.tls.as_ref()))?;

    // Provider API keys
    let deepgram_api_key = get_optional!(
        "DEEPGRAM_API_KEY",
        providers.and_then(|p| p.deepgram_api_key.clone())
    );
    let groq_api_key = get_optional!(
        "GROQ_API_KEY",
        providers.and_then(|p| p.groq_api_key.clone())
    );

    // Response generation
    let llm_base_url = get_value!(
        "LLM_BASE_URL",
        llm.and_then(|l| l.base_url.clone()),
        GROQ_BASE_URL
    );
    let llm_model = get_value!(
        "LLM_MODEL",
        llm.and_then(|l| l.model.clone()),
        DEFAULT_GROQ_MODEL
    );
    let llm_temperature: f32 =
        get_parsed!("LLM_TEMPERATURE", llm.and_then(|l| l.temperature), 0.7);

    // Speech
    let stt_model = get_value!(
        "STT_MODEL",
        speech.and_then(|s| s.stt_model.clone()),
        "nova-2"
    );
    let tts_voice = get_value!(
        "TTS_VOICE",
        speech.and_then(|s| s.tts_voice.clone()),
        "aura-2-celeste-es"
    );
    let tts_sample_rate: u32 = get_parsed!(
        "TTS_SAMPLE_RATE",
        speech.and_then(|s| s.tts_sample_rate),
        24000
    );

    // Session tuning
    let default_language = get_value!(
        "DEFAULT_LANGUAGE",
        session.and_then(|s| s.default_language.clone()),
        "es"
    );
    let audio_buffer_capacity: usize = get_parsed!(
        "AUDIO_BUFFER_CAPACITY",
        session.and_then(|s| s.audio_buffer_capacity),
        50
    );
    let audio_process_interval_ms: u64 = get_parsed!(
        "AUDIO_PROCESS_INTERVAL_MS",
        session.and_then(|s| s.audio_process_interval_ms),
        100
    );
    let heartbeat_interval_ms: u64 = get_parsed!(
        "HEARTBEAT_INTERVAL_MS",
        session.and_then(|s| s.heartbeat_interval_ms),
        30_000
    );
    let reconnect_max_attempts: u32 = get_parsed!(
        "RECONNECT_MAX_ATTEMPTS",
        session.and_then(|s| s.reconnect_max_attempts),
        3
    );
    let reconnect_delay_ms: u64 = get_parsed!(
        "RECONNECT_DELAY_MS",
        session.and_then(|s| s.reconnect_delay_ms),
        2000
    );
    let response_timeout_ms: u64 = get_parsed!(
        "RESPONSE_TIMEOUT_MS",
        session.and_then(|s| s.response_timeout_ms),
        30_000
    );
    let synthesis_timeout_ms: u64 = get_parsed!(
        "SYNTHESIS_TIMEOUT_MS",
        session.and_then(|s| s.synthesis_timeout_ms),
        15_000
    );

    // Security
    let cors_allowed_origins = get_optional!(
        "CORS_ALLOWED_ORIGINS",
        security.and_then(|s| s.cors_allowed_origins.clone())
    );
    let rate_limit_requests_per_second: u32 = get_parsed!(
        "RATE_LIMIT_REQUESTS_PER_SECOND",
        security.and_then(|s| s.rate_limit_requests_per_second),
        60
    );
    let rate_limit_burst_size: u32 = get_parsed!(
        "RATE_LIMIT_BURST_SIZE",
        security.and_then(|s| s.rate_limit_burst_size),
        10
    );
    let max_websocket_connections: Option<usize> =
        match security.and_then(|s| s.max_websocket_connections) {
            Some(limit) => Some(limit),
            None => env_parsed("MAX_WEBSOCKET_CONNECTIONS")?,
        };
    let max_connections_per_ip: u32 = get_parsed!(
        "MAX_CONNECTIONS_PER_IP",
        security.and_then(|s| s.max_connections_per_ip),
        100
    );

    Ok(ServerConfig {
        host,
        port,
        tls,
        deepgram_api_key,
        groq_api_key,
        llm_base_url,
        llm_model,
        llm_temperature,
        stt_model,
        tts_voice,
        tts_sample_rate,
        default_language,
        audio_buffer_capacity,
        audio_process_interval_ms,
        heartbeat_interval_ms,
        reconnect_max_attempts,
        reconnect_delay_ms,
        response_timeout_ms,
        synthesis_timeout_ms,
        cors_allowed_origins,
        rate_limit_requests_per_second,
        rate_limit_burst_size,
        max_websocket_connections,
        max_connections_per_ip,
        users: yaml.users,
    })
}

/// Merge TLS configuration from YAML and environment variables
///
/// TLS is off unless explicitly enabled; once enabled both paths are required.
fn merge_tls_config(
    yaml_tls: Option<&TlsYaml>,
) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    let enabled = yaml_tls
        .and_then(|t| t.enabled)
        .or_else(|| env::var("TLS_ENABLED").ok().and_then(|v| parse_bool(&v)))
        .unwrap_or(false);

    if !enabled {
        return Ok(None);
    }

    let cert_path = yaml_tls
        .and_then(|t| t.cert_path.clone())
        .or_else(|| env::var("TLS_CERT_PATH").ok())
        .ok_or("TLS_CERT_PATH is required when TLS is enabled")?;
    let key_path = yaml_tls
        .and_then(|t| t.key_path.clone())
        .or_else(|| env::var("TLS_KEY_PATH").ok())
        .ok_or("TLS_KEY_PATH is required when TLS is enabled")?;

    Ok(Some(TlsConfig {
        cert_path: PathBuf::from(cert_path),
        key_path: PathBuf::from(key_path),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::yaml::{ServerYaml, SessionYaml};
    use super::*;
    use serial_test::serial;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for key in [
                "HOST",
                "PORT",
                "TLS_ENABLED",
                "TLS_CERT_PATH",
                "TLS_KEY_PATH",
                "DEEPGRAM_API_KEY",
                "GROQ_API_KEY",
                "LLM_MODEL",
                "LLM_TEMPERATURE",
                "DEFAULT_LANGUAGE",
                "AUDIO_BUFFER_CAPACITY",
                "RECONNECT_MAX_ATTEMPTS",
                "MAX_WEBSOCKET_CONNECTIONS",
            ] {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_merge_defaults() {
        cleanup_env_vars();

        let config = merge_config(None).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert!(config.tls.is_none());
        assert_eq!(config.llm_base_url, GROQ_BASE_URL);
        assert_eq!(config.llm_model, DEFAULT_GROQ_MODEL);
        assert_eq!(config.stt_model, "nova-2");
        assert_eq!(config.default_language, "es");
        assert_eq!(config.audio_buffer_capacity, 50);
        assert_eq!(config.audio_process_interval_ms, 100);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.reconnect_max_attempts, 3);
        assert_eq!(config.reconnect_delay_ms, 2000);
        assert_eq!(config.rate_limit_requests_per_second, 60);
        assert_eq!(config.max_websocket_connections, None);
        assert_eq!(config.max_connections_per_ip, 100);
        assert!(config.users.is_empty());
    }

    #[test]
    #[serial]
    fn test_merge_yaml_overrides_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("HOST", "10.0.0.1");
            env::set_var("PORT", "5000");
            env::set_var("DEFAULT_LANGUAGE", "en");
            env::set_var("RECONNECT_MAX_ATTEMPTS", "7");
        }

        let yaml = YamlConfig {
            server: Some(ServerYaml {
                host: Some("127.0.0.1".to_string()),
                port: None,
                tls: None,
            }),
            session: Some(SessionYaml {
                default_language: Some("pt".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = merge_config(Some(yaml)).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5000);
        assert_eq!(config.default_language, "pt");
        assert_eq!(config.reconnect_max_attempts, 7);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_merge_invalid_env_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("AUDIO_BUFFER_CAPACITY", "lots");
        }

        let error = merge_config(None).unwrap_err();
        assert!(error.to_string().contains("AUDIO_BUFFER_CAPACITY"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_merge_tls_requires_paths() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TLS_ENABLED", "true");
            env::set_var("TLS_CERT_PATH", "/tmp/cert.pem");
        }

        let error = merge_config(None).unwrap_err();
        assert!(error.to_string().contains("TLS_KEY_PATH"));

        unsafe {
            env::set_var("TLS_KEY_PATH", "/tmp/key.pem");
        }
        let config = merge_config(None).unwrap();
        let tls = config.tls.as_ref().unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("/tmp/cert.pem"));
        assert_eq!(tls.key_path, PathBuf::from("/tmp/key.pem"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_merge_optional_connection_limit() {
        cleanup_env_vars();
        unsafe {
            env::set_var("MAX_WEBSOCKET_CONNECTIONS", "250");
        }

        let config = merge_config(None).unwrap();
        assert_eq!(config.max_websocket_connections, Some(250));

        cleanup_env_vars();
    }
}
