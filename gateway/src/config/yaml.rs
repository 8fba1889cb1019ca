use serde::Deserialize;
use std::path::PathBuf;

use crate::core::context::UserSeed;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration; anything left out falls back to
/// environment variables and then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   tls:
///     enabled: true
///     cert_path: "/etc/coach/cert.pem"
///     key_path: "/etc/coach/key.pem"
///
/// providers:
///   deepgram_api_key: "your-deepgram-key"
///   groq_api_key: "your-groq-key"
///
/// llm:
///   base_url: "https://api.groq.com/openai/v1"
///   model: "llama-3.3-70b-versatile"
///   temperature: 0.7
///
/// speech:
///   stt_model: "nova-2"
///   tts_voice: "aura-2-celeste-es"
///   tts_sample_rate: 24000
///
/// session:
///   default_language: "es"
///   audio_buffer_capacity: 50
///   audio_process_interval_ms: 100
///   heartbeat_interval_ms: 30000
///   reconnect_max_attempts: 3
///   reconnect_delay_ms: 2000
///   response_timeout_ms: 30000
///   synthesis_timeout_ms: 15000
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 1000
///   max_connections_per_ip: 20
///
/// users:
///   - id: "u1"
///     name: "Ana"
///     fitness_level: "intermediate"
///     fitness_goals: ["strength", "mobility"]
///     workout_plans:
///       - name: "Lower body A"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub providers: Option<ProvidersYaml>,
    pub llm: Option<LlmYaml>,
    pub speech: Option<SpeechYaml>,
    pub session: Option<SessionYaml>,
    pub security: Option<SecurityYaml>,
    pub users: Vec<UserSeed>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Provider API keys from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    /// Deepgram key, used for both live transcription and speech synthesis
    pub deepgram_api_key: Option<String>,
    pub groq_api_key: Option<String>,
}

/// Response generation settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmYaml {
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SpeechYaml {
    pub stt_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_sample_rate: Option<u32>,
}

/// Per-session tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub default_language: Option<String>,
    pub audio_buffer_capacity: Option<usize>,
    pub audio_process_interval_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub reconnect_max_attempts: Option<u32>,
    pub reconnect_delay_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    pub synthesis_timeout_ms: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
  tls:
    enabled: false

providers:
  deepgram_api_key: "dg-key"
  groq_api_key: "groq-key"

llm:
  model: "llama-3.1-8b-instant"
  temperature: 0.3

speech:
  tts_voice: "aura-2-nestor-es"

session:
  default_language: "en"
  audio_buffer_capacity: 20
  reconnect_max_attempts: 5

security:
  max_connections_per_ip: 4

users:
  - id: "u1"
    name: "Ana"
    fitness_level: "beginner"
    fitness_goals: ["strength"]
    workout_plans:
      - name: "Full body"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.as_ref().unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(8080));
        assert_eq!(server.tls.as_ref().unwrap().enabled, Some(false));
        assert_eq!(
            config.providers.as_ref().unwrap().groq_api_key.as_deref(),
            Some("groq-key")
        );
        assert_eq!(config.llm.as_ref().unwrap().temperature, Some(0.3));
        assert_eq!(
            config.speech.as_ref().unwrap().tts_voice.as_deref(),
            Some("aura-2-nestor-es")
        );

        let session = config.session.as_ref().unwrap();
        assert_eq!(session.default_language.as_deref(), Some("en"));
        assert_eq!(session.audio_buffer_capacity, Some(20));
        assert_eq!(session.reconnect_max_attempts, Some(5));
        assert_eq!(session.heartbeat_interval_ms, None);

        assert_eq!(
            config.security.as_ref().unwrap().max_connections_per_ip,
            Some(4)
        );

        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].profile.name, "Ana");
        assert_eq!(config.users[0].workout_plans[0].name, "Full body");
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.session.is_none());
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_yaml_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "server:\n  port: 9000\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(config.server.unwrap().port, Some(9000));
    }

    #[test]
    fn test_yaml_config_missing_file() {
        let result = YamlConfig::from_file(&PathBuf::from("/nonexistent/config.yaml"));
        assert!(result.unwrap_err().to_string().contains("Failed to read"));
    }

    #[test]
    fn test_yaml_config_invalid_syntax() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "server: [unclosed").unwrap();

        let result = YamlConfig::from_file(&path);
        assert!(result.unwrap_err().to_string().contains("Failed to parse"));
    }
}
