use super::{ServerConfig, TlsConfig};

/// Validate a fully merged configuration
pub fn validate_config(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_tls(&config.tls)?;
    validate_session_tuning(config)?;
    validate_temperature(config.llm_temperature)?;
    validate_users(config)?;
    Ok(())
}

/// Validate TLS configuration
///
/// Both certificate and key files must exist when TLS is enabled.
pub fn validate_tls(tls: &Option<TlsConfig>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(tls) = tls {
        if !tls.cert_path.exists() {
            return Err(format!(
                "TLS certificate file does not exist: {}",
                tls.cert_path.display()
            )
            .into());
        }
        if !tls.key_path.exists() {
            return Err(format!(
                "TLS private key file does not exist: {}",
                tls.key_path.display()
            )
            .into());
        }
    }

    Ok(())
}

/// Validate per-session tuning values
///
/// Buffer capacity, intervals and the attempt budget must all be at least 1.
pub fn validate_session_tuning(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let checks = [
        ("audio_buffer_capacity", config.audio_buffer_capacity as u64),
        ("audio_process_interval_ms", config.audio_process_interval_ms),
        ("heartbeat_interval_ms", config.heartbeat_interval_ms),
        ("reconnect_max_attempts", u64::from(config.reconnect_max_attempts)),
        ("response_timeout_ms", config.response_timeout_ms),
        ("synthesis_timeout_ms", config.synthesis_timeout_ms),
    ];

    for (name, value) in checks {
        if value == 0 {
            return Err(format!("{name} must be at least 1").into());
        }
    }

    if config.default_language.trim().is_empty() {
        return Err("default_language must not be empty".into());
    }

    Ok(())
}

/// Validate the sampling temperature sent to the response generator
pub fn validate_temperature(temperature: f32) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(format!("llm temperature must be within 0.0..=2.0, got {temperature}").into());
    }
    Ok(())
}

/// Validate seed users: ids must be present and unique
pub fn validate_users(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut seen = std::collections::HashSet::new();
    for user in &config.users {
        if user.profile.id.trim().is_empty() {
            return Err("users entries must have a non-empty id".into());
        }
        if !seen.insert(user.profile.id.as_str()) {
            return Err(format!("duplicate user id in users: {}", user.profile.id).into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::merge::merge_config;
    use super::*;
    use crate::core::context::{UserProfile, UserSeed};
    use serial_test::serial;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn seed(id: &str) -> UserSeed {
        UserSeed {
            profile: UserProfile {
                id: id.to_string(),
                name: "Test".to_string(),
                fitness_level: "beginner".to_string(),
                fitness_goals: vec![],
            },
            workout_plans: vec![],
        }
    }

    #[test]
    fn test_validate_tls_missing_files() {
        let tls = Some(TlsConfig {
            cert_path: PathBuf::from("/nonexistent/cert.pem"),
            key_path: PathBuf::from("/nonexistent/key.pem"),
        });
        let error = validate_tls(&tls).unwrap_err();
        assert!(error.to_string().contains("certificate"));
        assert!(validate_tls(&None).is_ok());
    }

    #[test]
    fn test_validate_tls_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        let cert_path = temp_dir.path().join("cert.pem");
        let key_path = temp_dir.path().join("key.pem");
        std::fs::write(&cert_path, "cert").unwrap();
        std::fs::write(&key_path, "key").unwrap();

        assert!(validate_tls(&Some(TlsConfig {
            cert_path,
            key_path
        }))
        .is_ok());
    }

    #[test]
    fn test_validate_temperature_bounds() {
        assert!(validate_temperature(0.0).is_ok());
        assert!(validate_temperature(2.0).is_ok());
        assert!(validate_temperature(-0.1).is_err());
        assert!(validate_temperature(2.5).is_err());
    }

    #[test]
    #[serial]
    fn test_validate_session_tuning_and_users() {
        let mut config = merge_config(None).unwrap();
        assert!(validate_config(&config).is_ok());

        config.heartbeat_interval_ms = 0;
        let error = validate_session_tuning(&config).unwrap_err();
        assert!(error.to_string().contains("heartbeat_interval_ms"));
        config.heartbeat_interval_ms = 1;

        config.users = vec![seed("u1"), seed("u1")];
        let error = validate_users(&config).unwrap_err();
        assert!(error.to_string().contains("duplicate"));

        config.users = vec![seed(" ")];
        assert!(validate_users(&config).is_err());
    }
}
