use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::context::InMemoryUserStore;
use crate::core::llm::{GroqConfig, GroqResponseGenerator};
use crate::core::session::{SessionRegistry, SessionServices, SessionSettings};
use crate::core::stt::{
    DeepgramRecordingTranscriber, DeepgramSTTConfig, DeepgramTranscriptionProvider,
};
use crate::core::tts::DeepgramTTS;

/// Why a WebSocket connection slot could not be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Application state that can be shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    /// Collaborators handed to every new session
    pub services: SessionServices,
    pub session_settings: Arc<SessionSettings>,
    /// Live sessions, for introspection
    pub sessions: SessionRegistry,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build state with the production collaborators configured from `config`
    pub fn new(config: ServerConfig) -> Arc<Self> {
        if config.deepgram_api_key.is_none() {
            warn!("DEEPGRAM_API_KEY is not set; transcription and synthesis will fail");
        }
        if config.groq_api_key.is_none() {
            warn!("GROQ_API_KEY is not set; response generation will fail");
        }

        let transcription = DeepgramTranscriptionProvider::new(DeepgramSTTConfig {
            api_key: config.deepgram_api_key.clone(),
            model: config.stt_model.clone(),
            ..DeepgramSTTConfig::default()
        });
        let generator = GroqResponseGenerator::new(GroqConfig {
            api_key: config.groq_api_key.clone(),
            base_url: config.llm_base_url.clone(),
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            ..GroqConfig::default()
        });
        let synthesizer = DeepgramTTS::new(config.deepgram_api_key.clone());
        let recordings =
            DeepgramRecordingTranscriber::new(config.deepgram_api_key.clone(), &config.stt_model);
        let store = Arc::new(InMemoryUserStore::with_users(config.users.iter().cloned()));
        info!(users = config.users.len(), "Seeded in-memory user store");

        let services = SessionServices {
            transcription: Arc::new(transcription),
            generator: Arc::new(generator),
            synthesizer: Arc::new(synthesizer),
            context: store.clone(),
            conversations: store,
            recordings: Arc::new(recordings),
        };

        Self::with_services(config, services)
    }

    /// Build state around caller-provided collaborators
    pub fn with_services(config: ServerConfig, services: SessionServices) -> Arc<Self> {
        let session_settings = Arc::new(config.session_settings());
        Arc::new(Self {
            config,
            services,
            session_settings,
            sessions: SessionRegistry::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a WebSocket slot for `ip`, honoring the global and per-IP caps
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let global_limit = self.config.max_websocket_connections;
        self.ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match global_limit {
                    Some(limit) if current >= limit => None,
                    _ => Some(current + 1),
                }
            })
            .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;

        let per_ip_limit = self.config.max_connections_per_ip;
        let mut count = self.ip_connections.entry(ip).or_insert(0);
        if *count >= per_ip_limit {
            drop(count);
            self.ws_connections.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;
        Ok(())
    }

    /// Give back a slot taken by [`AppState::try_acquire_connection`]
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        self.ip_connections.remove_if_mut(&ip, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn state_with_limits(global: Option<usize>, per_ip: u32) -> Arc<AppState> {
        let mut config = ServerConfig::default();
        config.max_websocket_connections = global;
        config.max_connections_per_ip = per_ip;
        AppState::new(config)
    }

    #[test]
    fn test_connection_tracking_basic() {
        let state = state_with_limits(Some(10), 3);
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 100).into();

        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&ip), 0);

        for expected in 1..=3 {
            assert!(state.try_acquire_connection(ip).is_ok());
            assert_eq!(state.ws_connection_count(), expected);
            assert_eq!(state.ip_connection_count(&ip), expected as u32);
        }

        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );
        assert_eq!(state.ws_connection_count(), 3);

        state.release_connection(ip);
        assert_eq!(state.ws_connection_count(), 2);
        assert_eq!(state.ip_connection_count(&ip), 2);
        assert!(state.try_acquire_connection(ip).is_ok());
    }

    #[test]
    fn test_global_connection_limit() {
        let state = state_with_limits(Some(2), 100);
        let first: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        let second: IpAddr = Ipv4Addr::new(10, 0, 0, 2).into();

        assert!(state.try_acquire_connection(first).is_ok());
        assert!(state.try_acquire_connection(second).is_ok());
        assert_eq!(
            state.try_acquire_connection(second),
            Err(ConnectionLimitError::GlobalLimitReached)
        );
        assert_eq!(state.ip_connection_count(&second), 1);
    }

    #[test]
    fn test_release_forgets_idle_ips() {
        let state = state_with_limits(None, 5);
        let ip: IpAddr = Ipv4Addr::LOCALHOST.into();

        assert!(state.try_acquire_connection(ip).is_ok());
        state.release_connection(ip);
        state.release_connection(ip);

        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&ip), 0);
        assert!(state.ip_connections.is_empty());
    }

    #[test]
    fn test_session_settings_follow_config() {
        let mut config = ServerConfig::default();
        config.audio_buffer_capacity = 7;
        config.default_language = "en".to_string();
        let state = AppState::new(config);

        assert_eq!(state.session_settings.relay_capacity, 7);
        assert_eq!(state.session_settings.default_language, "en");
        assert!(state.sessions.is_empty());
    }
}
