use std::time::Duration;

use crate::core::liveness::DEFAULT_PROBE_INTERVAL;
use crate::core::recovery::RecoverySettings;
use crate::core::relay::{DEFAULT_RELAY_CAPACITY, DEFAULT_RELAY_TICK};
use crate::core::tts::SynthesisOptions;

pub const DEFAULT_LANGUAGE: &str = "es";
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(15);

/// Tuning shared by every session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub relay_capacity: usize,
    pub relay_tick: Duration,
    pub heartbeat_interval: Duration,
    pub recovery: RecoverySettings,
    pub default_language: String,
    /// Upper bound on one response generation call
    pub response_timeout: Duration,
    /// Upper bound on waiting for the next synthesized chunk
    pub synthesis_timeout: Duration,
    pub synthesis: SynthesisOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            relay_capacity: DEFAULT_RELAY_CAPACITY,
            relay_tick: DEFAULT_RELAY_TICK,
            heartbeat_interval: DEFAULT_PROBE_INTERVAL,
            recovery: RecoverySettings::default(),
            default_language: DEFAULT_LANGUAGE.to_string(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            synthesis_timeout: DEFAULT_SYNTHESIS_TIMEOUT,
            synthesis: SynthesisOptions::default(),
        }
    }
}
