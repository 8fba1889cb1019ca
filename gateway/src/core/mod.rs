pub mod context;
pub mod liveness;
pub mod llm;
pub mod recovery;
pub mod relay;
pub mod session;
pub mod stt;
pub mod tts;

// Re-export commonly used types for convenience
pub use liveness::LivenessMonitor;
pub use recovery::{Classify, FailureKind, RecoveryCoordinator, RecoveryOutcome, RecoverySettings};
pub use relay::{AudioRelay, AudioSink};
pub use session::{
    SessionController, SessionHandle, SessionRegistry, SessionServices, SessionSettings,
};
