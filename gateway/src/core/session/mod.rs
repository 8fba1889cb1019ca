//! Real-time voice sessions.
//!
//! A [`SessionController`] owns one client's conversation: it relays microphone audio into a
//! transcription stream, answers final transcripts through the response pipeline, keeps the
//! connection under a liveness probe and rebuilds the stream when it fails.
//! [`process_recording`] answers a single uploaded recording with the same collaborators.

mod controller;
mod errors;
mod notifier;
mod pipeline;
pub mod protocol;
mod recording;
mod registry;
mod settings;


pub use controller::{
    SESSION_EVENT_BUFFER, SessionController, SessionEvent, SessionHandle, SessionServices,
    SessionState,
};
pub use errors::SessionError;
pub use notifier::ClientNotifier;
pub use pipeline::{PipelineJob, PipelineOutcome, run_pipeline};
pub use protocol::{ClientCommand, IncomingMessage, MessageRoute, OutgoingMessage};
pub use recording::{RecordingRequest, VoiceReply, process_recording};
pub use registry::{SessionRegistry, SessionSummary};
pub use settings::{
    DEFAULT_LANGUAGE, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_SYNTHESIS_TIMEOUT, SessionSettings,
};
