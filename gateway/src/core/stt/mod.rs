//! Speech-to-text collaborators.
//!
//! The session consumes transcription through [`TranscriptionProvider`] and
//! [`TranscriptionStream`]; [`deepgram`] is the production implementation. Batch voice
//! requests use [`RecordingTranscriber`], implemented by [`prerecorded`].

mod base;
pub mod deepgram;
pub mod prerecorded;

pub use base::{
    RecordedTranscript, RecordingOptions, RecordingTranscriber, StreamEvent, StreamEventCallback,
    TranscriptEvent, TranscriptionError, TranscriptionOptions, TranscriptionProvider,
    TranscriptionStream, WordTiming,
};
pub use deepgram::{DeepgramSTTConfig, DeepgramTranscriptionProvider, DeepgramTranscriptionStream};
pub use prerecorded::{DEEPGRAM_PRERECORDED_URL, DeepgramRecordingTranscriber};
