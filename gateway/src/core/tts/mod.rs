mod base;
pub mod deepgram;

pub use base::{AudioStream, SpeechSynthesizer, SynthesisError, SynthesisOptions};
pub use deepgram::{DEEPGRAM_TTS_URL, DeepgramTTS};
