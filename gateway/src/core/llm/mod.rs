//! Response generation collaborators.

mod base;
pub mod groq;
pub mod prompt;

pub use base::{AiResponse, GenerationError, GenerationRequest, ResponseGenerator, ResponseMetadata};
pub use groq::{DEFAULT_GROQ_MODEL, GROQ_BASE_URL, GroqConfig, GroqResponseGenerator};
