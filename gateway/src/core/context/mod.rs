//! User context and conversation history collaborators.

mod base;
pub mod memory;

pub use base::{
    ContextError, ContextProvider, ConversationMessage, ConversationStore, MessageRole,
    RECENT_CONVERSATIONS, UserContext, UserProfile, WorkoutPlan,
};
pub use memory::{InMemoryUserStore, MAX_STORED_CONVERSATIONS, UserSeed};
