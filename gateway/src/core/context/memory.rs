//! In-process user store backing both [`ContextProvider`] and [`ConversationStore`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use super::base::{
    ContextError, ContextProvider, ConversationMessage, ConversationStore, MessageRole,
    RECENT_CONVERSATIONS, UserContext, UserProfile, WorkoutPlan,
};

/// Exchanges retained per user; older ones are discarded on save
pub const MAX_STORED_CONVERSATIONS: usize = 50;

/// Initial data for one user, as read from configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserSeed {
    #[serde(flatten)]
    pub profile: UserProfile,
    /// Oldest first; the last entry is the current plan
    #[serde(default)]
    pub workout_plans: Vec<WorkoutPlan>,
}

#[derive(Debug, Clone)]
struct UserRecord {
    profile: UserProfile,
    workout_plans: Vec<WorkoutPlan>,
    conversations: Vec<Vec<ConversationMessage>>,
}

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: DashMap<String, UserRecord>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(seeds: impl IntoIterator<Item = UserSeed>) -> Self {
        let store = Self::new();
        for seed in seeds {
            store.upsert(seed);
        }
        store
    }

    /// Insert or replace a user's profile and plans, keeping any conversations
    pub fn upsert(&self, seed: UserSeed) {
        let id = seed.profile.id.clone();
        self.users
            .entry(id)
            .and_modify(|record| {
                record.profile = seed.profile.clone();
                record.workout_plans = seed.workout_plans.clone();
            })
            .or_insert_with(|| UserRecord {
                profile: seed.profile,
                workout_plans: seed.workout_plans,
                conversations: Vec::new(),
            });
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn conversation_count(&self, user_id: &str) -> usize {
        self.users
            .get(user_id)
            .map(|record| record.conversations.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ContextProvider for InMemoryUserStore {
    async fn user_context(&self, user_id: &str) -> Result<UserContext, ContextError> {
        let record = self
            .users
            .get(user_id)
            .ok_or_else(|| ContextError::UserNotFound(user_id.to_string()))?;

        let skip = record.conversations.len().saturating_sub(RECENT_CONVERSATIONS);
        let recent_messages = record
            .conversations
            .iter()
            .skip(skip)
            .flatten()
            .cloned()
            .collect();

        Ok(UserContext {
            profile: record.profile.clone(),
            latest_plan: record.workout_plans.last().cloned(),
            recent_messages,
        })
    }
}

#[async_trait]
impl ConversationStore for InMemoryUserStore {
    async fn save(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<(), ContextError> {
        let mut record = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| ContextError::UserNotFound(user_id.to_string()))?;

        record.conversations.push(vec![
            ConversationMessage {
                role: MessageRole::User,
                content: user_message.to_string(),
            },
            ConversationMessage {
                role: MessageRole::Assistant,
                content: assistant_message.to_string(),
            },
        ]);
        let excess = record
            .conversations
            .len()
            .saturating_sub(MAX_STORED_CONVERSATIONS);
        record.conversations.drain(..excess);
        debug!(user_id, total = record.conversations.len(), "Saved conversation");
        Ok(())
    }
}
