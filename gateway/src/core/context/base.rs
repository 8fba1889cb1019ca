use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::recovery::{Classify, FailureKind};

/// Number of past conversations folded into the prompt
pub const RECENT_CONVERSATIONS: usize = 5;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContextError {
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Classify for ContextError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            ContextError::UserNotFound(_) => FailureKind::NotFound,
            ContextError::Unavailable(_) => FailureKind::Network,
            ContextError::Storage(_) => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub fitness_level: String,
    #[serde(default)]
    pub fitness_goals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutPlan {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Everything the response generator needs to know about a user
#[derive(Debug, Clone, PartialEq)]
pub struct UserContext {
    pub profile: UserProfile,
    pub latest_plan: Option<WorkoutPlan>,
    /// Messages of the most recent conversations, oldest first
    pub recent_messages: Vec<ConversationMessage>,
}

impl UserContext {
    pub fn profile_summary(&self) -> String {
        format!(
            "Fitness level: {}, Goals: {}",
            self.profile.fitness_level,
            self.profile.fitness_goals.join(", ")
        )
    }

    pub fn training_history(&self) -> String {
        match &self.latest_plan {
            Some(plan) => format!("Latest plan: {}", plan.name),
            None => "No previous history".to_string(),
        }
    }

    pub fn conversation_history(&self) -> String {
        self.recent_messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn user_context(&self, user_id: &str) -> Result<UserContext, ContextError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist one finished exchange
    async fn save(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<(), ContextError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> UserContext {
        UserContext {
            profile: UserProfile {
                id: "u1".into(),
                name: "Ana".into(),
                fitness_level: "intermediate".into(),
                fitness_goals: vec!["strength".into(), "mobility".into()],
            },
            latest_plan: None,
            recent_messages: vec![
                ConversationMessage {
                    role: MessageRole::User,
                    content: "Hola".into(),
                },
                ConversationMessage {
                    role: MessageRole::Assistant,
                    content: "¡Hola Ana!".into(),
                },
            ],
        }
    }

    #[test]
    fn test_rendering() {
        let mut ctx = context();
        assert_eq!(
            ctx.profile_summary(),
            "Fitness level: intermediate, Goals: strength, mobility"
        );
        assert_eq!(ctx.training_history(), "No previous history");
        assert_eq!(ctx.conversation_history(), "user: Hola\nassistant: ¡Hola Ana!");

        ctx.latest_plan = Some(WorkoutPlan {
            name: "Leg day".into(),
        });
        assert_eq!(ctx.training_history(), "Latest plan: Leg day");
    }

    #[test]
    fn test_unknown_user_is_fatal() {
        assert!(!ContextError::UserNotFound("u9".into()).is_retryable());
        assert!(ContextError::Unavailable("db down".into()).is_retryable());
    }
}
