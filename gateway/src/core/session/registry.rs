//! Process-wide index of live sessions.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub language: String,
    /// Unix time in milliseconds
    pub started_at: u64,
}

impl SessionSummary {
    pub fn new(session_id: &str, user_id: &str, language: &str) -> Self {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            language: language.to_string(),
            started_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionSummary>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, summary: SessionSummary) {
        self.sessions.insert(summary.session_id.clone(), summary);
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions.remove(session_id).map(|(_, summary)| summary)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All live sessions, oldest first
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }
}
