use async_trait::async_trait;
use tokio::sync::mpsc;

use super::protocol::{MessageRoute, OutgoingMessage};
use crate::core::recovery::RecoveryObserver;

/// Reports recovery progress to the client
#[derive(Debug, Clone)]
pub struct ClientNotifier {
    outgoing: mpsc::Sender<MessageRoute>,
}

impl ClientNotifier {
    pub fn new(outgoing: mpsc::Sender<MessageRoute>) -> Self {
        Self { outgoing }
    }

    async fn send(&self, message: OutgoingMessage) {
        let _ = self.outgoing.send(MessageRoute::Outgoing(message)).await;
    }
}

#[async_trait]
impl RecoveryObserver for ClientNotifier {
    async fn on_attempt(&self, attempt: u32, max_attempts: u32) {
        self.send(OutgoingMessage::Reconnecting {
            attempt,
            max_attempts,
        })
        .await;
    }

    async fn on_recovered(&self) {
        self.send(OutgoingMessage::Reconnected).await;
    }

    async fn on_exhausted(&self, message: &str, code: &str) {
        self.send(OutgoingMessage::ReconnectionFailed {
            message: message.to_string(),
            code: code.to_string(),
        })
        .await;
    }
}
