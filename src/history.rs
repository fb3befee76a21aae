use std::sync::Arc;

use agent_bridge::AgentBackend;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::store::{AgentStatus, Message, MessageRole, NoticeLevel, StoreHandle};

/// Saved conversations: listing, loading into the session, deleting.
pub struct ConversationHistory {
    store: StoreHandle,
    backend: Arc<dyn AgentBackend>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new(store: StoreHandle, backend: Arc<dyn AgentBackend>) -> Self {
        Self { store, backend }
    }

    /// Reloads the conversation list. Returns the number of entries.
    pub async fn refresh(&self) -> Result<usize, SessionError> {
        match self.backend.list_conversations().await {
            Ok(conversations) => {
                let count = conversations.len();
                self.store
                    .update(|store| store.set_conversations(conversations));
                Ok(count)
            }
            Err(error) => {
                warn!(%error, "failed to list conversations");
                self.notify_failure("load conversation history", error.message());
                Err(SessionError::backend("list_conversations", error))
            }
        }
    }

    /// Replaces the session messages with a saved conversation.
    pub async fn load(&self, id: &str) -> Result<usize, SessionError> {
        if self.store.read(|store| store.session().turn_active()) {
            return Err(SessionError::TurnActive);
        }

        let conversation = match self.backend.load_conversation(id).await {
            Ok(conversation) => conversation,
            Err(error) => {
                warn!(id, %error, "failed to load conversation");
                self.notify_failure("load conversation", error.message());
                return Err(SessionError::backend("load_conversation", error));
            }
        };

        let messages: Vec<Message> = conversation
            .messages
            .into_iter()
            .map(|stored| Message::new(MessageRole::from_stored(&stored.role), stored.content))
            .collect();
        let count = messages.len();

        let replaced = self.store.update(|store| {
            if store.session().turn_active() {
                return false;
            }
            store.replace_messages(messages);
            store.set_status(AgentStatus::Idle);
            store.set_streaming(false);
            true
        });
        if !replaced {
            return Err(SessionError::TurnActive);
        }

        info!(id, count, "conversation loaded");
        Ok(count)
    }

    pub async fn delete(&self, id: &str) -> Result<usize, SessionError> {
        if let Err(error) = self.backend.delete_conversation(id).await {
            warn!(id, %error, "failed to delete conversation");
            self.notify_failure("delete conversation", error.message());
            return Err(SessionError::backend("delete_conversation", error));
        }

        self.refresh().await
    }

    fn notify_failure(&self, action: &str, message: &str) {
        self.store.update(|store| {
            store.push_notice(NoticeLevel::Error, format!("Failed to {action}: {message}"));
        });
    }
}
