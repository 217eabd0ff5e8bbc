//! The conversation persistence collaborator.
//!
//! The engine loads a conversation before the first PARSE and saves it
//! after termination; everything else about storage is the implementor's
//! concern. Keys are namespaced as `{user_id}_{pipeline_id}`.

use async_trait::async_trait;
use dashmap::DashMap;

#[cfg(test)]
use mockall::automock;

use crate::context::ConversationEntry;

/// External persistence for conversation histories.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// Loads the conversation stored under a key; an unknown key yields an
    /// empty history.
    async fn load_conversation(&self, key: &str) -> anyhow::Result<Vec<ConversationEntry>>;

    /// Replaces the conversation stored under a key.
    async fn save_conversation(
        &self,
        key: &str,
        entries: &[ConversationEntry],
    ) -> anyhow::Result<()>;
}

/// Process-local reference implementation.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<String, Vec<ConversationEntry>>,
}

impl InMemoryConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Returns true when nothing has been saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversationStore {
    async fn load_conversation(&self, key: &str) -> anyhow::Result<Vec<ConversationEntry>> {
        Ok(self
            .conversations
            .get(key)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn save_conversation(
        &self,
        key: &str,
        entries: &[ConversationEntry],
    ) -> anyhow::Result<()> {
        self.conversations.insert(key.to_string(), entries.to_vec());
        Ok(())
    }
}
