//! In-memory conversation history

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use parley_common::{HistoryEntry, SessionId};

use super::{CollaboratorError, ConversationInfo, ConversationStore};

#[derive(Debug)]
struct Conversation {
    name: String,
    created_at: DateTime<Utc>,
    entries: Vec<HistoryEntry>,
}

/// Conversation store that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    conversations: DashMap<SessionId, Conversation>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn info(id: SessionId, conversation: &Conversation) -> ConversationInfo {
        ConversationInfo {
            id,
            name: conversation.name.clone(),
            message_count: conversation.entries.len(),
            created_at: conversation.created_at,
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create(&self, name: Option<String>) -> Result<ConversationInfo, CollaboratorError> {
        let id = SessionId::new();
        let conversation = Conversation {
            name: name.unwrap_or_else(|| format!("conversation-{}", self.conversations.len() + 1)),
            created_at: Utc::now(),
            entries: Vec::new(),
        };
        let info = Self::info(id, &conversation);
        self.conversations.insert(id, conversation);
        Ok(info)
    }

    async fn list(&self) -> Result<Vec<ConversationInfo>, CollaboratorError> {
        let mut list: Vec<_> = self
            .conversations
            .iter()
            .map(|entry| Self::info(*entry.key(), entry.value()))
            .collect();
        list.sort_by_key(|info| info.created_at);
        Ok(list)
    }

    async fn exists(&self, id: SessionId) -> bool {
        self.conversations.contains_key(&id)
    }

    async fn delete(&self, id: SessionId) -> Result<(), CollaboratorError> {
        self.conversations
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CollaboratorError::ConversationNotFound(id.to_string()))
    }

    async fn append(&self, id: SessionId, entry: HistoryEntry) -> Result<(), CollaboratorError> {
        let mut conversation = self
            .conversations
            .get_mut(&id)
            .ok_or_else(|| CollaboratorError::ConversationNotFound(id.to_string()))?;
        conversation.entries.push(entry);
        Ok(())
    }

    async fn history(&self, id: SessionId, limit: Option<usize>) -> Result<Vec<HistoryEntry>, CollaboratorError> {
        let conversation = self
            .conversations
            .get(&id)
            .ok_or_else(|| CollaboratorError::ConversationNotFound(id.to_string()))?;
        let entries = &conversation.entries;
        let skip = limit.map_or(0, |limit| entries.len().saturating_sub(limit));
        Ok(entries[skip..].to_vec())
    }

    async fn clear(&self, id: SessionId) -> Result<(), CollaboratorError> {
        let mut conversation = self
            .conversations
            .get_mut(&id)
            .ok_or_else(|| CollaboratorError::ConversationNotFound(id.to_string()))?;
        conversation.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::history_entry;

    #[tokio::test]
    async fn test_history_limit_keeps_latest() {
        let store = MemoryConversationStore::new();
        let id = store.create(Some("work".into())).await.unwrap().id;
        for i in 0..5 {
            store.append(id, history_entry("user", format!("m{}", i))).await.unwrap();
        }

        let last_two = store.history(id, Some(2)).await.unwrap();
        let contents: Vec<_> = last_two.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
        assert_eq!(store.history(id, None).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_clear_and_delete() {
        let store = MemoryConversationStore::new();
        let id = store.create(None).await.unwrap().id;
        store.append(id, history_entry("user", "hi")).await.unwrap();

        store.clear(id).await.unwrap();
        assert!(store.history(id, None).await.unwrap().is_empty());

        store.delete(id).await.unwrap();
        assert!(!store.exists(id).await);
        assert!(matches!(
            store.delete(id).await,
            Err(CollaboratorError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sorted_by_creation() {
        let store = MemoryConversationStore::new();
        let first = store.create(Some("first".into())).await.unwrap();
        let second = store.create(Some("second".into())).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0].created_at <= list[1].created_at);
        assert!(list.iter().any(|c| c.id == first.id));
        assert!(list.iter().any(|c| c.id == second.id));
    }
}
