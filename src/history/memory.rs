use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::history::{ HistoryStore, StoreError };
use crate::models::chat::{ Conversation, Message, Role };

#[derive(Default)]
struct Tables {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryHistoryStore {
    tables: RwLock<Tables>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        self.tables
            .read().await
            .conversations.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let tables = self.tables.read().await;
        let mut conversations: Vec<Conversation> = tables.conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(conversations)
    }

    async fn update_conversation(
        &self,
        id: &str,
        title: Option<&str>
    ) -> Result<Conversation, StoreError> {
        let mut tables = self.tables.write().await;
        let conversation = tables.conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(title) = title {
            conversation.title = title.to_string();
        }
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.conversations.remove(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tables.messages.remove(id);
        Ok(())
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<Message, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.conversations.contains_key(conversation_id) {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        tables.messages.entry(conversation_id.to_string()).or_default().push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self.tables.read().await.messages.get(conversation_id).cloned().unwrap_or_default())
    }
}
