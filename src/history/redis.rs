use async_trait::async_trait;
use chrono::Utc;
use log::error;
use redis::{ Client, AsyncCommands };
use uuid::Uuid;

use crate::history::{ HistoryStore, StoreError };
use crate::models::chat::{ Conversation, Message, Role };

/// Keys, under a common prefix:
/// - `conversation:<id>` JSON conversation row
/// - `user:<user_id>` sorted set of conversation ids scored by `updated_at` (ms)
/// - `messages:<id>` list of JSON message rows, oldest first
pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
}

impl RedisHistoryStore {
    pub fn new(url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn conversation_key(&self, id: &str) -> String {
        format!("{}conversation:{}", self.key_prefix, id)
    }

    fn user_key(&self, user_id: &str) -> String {
        format!("{}user:{}", self.key_prefix, user_id)
    }

    fn messages_key(&self, id: &str) -> String {
        format!("{}messages:{}", self.key_prefix, id)
    }

    async fn save_conversation(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        conversation: &Conversation
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(conversation)?;
        let _: () = conn.set(self.conversation_key(&conversation.id), json).await?;
        let _: () = conn.zadd(
            self.user_key(&conversation.user_id),
            &conversation.id,
            conversation.updated_at.timestamp_millis()
        ).await?;
        Ok(())
    }

    async fn load_conversation(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &str
    ) -> Result<Conversation, StoreError> {
        let json: Option<String> = conn.get(self.conversation_key(id)).await?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str
    ) -> Result<Conversation, StoreError> {
        let mut conn = self.get_connection().await?;
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.save_conversation(&mut conn, &conversation).await?;
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        let mut conn = self.get_connection().await?;
        self.load_conversation(&mut conn, id).await
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.zrevrange(self.user_key(user_id), 0, -1).await?;
        let mut conversations = Vec::with_capacity(ids.len());

        for id in &ids {
            match self.load_conversation(&mut conn, id).await {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => {
                    error!("Error loading conversation {}: {}", id, e);
                }
            }
        }

        Ok(conversations)
    }

    async fn update_conversation(
        &self,
        id: &str,
        title: Option<&str>
    ) -> Result<Conversation, StoreError> {
        let mut conn = self.get_connection().await?;
        let mut conversation = self.load_conversation(&mut conn, id).await?;
        if let Some(title) = title {
            conversation.title = title.to_string();
        }
        conversation.updated_at = Utc::now();
        self.save_conversation(&mut conn, &conversation).await?;
        Ok(conversation)
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let conversation = self.load_conversation(&mut conn, id).await?;
        let _: () = conn.del(vec![self.conversation_key(id), self.messages_key(id)]).await?;
        let _: () = conn.zrem(self.user_key(&conversation.user_id), id).await?;
        Ok(())
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<Message, StoreError> {
        let mut conn = self.get_connection().await?;
        let exists: bool = conn.exists(self.conversation_key(conversation_id)).await?;
        if !exists {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&message)?;
        let _: i64 = conn.rpush(self.messages_key(conversation_id), &json).await?;
        Ok(message)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.get_connection().await?;
        let entries: Vec<String> = conn.lrange(self.messages_key(conversation_id), 0, -1).await?;
        let mut messages = Vec::with_capacity(entries.len());

        for entry in &entries {
            match serde_json::from_str::<Message>(entry) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    error!("Error parsing history entry: {}", e);
                }
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_share_the_prefix() {
        let store = RedisHistoryStore::new("redis://127.0.0.1:6379", "history:").unwrap();
        assert_eq!(store.conversation_key("c1"), "history:conversation:c1");
        assert_eq!(store.user_key("u1"), "history:user:u1");
        assert_eq!(store.messages_key("c1"), "history:messages:c1");
    }
}
