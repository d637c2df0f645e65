//! Supabase-hosted tables, spoken to through the PostgREST API.
//!
//! Expected tables:
//! - `conversations(id, user_id, title, created_at, updated_at)`
//! - `messages(id, conversation_id, role, content, created_at)`

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{ Client as HttpClient, RequestBuilder, Response, header::{ HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE } };
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use crate::history::{ HistoryStore, StoreError };
use crate::models::chat::{ Conversation, Message, Role };

const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";

pub struct SupabaseHistoryStore {
    http: HttpClient,
    rest_url: String,
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

impl SupabaseHistoryStore {
    pub fn new(project_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let invalid = |e: reqwest::header::InvalidHeaderValue| StoreError::Backend {
            status: 0,
            body: format!("Invalid Supabase key: {}", e),
        };
        headers.insert("apikey", HeaderValue::from_str(api_key).map_err(invalid)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(invalid)?
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        Ok(Self {
            http: HttpClient::builder().default_headers(headers).build()?,
            rest_url: format!("{}/rest/v1", project_url.trim_end_matches('/')),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}/{}", self.rest_url, name)
    }

    async fn rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Vec<T>, StoreError> {
        let resp = check(request.send().await?).await?;
        Ok(resp.json::<Vec<T>>().await?)
    }

    async fn single<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        id: &str
    ) -> Result<T, StoreError> {
        self.rows(request).await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Backend { status: status.as_u16(), body })
}

#[async_trait]
impl HistoryStore for SupabaseHistoryStore {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let row = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        let id = row.id.clone();
        self.single(self.http.post(self.table(CONVERSATIONS)).json(&row), &id).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        let request = self.http
            .get(self.table(CONVERSATIONS))
            .query(&[("select", "*".to_string()), ("id", eq(id))]);
        self.single(request, id).await
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let request = self.http
            .get(self.table(CONVERSATIONS))
            .query(
                &[
                    ("select", "*".to_string()),
                    ("user_id", eq(user_id)),
                    ("order", "updated_at.desc".to_string()),
                ]
            );
        self.rows(request).await
    }

    async fn update_conversation(
        &self,
        id: &str,
        title: Option<&str>
    ) -> Result<Conversation, StoreError> {
        let mut patch = json!({ "updated_at": Utc::now() });
        if let Some(title) = title {
            patch["title"] = json!(title);
        }
        let request = self.http
            .patch(self.table(CONVERSATIONS))
            .query(&[("id", eq(id))])
            .json(&patch);
        self.single(request, id).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        check(
            self.http
                .delete(self.table(MESSAGES))
                .query(&[("conversation_id", eq(id))])
                .send().await?
        ).await?;
        let deleted: Vec<Conversation> = self.rows(
            self.http.delete(self.table(CONVERSATIONS)).query(&[("id", eq(id))])
        ).await?;
        if deleted.is_empty() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<Message, StoreError> {
        let row = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let id = row.id.clone();
        self.single(self.http.post(self.table(MESSAGES)).json(&row), &id).await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let request = self.http
            .get(self.table(MESSAGES))
            .query(
                &[
                    ("select", "*".to_string()),
                    ("conversation_id", eq(conversation_id)),
                    ("order", "created_at.asc".to_string()),
                ]
            );
        self.rows(request).await
    }
}
