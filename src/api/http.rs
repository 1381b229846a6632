use super::{ApiError, ApiResult, CancelToken, ChatApi, ConversationSummary, SendReply};
use crate::model::RawMessage;
use crate::types::Attachment;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::env;

/// reqwest-backed client for the assistant backend REST API.
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    content: &'a str,
    attachments: &'a [Attachment],
}

#[derive(Serialize)]
struct RenameRequest<'a> {
    title: &'a str,
}

#[derive(Deserialize)]
struct CreatedConversation {
    #[serde(alias = "conversationId")]
    id: String,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    /// Configure from environment variables.
    ///
    /// `ASSISTANT_API_URL` is required; `ASSISTANT_API_KEY` is attached as a
    /// bearer token when present.
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("ASSISTANT_API_URL").map_err(|_| {
            anyhow::anyhow!("No assistant backend configured. Set ASSISTANT_API_URL")
        })?;
        let api_key = env::var("ASSISTANT_API_KEY").ok();
        Ok(Self::new(base_url, api_key))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> ApiResult<String> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn post_message(
        &self,
        id: &str,
        text: &str,
        attachments: &[Attachment],
    ) -> ApiResult<SendReply> {
        let body = self
            .execute(
                self.request(Method::POST, &format!("/conversations/{}/messages", id))
                    .json(&SendRequest {
                        content: text,
                        attachments,
                    }),
            )
            .await?;
        decode(&body)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self, limit: usize) -> ApiResult<Vec<ConversationSummary>> {
        let body = self
            .execute(
                self.request(Method::GET, "/conversations")
                    .query(&[("limit", limit)]),
            )
            .await?;
        parse_conversation_list(&body)
    }

    async fn create_conversation(&self) -> ApiResult<String> {
        let body = self.execute(self.request(Method::POST, "/conversations")).await?;
        let created: CreatedConversation = decode(&body)?;
        Ok(created.id)
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> ApiResult<()> {
        self.execute(
            self.request(Method::PUT, &format!("/conversations/{}", id))
                .json(&RenameRequest { title }),
        )
        .await?;
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> ApiResult<()> {
        self.execute(self.request(Method::DELETE, &format!("/conversations/{}", id)))
            .await?;
        Ok(())
    }

    async fn fetch_messages(&self, id: &str) -> ApiResult<Vec<RawMessage>> {
        let body = self
            .execute(self.request(Method::GET, &format!("/conversations/{}/messages", id)))
            .await?;
        parse_message_list(&body)
    }

    async fn send_message(
        &self,
        id: &str,
        text: &str,
        attachments: &[Attachment],
        cancel: &CancelToken,
    ) -> ApiResult<SendReply> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            reply = self.post_message(id, text, attachments) => reply,
        }
    }

    async fn delete_message(&self, conversation_id: &str, server_id: &str) -> ApiResult<()> {
        self.execute(self.request(
            Method::DELETE,
            &format!("/conversations/{}/messages/{}", conversation_id, server_id),
        ))
        .await?;
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body).map_err(|err| ApiError::Decode(err.to_string()))
}

// The backend has shipped both enveloped and bare list bodies; accept either,
// the same way message payload naming is absorbed in `model`.

fn parse_conversation_list(body: &str) -> ApiResult<Vec<ConversationSummary>> {
    #[derive(Deserialize)]
    struct Envelope {
        conversations: Vec<ConversationSummary>,
    }

    if let Ok(parsed) = serde_json::from_str::<Envelope>(body) {
        return Ok(parsed.conversations);
    }
    decode(body)
}

fn parse_message_list(body: &str) -> ApiResult<Vec<RawMessage>> {
    #[derive(Deserialize)]
    struct Envelope {
        messages: Vec<RawMessage>,
    }

    if let Ok(parsed) = serde_json::from_str::<Envelope>(body) {
        return Ok(parsed.messages);
    }
    decode(body)
}
