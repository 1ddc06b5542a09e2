//! REST API client for the chat backend

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::models::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};

/// Backend operations the chat core consumes.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn get_conversations(&self) -> Result<Vec<Conversation>>;

    /// Thread history, oldest first (callers sort anyway).
    async fn get_messages(
        &self,
        counterparty: &UserId,
        course: Option<&CourseId>,
    ) -> Result<Vec<Message>>;

    async fn send_message(
        &self,
        counterparty: &UserId,
        text: &str,
        course: Option<&CourseId>,
    ) -> Result<Message>;

    async fn mark_as_read(&self, counterparty: &UserId, course: Option<&CourseId>) -> Result<()>;

    async fn get_unread_count(&self) -> Result<u32>;

    async fn get_verified_users_by_role(&self, role: Role) -> Result<Vec<UserRef>>;

    /// Removes every message with `counterparty`. The account stays.
    async fn clear_history(&self, counterparty: &UserId) -> Result<()>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

pub struct HttpChatApi {
    client: Client,
    base_url: String,
    token: Mutex<Option<String>>,
}

impl HttpChatApi {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.server.use_tls) // For development
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url(),
            token: Mutex::new(None),
        })
    }

    pub fn with_token(self, token: &str) -> Self {
        self.set_token(Some(token));
        self
    }

    pub fn set_token(&self, token: Option<&str>) {
        *self.token.lock() = token.map(str::to_string);
    }

    fn auth_header(&self) -> Option<String> {
        self.token.lock().as_ref().map(|t| format!("Bearer {}", t))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, mut req: RequestBuilder) -> RequestBuilder {
        if let Some(auth) = self.auth_header() {
            req = req.header("Authorization", auth);
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let resp = self.authorized(req).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.pointer("/error/message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(body);

        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn json(&self, req: RequestBuilder) -> Result<Value> {
        let resp = self.send(req).await?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn get_conversations(&self) -> Result<Vec<Conversation>> {
        let data = self
            .json(self.client.get(self.url("/chat/conversations")))
            .await?;
        Ok(parse_list(&data, &["conversations"], Conversation::from_value))
    }

    async fn get_messages(
        &self,
        counterparty: &UserId,
        course: Option<&CourseId>,
    ) -> Result<Vec<Message>> {
        let mut req = self
            .client
            .get(self.url(&format!("/chat/messages/{}", counterparty)));
        if let Some(course) = course {
            req = req.query(&[("courseId", course.as_str())]);
        }

        let data = self.json(req).await?;
        Ok(parse_list(&data, &["messages"], Message::from_value))
    }

    async fn send_message(
        &self,
        counterparty: &UserId,
        text: &str,
        course: Option<&CourseId>,
    ) -> Result<Message> {
        let mut body = json!({
            "recipientId": counterparty.as_str(),
            "text": text,
        });
        if let Some(course) = course {
            body["courseId"] = json!(course.as_str());
        }

        let data = self
            .json(self.client.post(self.url("/chat/messages")).json(&body))
            .await?;
        let payload = data.get("message").filter(|v| v.is_object()).unwrap_or(&data);

        Message::from_value(payload).ok_or_else(|| Error::Api {
            status: 200,
            message: "send response carried no message".to_string(),
        })
    }

    async fn mark_as_read(&self, counterparty: &UserId, course: Option<&CourseId>) -> Result<()> {
        let mut req = self
            .client
            .put(self.url(&format!("/chat/read/{}", counterparty)));
        if let Some(course) = course {
            req = req.query(&[("courseId", course.as_str())]);
        }
        self.send(req).await?;
        Ok(())
    }

    async fn get_unread_count(&self) -> Result<u32> {
        let data = self
            .json(self.client.get(self.url("/chat/unread-count")))
            .await?;
        let count = data["count"].as_u64().unwrap_or(0);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn get_verified_users_by_role(&self, role: Role) -> Result<Vec<UserRef>> {
        let req = self
            .client
            .get(self.url("/users/verified"))
            .query(&[("role", role.as_str())]);

        let data = self.json(req).await?;
        let mut users = parse_list(&data, &["users"], UserRef::from_value);
        // The endpoint does not always echo the role back.
        for user in users.iter_mut().filter(|u| u.role == Role::Other) {
            user.role = role;
        }
        Ok(users)
    }

    async fn clear_history(&self, counterparty: &UserId) -> Result<()> {
        self.send(
            self.client
                .delete(self.url(&format!("/chat/history/{}", counterparty))),
        )
        .await?;
        Ok(())
    }
}

/// Accepts a bare array or an object wrapping it under one of `keys` /
/// `data`. Items that fail to parse are skipped.
fn parse_list<T>(data: &Value, keys: &[&str], parse: impl Fn(&Value) -> Option<T>) -> Vec<T> {
    let items = data.as_array().or_else(|| {
        keys.iter()
            .chain(std::iter::once(&"data"))
            .find_map(|k| data.get(*k).and_then(Value::as_array))
    });

    match items {
        Some(items) => items.iter().filter_map(parse).collect(),
        None => {
            tracing::warn!("Unexpected list payload: {}", data);
            Vec::new()
        }
    }
}
