//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use campus_chat_core::{
    ChatApi, Conversation, CourseId, Error, Message, MessageId, Result, Role, UserId, UserRef,
};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn id(raw: &str) -> UserId {
    UserId::new(raw).unwrap()
}

pub fn user(raw: &str, name: &str, role: Role) -> UserRef {
    UserRef::new(id(raw), name, role)
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn message(msg_id: &str, from: &str, to: &str, text: &str, secs: i64) -> Message {
    Message {
        id: MessageId::new(msg_id).unwrap(),
        sender_id: id(from),
        recipient_id: id(to),
        course_id: None,
        text: text.to_string(),
        created_at: at(secs),
    }
}

pub fn conversation(counterparty: UserRef, last: Option<(&str, i64)>, unread: u32) -> Conversation {
    Conversation {
        counterparty,
        course_id: None,
        last_message: last.map(|(text, _)| text.to_string()),
        last_message_at: last.map(|(_, secs)| at(secs)),
        unread_count: unread,
    }
}

/// In-memory backend that records every call it receives.
#[derive(Default)]
pub struct MockChatApi {
    pub me: Mutex<Option<UserId>>,
    pub conversations: Mutex<Vec<Conversation>>,
    pub users: Mutex<HashMap<Role, Vec<UserRef>>>,
    pub history: Mutex<HashMap<UserId, Vec<Message>>>,
    pub unread: Mutex<u32>,
    pub fail_sends: Mutex<bool>,
    pub fail_clear: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
    next_id: Mutex<u32>,
}

impl MockChatApi {
    pub fn new(me: &str) -> Self {
        let api = Self::default();
        *api.me.lock() = Some(id(me));
        api
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(name)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn get_conversations(&self) -> Result<Vec<Conversation>> {
        self.record("get_conversations".to_string());
        Ok(self.conversations.lock().clone())
    }

    async fn get_messages(
        &self,
        counterparty: &UserId,
        _course: Option<&CourseId>,
    ) -> Result<Vec<Message>> {
        self.record(format!("get_messages {}", counterparty));
        Ok(self
            .history
            .lock()
            .get(counterparty)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        counterparty: &UserId,
        text: &str,
        course: Option<&CourseId>,
    ) -> Result<Message> {
        self.record(format!("send_message {} {}", counterparty, text));
        if *self.fail_sends.lock() {
            return Err(Error::Network("connection refused".to_string()));
        }

        let mut next = self.next_id.lock();
        *next += 1;
        let sender = self.me.lock().clone().unwrap_or_else(|| id("me"));
        Ok(Message {
            id: MessageId::new(&format!("srv-{}", *next)).unwrap(),
            sender_id: sender,
            recipient_id: counterparty.clone(),
            course_id: course.cloned(),
            text: text.to_string(),
            created_at: Utc::now(),
        })
    }

    async fn mark_as_read(&self, counterparty: &UserId, _course: Option<&CourseId>) -> Result<()> {
        self.record(format!("mark_as_read {}", counterparty));
        let mut conversations = self.conversations.lock();
        let mut cleared = 0;
        for conv in conversations.iter_mut().filter(|c| &c.counterparty.id == counterparty) {
            cleared += conv.unread_count;
            conv.unread_count = 0;
        }
        let mut unread = self.unread.lock();
        *unread = unread.saturating_sub(cleared);
        Ok(())
    }

    async fn get_unread_count(&self) -> Result<u32> {
        self.record("get_unread_count".to_string());
        Ok(*self.unread.lock())
    }

    async fn get_verified_users_by_role(&self, role: Role) -> Result<Vec<UserRef>> {
        self.record(format!("get_verified_users_by_role {}", role));
        Ok(self.users.lock().get(&role).cloned().unwrap_or_default())
    }

    async fn clear_history(&self, counterparty: &UserId) -> Result<()> {
        self.record(format!("clear_history {}", counterparty));
        if *self.fail_clear.lock() {
            return Err(Error::Api {
                status: 500,
                message: "storage unavailable".to_string(),
            });
        }
        self.conversations
            .lock()
            .retain(|c| &c.counterparty.id != counterparty);
        self.history.lock().remove(counterparty);
        Ok(())
    }
}
