//! Data models for Campus Chat
//!
//! Backend payloads are loose about identifiers: a sender may arrive as
//! `senderId: 42`, `senderId: "42"` or `sender: { "_id": "42" }`. Every id
//! goes through [`canonical_id`] before it is stored, so equality checks
//! elsewhere compare plain canonical strings.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Canonical string form of an identifier value.
///
/// Strings are trimmed, numbers are stringified and `{ "_id": .. }` /
/// `{ "id": .. }` objects are unwrapped. Anything empty or unidentifiable
/// yields `None`.
pub fn canonical_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map
            .get("_id")
            .or_else(|| map.get("id"))
            .and_then(canonical_id),
        _ => None,
    }
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "Value", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Canonicalize a raw string id. Returns `None` when blank.
            pub fn new(raw: &str) -> Option<Self> {
                canonical_id(&Value::String(raw.to_string())).map(Self)
            }

            pub fn from_value(value: &Value) -> Option<Self> {
                canonical_id(value).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<Value> for $name {
            type Error = String;

            fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
                Self::from_value(&value)
                    .ok_or_else(|| format!("unresolvable {}: {}", stringify!($name), value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type!(UserId);
id_type!(CourseId);
id_type!(
    /// Server-assigned message id, or a provisional `tmp-` id for an
    /// optimistic send that has not been confirmed yet.
    MessageId
);

const PROVISIONAL_PREFIX: &str = "tmp-";

impl MessageId {
    pub fn provisional(id: uuid::Uuid) -> Self {
        Self(format!("{}{}", PROVISIONAL_PREFIX, id))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }
}

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Intern,
    /// Freelancers; the backend calls this role "job".
    Job,
    /// Catch-all for roles this client does not know about.
    Other,
}

impl Role {
    pub const KNOWN: [Role; 5] = [
        Role::Admin,
        Role::Teacher,
        Role::Student,
        Role::Intern,
        Role::Job,
    ];

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" | "superadmin" => Self::Admin,
            "teacher" | "instructor" => Self::Teacher,
            "student" => Self::Student,
            "intern" => Self::Intern,
            "job" | "freelancer" => Self::Job,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
            Self::Intern => "intern",
            Self::Job => "job",
            Self::Other => "other",
        }
    }

    /// Roles that see per-tab unread badges.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin | Self::Teacher)
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct UserRef {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

impl UserRef {
    pub fn new(id: UserId, name: &str, role: Role) -> Self {
        Self {
            id,
            name: name.to_string(),
            role,
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let id = first_id(value, &["id", "_id", "userId"]).map(UserId)?;
        let name = first_str(value, &["name", "fullName", "username", "email"])
            .unwrap_or_else(|| id.to_string());
        let role = first_str(value, &["role"])
            .map(|r| Role::parse(&r))
            .unwrap_or(Role::Other);
        Some(Self { id, name, role })
    }
}

impl TryFrom<Value> for UserRef {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        Self::from_value(&value).ok_or_else(|| format!("user without id: {}", value))
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<CourseId>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Parse a message from a REST body or a `new_message` payload.
    ///
    /// Returns `None` if the id, sender or recipient cannot be resolved.
    /// A missing timestamp falls back to the local receive time.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = first_id(value, &["id", "_id", "messageId"]).map(MessageId)?;
        let sender_id = first_id(value, &["senderId", "sender", "from"]).map(UserId)?;
        let recipient_id = first_id(
            value,
            &["recipientId", "receiverId", "recipient", "receiver", "to"],
        )
        .map(UserId)?;
        let course_id = first_id(value, &["courseId", "course"]).map(CourseId);
        let text = first_str(value, &["text", "message", "content"]).unwrap_or_default();
        let created_at = ["createdAt", "timestamp", "sentAt"]
            .iter()
            .find_map(|k| value.get(*k).and_then(parse_timestamp))
            .unwrap_or_else(Utc::now);

        Some(Self {
            id,
            sender_id,
            recipient_id,
            course_id,
            text,
            created_at,
        })
    }

    /// The participant that is not `me`.
    pub fn other_party(&self, me: &UserId) -> &UserId {
        if &self.recipient_id == me {
            &self.sender_id
        } else {
            &self.recipient_id
        }
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.recipient_id == user
    }
}

impl TryFrom<Value> for Message {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        Self::from_value(&value).ok_or_else(|| format!("malformed message: {}", value))
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// One thread's identity: a counterparty, optionally scoped to a course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadKey {
    pub counterparty: UserId,
    pub course: Option<CourseId>,
}

impl ThreadKey {
    pub fn new(counterparty: UserId, course: Option<CourseId>) -> Self {
        Self {
            counterparty,
            course,
        }
    }

    pub fn direct(counterparty: UserId) -> Self {
        Self::new(counterparty, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct Conversation {
    pub counterparty: UserRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<CourseId>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

impl Conversation {
    pub fn from_value(value: &Value) -> Option<Self> {
        let reference = ["counterpartyRef", "counterparty", "user"]
            .iter()
            .find_map(|k| value.get(*k).filter(|v| v.is_object()));

        let id = first_id(value, &["counterpartyId"])
            .or_else(|| reference.and_then(|r| first_id(r, &["id", "_id", "userId"])))
            .map(UserId)?;

        let counterparty = match reference.and_then(UserRef::from_value) {
            Some(mut user) => {
                user.id = id;
                user
            }
            None => UserRef::new(id.clone(), id.as_str(), Role::Other),
        };

        let last_message = value.get("lastMessage").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => first_str(v, &["text", "message", "content"]),
            _ => None,
        });
        let last_message_at = ["lastMessageAt", "updatedAt"]
            .iter()
            .find_map(|k| value.get(*k).and_then(parse_timestamp))
            .or_else(|| {
                value
                    .get("lastMessage")
                    .and_then(|m| m.get("createdAt"))
                    .and_then(parse_timestamp)
            });
        let unread_count = value
            .get("unreadCount")
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0);

        Some(Self {
            counterparty,
            course_id: first_id(value, &["courseId", "course"]).map(CourseId),
            last_message,
            last_message_at,
            unread_count,
        })
    }

    pub fn key(&self) -> ThreadKey {
        ThreadKey::new(self.counterparty.id.clone(), self.course_id.clone())
    }
}

impl TryFrom<Value> for Conversation {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        Self::from_value(&value).ok_or_else(|| format!("conversation without counterparty: {}", value))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn first_id(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(canonical_id))
}

fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        value
            .get(*k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_id_forms() {
        assert_eq!(canonical_id(&json!(" 42 ")), Some("42".to_string()));
        assert_eq!(canonical_id(&json!(42)), Some("42".to_string()));
        assert_eq!(canonical_id(&json!({ "_id": 42 })), Some("42".to_string()));
        assert_eq!(canonical_id(&json!({ "id": "abc" })), Some("abc".to_string()));
        assert_eq!(canonical_id(&json!("   ")), None);
        assert_eq!(canonical_id(&json!(null)), None);
        assert_eq!(canonical_id(&json!(true)), None);
    }

    #[test]
    fn test_numeric_and_string_ids_compare_equal() {
        let a: UserId = serde_json::from_value(json!(7)).unwrap();
        let b = UserId::new("7 ").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_message_with_nested_sender() {
        let msg = Message::from_value(&json!({
            "_id": "m1",
            "sender": { "_id": 5, "name": "Bea" },
            "recipientId": "9",
            "text": "hello",
            "createdAt": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(msg.id.as_str(), "m1");
        assert_eq!(msg.sender_id.as_str(), "5");
        assert_eq!(msg.recipient_id.as_str(), "9");
        assert_eq!(msg.course_id, None);
        assert_eq!(msg.created_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_message_missing_recipient_is_rejected() {
        assert!(Message::from_value(&json!({ "id": "m1", "senderId": "1", "text": "x" })).is_none());
        assert!(serde_json::from_value::<Message>(json!({ "senderId": "1" })).is_err());
    }

    #[test]
    fn test_other_party() {
        let me = UserId::new("me").unwrap();
        let msg = Message::from_value(&json!({
            "id": "m", "senderId": "b", "recipientId": "me", "text": "t"
        }))
        .unwrap();
        assert_eq!(msg.other_party(&me).as_str(), "b");
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::parse("Admin"), Role::Admin);
        assert_eq!(Role::parse("freelancer"), Role::Job);
        assert_eq!(Role::parse("job"), Role::Job);
        assert_eq!(Role::parse("alumni"), Role::Other);
        let role: Role = serde_json::from_value(json!("TEACHER")).unwrap();
        assert_eq!(role, Role::Teacher);
        assert_eq!(serde_json::to_value(Role::Job).unwrap(), json!("job"));
    }

    #[test]
    fn test_conversation_from_server_shape() {
        let conv = Conversation::from_value(&json!({
            "counterpartyId": 12,
            "counterpartyRef": { "_id": "12", "name": "Dana", "role": "student" },
            "lastMessage": { "text": "see you" },
            "lastMessageAt": 1_700_000_000_000_i64,
            "unreadCount": 3
        }))
        .unwrap();

        assert_eq!(conv.counterparty.id.as_str(), "12");
        assert_eq!(conv.counterparty.name, "Dana");
        assert_eq!(conv.counterparty.role, Role::Student);
        assert_eq!(conv.last_message.as_deref(), Some("see you"));
        assert!(conv.last_message_at.is_some());
        assert_eq!(conv.unread_count, 3);
    }

    #[test]
    fn test_provisional_ids() {
        let id = MessageId::provisional(uuid::Uuid::new_v4());
        assert!(id.is_provisional());
        assert!(!MessageId::new("m1").unwrap().is_provisional());
    }
}
