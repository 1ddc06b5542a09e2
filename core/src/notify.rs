//! Transient in-app notifications ("toasts") for messages that were not read
//! on arrival.

use crate::models::ThreadKey;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub thread: ThreadKey,
    pub sender_name: String,
    pub text: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Notifications {
    next_id: u64,
    items: Vec<Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self, thread: ThreadKey, sender_name: &str, text: &str) -> u64 {
        self.next_id += 1;
        self.items.push(Notification {
            id: self.next_id,
            thread,
            sender_name: sender_name.to_string(),
            text: text.to_string(),
            raised_at: Utc::now(),
        });
        self.next_id
    }

    /// Remove a notification. Dismissing twice (user, then timer) is fine.
    pub fn dismiss(&mut self, id: u64) -> Option<Notification> {
        let index = self.items.iter().position(|n| n.id == id)?;
        Some(self.items.remove(index))
    }

    /// Drop every notification for `thread`, e.g. when it gets opened.
    pub fn dismiss_thread(&mut self, thread: &ThreadKey) {
        self.items.retain(|n| &n.thread != thread);
    }

    pub fn active(&self) -> &[Notification] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;

    #[test]
    fn test_raise_and_dismiss() {
        let thread = ThreadKey::direct(UserId::new("b").unwrap());
        let mut notes = Notifications::new();

        let first = notes.raise(thread.clone(), "Bea", "ping");
        let second = notes.raise(thread.clone(), "Bea", "pong");
        assert_ne!(first, second);
        assert_eq!(notes.active().len(), 2);

        assert_eq!(notes.dismiss(first).map(|n| n.text), Some("ping".to_string()));
        assert!(notes.dismiss(first).is_none());

        notes.dismiss_thread(&thread);
        assert!(notes.active().is_empty());
    }
}
