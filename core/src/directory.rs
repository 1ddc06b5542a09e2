//! Conversation directory: who can be chatted with, merged with the
//! conversations that already exist.

use crate::models::{Conversation, CourseId, Role, ThreadKey, UserId, UserRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tab {
    /// Existing conversations only.
    Recent,
    /// Verified users of one role, merged with their conversations.
    Role(Role),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub counterparty: UserRef,
    pub course_id: Option<CourseId>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub has_conversation: bool,
}

impl DirectoryEntry {
    fn from_conversation(conv: &Conversation) -> Self {
        Self {
            counterparty: conv.counterparty.clone(),
            course_id: conv.course_id.clone(),
            last_message: conv.last_message.clone(),
            last_message_at: conv.last_message_at,
            unread_count: conv.unread_count,
            has_conversation: true,
        }
    }

    fn placeholder(user: &UserRef) -> Self {
        Self {
            counterparty: user.clone(),
            course_id: None,
            last_message: None,
            last_message_at: None,
            unread_count: 0,
            has_conversation: false,
        }
    }

    pub fn key(&self) -> ThreadKey {
        ThreadKey::new(self.counterparty.id.clone(), self.course_id.clone())
    }
}

/// Build the display list for `tab`.
///
/// Each counterparty id appears at most once in the result, whichever source
/// it came from. Empty inputs give an empty list.
pub fn merge_entries(
    tab: Tab,
    conversations: &[Conversation],
    users: &[UserRef],
    query: &str,
) -> Vec<DirectoryEntry> {
    let mut seen: HashSet<&UserId> = HashSet::new();
    let mut entries = Vec::new();

    match tab {
        Tab::Recent => {
            for conv in conversations {
                if seen.insert(&conv.counterparty.id) {
                    entries.push(DirectoryEntry::from_conversation(conv));
                }
            }
        }
        Tab::Role(role) => {
            let user_ids: HashSet<&UserId> = users.iter().map(|u| &u.id).collect();
            let mut by_counterparty: HashMap<&UserId, &Conversation> = HashMap::new();
            let mut leftovers: Vec<&Conversation> = Vec::new();
            for conv in conversations {
                let id = &conv.counterparty.id;
                if conv.counterparty.role != role && !user_ids.contains(id) {
                    continue;
                }
                if !by_counterparty.contains_key(id) {
                    by_counterparty.insert(id, conv);
                    leftovers.push(conv);
                }
            }

            for user in users {
                if !seen.insert(&user.id) {
                    continue;
                }
                match by_counterparty.get(&user.id) {
                    Some(conv) => {
                        let mut entry = DirectoryEntry::from_conversation(conv);
                        // The directory is the fresher source for name/role.
                        entry.counterparty = user.clone();
                        entries.push(entry);
                    }
                    None => entries.push(DirectoryEntry::placeholder(user)),
                }
            }

            // Conversations whose counterparty is missing from the directory.
            for conv in leftovers {
                if seen.insert(&conv.counterparty.id) {
                    entries.push(DirectoryEntry::from_conversation(conv));
                }
            }
        }
    }

    let query = query.trim().to_lowercase();
    if !query.is_empty() {
        entries.retain(|e| e.counterparty.name.to_lowercase().contains(&query));
    }

    sort_entries(&mut entries);
    entries
}

/// Most recent first; entries without messages last, by name.
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(compare_entries);
}

fn compare_entries(a: &DirectoryEntry, b: &DirectoryEntry) -> Ordering {
    match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a
            .counterparty
            .name
            .to_lowercase()
            .cmp(&b.counterparty.name.to_lowercase())
            .then_with(|| a.counterparty.id.cmp(&b.counterparty.id)),
    }
}

/// Collapse conversations that share a counterparty into one: newest
/// preview wins, unread counts are summed.
pub fn dedup_conversations(conversations: Vec<Conversation>) -> Vec<Conversation> {
    let mut index: HashMap<UserId, usize> = HashMap::new();
    let mut merged: Vec<Conversation> = Vec::with_capacity(conversations.len());

    for conv in conversations {
        match index.get(&conv.counterparty.id) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.unread_count = existing.unread_count.saturating_add(conv.unread_count);
                if conv.last_message_at > existing.last_message_at {
                    existing.last_message = conv.last_message;
                    existing.last_message_at = conv.last_message_at;
                    existing.course_id = conv.course_id;
                }
            }
            None => {
                index.insert(conv.counterparty.id.clone(), merged.len());
                merged.push(conv);
            }
        }
    }

    merged
}

/// Cached conversations and per-role user lists plus the current tab/search.
#[derive(Debug, Clone)]
pub struct Directory {
    conversations: Vec<Conversation>,
    users: HashMap<Role, Vec<UserRef>>,
    tab: Tab,
    query: String,
}

impl Directory {
    pub fn new(tab: Tab) -> Self {
        Self {
            conversations: Vec::new(),
            users: HashMap::new(),
            tab,
            query: String::new(),
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn set_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = dedup_conversations(conversations);
    }

    pub fn users(&self, role: Role) -> Option<&[UserRef]> {
        self.users.get(&role).map(Vec::as_slice)
    }

    pub fn set_users(&mut self, role: Role, users: Vec<UserRef>) {
        let mut seen = HashSet::new();
        let users = users
            .into_iter()
            .filter(|u| seen.insert(u.id.clone()))
            .collect();
        self.users.insert(role, users);
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn select_tab(&mut self, tab: Tab) {
        self.tab = tab;
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
    }

    /// Display list for the current tab and search query.
    pub fn entries(&self) -> Vec<DirectoryEntry> {
        let users = match self.tab {
            Tab::Recent => &[][..],
            Tab::Role(role) => self.users(role).unwrap_or(&[]),
        };
        merge_entries(self.tab, &self.conversations, users, &self.query)
    }

    /// Best known reference for a user, conversations first.
    pub fn lookup(&self, id: &UserId) -> Option<&UserRef> {
        self.conversations
            .iter()
            .map(|c| &c.counterparty)
            .chain(self.users.values().flatten())
            .find(|u| &u.id == id)
    }

    pub fn display_name(&self, id: &UserId) -> String {
        self.lookup(id)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn role_of(&self, id: &UserId) -> Role {
        self.lookup(id).map(|u| u.role).unwrap_or(Role::Other)
    }

    /// Move a conversation to the top with a new preview, creating it if the
    /// counterparty is known but had no conversation yet.
    pub fn touch(&mut self, key: &ThreadKey, text: &str, at: DateTime<Utc>) {
        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.counterparty.id == key.counterparty)
        {
            conv.last_message = Some(text.to_string());
            conv.last_message_at = Some(at);
            return;
        }

        let counterparty = self
            .lookup(&key.counterparty)
            .cloned()
            .unwrap_or_else(|| UserRef::new(key.counterparty.clone(), key.counterparty.as_str(), Role::Other));
        self.conversations.push(Conversation {
            counterparty,
            course_id: key.course.clone(),
            last_message: Some(text.to_string()),
            last_message_at: Some(at),
            unread_count: 0,
        });
    }

    pub fn remove_conversation(&mut self, counterparty: &UserId) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| &c.counterparty.id != counterparty);
        self.conversations.len() != before
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.users.clear();
        self.query.clear();
    }
}
