//! Classification of live messages and the optimistic-send outbox.

use crate::cell::ViewState;
use crate::models::{CourseId, Message, MessageId, ThreadKey, UserId};
use std::collections::{HashMap, HashSet, VecDeque};

/// Where an inbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Belongs to the thread that is currently selected.
    ActiveThread {
        key: ThreadKey,
        from_counterparty: bool,
    },
    /// Addressed to me, some other thread.
    Background { key: ThreadKey },
    /// Not for me, or my own message for an inactive thread. Counts may
    /// have moved server-side; refresh only.
    Sync,
}

/// Classify `msg` against the current view.
///
/// `course_scope` is set for course chat: only messages of that course are
/// threaded there, everything else is a sync signal for this instance. The
/// global widget ignores course ids when keying threads.
pub fn classify(
    me: &UserId,
    course_scope: Option<&CourseId>,
    view: &ViewState,
    msg: &Message,
) -> Disposition {
    if !msg.involves(me) {
        return Disposition::Sync;
    }

    let course = match course_scope {
        Some(course) if msg.course_id.as_ref() != Some(course) => return Disposition::Sync,
        Some(course) => Some(course.clone()),
        None => None,
    };

    let key = ThreadKey::new(msg.other_party(me).clone(), course);
    let from_counterparty = &msg.sender_id != me;

    if view.active.as_ref() == Some(&key) {
        Disposition::ActiveThread {
            key,
            from_counterparty,
        }
    } else if from_counterparty {
        Disposition::Background { key }
    } else {
        Disposition::Sync
    }
}

// ============================================================================
// Outbox
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingState {
    Pending,
    Confirmed(MessageId),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub provisional: MessageId,
    pub key: ThreadKey,
    pub text: String,
    pub state: OutgoingState,
}

/// Sends that have left the composer, keyed by provisional id.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    items: HashMap<MessageId, Outgoing>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, key: ThreadKey, text: &str) -> MessageId {
        let provisional = MessageId::provisional(uuid::Uuid::new_v4());
        self.items.insert(
            provisional.clone(),
            Outgoing {
                provisional: provisional.clone(),
                key,
                text: text.to_string(),
                state: OutgoingState::Pending,
            },
        );
        provisional
    }

    /// Pending → Confirmed. The entry leaves the outbox.
    pub fn confirm(&mut self, provisional: &MessageId, server_id: &MessageId) -> Option<Outgoing> {
        let mut item = self.items.remove(provisional)?;
        item.state = OutgoingState::Confirmed(server_id.clone());
        Some(item)
    }

    /// Pending → Failed. Failed entries stay until retried or discarded.
    pub fn fail(&mut self, provisional: &MessageId, reason: &str) -> Option<&Outgoing> {
        let item = self.items.get_mut(provisional)?;
        item.state = OutgoingState::Failed(reason.to_string());
        Some(item)
    }

    /// Drop failed sends of `text` in `key`; used when the user re-sends it.
    pub fn discard_failed(&mut self, key: &ThreadKey, text: &str) -> Vec<MessageId> {
        let stale: Vec<MessageId> = self
            .items
            .values()
            .filter(|o| {
                &o.key == key && o.text == text && matches!(o.state, OutgoingState::Failed(_))
            })
            .map(|o| o.provisional.clone())
            .collect();
        for id in &stale {
            self.items.remove(id);
        }
        stale
    }

    pub fn get(&self, provisional: &MessageId) -> Option<&Outgoing> {
        self.items.get(provisional)
    }

    pub fn pending(&self) -> usize {
        self.items
            .values()
            .filter(|o| o.state == OutgoingState::Pending)
            .count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &Outgoing> {
        self.items
            .values()
            .filter(|o| matches!(o.state, OutgoingState::Failed(_)))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

// ============================================================================
// Seen ids
// ============================================================================

/// Bounded memory of live message ids already processed, so a repeated
/// broadcast for an inactive thread is not counted twice.
#[derive(Debug, Clone)]
pub struct SeenIds {
    capacity: usize,
    order: VecDeque<MessageId>,
    set: HashSet<MessageId>,
}

impl SeenIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            set: HashSet::new(),
        }
    }

    /// Returns false if `id` was already seen.
    pub fn insert(&mut self, id: &MessageId) -> bool {
        if !self.set.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id.clone());
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.set.clear();
    }
}
