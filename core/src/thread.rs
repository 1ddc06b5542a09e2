//! Thread view model: the message list of the active counterparty.
//!
//! `Empty → Loading → Loaded`, mutated by appends. Opening a different
//! counterparty discards the list and goes back to `Loading`; re-opening the
//! same one keeps what is there and merges the fresh history into it.

use crate::models::{Message, MessageId, ThreadKey};
use chrono::{Datelike, NaiveDate, TimeZone};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Confirmed,
    Pending,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEntry {
    pub message: Message,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Loading { generation: u64 },
    Loaded,
}

#[derive(Debug, Clone)]
pub struct ThreadView {
    key: Option<ThreadKey>,
    phase: Phase,
    entries: Vec<ThreadEntry>,
    generation: u64,
}

impl Default for ThreadView {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadView {
    pub fn new() -> Self {
        Self {
            key: None,
            phase: Phase::Empty,
            entries: Vec::new(),
            generation: 0,
        }
    }

    pub fn key(&self) -> Option<&ThreadKey> {
        self.key.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Loading { .. })
    }

    pub fn entries(&self) -> &[ThreadEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.iter().any(|e| &e.message.id == id)
    }

    /// Start loading `key`. The returned generation tags the history request;
    /// only a response carrying it will be applied.
    pub fn begin_load(&mut self, key: ThreadKey) -> u64 {
        self.generation += 1;
        if self.key.as_ref() != Some(&key) {
            self.entries.clear();
        }
        self.key = Some(key);
        self.phase = Phase::Loading {
            generation: self.generation,
        };
        self.generation
    }

    /// Apply fetched history. Returns false for a stale response (another
    /// thread or a newer request is in flight).
    pub fn finish_load(&mut self, key: &ThreadKey, generation: u64, history: Vec<Message>) -> bool {
        if !self.is_current(key, generation) {
            return false;
        }

        let early = std::mem::take(&mut self.entries);
        let mut history = history;
        history.sort_by_key(|m| m.created_at);

        for message in history {
            if !self.contains(&message.id) {
                self.entries.push(ThreadEntry {
                    message,
                    delivery: Delivery::Confirmed,
                });
            }
        }
        // Live appends and pending sends that raced the fetch.
        for entry in early {
            if !self.contains(&entry.message.id) {
                self.insert_sorted(entry);
            }
        }

        self.phase = Phase::Loaded;
        true
    }

    /// History fetch failed: keep whatever is shown.
    pub fn fail_load(&mut self, key: &ThreadKey, generation: u64) -> bool {
        if !self.is_current(key, generation) {
            return false;
        }
        self.phase = Phase::Loaded;
        true
    }

    /// Append a server message unless its id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if self.key.is_none() || self.contains(&message.id) {
            return false;
        }
        self.insert_sorted(ThreadEntry {
            message,
            delivery: Delivery::Confirmed,
        });
        true
    }

    pub fn push_pending(&mut self, message: Message) {
        self.insert_sorted(ThreadEntry {
            message,
            delivery: Delivery::Pending,
        });
    }

    /// Swap a provisional entry for its confirmed message. If the live echo
    /// already delivered the server id, the provisional entry is just dropped.
    pub fn confirm(&mut self, provisional: &MessageId, confirmed: Message) -> bool {
        let position = self.position(provisional);
        if self.contains(&confirmed.id) {
            if let Some(i) = position {
                self.entries.remove(i);
            }
            return false;
        }
        if let Some(i) = position {
            self.entries.remove(i);
        }
        self.append(confirmed)
    }

    pub fn fail(&mut self, provisional: &MessageId, reason: &str) -> bool {
        match self.position(provisional) {
            Some(i) => {
                self.entries[i].delivery = Delivery::Failed(reason.to_string());
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> bool {
        match self.position(id) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Drop loaded messages but keep the selection.
    pub fn clear_messages(&mut self) {
        self.entries.clear();
    }

    pub fn reset(&mut self) {
        self.key = None;
        self.phase = Phase::Empty;
        self.entries.clear();
    }

    /// Entries grouped by calendar day of `created_at` in `tz`.
    pub fn grouped_by_day<Tz: TimeZone>(&self, tz: &Tz) -> Vec<DayGroup<'_>> {
        let mut groups: Vec<DayGroup<'_>> = Vec::new();
        for entry in &self.entries {
            let date = entry.message.created_at.with_timezone(tz).date_naive();
            match groups.last_mut() {
                Some(group) if group.date == date => group.entries.push(entry),
                _ => groups.push(DayGroup {
                    date,
                    entries: vec![entry],
                }),
            }
        }
        groups
    }

    pub fn grouped_by_local_day(&self) -> Vec<DayGroup<'_>> {
        self.grouped_by_day(&chrono::Local)
    }

    fn is_current(&self, key: &ThreadKey, generation: u64) -> bool {
        self.key.as_ref() == Some(key) && self.phase == Phase::Loading { generation }
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|e| &e.message.id == id)
    }

    fn insert_sorted(&mut self, entry: ThreadEntry) {
        let at = entry.message.created_at;
        let index = self
            .entries
            .partition_point(|e| e.message.created_at <= at);
        self.entries.insert(index, entry);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup<'a> {
    pub date: NaiveDate,
    pub entries: Vec<&'a ThreadEntry>,
}

impl DayGroup<'_> {
    pub fn label(&self, today: NaiveDate) -> String {
        day_label(self.date, today)
    }
}

/// Header text for a day separator.
pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if Some(date) == today.pred_opt() {
        "Yesterday".to_string()
    } else if date.year() == today.year() {
        date.format("%d %b").to_string()
    } else {
        date.format("%d.%m.%Y").to_string()
    }
}
