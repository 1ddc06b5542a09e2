//! Unread accounting: global badge, per-role tab badges, per-counterparty.
//!
//! Live increments are a fast path only. The conversation list is the
//! authority, and `recompute` over it must land on the same totals as the
//! increments would have.

use crate::directory::Tab;
use crate::models::{Conversation, Role, UserId};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadLedger {
    global: u32,
    counterparties: HashMap<UserId, (Role, u32)>,
}

impl UnreadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the authoritative conversation list.
    pub fn recompute(conversations: &[Conversation]) -> Self {
        let mut ledger = Self::new();
        for conv in conversations {
            let entry = ledger
                .counterparties
                .entry(conv.counterparty.id.clone())
                .or_insert((conv.counterparty.role, 0));
            entry.1 = entry.1.saturating_add(conv.unread_count);
        }
        ledger.counterparties.retain(|_, (_, n)| *n > 0);
        ledger.global = ledger.sum();
        ledger
    }

    pub fn increment(&mut self, counterparty: &UserId, role: Role) {
        let entry = self
            .counterparties
            .entry(counterparty.clone())
            .or_insert((role, 0));
        entry.1 = entry.1.saturating_add(1);
        self.global = self.global.saturating_add(1);
    }

    /// Zero a counterparty after the server confirmed mark-as-read.
    pub fn mark_read(&mut self, counterparty: &UserId) -> u32 {
        let cleared = self
            .counterparties
            .remove(counterparty)
            .map(|(_, n)| n)
            .unwrap_or(0);
        self.global = self.global.saturating_sub(cleared);
        cleared
    }

    /// Server-reported total; wins over the local sum.
    pub fn set_global(&mut self, count: u32) {
        self.global = count;
    }

    pub fn global(&self) -> u32 {
        self.global
    }

    pub fn counterparty(&self, id: &UserId) -> u32 {
        self.counterparties.get(id).map(|(_, n)| *n).unwrap_or(0)
    }

    pub fn by_role(&self) -> BTreeMap<Role, u32> {
        let mut totals = BTreeMap::new();
        for (role, n) in self.counterparties.values() {
            let total = totals.entry(*role).or_insert(0u32);
            *total = total.saturating_add(*n);
        }
        totals
    }

    pub fn tab(&self, tab: Tab) -> u32 {
        match tab {
            Tab::Recent => self.sum(),
            Tab::Role(role) => self
                .counterparties
                .values()
                .filter(|(r, _)| *r == role)
                .fold(0u32, |acc, (_, n)| acc.saturating_add(*n)),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn sum(&self) -> u32 {
        self.counterparties
            .values()
            .fold(0u32, |acc, (_, n)| acc.saturating_add(*n))
    }
}
