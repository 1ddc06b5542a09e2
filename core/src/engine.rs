//! Chat engine: owns conversation, unread, thread and notification state and
//! turns events into state changes plus effects for the driver to run.
//!
//! The engine never performs I/O. It is driven by [`crate::session`] in
//! production and directly by tests.

use crate::cell::{LiveCell, ViewState};
use crate::config::ChatConfig;
use crate::directory::{Directory, DirectoryEntry, Tab};
use crate::events::{Effect, Event};
use crate::models::{CourseId, Message, MessageId, Role, ThreadKey, UserId, UserRef};
use crate::notify::{Notification, Notifications};
use crate::reconcile::{classify, Disposition, Outbox, SeenIds};
use crate::thread::{ThreadEntry, ThreadView};
use crate::unread::UnreadLedger;
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const SEEN_CAPACITY: usize = 512;

/// Which counterparties this engine instance chats with.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatScope {
    /// The global chat widget.
    Global,
    /// Course chat with the course's teachers.
    Course {
        course: CourseId,
        roster: Vec<UserRef>,
    },
}

impl ChatScope {
    fn course(&self) -> Option<&CourseId> {
        match self {
            ChatScope::Global => None,
            ChatScope::Course { course, .. } => Some(course),
        }
    }
}

/// Owned copy of everything a UI renders, taken between two updates.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub view: ViewState,
    pub connected: bool,
    pub tabs: Vec<Tab>,
    pub tab: Tab,
    pub entries: Vec<DirectoryEntry>,
    pub global_unread: u32,
    pub tab_badges: Option<BTreeMap<Role, u32>>,
    pub thread: Vec<ThreadEntry>,
    pub loading: bool,
    pub notifications: Vec<Notification>,
    pub draft: String,
    pub last_error: Option<String>,
}

pub struct ChatEngine {
    me: UserRef,
    scope: ChatScope,
    notification_timeout: Duration,
    refresh_debounce: Duration,
    view: LiveCell<ViewState>,
    directory: Directory,
    unread: UnreadLedger,
    thread: ThreadView,
    outbox: Outbox,
    notifications: Notifications,
    seen: SeenIds,
    draft: String,
    refresh_token: u64,
    connected: bool,
    last_error: Option<String>,
}

impl ChatEngine {
    pub fn new(me: UserRef, scope: ChatScope, config: &ChatConfig) -> Self {
        let tab = match (&scope, me.role) {
            (ChatScope::Course { .. }, _) => Tab::Role(Role::Teacher),
            (ChatScope::Global, Role::Admin) | (ChatScope::Global, Role::Teacher) => Tab::Recent,
            (ChatScope::Global, _) => Tab::Role(Role::Admin),
        };

        let mut directory = Directory::new(tab);
        if let ChatScope::Course { roster, .. } = &scope {
            directory.set_users(Role::Teacher, roster.clone());
        }

        Self {
            me,
            scope,
            notification_timeout: config.notification_timeout(),
            refresh_debounce: config.refresh_debounce(),
            view: LiveCell::new(ViewState::default()),
            directory,
            unread: UnreadLedger::new(),
            thread: ThreadView::new(),
            outbox: Outbox::new(),
            notifications: Notifications::new(),
            seen: SeenIds::new(SEEN_CAPACITY),
            draft: String::new(),
            refresh_token: 0,
            connected: false,
            last_error: None,
        }
    }

    /// Initial fetch after authentication.
    pub fn bootstrap(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::FetchConversations, Effect::FetchUnreadCount];
        if let Tab::Role(role) = self.directory.tab() {
            if self.directory.users(role).is_none() {
                effects.push(Effect::FetchDirectory(role));
            }
        }
        effects
    }

    pub fn update(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Connected => {
                info!("Live connection established for {}", self.me.id);
                self.connected = true;
                vec![]
            }
            Event::Disconnected => {
                warn!("Live connection lost; updates paused until next session");
                self.connected = false;
                vec![]
            }
            Event::Live(message) => self.on_live(message),

            Event::SetOpen(open) => self.set_open(open),
            Event::OpenThread {
                counterparty,
                course,
            } => self.open_thread(&counterparty, course.as_deref()),
            Event::LeaveThread => {
                self.view.update(|v| v.active = None);
                vec![]
            }
            Event::Compose(text) => {
                self.draft = text;
                vec![]
            }
            Event::Send(text) => self.send(&text),
            Event::SelectTab(tab) => self.select_tab(tab),
            Event::Search(query) => {
                self.directory.set_query(&query);
                vec![]
            }
            Event::Dismiss(id) => {
                self.notifications.dismiss(id);
                vec![]
            }
            Event::Activate(id) => self.activate(id),
            Event::Refresh => {
                let mut effects = vec![Effect::FetchConversations, Effect::FetchUnreadCount];
                if let (Tab::Role(role), ChatScope::Global) = (self.directory.tab(), &self.scope) {
                    effects.push(Effect::FetchDirectory(role));
                }
                effects
            }
            Event::Teardown => {
                self.teardown();
                vec![]
            }

            Event::ConversationsLoaded(Ok(conversations)) => {
                let conversations = match self.scope.course() {
                    Some(course) => conversations
                        .into_iter()
                        .filter(|c| c.course_id.as_ref() == Some(course))
                        .collect(),
                    None => conversations,
                };
                self.directory.set_conversations(conversations);
                self.unread = UnreadLedger::recompute(self.directory.conversations());
                vec![]
            }
            Event::ConversationsLoaded(Err(e)) => {
                warn!("Failed to load conversations: {}", e);
                vec![]
            }
            Event::UnreadCountLoaded(Ok(count)) => {
                // The endpoint counts every course; course chat keeps its own sum.
                if self.scope == ChatScope::Global {
                    self.unread.set_global(count);
                }
                vec![]
            }
            Event::UnreadCountLoaded(Err(e)) => {
                warn!("Failed to load unread count: {}", e);
                vec![]
            }
            Event::DirectoryLoaded { role, result } => {
                match result {
                    Ok(users) => self.directory.set_users(role, users),
                    Err(e) => warn!("Failed to load {} directory: {}", role, e),
                }
                vec![]
            }
            Event::MessagesLoaded {
                key,
                generation,
                result,
            } => {
                match result {
                    Ok(history) => {
                        if !self.thread.finish_load(&key, generation, history) {
                            debug!("Dropping stale history for {}", key.counterparty);
                        }
                    }
                    Err(e) => {
                        warn!("Failed to load messages with {}: {}", key.counterparty, e);
                        self.thread.fail_load(&key, generation);
                    }
                }
                vec![]
            }
            Event::SendCompleted {
                key,
                provisional,
                result,
            } => self.send_completed(key, provisional, result),
            Event::MarkedRead { key, result } => match result {
                Ok(()) => {
                    self.unread.mark_read(&key.counterparty);
                    vec![Effect::FetchUnreadCount, self.schedule_refresh()]
                }
                Err(e) => {
                    warn!("Mark-as-read failed for {}: {}", key.counterparty, e);
                    vec![Effect::FetchUnreadCount]
                }
            },
            Event::HistoryCleared {
                counterparty,
                result,
            } => match result {
                Ok(()) => self.history_cleared(&counterparty),
                Err(e) => {
                    warn!("Failed to clear history with {}: {}", counterparty, e);
                    self.last_error = Some(format!("Could not clear history: {}", e));
                    vec![]
                }
            },

            Event::RefreshDue(token) if token == self.refresh_token => {
                vec![Effect::FetchConversations, Effect::FetchUnreadCount]
            }
            Event::RefreshDue(_) => vec![],
            Event::NotificationExpired(id) => {
                self.notifications.dismiss(id);
                vec![]
            }
        }
    }

    // ========================================================================
    // Live delivery
    // ========================================================================

    fn on_live(&mut self, message: Message) -> Vec<Effect> {
        if !self.seen.insert(&message.id) {
            debug!("Ignoring repeated broadcast {}", message.id);
            return vec![];
        }

        let view = self.view.get();
        match classify(&self.me.id, self.scope.course(), &view, &message) {
            Disposition::ActiveThread {
                key,
                from_counterparty,
            } => {
                let appended = self.thread.append(message.clone());
                if appended {
                    self.directory.touch(&key, &message.text, message.created_at);
                }
                if !appended || !from_counterparty {
                    return vec![];
                }
                if view.open {
                    vec![Effect::MarkAsRead(key)]
                } else {
                    self.unread
                        .increment(&key.counterparty, self.directory.role_of(&key.counterparty));
                    vec![self.notify(key, &message)]
                }
            }
            Disposition::Background { key } => {
                self.unread
                    .increment(&key.counterparty, self.directory.role_of(&key.counterparty));
                vec![self.notify(key, &message), self.schedule_refresh()]
            }
            Disposition::Sync => vec![self.schedule_refresh()],
        }
    }

    fn notify(&mut self, key: ThreadKey, message: &Message) -> Effect {
        let name = self.directory.display_name(&key.counterparty);
        let id = self.notifications.raise(key, &name, &message.text);
        Effect::ScheduleDismiss {
            id,
            after: self.notification_timeout,
        }
    }

    fn schedule_refresh(&mut self) -> Effect {
        self.refresh_token += 1;
        Effect::ScheduleRefresh {
            token: self.refresh_token,
            after: self.refresh_debounce,
        }
    }

    // ========================================================================
    // User actions
    // ========================================================================

    fn set_open(&mut self, open: bool) -> Vec<Effect> {
        let was_open = self.view.update(|v| std::mem::replace(&mut v.open, open));
        if was_open || !open {
            return vec![];
        }

        let mut effects = vec![Effect::FetchConversations, Effect::FetchUnreadCount];
        if let Some(key) = self.view.read(|v| v.active.clone()) {
            self.notifications.dismiss_thread(&key);
            effects.push(Effect::MarkAsRead(key));
        }
        effects
    }

    fn open_thread(&mut self, counterparty: &str, course: Option<&str>) -> Vec<Effect> {
        let Some(counterparty) = UserId::new(counterparty) else {
            warn!("Cannot open chat: unresolvable counterparty id {:?}", counterparty);
            return vec![];
        };
        // The global widget keys threads by counterparty only.
        let course = match &self.scope {
            ChatScope::Course { course, .. } => Some(course.clone()),
            ChatScope::Global => {
                if let Some(course) = course {
                    debug!("Ignoring course {:?} in the global widget", course);
                }
                None
            }
        };
        let key = ThreadKey::new(counterparty, course);

        let generation = self.thread.begin_load(key.clone());
        let open = self.view.update(|v| {
            v.active = Some(key.clone());
            v.open
        });
        self.notifications.dismiss_thread(&key);
        self.restore_failed_draft(&key);

        let mut effects = vec![Effect::FetchMessages {
            key: key.clone(),
            generation,
        }];
        if open {
            effects.push(Effect::MarkAsRead(key));
        }
        effects
    }

    fn send(&mut self, text: &str) -> Vec<Effect> {
        let text = text.trim();
        if text.is_empty() {
            return vec![];
        }
        let Some(key) = self.view.read(|v| v.active.clone()) else {
            debug!("Send ignored: no active thread");
            return vec![];
        };

        for stale in self.outbox.discard_failed(&key, text) {
            self.thread.remove(&stale);
        }

        let provisional = self.outbox.dispatch(key.clone(), text);
        self.thread.push_pending(Message {
            id: provisional.clone(),
            sender_id: self.me.id.clone(),
            recipient_id: key.counterparty.clone(),
            course_id: key.course.clone(),
            text: text.to_string(),
            created_at: Utc::now(),
        });

        // The request is dispatched; the composer can be cleared.
        self.draft.clear();
        self.last_error = None;

        vec![Effect::SendMessage {
            key,
            provisional,
            text: text.to_string(),
        }]
    }

    /// Put the text of a failed send to `key` back into an empty composer.
    fn restore_failed_draft(&mut self, key: &ThreadKey) {
        if !self.draft.trim().is_empty() {
            return;
        }
        if let Some(failed) = self
            .outbox
            .failed()
            .filter(|o| &o.key == key)
            .min_by(|a, b| a.provisional.cmp(&b.provisional))
        {
            self.draft = failed.text.clone();
        }
    }

    fn send_completed(
        &mut self,
        key: ThreadKey,
        provisional: MessageId,
        result: crate::error::Result<Message>,
    ) -> Vec<Effect> {
        let in_view = self.thread.key() == Some(&key);
        match result {
            Ok(message) => {
                self.outbox.confirm(&provisional, &message.id);
                self.directory.touch(&key, &message.text, message.created_at);
                if in_view {
                    self.thread.confirm(&provisional, message);
                }
            }
            Err(e) => {
                warn!("Message to {} not sent: {}", key.counterparty, e);
                let reason = e.to_string();
                let text = self
                    .outbox
                    .fail(&provisional, &reason)
                    .map(|o| o.text.clone());
                if in_view {
                    self.thread.fail(&provisional, &reason);
                }
                // The composer is shared between threads.
                let active = self.view.read(|v| v.active.as_ref() == Some(&key));
                if let Some(text) = text.filter(|_| active) {
                    if self.draft.trim().is_empty() {
                        self.draft = text;
                    }
                }
                self.last_error = Some(format!("Message not sent: {}", reason));
            }
        }
        vec![]
    }

    fn select_tab(&mut self, tab: Tab) -> Vec<Effect> {
        self.directory.select_tab(tab);
        match (tab, &self.scope) {
            (Tab::Role(role), ChatScope::Global) if self.directory.users(role).is_none() => {
                vec![Effect::FetchDirectory(role)]
            }
            _ => vec![],
        }
    }

    fn activate(&mut self, id: u64) -> Vec<Effect> {
        let Some(notification) = self.notifications.dismiss(id) else {
            return vec![];
        };
        let thread = notification.thread;
        let course = thread.course.as_ref().map(|c| c.as_str().to_string());
        let mut effects = self.open_thread(thread.counterparty.as_str(), course.as_deref());
        effects.extend(self.set_open(true));
        effects.dedup();
        effects
    }

    fn history_cleared(&mut self, counterparty: &UserId) -> Vec<Effect> {
        info!("Cleared chat history with {}", counterparty);
        self.directory.remove_conversation(counterparty);
        self.unread.mark_read(counterparty);
        if self.thread.key().map(|k| &k.counterparty) == Some(counterparty) {
            self.thread.clear_messages();
        }
        self.last_error = None;
        vec![Effect::FetchConversations, Effect::FetchUnreadCount]
    }

    fn teardown(&mut self) {
        info!("Tearing down chat state for {}", self.me.id);
        self.view.set(ViewState::default());
        self.directory.clear();
        if let ChatScope::Course { roster, .. } = &self.scope {
            self.directory.set_users(Role::Teacher, roster.clone());
        }
        self.unread.reset();
        self.thread.reset();
        self.outbox.clear();
        self.notifications.clear();
        self.seen.clear();
        self.draft.clear();
        self.refresh_token += 1;
        self.connected = false;
        self.last_error = None;
    }

    // ========================================================================
    // Read side
    // ========================================================================

    pub fn me(&self) -> &UserRef {
        &self.me
    }

    pub fn scope(&self) -> &ChatScope {
        &self.scope
    }

    pub fn view(&self) -> ViewState {
        self.view.get()
    }

    /// Shared handle on the view state, for readers outside the event loop.
    pub fn view_cell(&self) -> LiveCell<ViewState> {
        self.view.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn entries(&self) -> Vec<DirectoryEntry> {
        self.directory.entries()
    }

    /// Tabs offered to this user.
    pub fn tabs(&self) -> Vec<Tab> {
        if let ChatScope::Course { .. } = self.scope {
            return vec![Tab::Role(Role::Teacher)];
        }
        match self.me.role {
            Role::Admin => std::iter::once(Tab::Recent)
                .chain(
                    Role::KNOWN
                        .iter()
                        .filter(|r| **r != Role::Admin)
                        .map(|r| Tab::Role(*r)),
                )
                .collect(),
            Role::Teacher => vec![Tab::Recent, Tab::Role(Role::Student), Tab::Role(Role::Admin)],
            _ => vec![Tab::Recent, Tab::Role(Role::Admin)],
        }
    }

    pub fn unread(&self) -> &UnreadLedger {
        &self.unread
    }

    pub fn global_unread(&self) -> u32 {
        self.unread.global()
    }

    /// Role → unread badges, for admins and teachers only.
    pub fn tab_badges(&self) -> Option<BTreeMap<Role, u32>> {
        self.me.role.is_privileged().then(|| self.unread.by_role())
    }

    pub fn thread(&self) -> &ThreadView {
        &self.thread
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn notifications(&self) -> &[Notification] {
        self.notifications.active()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            view: self.view(),
            connected: self.connected,
            tabs: self.tabs(),
            tab: self.directory.tab(),
            entries: self.entries(),
            global_unread: self.global_unread(),
            tab_badges: self.tab_badges(),
            thread: self.thread.entries().to_vec(),
            loading: self.thread.is_loading(),
            notifications: self.notifications.active().to_vec(),
            draft: self.draft.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(role: Role) -> ChatEngine {
        let me = UserRef::new(UserId::new("me").unwrap(), "Me", role);
        ChatEngine::new(me, ChatScope::Global, &ChatConfig::default())
    }

    #[test]
    fn test_initial_tab_depends_on_role() {
        assert_eq!(engine(Role::Admin).directory().tab(), Tab::Recent);
        assert_eq!(engine(Role::Student).directory().tab(), Tab::Role(Role::Admin));
        assert!(engine(Role::Student)
            .bootstrap()
            .contains(&Effect::FetchDirectory(Role::Admin)));
    }

    #[test]
    fn test_admin_tabs_cover_other_roles() {
        let tabs = engine(Role::Admin).tabs();
        assert_eq!(tabs[0], Tab::Recent);
        assert!(tabs.contains(&Tab::Role(Role::Job)));
        assert!(!tabs.contains(&Tab::Role(Role::Admin)));
    }

    #[test]
    fn test_badges_only_for_privileged_roles() {
        assert!(engine(Role::Teacher).tab_badges().is_some());
        assert!(engine(Role::Intern).tab_badges().is_none());
    }

    #[test]
    fn test_open_with_blank_id_is_a_no_op() {
        let mut chat = engine(Role::Admin);
        let effects = chat.update(Event::OpenThread {
            counterparty: "  ".to_string(),
            course: None,
        });
        assert!(effects.is_empty());
        assert_eq!(chat.view().active, None);
    }

    #[test]
    fn test_stale_refresh_tokens_are_ignored() {
        let mut chat = engine(Role::Admin);
        let first = chat.schedule_refresh();
        let second = chat.schedule_refresh();
        let (Effect::ScheduleRefresh { token: t1, .. }, Effect::ScheduleRefresh { token: t2, .. }) =
            (first, second)
        else {
            panic!("expected refresh effects");
        };
        assert!(chat.update(Event::RefreshDue(t1)).is_empty());
        assert_eq!(chat.update(Event::RefreshDue(t2)).len(), 2);
    }
}
