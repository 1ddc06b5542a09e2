//! Engine inputs (events) and outputs (effects)

use crate::directory::Tab;
use crate::error::Result;
use crate::models::{Conversation, Message, MessageId, Role, ThreadKey, UserId, UserRef};
use std::time::Duration;

#[derive(Debug)]
pub enum Event {
    // Live connection
    Connected,
    Disconnected,
    Live(Message),

    // User actions
    SetOpen(bool),
    OpenThread {
        counterparty: String,
        course: Option<String>,
    },
    LeaveThread,
    Compose(String),
    Send(String),
    SelectTab(Tab),
    Search(String),
    Dismiss(u64),
    Activate(u64),
    Refresh,
    Teardown,

    // Network results
    ConversationsLoaded(Result<Vec<Conversation>>),
    UnreadCountLoaded(Result<u32>),
    DirectoryLoaded {
        role: Role,
        result: Result<Vec<UserRef>>,
    },
    MessagesLoaded {
        key: ThreadKey,
        generation: u64,
        result: Result<Vec<Message>>,
    },
    SendCompleted {
        key: ThreadKey,
        provisional: MessageId,
        result: Result<Message>,
    },
    MarkedRead {
        key: ThreadKey,
        result: Result<()>,
    },
    /// Outcome of a clear-history call; the error itself went back to the
    /// caller, the engine only keeps its message.
    HistoryCleared {
        counterparty: UserId,
        result: std::result::Result<(), String>,
    },

    // Timers
    RefreshDue(u64),
    NotificationExpired(u64),
}

/// Work the engine asks its driver to perform. Results come back as events.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchConversations,
    FetchUnreadCount,
    FetchDirectory(Role),
    FetchMessages {
        key: ThreadKey,
        generation: u64,
    },
    SendMessage {
        key: ThreadKey,
        provisional: MessageId,
        text: String,
    },
    MarkAsRead(ThreadKey),
    /// Fire `Event::RefreshDue(token)` after the delay. Only the newest
    /// token is honoured, which makes bursts collapse into one refresh.
    ScheduleRefresh {
        token: u64,
        after: Duration,
    },
    /// Fire `Event::NotificationExpired(id)` after the delay.
    ScheduleDismiss {
        id: u64,
        after: Duration,
    },
}
