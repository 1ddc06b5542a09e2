//! Chat session: the event loop that drives a [`ChatEngine`], runs its
//! effects against the API and owns the live connection.
//!
//! One session per authenticated user and widget. `shutdown` (or dropping the
//! session) closes the connection and stops the loop, so listeners never
//! outlive the view that created them.

use crate::api::ChatApi;
use crate::cell::{LiveCell, ViewState};
use crate::config::ChatConfig;
use crate::connection::Connection;
use crate::directory::Tab;
use crate::engine::{ChatEngine, ChatScope, ChatSnapshot};
use crate::error::{Error, Result};
use crate::events::{Effect, Event};
use crate::models::{ThreadKey, UserId, UserRef};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct ChatSession {
    handle: ChatHandle,
    connection: Option<Connection>,
    event_loop: JoinHandle<()>,
}

impl ChatSession {
    /// Start a session and open its live connection. A connection failure is
    /// logged and the session keeps working without live updates.
    pub async fn start(
        config: &ChatConfig,
        api: Arc<dyn ChatApi>,
        me: UserRef,
        token: Option<&str>,
        scope: ChatScope,
    ) -> Self {
        let me_id = me.id.clone();
        let mut session = Self::detached(config, api, me, scope);

        match Connection::open(config, token, &me_id, session.handle.tx.clone()).await {
            Ok(connection) => session.connection = Some(connection),
            Err(e) => warn!("Live connection unavailable, continuing without it: {}", e),
        }

        session
    }

    /// Start a session without a live connection. Live events can still be
    /// fed in through [`ChatHandle::deliver`].
    pub fn detached(
        config: &ChatConfig,
        api: Arc<dyn ChatApi>,
        me: UserRef,
        scope: ChatScope,
    ) -> Self {
        info!("Starting chat session for {} ({})", me.id, me.role);

        let mut engine = ChatEngine::new(me, scope, config);
        let view = engine.view_cell();
        let bootstrap = engine.bootstrap();
        let engine = Arc::new(Mutex::new(engine));

        let (tx, rx) = mpsc::unbounded_channel();
        let (changes_tx, changes_rx) = watch::channel(0u64);

        for effect in bootstrap {
            execute(effect, api.clone(), tx.clone());
        }

        let event_loop = tokio::spawn(run_loop(
            engine.clone(),
            api.clone(),
            tx.clone(),
            rx,
            changes_tx,
        ));

        Self {
            handle: ChatHandle {
                tx,
                engine,
                view,
                api,
                changes: changes_rx,
            },
            connection: None,
            event_loop,
        }
    }

    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    pub fn is_live(&self) -> bool {
        self.connection
            .as_ref()
            .map(Connection::is_connected)
            .unwrap_or(false)
    }

    /// Logout / unmount: close the connection, reset state, stop the loop.
    pub async fn shutdown(mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        if self.handle.dispatch(Event::Teardown).is_ok() {
            let _ = (&mut self.event_loop).await;
        }
        info!("Chat session closed");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.connection.take();
        self.event_loop.abort();
    }
}

async fn run_loop(
    engine: Arc<Mutex<ChatEngine>>,
    api: Arc<dyn ChatApi>,
    tx: mpsc::UnboundedSender<Event>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    changes: watch::Sender<u64>,
) {
    while let Some(event) = rx.recv().await {
        let stop = matches!(event, Event::Teardown);
        let effects = engine.lock().update(event);
        changes.send_modify(|revision| *revision += 1);

        for effect in effects {
            execute(effect, api.clone(), tx.clone());
        }
        if stop {
            break;
        }
    }
}

/// Run one effect in the background; its outcome re-enters the loop as an
/// event. Sends fail silently once the loop is gone.
fn execute(effect: Effect, api: Arc<dyn ChatApi>, tx: mpsc::UnboundedSender<Event>) {
    tokio::spawn(async move {
        let event = match effect {
            Effect::FetchConversations => Event::ConversationsLoaded(api.get_conversations().await),
            Effect::FetchUnreadCount => Event::UnreadCountLoaded(api.get_unread_count().await),
            Effect::FetchDirectory(role) => Event::DirectoryLoaded {
                role,
                result: api.get_verified_users_by_role(role).await,
            },
            Effect::FetchMessages { key, generation } => {
                let result = api.get_messages(&key.counterparty, key.course.as_ref()).await;
                Event::MessagesLoaded {
                    key,
                    generation,
                    result,
                }
            }
            Effect::SendMessage {
                key,
                provisional,
                text,
            } => {
                let result = api
                    .send_message(&key.counterparty, &text, key.course.as_ref())
                    .await;
                Event::SendCompleted {
                    key,
                    provisional,
                    result,
                }
            }
            Effect::MarkAsRead(key) => {
                let result = api.mark_as_read(&key.counterparty, key.course.as_ref()).await;
                Event::MarkedRead { key, result }
            }
            Effect::ScheduleRefresh { token, after } => {
                tokio::time::sleep(after).await;
                Event::RefreshDue(token)
            }
            Effect::ScheduleDismiss { id, after } => {
                tokio::time::sleep(after).await;
                Event::NotificationExpired(id)
            }
        };
        let _ = tx.send(event);
    });
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable front door for UI code.
#[derive(Clone)]
pub struct ChatHandle {
    tx: mpsc::UnboundedSender<Event>,
    engine: Arc<Mutex<ChatEngine>>,
    view: LiveCell<ViewState>,
    api: Arc<dyn ChatApi>,
    changes: watch::Receiver<u64>,
}

impl ChatHandle {
    fn dispatch(&self, event: Event) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::SessionClosed)
    }

    /// Feed an event as if it came from the live connection.
    pub fn deliver(&self, event: Event) -> Result<()> {
        self.dispatch(event)
    }

    pub fn set_open(&self, open: bool) -> Result<()> {
        self.dispatch(Event::SetOpen(open))
    }

    pub fn open_thread(&self, counterparty: &str, course: Option<&str>) -> Result<()> {
        self.dispatch(Event::OpenThread {
            counterparty: counterparty.to_string(),
            course: course.map(str::to_string),
        })
    }

    pub fn leave_thread(&self) -> Result<()> {
        self.dispatch(Event::LeaveThread)
    }

    pub fn compose(&self, text: &str) -> Result<()> {
        self.dispatch(Event::Compose(text.to_string()))
    }

    pub fn send(&self, text: &str) -> Result<()> {
        self.dispatch(Event::Send(text.to_string()))
    }

    pub fn select_tab(&self, tab: Tab) -> Result<()> {
        self.dispatch(Event::SelectTab(tab))
    }

    pub fn search(&self, query: &str) -> Result<()> {
        self.dispatch(Event::Search(query.to_string()))
    }

    pub fn dismiss(&self, notification: u64) -> Result<()> {
        self.dispatch(Event::Dismiss(notification))
    }

    pub fn activate(&self, notification: u64) -> Result<()> {
        self.dispatch(Event::Activate(notification))
    }

    pub fn refresh(&self) -> Result<()> {
        self.dispatch(Event::Refresh)
    }

    /// Delete the history with `counterparty`. Failures are returned to the
    /// caller and leave the state untouched.
    pub async fn clear_history(&self, counterparty: &str) -> Result<()> {
        let id = UserId::new(counterparty)
            .ok_or_else(|| Error::InvalidId(counterparty.to_string()))?;

        match self.api.clear_history(&id).await {
            Ok(()) => self.dispatch(Event::HistoryCleared {
                counterparty: id,
                result: Ok(()),
            }),
            Err(e) => {
                self.dispatch(Event::HistoryCleared {
                    counterparty: id,
                    result: Err(e.to_string()),
                })?;
                Err(e)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.view.read(|v| v.open)
    }

    pub fn active_thread(&self) -> Option<ThreadKey> {
        self.view.read(|v| v.active.clone())
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&ChatEngine) -> R) -> R {
        f(&self.engine.lock())
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.with_engine(ChatEngine::snapshot)
    }

    pub fn global_unread(&self) -> u32 {
        self.with_engine(ChatEngine::global_unread)
    }

    /// Bumped after every processed event.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }
}
