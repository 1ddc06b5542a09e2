//! Campus Chat Core Library
//!
//! Real-time messaging core for the campus LMS chat widgets.
//! Provides: live connection, conversation directory, reconciliation of live
//! events with fetched state, unread accounting and the thread view model.

pub mod api;
pub mod cell;
pub mod config;
pub mod connection;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod session;
pub mod thread;
pub mod unread;

pub use api::{ChatApi, HttpChatApi};
pub use cell::{LiveCell, ViewState};
pub use config::{ChatConfig, ServerConfig, TimingConfig};
pub use directory::{DirectoryEntry, Tab};
pub use engine::{ChatEngine, ChatScope, ChatSnapshot};
pub use error::{Error, Result};
pub use events::{Effect, Event};
pub use models::*;
pub use notify::Notification;
pub use session::{ChatHandle, ChatSession};
pub use thread::{DayGroup, Delivery, ThreadEntry, ThreadView};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
