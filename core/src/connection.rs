//! Live connection: one WebSocket per session, forwarding parsed frames to
//! the engine's event loop.

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::models::{Message, UserId};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

pub struct Connection {
    sender: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Connect, authenticate and announce presence for `me`. Inbound events
    /// are pushed into `sink`.
    pub async fn open(
        config: &ChatConfig,
        token: Option<&str>,
        me: &UserId,
        sink: mpsc::UnboundedSender<Event>,
    ) -> Result<Self> {
        let url = url::Url::parse(&config.ws_url())?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        if let Some(token) = token {
            let auth_msg = json!({
                "type": "authenticate",
                "payload": { "token": token }
            });
            write.send(WsMessage::Text(auth_msg.to_string())).await?;
        }

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        // Receive task
        let reader_connected = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if let Some(event) = parse_frame(&text) {
                            if sink.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => {
                        reader_connected.store(false, Ordering::SeqCst);
                        let _ = sink.send(Event::Disconnected);
                        break;
                    }
                    _ => {}
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
        });

        // Send task
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(WsMessage::Text(msg)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let connection = Self {
            sender: tx,
            connected,
            reader,
            writer,
        };
        connection.announce_presence(me)?;
        info!("Announced presence for {} on {}", me, url);

        Ok(connection)
    }

    pub fn announce_presence(&self, me: &UserId) -> Result<()> {
        self.sender
            .send(presence_frame(me))
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.reader.is_finished()
    }

    /// Stop both tasks; no further events reach the engine.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
    }
}

fn presence_frame(me: &UserId) -> String {
    json!({
        "type": "join",
        "payload": { "user_id": me.as_str() }
    })
    .to_string()
}

/// Parse one text frame. Unknown types and malformed payloads yield `None`.
pub fn parse_frame(text: &str) -> Option<Event> {
    let data: Value = match serde_json::from_str(text) {
        Ok(data) => data,
        Err(e) => {
            debug!("Dropping unparsable frame: {}", e);
            return None;
        }
    };

    match data["type"].as_str() {
        Some("new_message") | Some("message") => {
            let payload = data.get("payload")?;
            match Message::from_value(payload) {
                Some(message) => Some(Event::Live(message)),
                None => {
                    debug!("Dropping malformed message event: {}", payload);
                    None
                }
            }
        }
        Some("joined") | Some("authenticated") => Some(Event::Connected),
        Some("error") => {
            warn!("Server reported: {}", data["payload"]);
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_new_message() {
        let frame = r#"{"type":"new_message","payload":{"id":"m1","senderId":2,"recipientId":"1","text":"hi"}}"#;
        match parse_frame(frame) {
            Some(Event::Live(msg)) => {
                assert_eq!(msg.id.as_str(), "m1");
                assert_eq!(msg.sender_id.as_str(), "2");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_drops_malformed() {
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"type":"new_message"}"#).is_none());
        assert!(parse_frame(r#"{"type":"new_message","payload":{"id":"m1","text":"x"}}"#).is_none());
        assert!(parse_frame(r#"{"type":"typing","payload":{}}"#).is_none());
    }

    #[test]
    fn test_parse_joined() {
        assert!(matches!(parse_frame(r#"{"type":"joined"}"#), Some(Event::Connected)));
    }

    #[test]
    fn test_presence_frame() {
        let frame: Value = serde_json::from_str(&presence_frame(&UserId::new("42").unwrap())).unwrap();
        assert_eq!(frame["type"], "join");
        assert_eq!(frame["payload"]["user_id"], "42");
    }
}
