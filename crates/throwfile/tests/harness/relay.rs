//! In-memory signaling relay
//!
//! Behaves like the hosted relay for a single channel: every message a
//! member sends is forwarded to all other members as
//! `{type, from, payload}`, arrivals and departures are announced as
//! `peer_joined` / `peer_left` with the member's connection id.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use throwfile::signaling::SignalSink;
use throwfile::{Error, Result};
use tokio::sync::mpsc;

#[derive(Default)]
struct RelayState {
    members: Vec<(String, mpsc::UnboundedSender<String>)>,
    next_id: u64,
    /// `(sender connection id, message type)` of every forwarded message
    log: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new relay connection; existing members see `peer_joined`
    pub fn attach(&self) -> (Arc<RelayConnection>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let connection_id = format!("conn-{}", state.next_id);

        let notice = json!({"type": "peer_joined", "payload": {"connectionId": connection_id}});
        for (_, member) in &state.members {
            let _ = member.send(notice.to_string());
        }
        state.members.push((connection_id.clone(), tx));

        let connection = Arc::new(RelayConnection {
            connection_id,
            relay: self.clone(),
        });
        (connection, rx)
    }

    /// Types of messages members sent through the relay, in order
    pub fn sent_types(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.log.iter().map(|(_, kind)| kind.clone()).collect()
    }

    /// Number of messages of `kind` that went through the relay
    pub fn count(&self, kind: &str) -> usize {
        self.sent_types().iter().filter(|k| *k == kind).count()
    }

    fn forward(&self, from: &str, text: &str) -> Result<()> {
        let envelope: Value = serde_json::from_str(text)?;
        if envelope["action"] != "sendMessage" {
            return Err(Error::SignalingDelivery(format!(
                "unexpected action {}",
                envelope["action"]
            )));
        }
        let kind = envelope["type"]
            .as_str()
            .ok_or_else(|| Error::SignalingDelivery("missing type".to_string()))?
            .to_string();

        let message = json!({
            "type": kind,
            "from": from,
            "payload": envelope["payload"],
        })
        .to_string();

        let mut state = self.state.lock().unwrap();
        state.log.push((from.to_string(), kind));
        for (id, member) in &state.members {
            if id != from {
                let _ = member.send(message.clone());
            }
        }
        Ok(())
    }

    fn detach(&self, connection_id: &str) {
        let mut state = self.state.lock().unwrap();
        let before = state.members.len();
        state.members.retain(|(id, _)| id != connection_id);
        if state.members.len() == before {
            return;
        }

        let notice = json!({"type": "peer_left", "payload": {"connectionId": connection_id}});
        for (_, member) in &state.members {
            let _ = member.send(notice.to_string());
        }
    }
}

/// One member's outbound side of the relay
pub struct RelayConnection {
    connection_id: String,
    relay: MemoryRelay,
}

impl RelayConnection {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

impl SignalSink for RelayConnection {
    fn deliver(&self, text: String) -> Result<()> {
        self.relay.forward(&self.connection_id, &text)
    }

    fn close(&self) {
        self.relay.detach(&self.connection_id);
    }
}
