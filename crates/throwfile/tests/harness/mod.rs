//! End-to-end test harness
//!
//! Runs complete sessions in one process:
//! - [`MemoryRelay`] stands in for the hosted signaling relay
//! - [`LoopbackNetwork`] stands in for the WebRTC stack
//!
//! Basic usage pattern:
//!
//! 1. Create a relay and a network
//! 2. Create peers with `TestPeer::attach()` and `join()` them
//! 3. Drive transfers through `peer.session` and observe `peer.events`

#![allow(dead_code)]

pub mod loopback;
pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use throwfile::signaling::SignalSink;
use throwfile::{
    ChannelId, ConnectionState, ReceivedFile, Session, SessionConfig, SessionEvent, TransferEvent,
};
use tokio::sync::mpsc;

pub use loopback::{LoopbackBackend, LoopbackNetwork};
pub use relay::{MemoryRelay, RelayConnection};

/// How long any single expected event may take
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn,throwfile=debug")
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        signaling_url: "ws://relay.test".to_string(),
        channel_open_timeout_ms: 2_000,
        ..Default::default()
    }
}

pub fn test_channel() -> ChannelId {
    ChannelId::parse("TEST42").unwrap()
}

/// One session wired to the in-memory relay and loopback transport
pub struct TestPeer {
    pub session: Session,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub backend: Arc<LoopbackBackend>,
    pub relay_connection: Arc<RelayConnection>,
}

impl TestPeer {
    pub fn attach(relay: &MemoryRelay, network: &LoopbackNetwork, config: &SessionConfig) -> Self {
        let (relay_connection, inbound) = relay.attach();
        let backend = network.backend();
        let (session, events) = Session::with_parts(
            config,
            test_channel(),
            relay_connection.clone(),
            inbound,
            backend.clone(),
        );
        Self {
            session,
            events,
            backend,
            relay_connection,
        }
    }

    /// Next session event, failing the test after [`EVENT_TIMEOUT`]
    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("session event stream ended")
    }

    /// Skip events until one matches
    pub async fn wait_for(&mut self, mut matches: impl FnMut(&SessionEvent) -> bool) -> SessionEvent {
        loop {
            let event = self.next_event().await;
            if matches(&event) {
                return event;
            }
        }
    }

    pub async fn wait_connected(&mut self) {
        self.wait_for(|event| {
            matches!(
                event,
                SessionEvent::ConnectionState(ConnectionState::Connected)
            )
        })
        .await;
    }

    /// Answer the next incoming request and collect transfer events until
    /// the file is received
    ///
    /// Returns the receive progress percentages in order, and the file.
    pub async fn accept_next_file(&mut self) -> (Vec<u8>, ReceivedFile) {
        let mut progress = Vec::new();
        loop {
            match self.next_event().await {
                SessionEvent::Transfer(TransferEvent::IncomingRequest(incoming)) => {
                    incoming.accept();
                }
                SessionEvent::Transfer(TransferEvent::Progress { percent, .. }) => {
                    progress.push(percent);
                }
                SessionEvent::Transfer(TransferEvent::Received(file)) => {
                    return (progress, file);
                }
                _ => {}
            }
        }
    }

    /// Reject the next incoming request; returns its filename and size
    pub async fn reject_next_file(&mut self) -> (String, u64) {
        loop {
            if let SessionEvent::Transfer(TransferEvent::IncomingRequest(incoming)) =
                self.next_event().await
            {
                let announced = (incoming.filename().to_string(), incoming.size());
                incoming.reject();
                return announced;
            }
        }
    }

    /// Wait for the outcome of our own send; returns the send progress
    /// percentages seen along the way and the final event
    pub async fn send_outcome(&mut self) -> (Vec<u8>, TransferEvent) {
        let mut progress = Vec::new();
        loop {
            if let SessionEvent::Transfer(event) = self.next_event().await {
                match event {
                    TransferEvent::Progress { percent, .. } => progress.push(percent),
                    TransferEvent::SendComplete { .. }
                    | TransferEvent::Rejected { .. }
                    | TransferEvent::SendFailed { .. } => return (progress, event),
                    _ => {}
                }
            }
        }
    }
}

/// Two joined peers on one channel, with their connection established
pub async fn connected_pair() -> (MemoryRelay, TestPeer, TestPeer) {
    connected_pair_with(&test_config()).await
}

pub async fn connected_pair_with(config: &SessionConfig) -> (MemoryRelay, TestPeer, TestPeer) {
    let relay = MemoryRelay::new();
    let network = LoopbackNetwork::new();

    let mut alice = TestPeer::attach(&relay, &network, config);
    alice.session.join().await.unwrap();
    let mut bob = TestPeer::attach(&relay, &network, config);
    bob.session.join().await.unwrap();

    alice.wait_connected().await;
    bob.wait_connected().await;

    (relay, alice, bob)
}

/// Deterministic file contents of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A relay member speaking the wire protocol by hand, like a browser peer
pub struct RawPeer {
    pub connection: Arc<RelayConnection>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl RawPeer {
    pub fn attach(relay: &MemoryRelay) -> Self {
        let (connection, inbound) = relay.attach();
        Self {
            connection,
            inbound,
        }
    }

    pub fn send(&self, kind: &str, payload: Value) {
        let envelope = json!({
            "action": "sendMessage",
            "channel": test_channel().as_str(),
            "type": kind,
            "payload": payload,
        });
        self.connection.deliver(envelope.to_string()).unwrap();
    }

    /// Skip inbound messages until one of type `kind` arrives
    pub async fn next_of(&mut self, kind: &str) -> Value {
        loop {
            let text = tokio::time::timeout(EVENT_TIMEOUT, self.inbound.recv())
                .await
                .expect("timed out waiting for a relay message")
                .expect("relay connection closed");
            let message: Value = serde_json::from_str(&text).unwrap();
            if message["type"] == kind {
                return message;
            }
        }
    }
}

/// Poll `check` until it holds, failing the test after [`EVENT_TIMEOUT`]
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
