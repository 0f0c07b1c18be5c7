//! Peer Connection Manager
//!
//! Owns the single peer connection of a session and its active data channel,
//! and runs offer/answer/ICE through the [`PeerState`] transition table.
//! Transport callbacks only enqueue [`TransportEvent`]s, tagged with the
//! connection that raised them; the owner of the returned receiver feeds
//! them back through [`PeerConnectionManager::handle_connection_event`].

use super::backend::{
    ConnectionState, DataChannelIo, IceCandidate, PeerBackend, RtcConnection, SessionDescription,
    TransportEvent,
};
use super::ice::PendingCandidates;
use super::state::{PeerEvent, PeerState};
use crate::channels::DataChannelFrame;
use crate::config::SessionConfig;
use crate::signaling::{SignalType, SignalingAdapter};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared handle to the active data channel
pub type ActiveChannel = Option<Arc<dyn DataChannelIo>>;

/// A transport event and the connection generation that raised it
#[derive(Debug)]
pub struct ConnectionEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

pub type ConnectionEventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// What the session needs to act on after a transport event
#[derive(Debug)]
pub enum PeerUpdate {
    State(ConnectionState),
    Frame(DataChannelFrame),
}

struct PeerInner {
    state: PeerState,
    connection: Option<Arc<dyn RtcConnection>>,
    pending: PendingCandidates,
    remote_description_set: bool,
    local_offer_outstanding: bool,
    forwarder: Option<JoinHandle<()>>,
    /// Bumped on every teardown; events from older connections are stale
    generation: u64,
}

pub struct PeerConnectionManager {
    backend: Arc<dyn PeerBackend>,
    signaling: SignalingAdapter,
    channel_label: String,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    inner: Mutex<PeerInner>,
    state_tx: watch::Sender<ConnectionState>,
    channel_tx: watch::Sender<ActiveChannel>,
}

impl PeerConnectionManager {
    pub fn new(
        backend: Arc<dyn PeerBackend>,
        signaling: SignalingAdapter,
        config: &SessionConfig,
    ) -> (Self, ConnectionEventReceiver) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::New);
        let (channel_tx, _) = watch::channel(None);

        let manager = Self {
            backend,
            signaling,
            channel_label: config.data_channel_label.clone(),
            events,
            inner: Mutex::new(PeerInner {
                state: PeerState::Idle,
                connection: None,
                pending: PendingCandidates::new(),
                remote_description_set: false,
                local_offer_outstanding: false,
                forwarder: None,
                generation: 0,
            }),
            state_tx,
            channel_tx,
        };

        (manager, events_rx)
    }

    /// Create the connection and the local data channel, once
    ///
    /// Repeated calls return the existing connection. After a transport
    /// failure or close a fresh connection is built.
    pub async fn init(&self) -> Result<Arc<dyn RtcConnection>> {
        let mut inner = self.inner.lock().await;

        if inner.state.has_live_connection() {
            if let Some(connection) = &inner.connection {
                debug!("Peer connection already initialized");
                return Ok(connection.clone());
            }
        }

        if inner.state.is_terminal() {
            // Candidates from the previous negotiation are stale now
            inner.pending.clear();
        }
        self.teardown(&mut inner).await;

        // Each connection gets its own event queue so a torn-down
        // connection cannot leak events into its successor.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = self.backend.connect(tx).await?;

        let channel = match connection.create_data_channel(&self.channel_label).await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };

        let out = self.events.clone();
        let generation = inner.generation;
        inner.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if out.send(ConnectionEvent { generation, event }).is_err() {
                    break;
                }
            }
        }));

        info!(label = %self.channel_label, generation, "Peer connection initialized");
        inner.connection = Some(connection.clone());
        inner.remote_description_set = false;
        inner.local_offer_outstanding = false;
        self.transition(&mut inner, PeerEvent::Init);
        self.state_tx.send_replace(ConnectionState::New);
        self.channel_tx.send_replace(Some(channel));

        Ok(connection)
    }

    /// Generate and commit a local offer, then signal it
    pub async fn create_offer(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let connection = Self::live_connection(&inner, "create_offer")?;
        Self::check_transition(&inner, PeerEvent::LocalOffer)?;

        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;

        inner.local_offer_outstanding = true;
        self.transition(&mut inner, PeerEvent::LocalOffer);
        drop(inner);

        info!("Sending offer");
        self.signal(SignalType::Offer, &offer);
        Ok(())
    }

    /// Commit a remote offer, apply queued candidates, then answer it
    pub async fn create_answer(&self, remote_offer: SessionDescription) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let connection = Self::live_connection(&inner, "create_answer")?;
        Self::check_transition(&inner, PeerEvent::RemoteOffer)?;

        connection.set_remote_description(remote_offer).await?;
        inner.remote_description_set = true;
        self.drain_pending(&mut inner, &connection).await;

        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;

        self.transition(&mut inner, PeerEvent::RemoteOffer);
        drop(inner);

        info!("Sending answer");
        self.signal(SignalType::Answer, &answer);
        Ok(())
    }

    /// Commit the remote answer to our offer and apply queued candidates
    pub async fn set_remote_answer(&self, remote_answer: SessionDescription) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let connection = Self::live_connection(&inner, "set_remote_answer")?;
        Self::check_transition(&inner, PeerEvent::RemoteAnswer)?;

        connection.set_remote_description(remote_answer).await?;
        inner.remote_description_set = true;
        inner.local_offer_outstanding = false;
        self.drain_pending(&mut inner, &connection).await;

        self.transition(&mut inner, PeerEvent::RemoteAnswer);
        Ok(())
    }

    /// Apply a remote candidate, or queue it until a remote description is set
    ///
    /// Application failures are logged and never returned.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) {
        let mut inner = self.inner.lock().await;

        let ready = inner.remote_description_set && inner.state.has_live_connection();
        let connection = match inner.connection.clone() {
            Some(connection) if ready => connection,
            _ => {
                inner.pending.push(candidate);
                debug!(queued = inner.pending.len(), "Queued remote ICE candidate");
                return;
            }
        };

        Self::apply_candidate(&connection, candidate).await;
    }

    /// Act on a queued transport event unless its connection was torn down
    pub async fn handle_connection_event(&self, event: ConnectionEvent) -> Option<PeerUpdate> {
        let current = self.inner.lock().await.generation;
        if event.generation != current {
            debug!(
                stale = event.generation,
                current,
                event = ?event.event,
                "Dropping event from discarded connection"
            );
            return None;
        }
        self.handle_transport_event(event.event).await
    }

    /// Act on one transport event; frames and state changes are handed back
    pub async fn handle_transport_event(&self, event: TransportEvent) -> Option<PeerUpdate> {
        match event {
            TransportEvent::IceCandidate(candidate) => {
                self.signal(SignalType::Ice, &candidate);
                None
            }
            TransportEvent::ConnectionStateChanged(state) => {
                info!(%state, "Peer connection state changed");
                if let Some(event) = PeerEvent::from_connection_state(state) {
                    let mut inner = self.inner.lock().await;
                    self.transition(&mut inner, event);
                }
                self.state_tx.send_replace(state);
                Some(PeerUpdate::State(state))
            }
            TransportEvent::IceConnectionStateChanged(state) => {
                debug!(%state, "ICE connection state changed");
                None
            }
            TransportEvent::RemoteDataChannel(channel) => {
                info!("Switching to remote data channel '{}'", channel.label());
                self.channel_tx.send_replace(Some(channel));
                None
            }
            TransportEvent::ChannelOpened { label } | TransportEvent::ChannelClosed { label } => {
                debug!(%label, "Data channel ready state changed");
                // Wake anyone waiting on the active channel's state
                self.channel_tx.send_modify(|_| {});
                None
            }
            TransportEvent::ChannelError { label, error } => {
                warn!(%label, "Data channel error: {}", error);
                None
            }
            TransportEvent::ChannelMessage { frame, .. } => Some(PeerUpdate::Frame(frame)),
        }
    }

    /// Close the connection; a later `init` builds a new one
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.connection.is_none() {
            return Ok(());
        }
        self.teardown(&mut inner).await;
        self.transition(&mut inner, PeerEvent::Close);
        self.state_tx.send_replace(ConnectionState::Closed);
        Ok(())
    }

    /// Forget the current connection and return to `Idle`
    ///
    /// Queued remote candidates are kept: they belong to the remote side's
    /// negotiation, which outlives our discarded offer.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
        inner.state = PeerState::Idle;
        debug!("Peer connection reset");
    }

    pub async fn state(&self) -> PeerState {
        self.inner.lock().await.state
    }

    /// A local offer was sent and its answer has not arrived
    pub async fn has_outstanding_offer(&self) -> bool {
        self.inner.lock().await.local_offer_outstanding
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Watch the active data channel and its open/close transitions
    pub fn channel_watch(&self) -> watch::Receiver<ActiveChannel> {
        self.channel_tx.subscribe()
    }

    async fn teardown(&self, inner: &mut PeerInner) {
        if let Some(forwarder) = inner.forwarder.take() {
            forwarder.abort();
        }
        if let Some(connection) = inner.connection.take() {
            if let Err(e) = connection.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
        }
        inner.remote_description_set = false;
        inner.local_offer_outstanding = false;
        inner.generation += 1;
        self.channel_tx.send_replace(None);
    }

    async fn drain_pending(&self, inner: &mut PeerInner, connection: &Arc<dyn RtcConnection>) {
        let queued = inner.pending.drain();
        if !queued.is_empty() {
            debug!(count = queued.len(), "Applying queued ICE candidates");
        }
        for candidate in queued {
            Self::apply_candidate(connection, candidate).await;
        }
    }

    async fn apply_candidate(connection: &Arc<dyn RtcConnection>, candidate: IceCandidate) {
        if let Err(e) = connection.add_ice_candidate(candidate).await {
            warn!("Failed to apply ICE candidate: {}", e);
        }
    }

    fn live_connection(inner: &PeerInner, op: &str) -> Result<Arc<dyn RtcConnection>> {
        match &inner.connection {
            Some(connection) if inner.state.has_live_connection() => Ok(connection.clone()),
            _ => Err(Error::Precondition(format!(
                "{} requires an initialized peer connection (state: {})",
                op, inner.state
            ))),
        }
    }

    fn check_transition(inner: &PeerInner, event: PeerEvent) -> Result<()> {
        match inner.state.next(event) {
            Some(_) => Ok(()),
            None => Err(Error::InvalidState(format!(
                "{:?} is not valid in state {}",
                event, inner.state
            ))),
        }
    }

    fn transition(&self, inner: &mut PeerInner, event: PeerEvent) {
        match inner.state.next(event) {
            Some(next) => {
                if next != inner.state {
                    debug!(from = %inner.state, to = %next, ?event, "Peer state transition");
                }
                if next == PeerState::Failed {
                    error!("Peer connection failed; a new init is required");
                }
                inner.state = next;
            }
            None => {
                warn!(state = %inner.state, ?event, "Ignoring event not valid in current state");
            }
        }
    }

    fn signal(&self, kind: SignalType, payload: &impl Serialize) {
        if let Err(e) = self.signaling.send(kind, payload) {
            warn!(%kind, "Dropping signaling message: {}", e);
        }
    }
}
