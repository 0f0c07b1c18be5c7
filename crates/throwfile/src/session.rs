//! One two-party session on a relay channel
//!
//! A [`Session`] wires the signaling adapter, the peer connection manager
//! and the transfer coordinator together. A single task consumes relay
//! messages, transport events and transfer events in arrival order, so all
//! protocol decisions happen in one place.
//!
//! Negotiation: whoever sees the other side arrive (`join`/`peer_joined`)
//! sends `ready`. Each `ready` carries the sender's random peer id; of the
//! two, the lower id sends the offer. A browser peer sends `ready` without
//! an id, in which case the receiver of that `ready` offers.

use crate::channel_id::ChannelId;
use crate::config::SessionConfig;
use crate::peer::{
    ConnectionEventReceiver, ConnectionState, PeerBackend, PeerConnectionManager, PeerState,
    PeerUpdate, SessionDescription, WebRtcBackend,
};
use crate::signaling::{
    PeerPresence, Presence, SignalSink, SignalType, SignalingAdapter, SignalingEvent,
    WebSocketSignaling,
};
use crate::transfer::{OutboundFile, TransferCoordinator, TransferEvent};
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events surfaced to the application
#[derive(Debug)]
pub enum SessionEvent {
    PeerJoined { connection_id: Option<String> },
    PeerLeft { connection_id: Option<String> },
    ConnectionState(ConnectionState),
    Transfer(TransferEvent),
    /// The relay connection ended; no further negotiation is possible
    SignalingClosed,
}

pub struct Session {
    channel: ChannelId,
    peer_id: String,
    peer: Arc<PeerConnectionManager>,
    transfers: TransferCoordinator,
    signaling: SignalingAdapter,
    sink: Arc<dyn SignalSink>,
    task: JoinHandle<()>,
}

impl Session {
    /// Connect to the configured relay and set up a WebRTC-backed session
    pub async fn connect(
        config: SessionConfig,
        channel: ChannelId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        config.validate()?;
        let (sink, inbound) = WebSocketSignaling::connect(&config.signaling_url, &channel).await?;
        let backend = Arc::new(WebRtcBackend::new(&config));
        Ok(Self::with_parts(&config, channel, sink, inbound, backend))
    }

    /// Assemble a session from an already-connected relay and a backend
    pub fn with_parts(
        config: &SessionConfig,
        channel: ChannelId,
        sink: Arc<dyn SignalSink>,
        inbound: mpsc::UnboundedReceiver<String>,
        backend: Arc<dyn PeerBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let peer_id = Uuid::new_v4().to_string();
        let signaling = SignalingAdapter::new(channel.clone(), sink.clone());
        let (peer, transport_events) =
            PeerConnectionManager::new(backend, signaling.clone(), config);
        let peer = Arc::new(peer);
        let (transfers, transfer_events) =
            TransferCoordinator::new(peer.channel_watch(), config);
        let (events, events_rx) = mpsc::unbounded_channel();

        let event_loop = SessionLoop {
            peer_id: peer_id.clone(),
            peer: peer.clone(),
            transfers: transfers.clone(),
            signaling: signaling.clone(),
            events,
            remote_peer_id: None,
            ready_replied: false,
        };
        let task = tokio::spawn(event_loop.run(inbound, transport_events, transfer_events));

        info!(%channel, %peer_id, "Session created");

        let session = Self {
            channel,
            peer_id,
            peer,
            transfers,
            signaling,
            sink,
            task,
        };
        (session, events_rx)
    }

    /// Initialize the peer connection and announce ourselves on the channel
    pub async fn join(&self) -> Result<()> {
        self.peer.init().await?;
        self.signaling
            .send(SignalType::Join, &Presence::now(&self.peer_id))?;
        info!(channel = %self.channel, "Joined channel");
        Ok(())
    }

    /// Ask the remote peer to accept `file`
    ///
    /// Returns once the request is on the wire. The outcome arrives as a
    /// transfer event. Fails with [`Error::InvalidState`](crate::Error) while
    /// a previously accepted file is still being sent.
    pub async fn send_file(&self, file: OutboundFile) -> Result<()> {
        self.transfers.request_send(file).await
    }

    /// Close the peer connection and the relay connection
    pub async fn close(&self) -> Result<()> {
        self.task.abort();
        self.sink.close();
        self.peer.close().await
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn peer(&self) -> &PeerConnectionManager {
        &self.peer
    }

    pub fn transfers(&self) -> &TransferCoordinator {
        &self.transfers
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SessionLoop {
    peer_id: String,
    peer: Arc<PeerConnectionManager>,
    transfers: TransferCoordinator,
    signaling: SignalingAdapter,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Peer id advertised by the other side, once known
    remote_peer_id: Option<String>,
    ready_replied: bool,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<String>,
        mut transport: ConnectionEventReceiver,
        mut transfer_events: mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        let mut relay_open = true;

        loop {
            tokio::select! {
                text = inbound.recv(), if relay_open => match text {
                    Some(text) => self.handle_relay_text(&text).await,
                    None => {
                        warn!("Signaling relay connection ended");
                        relay_open = false;
                        self.emit(SessionEvent::SignalingClosed);
                    }
                },
                Some(event) = transport.recv() => {
                    match self.peer.handle_connection_event(event).await {
                        Some(PeerUpdate::State(state)) => {
                            self.emit(SessionEvent::ConnectionState(state));
                        }
                        Some(PeerUpdate::Frame(frame)) => self.transfers.handle_frame(frame).await,
                        None => {}
                    }
                }
                Some(event) = transfer_events.recv() => self.emit(SessionEvent::Transfer(event)),
                else => break,
            }
        }

        debug!("Session loop terminated");
    }

    async fn handle_relay_text(&mut self, text: &str) {
        match SignalingAdapter::decode(text) {
            Ok(Some(event)) => self.handle_signal(event).await,
            Ok(None) => {}
            Err(e) => warn!("Dropping signaling message: {}", e),
        }
    }

    async fn handle_signal(&mut self, event: SignalingEvent) {
        debug!(kind = %event.kind(), "Signaling message received");

        match event {
            SignalingEvent::Join { from, presence } => {
                self.learn_remote_id(&presence);
                self.emit(SessionEvent::PeerJoined {
                    connection_id: from,
                });
                self.announce_ready().await;
            }
            SignalingEvent::PeerJoined(PeerPresence { connection_id }) => {
                self.emit(SessionEvent::PeerJoined { connection_id });
                self.announce_ready().await;
            }
            SignalingEvent::Ready { presence, .. } => self.on_ready(presence).await,
            SignalingEvent::Offer(offer) => self.on_offer(offer).await,
            SignalingEvent::Answer(answer) => {
                if let Err(e) = self.peer.set_remote_answer(answer).await {
                    warn!("Failed to apply answer: {}", e);
                }
            }
            SignalingEvent::Ice(candidate) => self.peer.add_ice_candidate(candidate).await,
            SignalingEvent::PeerLeft(PeerPresence { connection_id }) => {
                info!(?connection_id, "Peer left the channel");
                self.remote_peer_id = None;
                self.ready_replied = false;
                match self.peer.close().await {
                    Ok(()) => self.emit(SessionEvent::ConnectionState(ConnectionState::Closed)),
                    Err(e) => warn!("Failed to close peer connection: {}", e),
                }
                self.emit(SessionEvent::PeerLeft { connection_id });
            }
        }
    }

    /// Reply to an arrival with `ready`, unless negotiation is under way
    async fn announce_ready(&mut self) {
        if !self.awaiting_negotiation().await {
            debug!("Negotiation already started, not sending ready");
            return;
        }
        if let Err(e) = self.peer.init().await {
            error!("Failed to initialize peer connection: {}", e);
            return;
        }
        self.send_ready();
    }

    async fn on_ready(&mut self, presence: Presence) {
        self.learn_remote_id(&presence);

        if !self.awaiting_negotiation().await {
            debug!("Ignoring ready, negotiation already started");
            return;
        }
        if let Err(e) = self.peer.init().await {
            error!("Failed to initialize peer connection: {}", e);
            return;
        }

        if self.should_offer() {
            info!("Creating offer");
            if let Err(e) = self.peer.create_offer().await {
                warn!("Failed to create offer: {}", e);
            }
        } else if !self.ready_replied {
            // The other side sorts lower; let it offer
            self.ready_replied = true;
            self.send_ready();
        } else {
            debug!("Already replied ready, waiting for offer");
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription) {
        if self.peer.has_outstanding_offer().await {
            if self.should_offer() && self.remote_peer_id.is_some() {
                info!("Offer collision, keeping local offer");
                return;
            }
            info!("Offer collision, yielding to remote offer");
            self.peer.reset().await;
        }

        if let Err(e) = self.peer.init().await {
            error!("Failed to initialize peer connection: {}", e);
            return;
        }
        if let Err(e) = self.peer.create_answer(offer).await {
            warn!("Failed to answer offer: {}", e);
        }
    }

    async fn awaiting_negotiation(&self) -> bool {
        matches!(
            self.peer.state().await,
            PeerState::Idle | PeerState::Initialized | PeerState::Closed | PeerState::Failed
        )
    }

    /// Deterministic offerer choice: the lower peer id offers, and an
    /// anonymous remote always lets us offer
    fn should_offer(&self) -> bool {
        match &self.remote_peer_id {
            Some(remote) => self.peer_id.as_str() < remote.as_str(),
            None => true,
        }
    }

    fn learn_remote_id(&mut self, presence: &Presence) {
        if let Some(id) = &presence.peer_id {
            if id != &self.peer_id {
                self.remote_peer_id = Some(id.clone());
            }
        }
    }

    fn send_ready(&self) {
        if let Err(e) = self
            .signaling
            .send(SignalType::Ready, &Presence::now(&self.peer_id))
        {
            warn!("Dropping ready: {}", e);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}

