//! In-process transport that pairs connections through their SDP
//!
//! Offers and answers carry the connection id of their creator. When an
//! offering connection commits the answer, the two connections are linked:
//! both report `connecting` then `connected`, the offerer's data channel
//! opens, and the answerer is handed the remote end of that channel. Frames
//! travel over the peers' transport event queues, so delivery is ordered.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use throwfile::channels::DataChannelFrame;
use throwfile::peer::{
    ChannelState, ConnectionState, DataChannelIo, IceCandidate, PeerBackend, RtcConnection,
    SdpType, SessionDescription, TransportEvent, TransportEventSender,
};
use throwfile::{Error, Result};

type WireLog = Arc<Mutex<Vec<DataChannelFrame>>>;

#[derive(Default)]
struct NetworkState {
    connections: HashMap<u64, Weak<Endpoint>>,
    next_id: u64,
}

/// Shared medium for any number of loopback backends
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self) -> Arc<LoopbackBackend> {
        Arc::new(LoopbackBackend {
            network: self.clone(),
            wire: WireLog::default(),
            connects: Mutex::new(Vec::new()),
        })
    }

    fn register(&self, endpoint: &Arc<Endpoint>) {
        let mut state = self.state.lock().unwrap();
        state
            .connections
            .insert(endpoint.id, Arc::downgrade(endpoint));
    }

    fn allocate_id(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.next_id
    }

    fn lookup(&self, id: u64) -> Option<Arc<Endpoint>> {
        let state = self.state.lock().unwrap();
        state.connections.get(&id).and_then(Weak::upgrade)
    }
}

/// One peer's transport factory
pub struct LoopbackBackend {
    network: LoopbackNetwork,
    wire: WireLog,
    connects: Mutex<Vec<Arc<Endpoint>>>,
}

impl LoopbackBackend {
    /// Network this backend's connections are reachable on
    pub fn network(&self) -> LoopbackNetwork {
        self.network.clone()
    }

    /// Every frame this peer put on a data channel, in order
    pub fn sent_frames(&self) -> Vec<DataChannelFrame> {
        self.wire.lock().unwrap().clone()
    }

    /// Sizes of the binary frames this peer sent
    pub fn sent_chunk_sizes(&self) -> Vec<usize> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                DataChannelFrame::Binary(bytes) => Some(bytes.len()),
                DataChannelFrame::Text(_) => None,
            })
            .collect()
    }

    /// Text frames this peer sent
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                DataChannelFrame::Text(text) => Some(text),
                DataChannelFrame::Binary(_) => None,
            })
            .collect()
    }

    /// Number of connections built so far
    pub fn connection_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    /// Remote candidates applied on the most recent connection
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.connects
            .lock()
            .unwrap()
            .last()
            .map(|endpoint| endpoint.applied.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PeerBackend for LoopbackBackend {
    async fn connect(&self, events: TransportEventSender) -> Result<Arc<dyn RtcConnection>> {
        let endpoint = Arc::new(Endpoint {
            id: self.network.allocate_id(),
            events,
            wire: self.wire.clone(),
            local_channel: Mutex::new(None),
            local_description: Mutex::new(None),
            remote_description: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
        });
        self.network.register(&endpoint);
        self.connects.lock().unwrap().push(endpoint.clone());

        Ok(Arc::new(LoopbackConnection {
            endpoint,
            network: self.network.clone(),
        }))
    }
}

struct Endpoint {
    id: u64,
    events: TransportEventSender,
    wire: WireLog,
    local_channel: Mutex<Option<Arc<LoopbackChannel>>>,
    local_description: Mutex<Option<SessionDescription>>,
    remote_description: Mutex<Option<SessionDescription>>,
    applied: Mutex<Vec<IceCandidate>>,
}

impl Endpoint {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn remote_id(&self) -> Option<u64> {
        self.remote_description
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|desc| parse_sdp(&desc.sdp))
    }
}

struct LoopbackConnection {
    endpoint: Arc<Endpoint>,
    network: LoopbackNetwork,
}

impl LoopbackConnection {
    /// Link the offering side (us) with the answering side
    fn link(&self, answerer: &Arc<Endpoint>) -> Result<()> {
        let offerer = &self.endpoint;
        let local = offerer
            .local_channel
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::DataChannelError("offer carries no data channel".to_string()))?;

        let remote_end = Arc::new(LoopbackChannel {
            label: local.label.clone(),
            state: Mutex::new(ChannelState::Open),
            wire: answerer.wire.clone(),
            remote: Mutex::new(Some(offerer.events.clone())),
        });
        *local.remote.lock().unwrap() = Some(answerer.events.clone());
        *local.state.lock().unwrap() = ChannelState::Open;

        answerer.emit(TransportEvent::RemoteDataChannel(remote_end));
        for endpoint in [offerer, answerer] {
            endpoint.emit(TransportEvent::ConnectionStateChanged(
                ConnectionState::Connecting,
            ));
            endpoint.emit(TransportEvent::ConnectionStateChanged(
                ConnectionState::Connected,
            ));
            endpoint.emit(TransportEvent::ChannelOpened {
                label: local.label.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RtcConnection for LoopbackConnection {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelIo>> {
        let channel = Arc::new(LoopbackChannel {
            label: label.to_string(),
            state: Mutex::new(ChannelState::Connecting),
            wire: self.endpoint.wire.clone(),
            remote: Mutex::new(None),
        });
        *self.endpoint.local_channel.lock().unwrap() = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(sdp_for(self.endpoint.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let has_offer = self
            .endpoint
            .remote_description
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|desc| desc.sdp_type == SdpType::Offer);
        if !has_offer {
            return Err(Error::SdpError("no remote offer to answer".to_string()));
        }
        Ok(SessionDescription::answer(sdp_for(self.endpoint.id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        *self.endpoint.local_description.lock().unwrap() = Some(desc);
        self.endpoint
            .emit(TransportEvent::IceCandidate(IceCandidate {
                candidate: format!(
                    "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                    self.endpoint.id,
                    40000 + self.endpoint.id
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            }));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let remote_id = parse_sdp(&desc.sdp)
            .ok_or_else(|| Error::SdpError(format!("unrecognized SDP: {}", desc.sdp)))?;
        let is_answer = desc.sdp_type == SdpType::Answer;
        *self.endpoint.remote_description.lock().unwrap() = Some(desc);

        if is_answer {
            let answerer = self
                .network
                .lookup(remote_id)
                .ok_or_else(|| Error::SdpError("answering connection is gone".to_string()))?;
            self.link(&answerer)?;
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.endpoint.remote_description.lock().unwrap().is_none() {
            return Err(Error::IceApply(
                "remote description is not set".to_string(),
            ));
        }
        self.endpoint.applied.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let channel = self.endpoint.local_channel.lock().unwrap().clone();
        if let Some(channel) = channel {
            *channel.state.lock().unwrap() = ChannelState::Closed;
            let remote = channel.remote.lock().unwrap().take();
            if let Some(remote) = remote {
                let _ = remote.send(TransportEvent::ChannelClosed {
                    label: channel.label.clone(),
                });
            }
        }
        if let Some(peer) = self
            .endpoint
            .remote_id()
            .and_then(|id| self.network.lookup(id))
        {
            peer.emit(TransportEvent::ConnectionStateChanged(
                ConnectionState::Disconnected,
            ));
        }
        Ok(())
    }
}

struct LoopbackChannel {
    label: String,
    state: Mutex<ChannelState>,
    wire: WireLog,
    /// Event queue of the connection on the other end
    remote: Mutex<Option<TransportEventSender>>,
}

impl LoopbackChannel {
    fn transmit(&self, frame: DataChannelFrame) -> Result<()> {
        if *self.state.lock().unwrap() != ChannelState::Open {
            return Err(Error::DataChannelError(format!(
                "channel '{}' is not open",
                self.label
            )));
        }
        let remote = self.remote.lock().unwrap().clone();
        let remote = remote.ok_or_else(|| {
            Error::DataChannelError(format!("channel '{}' has no remote end", self.label))
        })?;

        self.wire.lock().unwrap().push(frame.clone());
        remote
            .send(TransportEvent::ChannelMessage {
                label: self.label.clone(),
                frame,
            })
            .map_err(|_| Error::DataChannelError("remote end is gone".to_string()))
    }
}

#[async_trait]
impl DataChannelIo for LoopbackChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.transmit(DataChannelFrame::Text(text.to_string()))
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        self.transmit(DataChannelFrame::Binary(data))
    }

    async fn buffered_amount(&self) -> usize {
        0
    }
}

fn sdp_for(id: u64) -> String {
    format!("v=0\r\no=loopback {} 0 IN IP4 127.0.0.1\r\n", id)
}

fn parse_sdp(sdp: &str) -> Option<u64> {
    sdp.lines()
        .find_map(|line| line.strip_prefix("o=loopback "))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|id| id.parse().ok())
}
