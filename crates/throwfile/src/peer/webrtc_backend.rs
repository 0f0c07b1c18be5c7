//! Peer backend on top of webrtc-rs

use super::backend::{
    ChannelState, ConnectionState, DataChannelIo, IceCandidate, PeerBackend, RtcConnection,
    SdpType, SessionDescription, TransportEvent, TransportEventSender,
};
use crate::channels::DataChannelFrame;
use crate::config::SessionConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Creates webrtc-rs peer connections configured with STUN/TURN servers
pub struct WebRtcBackend {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcBackend {
    pub fn new(config: &SessionConfig) -> Self {
        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        Self { ice_servers }
    }
}

#[async_trait]
impl PeerBackend for WebRtcBackend {
    #[instrument(skip_all, fields(ice_servers = self.ice_servers.len()))]
    async fn connect(&self, events: TransportEventSender) -> Result<Arc<dyn RtcConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        if tx.send(TransportEvent::IceCandidate(init.into())).is_err() {
                            warn!("Failed to forward ICE candidate - receiver dropped");
                        }
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let tx = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let state = match s {
                    RTCPeerConnectionState::New => Some(ConnectionState::New),
                    RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
                    RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
                    RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
                    RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
                    RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
                    _ => None,
                };
                if let Some(state) = state {
                    let _ = tx.send(TransportEvent::ConnectionStateChanged(state));
                }
                Box::pin(async {})
            },
        ));

        let tx = events.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                if s == RTCIceConnectionState::Failed {
                    error!("ICE connection failed - a TURN server may be required");
                }
                let _ = tx.send(TransportEvent::IceConnectionStateChanged(s.to_string()));
                Box::pin(async {})
            },
        ));

        let tx = events.clone();
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            Box::pin(async move {
                info!("Remote data channel '{}' received", dc.label());
                let channel = WebRtcDataChannel::attach(dc, tx.clone());
                if tx
                    .send(TransportEvent::RemoteDataChannel(Arc::new(channel)))
                    .is_err()
                {
                    warn!("Failed to forward remote data channel - receiver dropped");
                }
            })
        }));

        Ok(Arc::new(WebRtcConnection {
            peer_connection,
            events,
        }))
    }
}

/// Connection handle implementing the transport seam
struct WebRtcConnection {
    peer_connection: Arc<RTCPeerConnection>,
    events: TransportEventSender,
}

#[async_trait]
impl RtcConnection for WebRtcConnection {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelIo>> {
        // Reassembly depends on in-order, lossless delivery.
        let init = RTCDataChannelInit {
            ordered: Some(true),
            max_retransmits: None,
            ..Default::default()
        };

        let dc = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| {
                Error::DataChannelError(format!("Failed to create data channel: {}", e))
            })?;

        Ok(Arc::new(WebRtcDataChannel::attach(dc, self.events.clone())))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::IceApply(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}

/// Data channel wrapper forwarding channel callbacks as transport events
struct WebRtcDataChannel {
    rtc_channel: Arc<RTCDataChannel>,
}

impl WebRtcDataChannel {
    fn attach(rtc_channel: Arc<RTCDataChannel>, events: TransportEventSender) -> Self {
        let label = rtc_channel.label().to_string();

        let tx = events.clone();
        let open_label = label.clone();
        rtc_channel.on_open(Box::new(move || {
            info!("Data channel '{}' opened", open_label);
            let _ = tx.send(TransportEvent::ChannelOpened { label: open_label });
            Box::pin(async {})
        }));

        let tx = events.clone();
        let close_label = label.clone();
        rtc_channel.on_close(Box::new(move || {
            info!("Data channel '{}' closed", close_label);
            let _ = tx.send(TransportEvent::ChannelClosed {
                label: close_label.clone(),
            });
            Box::pin(async {})
        }));

        let tx = events.clone();
        let error_label = label.clone();
        rtc_channel.on_error(Box::new(move |err: webrtc::Error| {
            error!("Data channel '{}' error: {}", error_label, err);
            let _ = tx.send(TransportEvent::ChannelError {
                label: error_label.clone(),
                error: err.to_string(),
            });
            Box::pin(async {})
        }));

        let tx = events;
        rtc_channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let frame = if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => Some(DataChannelFrame::Text(text)),
                    Err(e) => {
                        warn!("Dropping non UTF-8 text frame on '{}': {}", label, e);
                        None
                    }
                }
            } else {
                Some(DataChannelFrame::Binary(msg.data))
            };
            if let Some(frame) = frame {
                let _ = tx.send(TransportEvent::ChannelMessage {
                    label: label.clone(),
                    frame,
                });
            }
            Box::pin(async {})
        }));

        Self { rtc_channel }
    }
}

#[async_trait]
impl DataChannelIo for WebRtcDataChannel {
    fn label(&self) -> String {
        self.rtc_channel.label().to_string()
    }

    fn state(&self) -> ChannelState {
        match self.rtc_channel.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Closing => ChannelState::Closing,
            RTCDataChannelState::Closed => ChannelState::Closed,
            _ => ChannelState::Connecting,
        }
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.rtc_channel
            .send_text(text.to_string())
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send text: {}", e)))?;
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        self.rtc_channel
            .send(&data)
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send binary: {}", e)))?;
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.rtc_channel.buffered_amount().await
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(Error::SdpError(format!(
                "Unsupported session description type: {}",
                other
            )))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(Error::SdpError(
                "Rollback descriptions are not supported".to_string(),
            ))
        }
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse session description: {}", e)))
}
