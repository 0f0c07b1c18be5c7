//! Per-file request/accept/reject handshake and chunk streaming
//!
//! ```text
//! sender                                receiver
//!   | file-info-request {filename,size}  ->  |   IncomingRequest
//!   | <-  file-info-accept | file-info-reject |   accept() / reject()
//!   | binary chunk (64 KiB) ...           ->  |   Progress
//!   | file-complete {filename}            ->  |   Received
//! ```
//!
//! Frames are processed in arrival order by the caller's event loop. The
//! chunk writer runs on its own task so inbound frames keep flowing while a
//! file is being sent. One outbound file is on the wire at a time; a send
//! only counts as complete once the channel's send buffer has drained.

use super::chunker::{self, crosses_decile};
use super::inbound::{InboundTransfer, ReceivedFile};
use super::outbound::{OutboundFile, OutboundState, PendingOutbound};
use crate::channels::{ControlFrame, DataChannelFrame};
use crate::config::SessionConfig;
use crate::peer::{ActiveChannel, DataChannelIo};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Events reported to the application
#[derive(Debug)]
pub enum TransferEvent {
    /// The remote peer asks to send a file; answer through the handle
    IncomingRequest(IncomingFile),
    Progress {
        filename: String,
        direction: Direction,
        percent: u8,
    },
    Received(ReceivedFile),
    /// The remote peer declined our file
    Rejected { filename: String },
    /// Every byte and `file-complete` left the send buffer
    SendComplete { filename: String },
    /// An accepted inbound transfer was replaced before it completed
    InboundDiscarded { filename: String, received_bytes: u64 },
    SendFailed { filename: String, error: Error },
}

/// Decision point for an inbound `file-info-request`
///
/// Dropping the handle without deciding rejects the file.
#[derive(Debug)]
pub struct IncomingFile {
    filename: String,
    size: u64,
    responder: Option<oneshot::Sender<bool>>,
}

impl IncomingFile {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn accept(mut self) {
        self.respond(true);
    }

    pub fn reject(mut self) {
        self.respond(false);
    }

    fn respond(&mut self, accepted: bool) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(accepted);
        }
    }
}

impl Drop for IncomingFile {
    fn drop(&mut self) {
        if self.responder.is_some() {
            debug!(filename = %self.filename, "Incoming file dropped undecided, rejecting");
            self.respond(false);
        }
    }
}

#[derive(Debug, Default)]
struct TransferState {
    /// Requested or in-flight outbound file
    pending: Option<PendingOutbound>,
    /// Most recent outbound file and how far it got
    outbound_status: Option<(String, OutboundState)>,
    next_request_id: u64,
    inbound: Option<InboundTransfer>,
}

impl TransferState {
    fn set_status(&mut self, filename: &str, state: OutboundState) {
        self.outbound_status = Some((filename.to_string(), state));
    }
}

struct Shared {
    channel: watch::Receiver<ActiveChannel>,
    events: mpsc::UnboundedSender<TransferEvent>,
    state: Mutex<TransferState>,
    open_timeout: Duration,
    flush_timeout: Duration,
    max_buffered_amount: usize,
    poll_interval: Duration,
}

#[derive(Clone)]
pub struct TransferCoordinator {
    shared: Arc<Shared>,
}

impl TransferCoordinator {
    pub fn new(
        channel: watch::Receiver<ActiveChannel>,
        config: &SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            shared: Arc::new(Shared {
                channel,
                events,
                state: Mutex::new(TransferState::default()),
                open_timeout: config.channel_open_timeout(),
                flush_timeout: config.send_flush_timeout(),
                max_buffered_amount: config.max_buffered_amount,
                poll_interval: config.buffered_poll_interval(),
            }),
        };
        (coordinator, events_rx)
    }

    /// Offer `file` to the remote peer
    ///
    /// Waits for the data channel to open, then sends `file-info-request`.
    /// Bytes only flow after the receiver accepts. A newer request replaces
    /// an unresolved older one.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] while an accepted file is still being sent;
    /// wait for its `SendComplete` or `SendFailed` first.
    pub async fn request_send(&self, file: OutboundFile) -> Result<()> {
        let filename = file.filename.clone();
        let size = file.size();

        let id = {
            let mut state = self.shared.state.lock().await;
            if let Some(current) = state.pending.as_ref().filter(|p| p.is_in_flight()) {
                return Err(Error::InvalidState(format!(
                    "{} is still being sent",
                    current.file.filename
                )));
            }
            let id = state.next_request_id;
            state.next_request_id += 1;
            if let Some(previous) = state.pending.replace(PendingOutbound::new(id, file)) {
                warn!(
                    previous = %previous.file.filename,
                    "Discarding unresolved outbound transfer"
                );
            }
            state.set_status(&filename, OutboundState::Requested);
            id
        };

        info!(%filename, size, "Requesting to send file");

        let result = async {
            let channel = self.shared.wait_for_open().await?;
            let request = ControlFrame::FileInfoRequest {
                filename: filename.clone(),
                size,
            };
            channel.send_text(&request.to_json()?).await
        }
        .await;

        if let Err(e) = &result {
            warn!(%filename, "File request failed: {}", e);
            let mut state = self.shared.state.lock().await;
            if state.pending.as_ref().is_some_and(|p| p.id == id) {
                state.pending = None;
            }
        }
        result
    }

    /// Route one data channel frame
    pub async fn handle_frame(&self, frame: DataChannelFrame) {
        match frame {
            DataChannelFrame::Text(text) => match ControlFrame::from_json(&text) {
                Ok(control) => self.handle_control(control).await,
                Err(e) => warn!("Dropping unparseable control frame: {}", e),
            },
            DataChannelFrame::Binary(chunk) => self.handle_chunk(chunk).await,
        }
    }

    /// Filename and state of the most recent outbound transfer
    pub async fn outbound_status(&self) -> Option<(String, OutboundState)> {
        self.shared.state.lock().await.outbound_status.clone()
    }

    pub async fn has_pending_outbound(&self) -> bool {
        self.shared.state.lock().await.pending.is_some()
    }

    /// Filename and received byte count of the active inbound transfer
    pub async fn inbound_progress(&self) -> Option<(String, u64)> {
        let state = self.shared.state.lock().await;
        state
            .inbound
            .as_ref()
            .map(|t| (t.filename().to_string(), t.received_bytes()))
    }

    async fn handle_control(&self, control: ControlFrame) {
        match control {
            ControlFrame::FileInfoRequest { filename, size } => {
                info!(%filename, size, "Remote peer wants to send a file");
                let (responder, decision) = oneshot::channel();
                let shared = self.shared.clone();
                let name = filename.clone();
                tokio::spawn(async move {
                    let accepted = decision.await.unwrap_or(false);
                    shared.respond(name, size, accepted).await;
                });
                self.shared.emit(TransferEvent::IncomingRequest(IncomingFile {
                    filename,
                    size,
                    responder: Some(responder),
                }));
            }
            ControlFrame::FileInfoAccept { filename } => {
                let accepted = {
                    let mut state = self.shared.state.lock().await;
                    let accepted = state
                        .pending
                        .as_mut()
                        .filter(|pending| pending.awaits_decision_for(&filename))
                        .map(|pending| {
                            pending.state = OutboundState::Accepted;
                            (pending.id, pending.file.clone())
                        });
                    if accepted.is_some() {
                        state.set_status(&filename, OutboundState::Accepted);
                    }
                    accepted
                };

                match accepted {
                    Some((id, file)) => {
                        info!(%filename, "Remote peer accepted file");
                        tokio::spawn(self.shared.clone().send_file(id, file));
                    }
                    None => debug!(%filename, "Ignoring accept for a file that is not pending"),
                }
            }
            ControlFrame::FileInfoReject { filename } => {
                let rejected = {
                    let mut state = self.shared.state.lock().await;
                    if state
                        .pending
                        .as_ref()
                        .is_some_and(|p| p.awaits_decision_for(&filename))
                    {
                        state.pending = None;
                        state.set_status(&filename, OutboundState::Rejected);
                        true
                    } else {
                        false
                    }
                };

                if rejected {
                    info!(%filename, "Remote peer rejected file");
                    self.shared.emit(TransferEvent::Rejected { filename });
                } else {
                    debug!(%filename, "Ignoring reject for a file that is not pending");
                }
            }
            ControlFrame::FileComplete { filename } => {
                let Some(inbound) = self.shared.state.lock().await.inbound.take() else {
                    warn!(%filename, "Dropping file-complete with no active inbound transfer");
                    return;
                };

                if inbound.filename() != filename {
                    warn!(
                        expected = %inbound.filename(),
                        got = %filename,
                        "file-complete names a different file"
                    );
                }
                if inbound.received_bytes() != inbound.expected_size() {
                    warn!(
                        filename = %inbound.filename(),
                        expected = inbound.expected_size(),
                        received = inbound.received_bytes(),
                        "Received size differs from announced size"
                    );
                }

                let file = inbound.finish();
                info!(filename = %file.filename, size = file.size(), "File received");
                self.shared.emit(TransferEvent::Received(file));
            }
        }
    }

    async fn handle_chunk(&self, chunk: Bytes) {
        let len = chunk.len();
        let progress = {
            let mut state = self.shared.state.lock().await;
            match state.inbound.as_mut() {
                Some(inbound) => {
                    let before = inbound.percent();
                    let after = inbound.push(chunk);
                    Some((inbound.filename().to_string(), before, after))
                }
                None => None,
            }
        };

        match progress {
            Some((filename, before, percent)) => {
                if crosses_decile(Some(before), percent) {
                    debug!(%filename, percent, "Receive progress");
                }
                self.shared.emit(TransferEvent::Progress {
                    filename,
                    direction: Direction::Receive,
                    percent,
                });
            }
            None => warn!(
                bytes = len,
                "Dropping binary frame with no active inbound transfer"
            ),
        }
    }
}

impl Shared {
    fn emit(&self, event: TransferEvent) {
        if self.events.send(event).is_err() {
            debug!("Transfer event receiver dropped");
        }
    }

    fn current_channel(&self) -> Option<Arc<dyn DataChannelIo>> {
        self.channel.borrow().clone()
    }

    /// Wait until the active data channel is open, bounded by the open timeout
    async fn wait_for_open(&self) -> Result<Arc<dyn DataChannelIo>> {
        let mut rx = self.channel.clone();
        let wait = async {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(channel) = current {
                    if channel.is_open() {
                        return Ok(channel);
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(Error::DataChannelError(
                        "peer connection manager is gone".to_string(),
                    ));
                }
            }
        };

        tokio::time::timeout(self.open_timeout, wait)
            .await
            .map_err(|_| {
                Error::TransportTimeout(format!(
                    "data channel did not open within {:?}",
                    self.open_timeout
                ))
            })?
    }

    /// Apply the local decision on an inbound request
    async fn respond(&self, filename: String, size: u64, accepted: bool) {
        let reply = if accepted {
            let discarded = {
                let mut state = self.state.lock().await;
                state
                    .inbound
                    .replace(InboundTransfer::new(filename.clone(), size))
            };
            if let Some(previous) = discarded {
                warn!(
                    filename = %previous.filename(),
                    received = previous.received_bytes(),
                    "Discarding incomplete inbound transfer"
                );
                self.emit(TransferEvent::InboundDiscarded {
                    filename: previous.filename().to_string(),
                    received_bytes: previous.received_bytes(),
                });
            }
            info!(%filename, "Accepted incoming file");
            ControlFrame::FileInfoAccept { filename }
        } else {
            info!(%filename, "Rejected incoming file");
            ControlFrame::FileInfoReject { filename }
        };

        let Some(channel) = self.current_channel() else {
            warn!(filename = %reply.filename(), "No data channel to answer file request on");
            return;
        };
        let sent = match reply.to_json() {
            Ok(json) => channel.send_text(&json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            warn!(filename = %reply.filename(), "Failed to answer file request: {}", e);
        }
    }

    /// Chunk writer task for an accepted file; frees the outbound slot
    /// when done
    async fn send_file(self: Arc<Self>, id: u64, file: OutboundFile) {
        let filename = file.filename.clone();
        {
            let mut state = self.state.lock().await;
            if let Some(pending) = state.pending.as_mut().filter(|p| p.id == id) {
                pending.state = OutboundState::Sending;
            }
            state.set_status(&filename, OutboundState::Sending);
        }

        let result = self.stream_chunks(&file).await;

        {
            let mut state = self.state.lock().await;
            if state.pending.as_ref().is_some_and(|p| p.id == id) {
                state.pending = None;
            }
            if result.is_ok() {
                state.set_status(&filename, OutboundState::Complete);
            }
        }

        match result {
            Ok(()) => {
                info!(%filename, size = file.size(), "File sent");
                self.emit(TransferEvent::SendComplete { filename });
            }
            Err(error) => {
                error!(%filename, "File send failed: {}", error);
                self.emit(TransferEvent::SendFailed { filename, error });
            }
        }
    }

    async fn stream_chunks(&self, file: &OutboundFile) -> Result<()> {
        let channel = self
            .current_channel()
            .filter(|channel| channel.is_open())
            .ok_or_else(|| Error::DataChannelError("data channel is not open".to_string()))?;

        let total = file.size();
        let mut offset = 0u64;
        let mut last_logged = None;

        if total == 0 {
            self.report_send_progress(&file.filename, 100, &mut last_logged);
        }

        for chunk in chunker::chunks(&file.data) {
            self.wait_for_drain(channel.as_ref()).await?;

            let len = chunk.len() as u64;
            channel.send_binary(chunk).await?;
            offset += len;

            let percent = chunker::percent(offset, total);
            self.report_send_progress(&file.filename, percent, &mut last_logged);

            tokio::task::yield_now().await;
        }

        let complete = ControlFrame::FileComplete {
            filename: file.filename.clone(),
        };
        channel.send_text(&complete.to_json()?).await?;

        self.wait_for_flush(channel.as_ref()).await
    }

    /// Wait until the channel has handed everything queued to the network
    async fn wait_for_flush(&self, channel: &dyn DataChannelIo) -> Result<()> {
        let flush = async {
            loop {
                let buffered = channel.buffered_amount().await;
                if buffered == 0 {
                    return Ok(());
                }
                if !channel.is_open() {
                    return Err(Error::DataChannelError(format!(
                        "data channel closed with {} bytes unsent",
                        buffered
                    )));
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::time::timeout(self.flush_timeout, flush)
            .await
            .map_err(|_| {
                Error::TransportTimeout(format!(
                    "send buffer did not drain within {:?}",
                    self.flush_timeout
                ))
            })?
    }

    /// Hold the next chunk while the channel's send buffer is above the mark
    async fn wait_for_drain(&self, channel: &dyn DataChannelIo) -> Result<()> {
        while channel.buffered_amount().await > self.max_buffered_amount {
            if !channel.is_open() {
                return Err(Error::DataChannelError(
                    "data channel closed while sending".to_string(),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }

    fn report_send_progress(&self, filename: &str, percent: u8, last_logged: &mut Option<u8>) {
        if crosses_decile(*last_logged, percent) {
            debug!(%filename, percent, "Send progress");
            *last_logged = Some(percent);
        }
        self.emit(TransferEvent::Progress {
            filename: filename.to_string(),
            direction: Direction::Send,
            percent,
        });
    }
}
