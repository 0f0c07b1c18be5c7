//! WebSocket connection to the signaling relay

use super::adapter::SignalSink;
use crate::channel_id::ChannelId;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Relay client; outbound frames are queued to a sender task
pub struct WebSocketSignaling {
    tx: mpsc::UnboundedSender<Message>,
}

impl WebSocketSignaling {
    /// Connect to the relay for `channel`
    ///
    /// Returns the outbound sink and a receiver yielding every inbound text
    /// frame. The receiver closes when the relay connection ends.
    pub async fn connect(
        base_url: &str,
        channel: &ChannelId,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<String>)> {
        let url = relay_url(base_url, channel)?;
        info!("Connecting to signaling relay: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!(%channel, "Connected to signaling relay");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, inbound_tx));

        Ok((Arc::new(Self { tx }), inbound_rx))
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        debug!("Sender task terminated");
    }

    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        inbound: mpsc::UnboundedSender<String>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if inbound.send(text).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("Signaling relay closed the connection");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        debug!("Receiver task terminated");
    }
}

impl SignalSink for WebSocketSignaling {
    fn deliver(&self, text: String) -> Result<()> {
        self.tx
            .send(Message::Text(text))
            .map_err(|e| Error::SignalingDelivery(format!("Relay connection is gone: {}", e)))
    }

    fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }
}

/// Relay URL with the channel identifier as the `channel` query parameter
pub fn relay_url(base_url: &str, channel: &ChannelId) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| Error::InvalidConfig(format!("Invalid signaling URL {}: {}", base_url, e)))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(Error::InvalidConfig(format!(
            "Signaling URL must use ws:// or wss://, got {}",
            base_url
        )));
    }

    url.query_pairs_mut().append_pair("channel", channel.as_str());
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_relay_url_appends_channel() {
        let channel = ChannelId::parse("ab12cd").unwrap();
        let url = relay_url("wss://relay.example.org/prod", &channel).unwrap();
        assert_eq!(url.as_str(), "wss://relay.example.org/prod?channel=AB12CD");

        let url = relay_url("ws://localhost:9000/?v=1", &channel).unwrap();
        assert_eq!(url.query(), Some("v=1&channel=AB12CD"));
    }

    #[test]
    fn test_relay_url_rejects_http() {
        let channel = ChannelId::generate();
        assert!(matches!(
            relay_url("https://relay.example.org", &channel),
            Err(Error::InvalidConfig(_))
        ));
        assert!(relay_url("not a url", &channel).is_err());
    }

    #[tokio::test]
    async fn test_round_trip_through_echo_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"type":"peer_joined"}"#.to_string()))
                .await
                .unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() {
                    ws.send(msg).await.unwrap();
                }
            }
        });

        let channel = ChannelId::parse("ZZ99ZZ").unwrap();
        let (sink, mut inbound) = WebSocketSignaling::connect(&format!("ws://{}", addr), &channel)
            .await
            .unwrap();

        assert_eq!(inbound.recv().await.unwrap(), r#"{"type":"peer_joined"}"#);

        sink.deliver("hello".to_string()).unwrap();
        assert_eq!(inbound.recv().await.unwrap(), "hello");

        sink.close();
    }
}
