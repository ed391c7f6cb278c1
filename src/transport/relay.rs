//! Relay session - establishes the WebSocket to a running relay.

use crate::error::Result;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of a relay connection.
pub type RelaySink = futures::stream::SplitSink<Socket, Message>;

/// Inbound half of a relay connection.
pub type RelayStream = futures::stream::SplitStream<Socket>;

/// An open WebSocket to the relay
pub struct RelaySession {
    url: String,
    socket: Socket,
}

impl RelaySession {
    /// Dial the relay at `url` (`ws://` or `wss://`).
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::debug!("Dialing relay at {}", url);
        let (socket, response) = connect_async(url).await?;
        tracing::debug!(
            "Relay handshake complete ({} {})",
            url,
            response.status()
        );

        Ok(Self {
            url: url.to_string(),
            socket,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Split into sink/stream for protocol handling
    pub fn split(self) -> (RelaySink, RelayStream) {
        self.socket.split()
    }
}
