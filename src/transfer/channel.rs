//! Transport channel: one relayed WebSocket per client.
//!
//! Outbound frames are queued onto an unbounded channel drained by a single
//! writer task, so sends never wait for the peer. Inbound frames are read by
//! a single reader task and dispatched to subscribers in arrival order,
//! never before the `true` state notification for that connection.
//!
//! State machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Open
//!      ^                          |                  |
//!      +------ dial error --------+                  |
//!      +------ remote close / disconnect() ----------+
//! ```

use crate::error::{Result, TransferError};
use crate::transfer::observers::{Observers, Subscription};
use crate::transfer::protocol::{decode_text, encode_with_target, new_connection_id, ControlMessage};
use crate::transfer::sender::FrameSink;
use crate::transport::{RelaySession, RelaySink, RelayStream};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// How long a closing connection may spend flushing its outbound queue.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifier a client registers with the relay.
pub type ConnectionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
}

#[derive(Default)]
struct Connection {
    state: ConnectionState,
    local_id: Option<ConnectionId>,
    target_id: Option<ConnectionId>,
    /// Bumped on every connect/teardown so stale tasks can tell they were superseded
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    fn open_outbound(&self) -> Result<&mpsc::UnboundedSender<Message>> {
        match (&self.state, &self.outbound) {
            (ConnectionState::Open, Some(tx)) => Ok(tx),
            _ => Err(TransferError::NotConnected),
        }
    }

    /// Detach the live connection, leaving the slot `Disconnected`.
    fn teardown(&mut self) -> Teardown {
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
        self.local_id = None;
        // Dropping the only sender lets the writer drain and close the socket
        self.outbound = None;
        Teardown {
            writer: self.writer.take(),
            reader: self.reader.take(),
        }
    }
}

struct Teardown {
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Teardown {
    async fn finish(self) {
        self.finish_within(WRITER_DRAIN_TIMEOUT).await;
    }

    /// Let the writer flush queued frames for at most `limit`, then stop
    /// both tasks.
    async fn finish_within(self, limit: Duration) {
        if let Some(mut writer) = self.writer {
            if tokio::time::timeout(limit, &mut writer).await.is_err() {
                tracing::warn!(
                    "Relay writer did not drain within {:?}; dropping queued frames",
                    limit
                );
                writer.abort();
            }
        }
        if let Some(reader) = self.reader {
            reader.abort();
        }
    }
}

struct Inner {
    url: String,
    connection: Mutex<Connection>,
    text_observers: Observers<Value>,
    binary_observers: Observers<Bytes>,
    state_observers: Observers<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle_remote_close(&self, generation: u64) {
        let closed = {
            let mut conn = self.lock();
            if conn.generation != generation || conn.state != ConnectionState::Open {
                false
            } else {
                // Handles are dropped (detached); the writer exits once the queue closes
                drop(conn.teardown());
                true
            }
        };

        if closed {
            tracing::info!("Relay connection closed by remote");
            self.state_observers.notify(&false);
        }
    }
}

/// Owned handle to the relayed connection.
///
/// Clones share the same connection and subscriber lists.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let conn = self.inner.lock();
        f.debug_struct("Channel")
            .field("url", &self.inner.url)
            .field("state", &conn.state)
            .field("local_id", &conn.local_id)
            .field("target_id", &conn.target_id)
            .finish()
    }
}

impl Channel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                connection: Mutex::new(Connection::default()),
                text_observers: Observers::new(),
                binary_observers: Observers::new(),
                state_observers: Observers::new(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn local_id(&self) -> Option<ConnectionId> {
        self.inner.lock().local_id.clone()
    }

    pub fn target_id(&self) -> Option<ConnectionId> {
        self.inner.lock().target_id.clone()
    }

    /// Open the relay connection and register a fresh local id.
    ///
    /// Any previous connection is closed first without notifying state
    /// subscribers.
    pub async fn connect(&self) -> Result<ConnectionId> {
        let previous = self.inner.lock().teardown();
        previous.finish().await;

        let generation = {
            let mut conn = self.inner.lock();
            conn.generation += 1;
            conn.state = ConnectionState::Connecting;
            conn.generation
        };

        let session = match RelaySession::connect(&self.inner.url).await {
            Ok(session) => session,
            Err(e) => {
                let mut conn = self.inner.lock();
                if conn.generation == generation {
                    conn.state = ConnectionState::Disconnected;
                }
                tracing::warn!("Failed to connect to relay {}: {}", self.inner.url, e);
                return Err(e);
            }
        };

        let local_id = new_connection_id();
        // Holds inbound dispatch back until subscribers have seen the open
        let (start_tx, start_rx) = oneshot::channel();
        let register = serde_json::to_string(&ControlMessage::Register {
            connection_id: local_id.clone(),
        })?;

        {
            let mut conn = self.inner.lock();
            if conn.generation != generation {
                // disconnect() or another connect() ran while we were dialing
                return Err(TransferError::ConnectionClosed);
            }

            let (sink, stream) = session.split();
            let (tx, rx) = mpsc::unbounded_channel();
            // Queued first, so it precedes anything a caller sends
            tx.send(Message::Text(register))
                .map_err(|_| TransferError::ConnectionClosed)?;

            conn.writer = Some(tokio::spawn(write_loop(sink, rx)));
            conn.reader = Some(tokio::spawn(read_loop(
                Arc::clone(&self.inner),
                stream,
                generation,
                start_rx,
            )));
            conn.outbound = Some(tx);
            conn.local_id = Some(local_id.clone());
            conn.state = ConnectionState::Open;
        }

        tracing::info!("Connected to relay {} as {}", self.inner.url, local_id);
        self.inner.state_observers.notify(&true);
        let _ = start_tx.send(());
        Ok(local_id)
    }

    /// Close the connection and forget both ids.
    ///
    /// Frames already queued are flushed before the socket closes. Calling
    /// this with no connection is a no-op.
    pub async fn disconnect(&self) {
        let (teardown, was_open) = {
            let mut conn = self.inner.lock();
            let was_open = conn.state == ConnectionState::Open;
            let teardown = conn.teardown();
            conn.target_id = None;
            (teardown, was_open)
        };

        teardown.finish().await;

        if was_open {
            tracing::info!("Disconnected from relay {}", self.inner.url);
            self.inner.state_observers.notify(&false);
        }
    }

    /// Set the peer every later text frame is addressed to.
    pub fn set_target(&self, target_id: impl Into<ConnectionId>) {
        let target_id = target_id.into();
        tracing::debug!("Target set to {}", target_id);
        self.inner.lock().target_id = Some(target_id);
    }

    /// Send a JSON object with `target_id` merged in.
    pub fn send_text<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let conn = self.inner.lock();
        let outbound = conn.open_outbound()?;
        let target_id = conn.target_id.as_deref().ok_or(TransferError::NoTarget)?;
        let text = encode_with_target(message, target_id)?;
        outbound
            .send(Message::Text(text))
            .map_err(|_| TransferError::ConnectionClosed)
    }

    /// Send one binary frame, no framing header.
    pub fn send_binary(&self, data: Bytes) -> Result<()> {
        let conn = self.inner.lock();
        let outbound = conn.open_outbound()?;
        outbound
            .send(Message::Binary(data.into()))
            .map_err(|_| TransferError::ConnectionClosed)
    }

    /// Subscribe to inbound text frames (always JSON objects).
    pub fn on_text_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.text_observers.subscribe(handler)
    }

    pub fn on_binary_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.inner.binary_observers.subscribe(handler)
    }

    /// Subscribe to open (`true`) / closed (`false`) transitions.
    pub fn on_connection_state<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.inner.state_observers.subscribe(handler)
    }
}

impl FrameSink for Channel {
    fn ready(&self) -> Result<()> {
        let conn = self.inner.lock();
        conn.open_outbound()?;
        if conn.target_id.is_none() {
            return Err(TransferError::NoTarget);
        }
        Ok(())
    }

    fn send_control(&self, message: &ControlMessage) -> Result<()> {
        self.send_text(message)
    }

    fn send_chunk(&self, chunk: Bytes) -> Result<()> {
        self.send_binary(chunk)
    }
}

async fn write_loop(mut sink: RelaySink, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = sink.send(msg).await {
            tracing::warn!("Relay write failed: {}", e);
            return;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    inner: Arc<Inner>,
    mut stream: RelayStream,
    generation: u64,
    start: oneshot::Receiver<()>,
) {
    if start.await.is_err() {
        return;
    }
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match decode_text(&text) {
                Ok(object) => inner.text_observers.notify(&Value::Object(object)),
                Err(e) => tracing::warn!("Dropping malformed text frame: {}", e),
            },
            Ok(Message::Binary(data)) => {
                tracing::trace!("Received binary frame of {} bytes", data.len());
                inner.binary_observers.notify(&Bytes::from(data));
            }
            Ok(Message::Close(frame)) => {
                tracing::debug!("Relay sent close frame: {:?}", frame);
                break;
            }
            // Ping/pong are answered by tungstenite
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Relay read failed: {}", e);
                break;
            }
        }
    }
    inner.handle_remote_close(generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_send_text_requires_connection() {
        let channel = Channel::new("ws://127.0.0.1:9/ws");
        channel.set_target("peer");
        let err = channel.send_text(&json!({"type": "ping"})).unwrap_err();
        assert!(matches!(err, TransferError::NotConnected));
    }

    #[test]
    fn test_send_binary_requires_connection() {
        let channel = Channel::new("ws://127.0.0.1:9/ws");
        let err = channel.send_binary(Bytes::from_static(b"abc")).unwrap_err();
        assert!(matches!(err, TransferError::NotConnected));
    }

    #[test]
    fn test_ready_checks_connection_before_target() {
        let channel = Channel::new("ws://127.0.0.1:9/ws");
        assert!(matches!(
            channel.ready().unwrap_err(),
            TransferError::NotConnected
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = Channel::new(format!("ws://{}/ws", addr));
        let opened = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let opened = Arc::clone(&opened);
            channel.on_connection_state(move |open| {
                if *open {
                    opened.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let err = channel.connect().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(channel.local_id().is_none());
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let channel = Channel::new("ws://127.0.0.1:9/ws");
        let notified = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let notified = Arc::clone(&notified);
            channel.on_connection_state(move |_| {
                notified.fetch_add(1, Ordering::SeqCst);
            })
        };

        channel.set_target("peer");
        channel.disconnect().await;
        channel.disconnect().await;

        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(channel.target_id().is_none());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_teardown_abandons_stuck_writer() {
        struct SetOnDrop(Arc<AtomicUsize>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        // A writer blocked forever, as when the relay stops reading
        let dropped = Arc::new(AtomicUsize::new(0));
        let guard = SetOnDrop(Arc::clone(&dropped));
        let writer = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });

        let teardown = Teardown {
            writer: Some(writer),
            reader: None,
        };
        tokio::time::timeout(
            Duration::from_secs(5),
            teardown.finish_within(Duration::from_millis(50)),
        )
        .await
        .expect("teardown hung on a stuck writer");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_target_replaces_previous() {
        let channel = Channel::new("ws://127.0.0.1:9/ws");
        channel.set_target("a");
        channel.set_target(String::from("b"));
        assert_eq!(channel.target_id().as_deref(), Some("b"));
    }
}
