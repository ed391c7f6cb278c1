//! Relay server - runs when invoked as `relaydrop relay`
//!
//! Forwards frames between WebSocket clients by connection id:
//! - `register` aliases a client-chosen id to the socket
//! - text frames carrying `target_id` are forwarded verbatim to that peer,
//!   and the target becomes the socket's route for binary frames
//! - binary frames follow the socket's last route
//!
//! The relay never inspects transfer contents.

use crate::config::RelayConfig;
use crate::error::Result;
use crate::transfer::protocol::TARGET_ID_FIELD;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;

type PeerSender = mpsc::UnboundedSender<Message>;

/// Registered connections, keyed by every id they answer to.
#[derive(Clone, Default)]
pub struct Peers {
    inner: Arc<Mutex<HashMap<String, PeerSender>>>,
}

impl Peers {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PeerSender>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, id: String, tx: PeerSender) {
        self.lock().insert(id, tx);
    }

    /// Queue `msg` for `id`. Returns false if nobody is registered as `id`.
    fn forward(&self, id: &str, msg: Message) -> bool {
        match self.lock().get(id) {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Remove `ids`, but only where they still point at `tx`; a later
    /// socket may have re-registered the same id.
    fn remove_owned(&self, ids: &[String], tx: &PeerSender) {
        let mut peers = self.lock();
        for id in ids {
            if peers.get(id).is_some_and(|t| t.same_channel(tx)) {
                peers.remove(id);
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of routing one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Registered(String),
    Forwarded(String),
    TargetOffline(String),
    NoTarget,
    Malformed,
}

/// Routing state for one client socket.
struct PeerConnection {
    id: String,
    tx: PeerSender,
    aliases: Vec<String>,
    target: Option<String>,
    peers: Peers,
}

impl PeerConnection {
    fn new(peers: Peers, tx: PeerSender) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        peers.insert(id.clone(), tx.clone());
        Self {
            aliases: vec![id.clone()],
            id,
            tx,
            target: None,
            peers,
        }
    }

    fn handle_text(&mut self, text: String) -> Route {
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => return Route::Malformed,
        };

        if value["type"] == "register" {
            return match value["connectionId"].as_str() {
                Some(alias) => {
                    self.peers.insert(alias.to_string(), self.tx.clone());
                    self.aliases.push(alias.to_string());
                    Route::Registered(alias.to_string())
                }
                None => Route::Malformed,
            };
        }

        let Some(target) = value[TARGET_ID_FIELD].as_str().map(str::to_string) else {
            return Route::NoTarget;
        };
        self.target = Some(target.clone());

        if self.peers.forward(&target, Message::Text(text)) {
            Route::Forwarded(target)
        } else {
            Route::TargetOffline(target)
        }
    }

    fn handle_binary(&mut self, data: Vec<u8>) -> Route {
        let Some(target) = self.target.clone() else {
            return Route::NoTarget;
        };

        if self.peers.forward(&target, Message::Binary(data)) {
            Route::Forwarded(target)
        } else {
            Route::TargetOffline(target)
        }
    }

}

// Runs on normal close and when the socket task is aborted at shutdown
impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.peers.remove_owned(&self.aliases, &self.tx);
    }
}

/// WebSocket relay bound to a local address
pub struct RelayServer {
    listener: TcpListener,
    peers: Peers,
    ping_interval: Duration,
}

impl RelayServer {
    pub async fn bind(addr: &str, ping_interval: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            peers: Peers::default(),
            ping_interval,
        })
    }

    pub async fn from_config(config: &RelayConfig) -> Result<Self> {
        Self::bind(&config.bind, config.ping_interval()).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the registration table, valid after `run` takes `self`.
    pub fn peers(&self) -> Peers {
        self.peers.clone()
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Accept connections until `shutdown` resolves, then close every open
    /// client socket.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Relay listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);
        let mut sockets = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Relay shutting down, closing {} connections", sockets.len());
                    sockets.shutdown().await;
                    return Ok(());
                }
                // Reap finished socket tasks
                Some(_) = sockets.join_next(), if !sockets.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    sockets.spawn(handle_socket(
                        stream,
                        addr,
                        self.peers.clone(),
                        self.ping_interval,
                    ));
                }
            }
        }
    }
}

async fn handle_socket(stream: TcpStream, addr: SocketAddr, peers: Peers, ping_interval: Duration) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut conn = PeerConnection::new(peers, tx);
    tracing::info!("New connection {} from {}", conn.id, addr);

    let (mut sink, mut stream) = ws.split();

    // Single writer: forwarded frames plus keep-alive pings
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.tick().await;
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let route = match frame {
            Ok(Message::Text(text)) => conn.handle_text(text),
            Ok(Message::Binary(data)) => {
                let len = data.len();
                let route = conn.handle_binary(data);
                if route == Route::NoTarget {
                    tracing::warn!("No target set for binary transfer from {} ({} bytes)", conn.id, len);
                }
                route
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Read from {} failed: {}", conn.id, e);
                break;
            }
        };

        match route {
            Route::Registered(alias) => tracing::info!("{} registered as {}", conn.id, alias),
            Route::TargetOffline(target) => {
                tracing::debug!("Dropping frame from {}: {} is not connected", conn.id, target)
            }
            Route::Malformed => tracing::debug!("Dropping malformed frame from {}", conn.id),
            Route::Forwarded(_) | Route::NoTarget => {}
        }
    }

    let id = conn.id.clone();
    drop(conn);
    writer.abort();
    tracing::info!("Connection closed {}", id);
}
