//! Client session.
//!
//! Wires a [`Channel`] to a [`Receiver`] and exposes the operations and
//! subscriptions a front end needs: connect, disconnect, target selection,
//! file sending, send progress, receive events and the received-file list.

use crate::error::{Result, TransferError};
use crate::transfer::channel::{Channel, ConnectionId, ConnectionState};
use crate::transfer::observers::{Observers, Subscription};
use crate::transfer::receiver::{CompletedFile, ReceiveEvent, ReceiveStats, Receiver};
use crate::transfer::sender::{FrameSink, SendState, Sender};
use crate::transfer::source::ByteSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct Session {
    channel: Channel,
    receiver: Arc<Mutex<Receiver>>,
    send_progress: Observers<u8>,
    receive_events: Observers<ReceiveEvent>,
    sending: AtomicBool,
    wiring: Vec<Subscription>,
}

impl Session {
    /// Build a session on top of `channel`, subscribing the receiver to its
    /// inbound frames.
    pub fn new(channel: Channel) -> Self {
        let receiver = Arc::new(Mutex::new(Receiver::new()));
        let receive_events: Observers<ReceiveEvent> = Observers::new();

        let text = {
            let receiver = Arc::clone(&receiver);
            let events = receive_events.clone();
            channel.on_text_message(move |frame| {
                let event = lock(&receiver).handle_text(frame);
                if let Some(event) = event {
                    events.notify(&event);
                }
            })
        };

        let binary = {
            let receiver = Arc::clone(&receiver);
            let events = receive_events.clone();
            channel.on_binary_message(move |chunk| {
                let event = lock(&receiver).handle_chunk(chunk.clone());
                if let Some(event) = event {
                    events.notify(&event);
                }
            })
        };

        // A partial transfer never survives its connection, including a
        // reconnect that replaced the socket without a close notification
        let state = {
            let receiver = Arc::clone(&receiver);
            channel.on_connection_state(move |_| {
                lock(&receiver).reset();
            })
        };

        Self {
            channel,
            receiver,
            send_progress: Observers::new(),
            receive_events,
            sending: AtomicBool::new(false),
            wiring: vec![text, binary, state],
        }
    }

    /// Shorthand for `Session::new(Channel::new(url))`.
    pub fn connect_to(url: impl Into<String>) -> Self {
        Self::new(Channel::new(url))
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn connect(&self) -> Result<ConnectionId> {
        self.channel.connect().await
    }

    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
    }

    pub fn set_target(&self, target_id: impl Into<ConnectionId>) {
        self.channel.set_target(target_id);
    }

    pub fn local_id(&self) -> Option<ConnectionId> {
        self.channel.local_id()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.state() == ConnectionState::Open
    }

    /// Send one file to the current target.
    ///
    /// Only one send may run per session; a concurrent call fails with
    /// [`TransferError::Busy`].
    pub async fn send_file<B>(&self, source: &mut B) -> Result<SendState>
    where
        B: ByteSource + ?Sized,
    {
        let _guard = SendGuard::acquire(&self.sending)?;
        self.channel.ready()?;
        self.send_progress.notify(&0);
        Sender::new(&self.channel)
            .send_file(source, |percent| self.send_progress.notify(&percent))
            .await
    }

    /// Subscribe to outgoing progress (0-100).
    pub fn on_file_progress<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&u8) + Send + Sync + 'static,
    {
        self.send_progress.subscribe(handler)
    }

    pub fn on_receive<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ReceiveEvent) + Send + Sync + 'static,
    {
        self.receive_events.subscribe(handler)
    }

    pub fn on_connection_state<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.channel.on_connection_state(handler)
    }

    /// Files received so far, oldest first.
    pub fn received_files(&self) -> Vec<CompletedFile> {
        lock(&self.receiver).completed_files().to_vec()
    }

    pub fn receive_stats(&self) -> ReceiveStats {
        lock(&self.receiver).stats().clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for subscription in self.wiring.drain(..) {
            subscription.unsubscribe();
        }
    }
}

fn lock(receiver: &Mutex<Receiver>) -> MutexGuard<'_, Receiver> {
    receiver
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SendGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SendGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TransferError::Busy)?;
        Ok(Self { flag })
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::source::MemorySource;
    use bytes::Bytes;

    #[test]
    fn test_send_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = SendGuard::acquire(&flag).unwrap();
        assert!(matches!(
            SendGuard::acquire(&flag).err(),
            Some(TransferError::Busy)
        ));
        drop(guard);
        assert!(SendGuard::acquire(&flag).is_ok());
    }

    #[tokio::test]
    async fn test_send_without_connection_fails_and_releases_guard() {
        let session = Session::connect_to("ws://127.0.0.1:9/ws");
        session.set_target("peer");
        let mut source = MemorySource::new("a", "", Bytes::from_static(b"abc"));

        let progress = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let progress = Arc::clone(&progress);
            session.on_file_progress(move |p| progress.lock().unwrap().push(*p))
        };

        let err = session.send_file(&mut source).await.unwrap_err();
        assert!(matches!(err, TransferError::NotConnected));
        assert!(progress.lock().unwrap().is_empty());

        // Guard released: the next attempt fails the same way, not with Busy
        let err = session.send_file(&mut source).await.unwrap_err();
        assert!(matches!(err, TransferError::NotConnected));
    }

    #[test]
    fn test_new_session_has_no_files() {
        let session = Session::connect_to("ws://127.0.0.1:9/ws");
        assert!(session.received_files().is_empty());
        assert!(!session.is_connected());
        assert_eq!(session.receive_stats(), ReceiveStats::default());
    }
}
