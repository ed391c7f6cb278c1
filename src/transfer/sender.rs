//! Sender side of a file transfer.
//!
//! Emits FILE_INFO, then the file as fixed-size binary chunks, then
//! FILE_COMPLETE. Nothing is acknowledged; the sender can run arbitrarily
//! far ahead of the receiver.

use crate::error::{Result, TransferError};
use crate::transfer::protocol::{progress_percent, ControlMessage, CHUNK_SIZE};
use crate::transfer::source::ByteSource;
use bytes::Bytes;
use std::io;

/// Where outgoing frames go.
pub trait FrameSink {
    /// Check that a transfer may start: connected and addressed.
    fn ready(&self) -> Result<()>;

    fn send_control(&self, message: &ControlMessage) -> Result<()>;

    fn send_chunk(&self, chunk: Bytes) -> Result<()>;
}

/// Progress of one outgoing transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendState {
    pub offset: u64,
    pub size: u64,
}

impl SendState {
    pub fn percent(&self) -> u8 {
        progress_percent(self.offset, self.size)
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.size
    }

    fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }
}

pub struct Sender<'a, S: ?Sized> {
    sink: &'a S,
}

impl<'a, S: FrameSink + ?Sized> Sender<'a, S> {
    pub fn new(sink: &'a S) -> Self {
        Self { sink }
    }

    /// Stream `source` to the sink, calling `on_progress` with the rounded
    /// percentage after every chunk.
    ///
    /// Fails before sending anything if the sink is not ready. A read error
    /// aborts the transfer without a FILE_COMPLETE, leaving the receiver
    /// with a partial transfer.
    pub async fn send_file<B, F>(&self, source: &mut B, mut on_progress: F) -> Result<SendState>
    where
        B: ByteSource + ?Sized,
        F: FnMut(u8),
    {
        self.sink.ready()?;

        let metadata = source.metadata().clone();
        tracing::debug!(
            "Sending {} ({} bytes, {})",
            metadata.filename,
            metadata.size,
            metadata.content_type
        );
        self.sink
            .send_control(&ControlMessage::FileInfo(metadata.clone()))?;

        let mut state = SendState {
            offset: 0,
            size: metadata.size,
        };

        if state.size == 0 {
            on_progress(100);
        }

        while !state.is_done() {
            let want = (CHUNK_SIZE as u64).min(state.remaining()) as usize;
            let chunk = source
                .read_slice(want)
                .await
                .map_err(TransferError::Read)?;

            if chunk.is_empty() {
                return Err(TransferError::Read(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} ended after {} of {} bytes",
                        metadata.filename, state.offset, state.size
                    ),
                )));
            }

            let len = chunk.len() as u64;
            self.sink.send_chunk(chunk)?;
            state.offset += len;
            on_progress(state.percent());
        }

        self.sink.send_control(&ControlMessage::FileComplete {
            filename: metadata.filename.clone(),
        })?;
        tracing::debug!("Queued {} ({} bytes)", metadata.filename, state.offset);

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::protocol::TransferMetadata;
    use crate::transfer::source::{MemorySource, ReaderSource};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum Frame {
        Control(ControlMessage),
        Chunk(usize),
    }

    #[derive(Default)]
    struct RecordingSink {
        connected: bool,
        target: Option<String>,
        frames: Mutex<Vec<Frame>>,
    }

    impl RecordingSink {
        fn ready_sink() -> Self {
            Self {
                connected: true,
                target: Some("peer".to_string()),
                frames: Mutex::new(Vec::new()),
            }
        }

        fn chunk_sizes(&self) -> Vec<usize> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .filter_map(|f| match f {
                    Frame::Chunk(n) => Some(*n),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameSink for RecordingSink {
        fn ready(&self) -> Result<()> {
            if !self.connected {
                return Err(TransferError::NotConnected);
            }
            if self.target.is_none() {
                return Err(TransferError::NoTarget);
            }
            Ok(())
        }

        fn send_control(&self, message: &ControlMessage) -> Result<()> {
            self.frames
                .lock()
                .unwrap()
                .push(Frame::Control(message.clone()));
            Ok(())
        }

        fn send_chunk(&self, chunk: Bytes) -> Result<()> {
            self.frames.lock().unwrap().push(Frame::Chunk(chunk.len()));
            Ok(())
        }
    }

    /// Yields one good slice, then fails.
    struct FailingSource {
        metadata: TransferMetadata,
        served: bool,
    }

    #[async_trait]
    impl ByteSource for FailingSource {
        fn metadata(&self) -> &TransferMetadata {
            &self.metadata
        }

        async fn read_slice(&mut self, max: usize) -> io::Result<Bytes> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::Other, "disk went away"));
            }
            self.served = true;
            Ok(Bytes::from(vec![0u8; max]))
        }
    }

    #[tokio::test]
    async fn test_150k_file_frames_and_progress() {
        let sink = RecordingSink::ready_sink();
        let mut source = MemorySource::new("big.bin", "", Bytes::from(vec![7u8; 153600]));
        let mut progress = Vec::new();

        let state = Sender::new(&sink)
            .send_file(&mut source, |p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(state.offset, 153600);
        assert_eq!(sink.chunk_sizes(), vec![65536, 65536, 22528]);
        assert_eq!(progress, vec![43, 85, 100]);

        let frames = sink.frames.lock().unwrap();
        assert!(matches!(
            frames.first(),
            Some(Frame::Control(ControlMessage::FileInfo(meta))) if meta.size == 153600
        ));
        assert_eq!(
            frames.last(),
            Some(&Frame::Control(ControlMessage::FileComplete {
                filename: "big.bin".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_progress_for_150000_bytes() {
        let sink = RecordingSink::ready_sink();
        let mut source = MemorySource::new("f", "", Bytes::from(vec![0u8; 150000]));
        let mut progress = Vec::new();

        Sender::new(&sink)
            .send_file(&mut source, |p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(progress, vec![44, 87, 100]);
    }

    #[tokio::test]
    async fn test_no_target_fails_before_any_frame() {
        let sink = RecordingSink {
            connected: true,
            target: None,
            frames: Mutex::new(Vec::new()),
        };
        let mut source = MemorySource::new("a", "", Bytes::from_static(b"hello"));

        let err = Sender::new(&sink)
            .send_file(&mut source, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::NoTarget));
        assert!(sink.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_connected_fails_before_any_frame() {
        let sink = RecordingSink::default();
        let mut source = MemorySource::new("a", "", Bytes::from_static(b"hello"));

        let err = Sender::new(&sink)
            .send_file(&mut source, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::NotConnected));
        assert!(sink.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_error_aborts_without_complete() {
        let sink = RecordingSink::ready_sink();
        let mut source = FailingSource {
            metadata: TransferMetadata {
                filename: "flaky.bin".to_string(),
                size: 3 * CHUNK_SIZE as u64,
                content_type: String::new(),
            },
            served: false,
        };

        let err = Sender::new(&sink)
            .send_file(&mut source, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Read(_)));
        let frames = sink.frames.lock().unwrap();
        // FILE_INFO + one chunk, no FILE_COMPLETE
        assert_eq!(frames.len(), 2);
        assert!(!frames
            .iter()
            .any(|f| matches!(f, Frame::Control(ControlMessage::FileComplete { .. }))));
    }

    #[tokio::test]
    async fn test_short_source_is_read_error() {
        let sink = RecordingSink::ready_sink();
        let mut source = short_source();

        let err = Sender::new(&sink)
            .send_file(&mut source, |_| {})
            .await
            .unwrap_err();

        match err {
            TransferError::Read(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected Read error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_file_sends_no_chunks() {
        let sink = RecordingSink::ready_sink();
        let mut source = MemorySource::new("empty.txt", "text/plain", Bytes::new());
        let mut progress = Vec::new();

        Sender::new(&sink)
            .send_file(&mut source, |p| progress.push(p))
            .await
            .unwrap();

        assert!(sink.chunk_sizes().is_empty());
        assert_eq!(progress, vec![100]);
        assert_eq!(sink.frames.lock().unwrap().len(), 2);
    }

    /// Declares more bytes than it holds.
    fn short_source() -> ReaderSource<&'static [u8]> {
        ReaderSource::new(
            TransferMetadata {
                filename: "short.bin".to_string(),
                size: 10,
                content_type: String::new(),
            },
            b"abc".as_slice(),
        )
    }
}
