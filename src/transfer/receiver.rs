//! Receiver side of a file transfer.
//!
//! Holds a single in-flight slot. FILE_INFO opens it (discarding anything
//! partial), binary frames append to it, FILE_COMPLETE concatenates the
//! chunks into a [`CompletedFile`]. Unexpected frames are dropped, never
//! surfaced as errors.

use crate::transfer::protocol::{
    progress_percent, ControlMessage, TransferMetadata, DEFAULT_CONTENT_TYPE,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Transfer currently being received
#[derive(Debug, Clone)]
pub struct InFlightTransfer {
    pub metadata: TransferMetadata,
    /// Chunks in arrival order
    pub chunks: Vec<Bytes>,
    pub bytes_received: u64,
}

impl InFlightTransfer {
    fn new(metadata: TransferMetadata) -> Self {
        Self {
            metadata,
            chunks: Vec::new(),
            bytes_received: 0,
        }
    }

    pub fn percent(&self) -> u8 {
        progress_percent(self.bytes_received, self.metadata.size)
    }

    fn assemble(self) -> CompletedFile {
        let data = if self.chunks.len() == 1 {
            self.chunks.into_iter().next().unwrap_or_default()
        } else {
            let mut buf = BytesMut::with_capacity(self.bytes_received as usize);
            for chunk in &self.chunks {
                buf.extend_from_slice(chunk);
            }
            buf.freeze()
        };

        let content_type = if self.metadata.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            self.metadata.content_type
        };

        CompletedFile {
            name: self.metadata.filename,
            byte_length: data.len() as u64,
            content_type,
            data,
            received_at: Utc::now(),
        }
    }
}

/// A fully reassembled file, kept for the rest of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedFile {
    pub name: String,
    pub byte_length: u64,
    pub content_type: String,
    pub data: Bytes,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveEvent {
    /// A new transfer began; progress resets to 0
    Started(TransferMetadata),
    Progress {
        filename: String,
        bytes_received: u64,
        size: u64,
        percent: u8,
    },
    Completed(CompletedFile),
}

/// Counters for frames the receiver handled or dropped
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveStats {
    pub files_completed: u64,
    pub bytes_completed: u64,
    /// Binary frames that arrived with no transfer in flight
    pub stray_chunks: u64,
    /// Partial transfers dropped by a new FILE_INFO or a disconnect
    pub transfers_discarded: u64,
    /// FILE_COMPLETE frames ignored because nothing had been received
    pub empty_completions: u64,
}

#[derive(Debug, Default)]
pub struct Receiver {
    in_flight: Option<InFlightTransfer>,
    completed: Vec<CompletedFile>,
    stats: ReceiveStats,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an inbound text frame. Frames that aren't control messages
    /// are ignored.
    pub fn handle_text(&mut self, frame: &Value) -> Option<ReceiveEvent> {
        match ControlMessage::from_value(frame) {
            Some(msg) => self.handle_message(msg),
            None => {
                tracing::debug!("Ignoring unrecognised text frame: {}", frame);
                None
            }
        }
    }

    pub fn handle_message(&mut self, msg: ControlMessage) -> Option<ReceiveEvent> {
        match msg {
            ControlMessage::FileInfo(metadata) => Some(self.handle_file_info(metadata)),
            ControlMessage::FileComplete { filename } => self.handle_file_complete(&filename),
            ControlMessage::Register { .. } => None,
        }
    }

    fn handle_file_info(&mut self, metadata: TransferMetadata) -> ReceiveEvent {
        if let Some(previous) = self.in_flight.take() {
            tracing::warn!(
                "Discarding incomplete transfer of {} ({} of {} bytes)",
                previous.metadata.filename,
                previous.bytes_received,
                previous.metadata.size
            );
            self.stats.transfers_discarded += 1;
        }

        tracing::info!(
            "Receiving {} ({} bytes)",
            metadata.filename,
            metadata.size
        );
        self.in_flight = Some(InFlightTransfer::new(metadata.clone()));
        ReceiveEvent::Started(metadata)
    }

    /// Append a binary frame to the in-flight transfer.
    pub fn handle_chunk(&mut self, chunk: Bytes) -> Option<ReceiveEvent> {
        let Some(transfer) = self.in_flight.as_mut() else {
            tracing::debug!(
                "Received {} byte chunk with no transfer in flight; dropping",
                chunk.len()
            );
            self.stats.stray_chunks += 1;
            return None;
        };

        transfer.bytes_received += chunk.len() as u64;
        transfer.chunks.push(chunk);

        Some(ReceiveEvent::Progress {
            filename: transfer.metadata.filename.clone(),
            bytes_received: transfer.bytes_received,
            size: transfer.metadata.size,
            percent: transfer.percent(),
        })
    }

    fn handle_file_complete(&mut self, filename: &str) -> Option<ReceiveEvent> {
        match &self.in_flight {
            None => {
                tracing::debug!("FILE_COMPLETE for {} with no transfer in flight", filename);
                return None;
            }
            Some(transfer) if transfer.chunks.is_empty() => {
                // Zero-byte transfers never produce a file
                tracing::debug!(
                    "FILE_COMPLETE for {} with no chunks received; ignoring",
                    filename
                );
                self.stats.empty_completions += 1;
                return None;
            }
            Some(transfer) if transfer.metadata.filename != filename => {
                tracing::warn!(
                    "FILE_COMPLETE names {} but {} is in flight; completing anyway",
                    filename,
                    transfer.metadata.filename
                );
            }
            Some(_) => {}
        }

        let file = self.in_flight.take()?.assemble();
        tracing::info!("Received {} ({} bytes)", file.name, file.byte_length);
        self.stats.files_completed += 1;
        self.stats.bytes_completed += file.byte_length;
        self.completed.push(file.clone());
        Some(ReceiveEvent::Completed(file))
    }

    /// Drop any partial transfer, e.g. after the connection closed.
    /// Returns true if something was discarded.
    pub fn reset(&mut self) -> bool {
        match self.in_flight.take() {
            Some(transfer) => {
                tracing::warn!(
                    "Discarding incomplete transfer of {} after disconnect",
                    transfer.metadata.filename
                );
                self.stats.transfers_discarded += 1;
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> Option<&InFlightTransfer> {
        self.in_flight.as_ref()
    }

    pub fn completed_files(&self) -> &[CompletedFile] {
        &self.completed
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }
}
