use std::io;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Relay channel is not connected")]
    NotConnected,

    #[error("No target connection id set")]
    NoTarget,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Relay connection closed while sending")]
    ConnectionClosed,

    #[error("Failed to read source file: {0}")]
    Read(#[source] io::Error),

    #[error("A file transfer is already in progress on this session")]
    Busy,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransferError {
    /// Whether the error came from the underlying relay connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::WebSocket(_) | Self::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
