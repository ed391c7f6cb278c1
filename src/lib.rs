//! relaydrop: send a file to a peer through a WebSocket relay.
//!
//! Peers are addressed by the connection id they register with the relay.
//! See [`transfer`] for the wire protocol and client state machine and
//! [`server`] for the relay itself.

pub mod config;
pub mod download;
pub mod error;
pub mod server;
pub mod transfer;
pub mod transport;

pub use error::{Result, TransferError};
pub use transfer::{Channel, CompletedFile, ReceiveEvent, Session};
