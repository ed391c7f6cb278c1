//! Client-side connection to a relay server.
//!
//! Provides the raw WebSocket halves. Protocol handling is done by
//! `transfer::Channel`.

pub mod relay;

pub use relay::{RelaySession, RelaySink, RelayStream};
