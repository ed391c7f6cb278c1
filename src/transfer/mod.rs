//! Relayed file transfer.
//!
//! One WebSocket per client, addressed through the relay by connection id.
//! A transfer is FILE_INFO, a run of raw binary chunks, then FILE_COMPLETE.
//!
//! # Architecture
//!
//! ```text
//!  sending client                 relay                 receiving client
//! +---------------+        +----------------+        +------------------+
//! | Sender        |        |                |        | Receiver         |
//! |  ByteSource   | -----> | route by       | -----> |  in-flight slot  |
//! |  Channel      |  text  | target_id      |  text  |  Channel         |
//! |               |  bin   |                |  bin   |                  |
//! +---------------+        +----------------+        +------------------+
//! ```
//!
//! No acknowledgements flow back; chunk order is the order of the single
//! relayed stream.

pub mod channel;
pub mod observers;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod source;

pub use channel::{Channel, ConnectionId, ConnectionState};
pub use observers::{Observers, Subscription};
pub use protocol::{
    chunk_count, progress_percent, ControlMessage, TransferMetadata, CHUNK_SIZE,
    DEFAULT_CONTENT_TYPE,
};
pub use receiver::{CompletedFile, InFlightTransfer, ReceiveEvent, ReceiveStats, Receiver};
pub use sender::{FrameSink, SendState, Sender};
pub use session::Session;
pub use source::{ByteSource, FileSource, MemorySource, ReaderSource};
