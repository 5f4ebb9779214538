//! IPC bridge between the client and the decision process.
//!
//! # Architecture
//!
//! - **protocol**: Message types (ControlMessage out, Decision back)
//! - **codec**: 2-byte length-prefixed JSON framing
//! - **transport**: Filesystem socket rendezvous and exact-byte-count I/O

pub mod codec;
pub mod protocol;
pub mod transport;

pub use codec::FormatError;
pub use protocol::{ControlMessage, Decision, MessageKind};
pub use transport::{ChannelError, IpcChannel, RendezvousListener};
