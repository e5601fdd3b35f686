//! rmux: the wire protocol and stream-multiplexing layer of a reactive
//! request/response RPC protocol over a single bidirectional byte stream.
//!
//! Many independent interaction streams (request-response, request-stream,
//! fire-and-forget, channel) share one connection, each identified by a
//! 31-bit stream id with its own requestN flow-control credit and
//! lifecycle. Connection-level frames (SETUP, KEEPALIVE, ERROR at stream 0,
//! LEASE) govern the connection itself. Resumption is representable on the
//! wire but unsupported.

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod header;
pub mod keepalive;
pub mod session;
pub mod setup;
pub mod stream;
pub mod stream_id;

pub use codec::Codec;
pub use config::{Config, ConfigBuilder};
pub use error::{Result, RmuxError};
pub use frame::{Frame, FrameBody, FrameType};
pub use session::{Session, SetupInfo};
pub use setup::{Setup, Version};
pub use stream::{
    IncomingRequest, Payload, Producer, Responder, ResponseFuture, StreamEvent, StreamReceiver,
};
pub use stream_id::StreamIdAllocator;
