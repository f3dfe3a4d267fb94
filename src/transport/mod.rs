//! # Transport Layer
//!
//! The session consumes any duplex channel of [`WireFrame`]s: a `Stream` of
//! inbound frames paired with a `Sink` for outbound ones. Websocket clients
//! plug in by adapting their message type to [`WireFrame`].
//!
//! [`memory::duplex`] gives an in-process pair for tests and embedders.

use futures::{Sink, Stream};

use crate::error::{ProtocolError, Result};
use crate::protocol::WireFrame;

pub mod memory;

pub use memory::{duplex, MemoryTransport};

/// A duplex frame channel.
///
/// Stream end means the peer closed the connection.
pub trait Transport:
    Stream<Item = Result<WireFrame>> + Sink<WireFrame, Error = ProtocolError> + Unpin + Send
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<WireFrame>> + Sink<WireFrame, Error = ProtocolError> + Unpin + Send
{
}
