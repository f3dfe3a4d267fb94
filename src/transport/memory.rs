//! In-memory duplex transport backed by bounded futures channels.

use futures::channel::mpsc;
use futures::{Sink, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{ProtocolError, Result};
use crate::protocol::WireFrame;

/// One end of a [`duplex`] pair.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::Sender<WireFrame>,
    rx: mpsc::Receiver<WireFrame>,
}

/// Two connected ends; frames sent on one arrive on the other.
pub fn duplex(buffer: usize) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::channel(buffer);
    let (b_tx, a_rx) = mpsc::channel(buffer);
    (
        MemoryTransport { tx: a_tx, rx: a_rx },
        MemoryTransport { tx: b_tx, rx: b_rx },
    )
}

impl Stream for MemoryTransport {
    type Item = Result<WireFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<WireFrame> for MemoryTransport {
    type Error = ProtocolError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.tx
            .poll_ready(cx)
            .map_err(|_| ProtocolError::TransportClosed)
    }

    fn start_send(mut self: Pin<&mut Self>, item: WireFrame) -> Result<()> {
        self.tx
            .start_send(item)
            .map_err(|_| ProtocolError::TransportClosed)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.tx)
            .poll_flush(cx)
            .map_err(|_| ProtocolError::TransportClosed)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.tx)
            .poll_close(cx)
            .map_err(|_| ProtocolError::TransportClosed)
    }
}
