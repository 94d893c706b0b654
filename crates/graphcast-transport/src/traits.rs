//! Transport-agnostic WebSocket glue.
//!
//! Both supported WebSocket stacks split a socket into a `Sink` of outgoing
//! messages and a `Stream` of incoming ones. [`WebSocketSink`] turns the
//! former into a [`ConnectionSink`]; [`wait_for_close`] drains the latter
//! until the peer disconnects.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use graphcast_core::{ConnectionSink, SinkError};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, trace};

/// A WebSocket message type from one of the supported stacks.
pub trait WsMessage: Sized + Send + 'static {
    /// Build the outgoing message for a payload.
    ///
    /// Valid UTF-8 goes out as a text frame, anything else as binary.
    fn from_payload(payload: Bytes) -> Self;

    /// Whether this is a close frame.
    fn is_close(&self) -> bool;
}

/// Split a payload into text or binary content without copying twice.
pub(crate) fn text_or_binary(payload: Bytes) -> Result<String, Vec<u8>> {
    String::from_utf8(payload.into()).map_err(|e| e.into_bytes())
}

/// A [`ConnectionSink`] over the write half of a WebSocket.
pub struct WebSocketSink<T, M> {
    inner: T,
    is_open: bool,
    _message: PhantomData<fn(M)>,
}

impl<T, M> WebSocketSink<T, M> {
    /// Wrap the write half of a WebSocket.
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            is_open: true,
            _message: PhantomData,
        }
    }

    /// Check if the sink has not been closed yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Unwrap the write half.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T, M> ConnectionSink for WebSocketSink<T, M>
where
    T: Sink<M> + Unpin + Send + 'static,
    T::Error: fmt::Display + Send,
    M: WsMessage,
{
    async fn send(&mut self, payload: Bytes) -> Result<(), SinkError> {
        if !self.is_open {
            return Err(SinkError::Closed);
        }

        trace!(bytes = payload.len(), "Sending WebSocket frame");
        self.inner
            .send(M::from_payload(payload))
            .await
            .map_err(|e| SinkError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }

        self.inner
            .close()
            .await
            .map_err(|e| SinkError::Other(format!("Failed to close: {}", e)))
    }
}

/// How the read half of a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerClose {
    /// The peer sent a close frame.
    CloseFrame,
    /// The stream ended without a close frame.
    StreamEnded,
    /// The transport reported an error.
    Error(String),
}

/// Read and discard incoming messages until the peer goes away.
///
/// Peers never send anything the hub acts on, but the read half must be
/// polled for the stack to answer pings and notice disconnects.
pub async fn wait_for_close<St, M, E>(mut stream: St) -> PeerClose
where
    St: Stream<Item = Result<M, E>> + Unpin,
    M: WsMessage,
    E: fmt::Display,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(message) if message.is_close() => {
                debug!("Received close frame");
                return PeerClose::CloseFrame;
            }
            Ok(_) => {
                // Inbound data is ignored
            }
            Err(e) => {
                debug!(error = %e, "WebSocket read error");
                return PeerClose::Error(e.to_string());
            }
        }
    }

    debug!("WebSocket stream ended");
    PeerClose::StreamEnded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_or_binary() {
        assert_eq!(
            text_or_binary(Bytes::from_static(b"hello")),
            Ok("hello".to_string())
        );
        assert_eq!(
            text_or_binary(Bytes::from_static(&[0xff, 0x00])),
            Err(vec![0xff, 0x00])
        );
    }
}
