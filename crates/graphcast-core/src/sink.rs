//! Connection sink abstraction.
//!
//! A sink is the outbound half of a single peer connection. The hub only
//! writes to it; reading from the peer and detecting its disconnect is the
//! transport's job.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The peer connection is already closed.
    #[error("Connection closed")]
    Closed,

    /// The write did not complete in time.
    #[error("Send timed out")]
    Timeout,

    /// The transport rejected the write.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The outbound half of a peer connection.
///
/// Each member owns exactly one sink for the lifetime of its connection and
/// drives it from a single delivery task, so implementations need `Send` but
/// not `Sync`.
#[async_trait]
pub trait ConnectionSink: Send + 'static {
    /// Write one opaque payload to the peer.
    async fn send(&mut self, payload: Bytes) -> Result<(), SinkError>;

    /// Close the connection. Called once, after the last send.
    async fn close(&mut self) -> Result<(), SinkError>;
}

#[async_trait]
impl ConnectionSink for Box<dyn ConnectionSink> {
    async fn send(&mut self, payload: Bytes) -> Result<(), SinkError> {
        (**self).send(payload).await
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        (**self).close().await
    }
}

/// In-process consumers can join a channel with the sending half of an mpsc
/// channel. Dropping the receiver reads as a closed connection.
#[async_trait]
impl ConnectionSink for mpsc::Sender<Bytes> {
    async fn send(&mut self, payload: Bytes) -> Result<(), SinkError> {
        mpsc::Sender::send(self, payload)
            .await
            .map_err(|_| SinkError::Closed)
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mpsc_sink_delivers() {
        let (mut tx, mut rx) = mpsc::channel(4);
        ConnectionSink::send(&mut tx, Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn test_mpsc_sink_reports_closed_receiver() {
        let (mut tx, rx) = mpsc::channel::<Bytes>(4);
        drop(rx);
        let err = ConnectionSink::send(&mut tx, Bytes::from_static(b"hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }

    #[tokio::test]
    async fn test_boxed_sink_delegates() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut boxed: Box<dyn ConnectionSink> = Box::new(tx);
        boxed.send(Bytes::from_static(b"boxed")).await.unwrap();
        boxed.close().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"boxed"));
    }
}
