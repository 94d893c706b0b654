//! tokio-tungstenite adapter.
//!
//! Lets any `WebSocketStream`, whatever the underlying IO, join a hub
//! without going through axum.

use crate::traits::{text_or_binary, WebSocketSink, WsMessage};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Connection sink over the write half of a tokio-tungstenite stream.
pub type TungsteniteSink<S> = WebSocketSink<SplitSink<WebSocketStream<S>, Message>, Message>;

impl WsMessage for Message {
    fn from_payload(payload: Bytes) -> Self {
        match text_or_binary(payload) {
            Ok(text) => Message::Text(text),
            Err(binary) => Message::Binary(binary),
        }
    }

    fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{wait_for_close, PeerClose};
    use futures_util::{SinkExt, StreamExt};
    use graphcast_core::{ConnectionSink, Hub, MemberState, SinkError};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::Role;

    const WAIT: Duration = Duration::from_secs(2);

    async fn pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    async fn next_message(client: &mut WebSocketStream<DuplexStream>) -> Message {
        timeout(WAIT, client.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("read error")
    }

    #[tokio::test]
    async fn test_sink_sends_text_and_binary() {
        let (server, mut client) = pair().await;
        let (tx, _rx) = server.split();
        let mut sink = TungsteniteSink::new(tx);

        sink.send(Bytes::from_static(b"hello")).await.unwrap();
        sink.send(Bytes::from_static(&[0xff, 0xfe])).await.unwrap();

        assert_eq!(next_message(&mut client).await, Message::Text("hello".into()));
        assert_eq!(
            next_message(&mut client).await,
            Message::Binary(vec![0xff, 0xfe])
        );
    }

    #[tokio::test]
    async fn test_sink_close_sends_close_frame() {
        let (server, mut client) = pair().await;
        let (tx, _rx) = server.split();
        let mut sink = TungsteniteSink::new(tx);

        sink.close().await.unwrap();
        assert!(!sink.is_open());
        assert!(next_message(&mut client).await.is_close());

        // Second close is a no-op, sends after close fail.
        sink.close().await.unwrap();
        assert!(matches!(
            sink.send(Bytes::from_static(b"late")).await,
            Err(SinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_wait_for_close_on_close_frame() {
        let (server, mut client) = pair().await;
        let (_tx, rx) = server.split();

        let watcher = tokio::spawn(wait_for_close(rx));
        client.send(Message::Text("ignored".into())).await.unwrap();
        client.close(None).await.unwrap();

        let reason = timeout(WAIT, watcher).await.unwrap().unwrap();
        assert_eq!(reason, PeerClose::CloseFrame);
    }

    #[tokio::test]
    async fn test_wait_for_close_on_dropped_peer() {
        let (server, client) = pair().await;
        let (_tx, rx) = server.split();

        let watcher = tokio::spawn(wait_for_close(rx));
        drop(client);

        let reason = timeout(WAIT, watcher).await.unwrap().unwrap();
        assert_ne!(reason, PeerClose::CloseFrame);
    }

    #[tokio::test]
    async fn test_hub_delivers_over_websocket() {
        let hub = Hub::new();
        let (server, mut client) = pair().await;
        let (tx, rx) = server.split();

        let handle = hub.join("graph-1", TungsteniteSink::new(tx)).unwrap();
        assert_eq!(hub.publish("graph-1", "{\"txn\":42}").recipients, 1);
        assert_eq!(
            next_message(&mut client).await,
            Message::Text("{\"txn\":42}".into())
        );

        client.close(None).await.unwrap();
        wait_for_close(rx).await;
        hub.leave(&handle);

        timeout(WAIT, handle.closed()).await.unwrap();
        assert_eq!(handle.state(), MemberState::Closed);
        assert!(!hub.channel_exists("graph-1"));
    }
}
