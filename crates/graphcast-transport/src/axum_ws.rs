//! axum WebSocket adapter.

use crate::traits::{text_or_binary, WebSocketSink, WsMessage};
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitSink;

/// Connection sink over the write half of an axum WebSocket.
pub type AxumSink = WebSocketSink<SplitSink<WebSocket, Message>, Message>;

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
