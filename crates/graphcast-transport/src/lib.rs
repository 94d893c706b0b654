//! # graphcast-transport
//!
//! Connection sinks for the graphcast hub.
//!
//! The hub only needs the outbound half of a peer connection. This crate
//! adapts WebSocket write halves into [`ConnectionSink`]s and provides
//! [`wait_for_close`] to watch the read half for the peer going away:
//!
//! - **axum** - `axum::extract::ws::WebSocket`, used by the server
//! - **tokio-tungstenite** - any `WebSocketStream` (feature `websocket`)
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use graphcast_transport::{wait_for_close, AxumSink};
//!
//! async fn serve(socket: WebSocket, hub: Hub, graph: String) {
//!     let (tx, rx) = socket.split();
//!     let handle = hub.join(&graph, AxumSink::new(tx))?;
//!     wait_for_close(rx).await;
//!     hub.leave(&handle);
//! }
//! ```
//!
//! [`ConnectionSink`]: graphcast_core::ConnectionSink

pub mod axum_ws;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use axum_ws::AxumSink;
pub use traits::{wait_for_close, PeerClose, WebSocketSink, WsMessage};

#[cfg(feature = "websocket")]
pub use websocket::TungsteniteSink;
