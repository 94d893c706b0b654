//! # graphcast-core
//!
//! Channel membership and fan-out for the graphcast broadcast hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - Registry of channels, entry point for join, leave and publish
//! - **Channel** - Named set of members sharing one broadcast stream
//! - **Member** - One connection's registration plus its delivery loop
//! - **ConnectionSink** - The outbound half of a peer connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  join   ┌─────────────┐        ┌─────────────┐
//! │  Transport  │────────▶│     Hub     │───────▶│   Channel   │
//! └─────────────┘         └─────────────┘        └─────────────┘
//!        ▲                       ▲                      │ enqueue
//!        │ send                  │ publish              ▼
//! ┌─────────────┐         ┌─────────────┐        ┌─────────────┐
//! │    Sink     │◀────────│  Delivery   │◀───────│   Outbox    │
//! └─────────────┘         └─────────────┘        └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use graphcast_core::Hub;
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> Result<(), graphcast_core::HubError> {
//! let hub = Hub::new();
//! let (tx, mut rx) = mpsc::channel::<bytes::Bytes>(16);
//!
//! let handle = hub.join("graph-1", tx)?;
//! hub.publish("graph-1", "hello");
//! assert_eq!(rx.recv().await.as_deref(), Some(&b"hello"[..]));
//!
//! hub.leave(&handle);
//! # Ok(())
//! # }
//! ```

mod channel;
pub mod hub;
pub mod member;
mod outbox;
pub mod sink;

pub use hub::{validate_channel_id, Hub, HubConfig, HubError, HubStats, PublishReport};
pub use member::{MemberHandle, MemberId, MemberState};
pub use outbox::OverflowPolicy;
pub use sink::{ConnectionSink, SinkError};
