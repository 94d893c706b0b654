//! Shared helpers for the graphcast benchmarks.

use async_trait::async_trait;
use bytes::Bytes;
use graphcast_core::{ConnectionSink, Hub, MemberHandle, SinkError};
use tokio::runtime::Runtime;

/// A sink that accepts and discards every payload.
pub struct DiscardSink;

#[async_trait]
impl ConnectionSink for DiscardSink {
    async fn send(&mut self, _payload: Bytes) -> Result<(), SinkError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Multi-threaded runtime for delivery tasks.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// Join `count` discarding members to `channel`.
///
/// # Panics
///
/// Panics if called outside a runtime context.
pub fn join_discarding(hub: &Hub, channel: &str, count: usize) -> Vec<MemberHandle> {
    (0..count)
        .map(|_| hub.join(channel, DiscardSink).expect("join failed"))
        .collect()
}
