//! Members and their delivery loop.
//!
//! A member is one connection's registration in a channel. It owns a bounded
//! outbox that publishers fill and a delivery task that drains it into the
//! connection sink.

use crate::channel::Channel;
use crate::hub::HubInner;
use crate::outbox::{EnqueueError, Enqueued, Outbox, OverflowPolicy};
use crate::sink::{ConnectionSink, SinkError};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Source of member identifiers. Identifiers are never reused.
static NEXT_MEMBER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a member, unique per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(u64);

impl MemberId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MEMBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw identifier.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// Lifecycle of a member. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemberState {
    /// Created, not yet registered in its channel.
    Joining,
    /// Registered and delivering.
    Active,
    /// Close requested or a send failed; delivery is winding down.
    Draining,
    /// Terminal. Queue discarded, sink released.
    Closed,
}

/// State shared between the channel, the delivery task and handles.
pub(crate) struct MemberShared {
    id: MemberId,
    outbox: Outbox,
    state: watch::Sender<MemberState>,
}

impl MemberShared {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let (state, _) = watch::channel(MemberState::Joining);
        Self {
            id: MemberId::next(),
            outbox: Outbox::new(capacity, policy),
            state,
        }
    }

    pub(crate) fn id(&self) -> MemberId {
        self.id
    }

    pub(crate) fn state(&self) -> MemberState {
        *self.state.borrow()
    }

    pub(crate) fn enqueue(&self, payload: Bytes) -> Result<Enqueued, EnqueueError> {
        self.outbox.push(payload)
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns `true` if the state changed.
    pub(crate) fn advance(&self, next: MemberState) -> bool {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

/// Handle returned by [`Hub::join`](crate::Hub::join), used to leave later.
#[derive(Clone)]
pub struct MemberHandle {
    pub(crate) shared: Arc<MemberShared>,
    pub(crate) channel: Arc<Channel>,
}

impl MemberHandle {
    /// Get the member's identifier.
    #[must_use]
    pub fn id(&self) -> MemberId {
        self.shared.id()
    }

    /// Get the id of the channel this member joined.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        self.channel.id()
    }

    /// Get the member's current state.
    #[must_use]
    pub fn state(&self) -> MemberState {
        self.shared.state()
    }

    /// Number of payloads waiting in the member's outbox.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.outbox.len()
    }

    /// Wait until the member reaches [`MemberState::Closed`].
    ///
    /// Resolves after the member has been removed from its channel and its
    /// sink has been closed, whichever side ended the connection.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == MemberState::Closed).await;
    }
}

impl fmt::Debug for MemberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberHandle")
            .field("id", &self.id())
            .field("channel", &self.channel_id())
            .field("state", &self.state())
            .finish()
    }
}

/// Why a delivery loop stopped.
enum Termination {
    /// Leave, eviction or hub shutdown.
    Requested,
    /// The sink failed a write.
    SendFailed(SinkError),
}

/// The per-member task moving payloads from the outbox to the sink.
pub(crate) struct Delivery<S> {
    pub(crate) shared: Arc<MemberShared>,
    pub(crate) channel: Arc<Channel>,
    pub(crate) hub: Weak<HubInner>,
    pub(crate) sink: S,
    pub(crate) send_timeout: Option<Duration>,
}

impl<S: ConnectionSink> Delivery<S> {
    pub(crate) async fn run(mut self) {
        let mut state = self.shared.state.subscribe();

        let termination = loop {
            let payload = tokio::select! {
                biased;
                _ = draining(&mut state) => break Termination::Requested,
                payload = self.shared.outbox.pop() => match payload {
                    Some(payload) => payload,
                    None => break Termination::Requested,
                },
            };

            let written = tokio::select! {
                biased;
                _ = draining(&mut state) => break Termination::Requested,
                written = self.write(payload) => written,
            };

            if let Err(e) = written {
                break Termination::SendFailed(e);
            }
        };

        self.finish(termination).await;
    }

    async fn write(&mut self, payload: Bytes) -> Result<(), SinkError> {
        trace!(
            channel = %self.channel.id(),
            member = %self.shared.id(),
            bytes = payload.len(),
            "Writing payload"
        );
        match self.send_timeout {
            Some(limit) => tokio::time::timeout(limit, self.sink.send(payload))
                .await
                .map_err(|_| SinkError::Timeout)?,
            None => self.sink.send(payload).await,
        }
    }

    async fn finish(mut self, termination: Termination) {
        let member = self.shared.id();
        self.shared.advance(MemberState::Draining);

        if let Termination::SendFailed(e) = &termination {
            warn!(
                channel = %self.channel.id(),
                member = %member,
                error = %e,
                "Send failed, removing member"
            );
        }

        if let Some(hub) = self.hub.upgrade() {
            hub.detach(&self.channel, member);
        }

        let discarded = self.shared.outbox.close();

        let closed = match self.send_timeout {
            Some(limit) => tokio::time::timeout(limit, self.sink.close())
                .await
                .unwrap_or(Err(SinkError::Timeout)),
            None => self.sink.close().await,
        };
        if let Err(e) = closed {
            debug!(
                channel = %self.channel.id(),
                member = %member,
                error = %e,
                "Sink close failed"
            );
        }
        drop(self.sink);

        self.shared.advance(MemberState::Closed);
        debug!(channel = %self.channel.id(), member = %member, discarded, "Member closed");
    }
}

async fn draining(state: &mut watch::Receiver<MemberState>) {
    let _ = state.wait_for(|s| *s >= MemberState::Draining).await;
}
