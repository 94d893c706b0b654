//! Channel membership and fan-out.
//!
//! A channel is a named set of members. Every mutation and every broadcast
//! happens under the channel's own lock, independent of other channels.

use crate::member::{MemberId, MemberShared};
use crate::outbox::{EnqueueError, Enqueued};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

/// A channel identifier.
pub type ChannelId = Arc<str>;

/// A named group of members sharing one broadcast stream.
pub(crate) struct Channel {
    id: ChannelId,
    members: Mutex<Members>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId) -> Self {
        Self {
            id,
            members: Mutex::new(Members::default()),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the membership lock.
    pub(crate) fn members(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The member set of a channel, only reachable through [`Channel::members`].
#[derive(Default)]
pub(crate) struct Members {
    members: HashMap<MemberId, Arc<MemberShared>>,
    /// Set once the channel has been removed from the hub. Nobody may join
    /// an unlinked channel.
    unlinked: bool,
}

/// Outcome of one broadcast.
#[derive(Debug, Default)]
pub(crate) struct Broadcast {
    pub(crate) recipients: usize,
    pub(crate) displaced: usize,
    pub(crate) overflowed: Vec<MemberId>,
}

impl Members {
    /// Returns `false` if the member was already present.
    pub(crate) fn add_member(&mut self, member: Arc<MemberShared>) -> bool {
        self.members.insert(member.id(), member).is_none()
    }

    pub(crate) fn remove_member(&mut self, id: MemberId) -> Option<Arc<MemberShared>> {
        self.members.remove(&id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn is_unlinked(&self) -> bool {
        self.unlinked
    }

    pub(crate) fn mark_unlinked(&mut self) {
        self.unlinked = true;
    }

    /// Remove every member.
    pub(crate) fn drain(&mut self) -> Vec<Arc<MemberShared>> {
        self.members.drain().map(|(_, member)| member).collect()
    }

    /// Enqueue `payload` on every member's outbox.
    ///
    /// A failed enqueue never stops delivery to the remaining members.
    pub(crate) fn broadcast(&self, channel: &str, payload: &Bytes) -> Broadcast {
        let mut outcome = Broadcast::default();

        for (id, member) in &self.members {
            match member.enqueue(payload.clone()) {
                Ok(Enqueued::Queued) => outcome.recipients += 1,
                Ok(Enqueued::DisplacedOldest) => {
                    trace!(channel = %channel, member = %id, "Outbox full, dropped oldest payload");
                    outcome.recipients += 1;
                    outcome.displaced += 1;
                }
                Err(EnqueueError::Overflow) => {
                    warn!(channel = %channel, member = %id, "Outbox overflow");
                    outcome.overflowed.push(*id);
                }
                Err(EnqueueError::Closed) => {
                    trace!(channel = %channel, member = %id, "Skipping closed member");
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OverflowPolicy;

    fn member(capacity: usize, policy: OverflowPolicy) -> Arc<MemberShared> {
        Arc::new(MemberShared::new(capacity, policy))
    }

    #[test]
    fn test_channel_add_remove() {
        let channel = Channel::new("graph-1".into());
        assert_eq!(channel.id(), "graph-1");

        let mut members = channel.members();
        assert!(members.is_empty());

        let a = member(4, OverflowPolicy::DropOldest);
        let b = member(4, OverflowPolicy::DropOldest);
        assert!(members.add_member(Arc::clone(&a)));
        assert!(!members.add_member(Arc::clone(&a)));
        assert!(members.add_member(Arc::clone(&b)));
        assert_eq!(members.len(), 2);

        assert!(members.remove_member(a.id()).is_some());
        assert!(members.remove_member(a.id()).is_none());
        assert_eq!(members.len(), 1);
        assert!(!members.is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_member() {
        let channel = Channel::new("graph-1".into());
        let mut members = channel.members();
        for _ in 0..5 {
            members.add_member(member(4, OverflowPolicy::DropOldest));
        }

        let outcome = members.broadcast(channel.id(), &Bytes::from_static(b"tx"));
        assert_eq!(outcome.recipients, 5);
        assert_eq!(outcome.displaced, 0);
        assert!(outcome.overflowed.is_empty());
    }

    #[test]
    fn test_broadcast_continues_past_failures() {
        let channel = Channel::new("graph-1".into());
        let mut members = channel.members();

        let full = member(1, OverflowPolicy::Disconnect);
        full.enqueue(Bytes::from_static(b"backlog")).unwrap();
        let lossy = member(1, OverflowPolicy::DropOldest);
        lossy.enqueue(Bytes::from_static(b"backlog")).unwrap();
        let healthy = member(4, OverflowPolicy::Disconnect);

        members.add_member(Arc::clone(&full));
        members.add_member(Arc::clone(&lossy));
        members.add_member(Arc::clone(&healthy));

        let outcome = members.broadcast(channel.id(), &Bytes::from_static(b"tx"));
        assert_eq!(outcome.recipients, 2);
        assert_eq!(outcome.displaced, 1);
        assert_eq!(outcome.overflowed, vec![full.id()]);
    }

    #[test]
    fn test_drain_empties_channel() {
        let channel = Channel::new("graph-1".into());
        let mut members = channel.members();
        members.add_member(member(4, OverflowPolicy::DropOldest));
        members.add_member(member(4, OverflowPolicy::DropOldest));

        assert_eq!(members.drain().len(), 2);
        assert!(members.is_empty());
        assert!(!members.is_unlinked());
        members.mark_unlinked();
        assert!(members.is_unlinked());
    }
}
