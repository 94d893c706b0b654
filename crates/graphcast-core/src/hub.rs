//! The broadcast hub.
//!
//! The hub maps channel ids to channels and is the only entry point for
//! joining, leaving and publishing.
//!
//! ## Locking
//!
//! The channel map is a [`DashMap`]; creation goes through its entry API so a
//! channel is created at most once per id. Each channel guards its members
//! with its own lock. Locks are always taken channel first, map second, and a
//! map guard is never held while locking a channel.
//!
//! An empty channel is unlinked while its member lock is held: it is flagged
//! as unlinked and removed from the map in one critical section. A join that
//! resolved the old instance sees the flag once it gets the lock and retries
//! against the map, where it either finds a live channel or creates one.

use crate::channel::{Channel, ChannelId, Members};
use crate::member::{Delivery, MemberHandle, MemberId, MemberShared, MemberState};
use crate::outbox::OverflowPolicy;
use crate::sink::ConnectionSink;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Hub errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// Invalid channel id.
    #[error("Invalid channel id: {0}")]
    InvalidChannelId(&'static str),

    /// Maximum number of channels reached.
    #[error("Maximum channels reached")]
    ChannelLimitReached,

    /// No Tokio runtime to run the member's delivery loop on.
    #[error("No Tokio runtime available to spawn the delivery task")]
    NoRuntime,
}

/// Validate a channel id.
///
/// Any non-empty string is accepted. Ids are case-sensitive.
///
/// # Errors
///
/// Returns an error message if the id is empty.
pub fn validate_channel_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Channel id cannot be empty");
    }
    Ok(())
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbox capacity per member.
    pub queue_capacity: usize,
    /// What happens when a member's outbox is full.
    pub overflow_policy: OverflowPolicy,
    /// Upper bound for a single sink write. A write that takes longer counts
    /// as a send failure.
    pub send_timeout: Option<Duration>,
    /// Maximum number of channels.
    pub max_channels: usize,
    /// Whether to remove channels when their last member leaves.
    pub reclaim_empty_channels: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            overflow_policy: OverflowPolicy::DropOldest,
            send_timeout: Some(Duration::from_secs(10)),
            max_channels: 10_000,
            reclaim_empty_channels: true,
        }
    }
}

/// Result of a publish. Purely informational.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Members the payload was enqueued for.
    pub recipients: usize,
    /// Recipients whose oldest pending payload was dropped to make room.
    pub displaced: usize,
    /// Members disconnected because their outbox overflowed.
    pub evicted: usize,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of live channels.
    pub channel_count: usize,
    /// Number of members across all channels.
    pub member_count: usize,
}

pub(crate) struct HubInner {
    channels: DashMap<ChannelId, Arc<Channel>>,
    /// Tracks `channels.len()` so the limit can be checked under an entry lock.
    channel_count: AtomicUsize,
    /// Members across all channels. Updated under the owning channel's lock.
    member_count: AtomicUsize,
    config: HubConfig,
}

impl HubInner {
    /// Look up the channel for `id`, creating it if it does not exist.
    fn resolve(&self, id: &str) -> Result<Arc<Channel>, HubError> {
        if let Some(existing) = self.channels.get(id) {
            return Ok(Arc::clone(existing.value()));
        }

        match self.channels.entry(Arc::from(id)) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let max = self.config.max_channels;
                self.channel_count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                        (count < max).then_some(count + 1)
                    })
                    .map_err(|_| HubError::ChannelLimitReached)?;

                let channel = Arc::new(Channel::new(Arc::clone(entry.key())));
                entry.insert(Arc::clone(&channel));
                debug!(channel = %id, "Creating new channel");
                Ok(channel)
            }
        }
    }

    /// Remove `channel` from the map. Caller holds the channel's member lock.
    fn unlink(&self, channel: &Arc<Channel>, members: &mut Members) {
        members.mark_unlinked();
        let removed = self
            .channels
            .remove_if(channel.id(), |_, current| Arc::ptr_eq(current, channel));
        if removed.is_some() {
            self.channel_count.fetch_sub(1, Ordering::AcqRel);
            debug!(channel = %channel.id(), "Reclaimed empty channel");
        }
    }

    fn reclaim_if_empty(&self, channel: &Arc<Channel>, members: &mut Members) {
        if self.config.reclaim_empty_channels && members.is_empty() && !members.is_unlinked() {
            self.unlink(channel, members);
        }
    }

    /// Remove a member from its channel.
    ///
    /// Returns `true` if this call removed it.
    pub(crate) fn detach(&self, channel: &Arc<Channel>, id: MemberId) -> bool {
        let mut members = channel.members();
        if members.remove_member(id).is_none() {
            return false;
        }
        self.member_count.fetch_sub(1, Ordering::AcqRel);

        debug!(
            channel = %channel.id(),
            member = %id,
            members = members.len(),
            "Member left"
        );
        self.reclaim_if_empty(channel, &mut members);
        true
    }

    /// Move every member to `Draining` and unlink every channel.
    ///
    /// Returns the number of members disconnected.
    fn disconnect_all(&self) -> usize {
        let channels: Vec<Arc<Channel>> = self
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut disconnected = 0;
        for channel in channels {
            let mut members = channel.members();
            for member in members.drain() {
                member.advance(MemberState::Draining);
                self.member_count.fetch_sub(1, Ordering::AcqRel);
                disconnected += 1;
            }
            if !members.is_unlinked() {
                self.unlink(&channel, &mut members);
            }
        }
        disconnected
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        // Delivery loops only hold a weak reference and would otherwise wait forever.
        let disconnected = self.disconnect_all();
        if disconnected > 0 {
            debug!(members = disconnected, "Hub dropped, members disconnected");
        }
    }
}

/// The broadcast hub.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a new hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            inner: Arc::new(HubInner {
                channels: DashMap::new(),
                channel_count: AtomicUsize::new(0),
                member_count: AtomicUsize::new(0),
                config,
            }),
        }
    }

    /// Get the hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Register `sink` as a member of `channel_id`, creating the channel if
    /// needed, and start its delivery loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel id is empty, the channel limit is
    /// reached, or no runtime is available. The sink is dropped in that case.
    pub fn join<S: ConnectionSink>(
        &self,
        channel_id: &str,
        sink: S,
    ) -> Result<MemberHandle, HubError> {
        validate_channel_id(channel_id).map_err(HubError::InvalidChannelId)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HubError::NoRuntime)?;

        let config = &self.inner.config;
        let shared = Arc::new(MemberShared::new(
            config.queue_capacity,
            config.overflow_policy,
        ));

        let channel = loop {
            let channel = self.inner.resolve(channel_id)?;
            let mut members = channel.members();
            if members.is_unlinked() {
                // Reclaimed between lookup and lock.
                continue;
            }

            members.add_member(Arc::clone(&shared));
            self.inner.member_count.fetch_add(1, Ordering::AcqRel);
            shared.advance(MemberState::Active);
            debug!(
                channel = %channel_id,
                member = %shared.id(),
                members = members.len(),
                "Member joined"
            );
            drop(members);
            break channel;
        };

        let delivery = Delivery {
            shared: Arc::clone(&shared),
            channel: Arc::clone(&channel),
            hub: Arc::downgrade(&self.inner),
            sink,
            send_timeout: config.send_timeout,
        };
        runtime.spawn(delivery.run());

        Ok(MemberHandle { shared, channel })
    }

    /// Remove a member from its channel and stop its delivery loop.
    ///
    /// Idempotent. Returns `true` only for the call that removed the member.
    pub fn leave(&self, handle: &MemberHandle) -> bool {
        let removed = self.inner.detach(&handle.channel, handle.id());
        handle.shared.advance(MemberState::Draining);
        removed
    }

    /// Enqueue `payload` for every current member of `channel_id`.
    ///
    /// Publishing to an unknown or empty channel is not an error; it simply
    /// has no recipients. Never waits on a member's connection.
    pub fn publish(&self, channel_id: &str, payload: impl Into<Bytes>) -> PublishReport {
        let payload = payload.into();

        let Some(channel) = self
            .inner
            .channels
            .get(channel_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            trace!(channel = %channel_id, "Publish to channel without members");
            return PublishReport::default();
        };

        let mut members = channel.members();
        let outcome = members.broadcast(channel.id(), &payload);

        let mut evicted = 0;
        for id in outcome.overflowed {
            if let Some(member) = members.remove_member(id) {
                member.advance(MemberState::Draining);
                self.inner.member_count.fetch_sub(1, Ordering::AcqRel);
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.inner.reclaim_if_empty(&channel, &mut members);
        }
        drop(members);

        trace!(
            channel = %channel_id,
            recipients = outcome.recipients,
            displaced = outcome.displaced,
            evicted,
            "Published payload"
        );

        PublishReport {
            recipients: outcome.recipients,
            displaced: outcome.displaced,
            evicted,
        }
    }

    /// Disconnect every member and drop every channel.
    ///
    /// Delivery loops close their sinks in the background; await
    /// [`MemberHandle::closed`] to observe completion. The hub stays usable.
    pub fn shutdown(&self) {
        let disconnected = self.inner.disconnect_all();
        info!(members = disconnected, "Hub shut down");
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel_id: &str) -> bool {
        self.inner.channels.contains_key(channel_id)
    }

    /// Get the member count for a channel.
    #[must_use]
    pub fn member_count(&self, channel_id: &str) -> usize {
        self.inner
            .channels
            .get(channel_id)
            .map(|entry| Arc::clone(entry.value()))
            .map(|channel| channel.members().len())
            .unwrap_or(0)
    }

    /// Get all channel ids.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<String> {
        self.inner
            .channels
            .iter()
            .map(|entry| entry.key().to_string())
            .collect()
    }

    /// Get hub statistics.
    ///
    /// Reads counters only; never locks a channel.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            channel_count: self.inner.channel_count.load(Ordering::Acquire),
            member_count: self.inner.member_count.load(Ordering::Acquire),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
