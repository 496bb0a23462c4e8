//! Offset notifications (pub/sub), used to wake consumers instead of polling.
//!
//! A producer announces "projection P of app A in workspace W reached offset
//! O" through [`NotificationBroker::update`]. Consumers open a
//! [`NotificationChannel`], subscribe it to the keys they care about and wait
//! on [`NotificationChannel::next`].
//!
//! ## Delivery
//!
//! - Updates are coalesced per key: a slow watcher sees the highest offset
//!   announced since its last read, not every intermediate value.
//! - Nothing is persisted. A watcher that subscribes late must catch up from
//!   its own storage first; notifications only announce progress that has
//!   already been made durable elsewhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use strata_core::{AppName, ChannelId, Offset, PartitionId, QName, WorkspaceId};

/// Projection announced by the write path whenever a partition's log grows.
pub fn plog_updates_name() -> QName {
    QName::sys("PLogUpdates")
}

/// Upper bound applied to channel lifetimes that would overflow the clock.
const MAX_CHANNEL_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// What a notification is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectionKey {
    pub app: AppName,
    pub projection: QName,
    pub workspace: WorkspaceId,
}

impl ProjectionKey {
    pub fn new(app: AppName, projection: QName, workspace: WorkspaceId) -> Self {
        Self {
            app,
            projection,
            workspace,
        }
    }

    /// "The log of `partition` grew", keyed by the partition used as workspace.
    pub fn plog_updates(app: AppName, partition: PartitionId) -> Self {
        Self::new(app, plog_updates_name(), WorkspaceId::from(partition))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("notification channel {0} does not exist")]
    ChannelNotFound(ChannelId),

    #[error("too many notification channels for subject {subject:?} (limit {limit})")]
    QuotaExceeded { subject: String, limit: usize },
}

/// Pending updates of one channel.
///
/// Shared between the broker (producer side) and the [`NotificationChannel`]
/// handed to the watcher.
#[derive(Debug)]
pub struct ChannelInbox {
    pending: Mutex<HashMap<ProjectionKey, Offset>>,
    notify: Notify,
    closed: AtomicBool,
    expires_at: Instant,
}

impl ChannelInbox {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            expires_at: Instant::now() + ttl.min(MAX_CHANNEL_TTL),
        }
    }

    /// Record `offset` for `key`, keeping the highest value seen.
    pub fn push(&self, key: ProjectionKey, offset: Offset) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = pending.entry(key).or_insert(offset);
            if *slot < offset {
                *slot = offset;
            }
        }
        self.notify.notify_one();
    }

    /// Stop delivering; the watcher sees the end of the channel.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn pop(&self) -> Option<(ProjectionKey, Offset)> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let key = pending.keys().next().cloned()?;
        pending.remove_entry(&key)
    }
}

/// A watcher's end of a channel. Dropping it releases the channel.
pub struct NotificationChannel {
    id: ChannelId,
    inbox: Arc<ChannelInbox>,
    cleanup: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl NotificationChannel {
    pub fn new(
        id: ChannelId,
        inbox: Arc<ChannelInbox>,
        cleanup: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            inbox,
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Wait for the next update.
    ///
    /// Resolves to `None` once the channel is closed or its TTL elapsed. Not
    /// bounded otherwise; race it against a cancellation future to stop
    /// watching.
    pub async fn next(&mut self) -> Option<(ProjectionKey, Offset)> {
        loop {
            if let Some(update) = self.inbox.pop() {
                return Some(update);
            }
            if self.inbox.is_closed() || self.inbox.is_expired() {
                return None;
            }
            tokio::select! {
                _ = self.inbox.notify.notified() => {}
                _ = tokio::time::sleep_until(self.inbox.expires_at) => {}
            }
        }
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl core::fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("id", &self.id)
            .field("closed", &self.inbox.is_closed())
            .finish()
    }
}

/// Pub/sub broker for projection offsets.
///
/// ## Contract
///
/// - `new_channel` creates a watcher channel for a subject (the watcher's
///   identity, used for quotas). The returned handle is the only way to read
///   from the channel; dropping it unsubscribes everything.
/// - `subscribe` routes updates of `key` to a channel.
/// - `update` is called by producers after their progress is durable.
///
/// Implementations must be cheap to call from hot paths: `update` is invoked
/// after every command and every actualizer flush.
pub trait NotificationBroker: Send + Sync {
    fn new_channel(&self, subject: &str, ttl: Duration) -> Result<NotificationChannel, BrokerError>;

    fn subscribe(&self, channel: ChannelId, key: ProjectionKey) -> Result<(), BrokerError>;

    fn unsubscribe(&self, channel: ChannelId, key: &ProjectionKey) -> Result<(), BrokerError>;

    fn update(&self, key: ProjectionKey, offset: Offset);
}

impl<B> NotificationBroker for Arc<B>
where
    B: NotificationBroker + ?Sized,
{
    fn new_channel(&self, subject: &str, ttl: Duration) -> Result<NotificationChannel, BrokerError> {
        (**self).new_channel(subject, ttl)
    }

    fn subscribe(&self, channel: ChannelId, key: ProjectionKey) -> Result<(), BrokerError> {
        (**self).subscribe(channel, key)
    }

    fn unsubscribe(&self, channel: ChannelId, key: &ProjectionKey) -> Result<(), BrokerError> {
        (**self).unsubscribe(channel, key)
    }

    fn update(&self, key: ProjectionKey, offset: Offset) {
        (**self).update(key, offset)
    }
}
