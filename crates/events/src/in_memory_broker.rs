//! In-memory notification broker for tests/dev and single-process deployments.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use strata_core::{ChannelId, Offset};

use crate::notification::{
    BrokerError, ChannelInbox, NotificationBroker, NotificationChannel, ProjectionKey,
};

/// Default number of channels a single subject may hold open.
pub const DEFAULT_CHANNELS_PER_SUBJECT: usize = 1000;

#[derive(Debug)]
struct ChannelEntry {
    subject: String,
    inbox: Arc<ChannelInbox>,
    keys: HashSet<ProjectionKey>,
}

#[derive(Debug, Default)]
struct BrokerState {
    channels: HashMap<ChannelId, ChannelEntry>,
    subscribers: HashMap<ProjectionKey, HashSet<ChannelId>>,
}

impl BrokerState {
    fn remove_channel(&mut self, id: &ChannelId) {
        let Some(entry) = self.channels.remove(id) else {
            return;
        };
        entry.inbox.close();
        for key in entry.keys {
            if let Some(ids) = self.subscribers.get_mut(&key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.subscribers.remove(&key);
                }
            }
        }
    }
}

/// In-process broker.
///
/// - No IO
/// - Updates coalesced per key and channel
/// - Expired channels are dropped lazily on the next update that reaches them
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    channels_per_subject: usize,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels_per_subject(mut self, limit: usize) -> Self {
        self.channels_per_subject = limit;
        self
    }

    /// Number of open channels (all subjects).
    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            channels_per_subject: DEFAULT_CHANNELS_PER_SUBJECT,
        }
    }
}

impl NotificationBroker for InMemoryBroker {
    fn new_channel(&self, subject: &str, ttl: Duration) -> Result<NotificationChannel, BrokerError> {
        let mut state = self.lock();

        let open = state
            .channels
            .values()
            .filter(|entry| entry.subject == subject)
            .count();
        if open >= self.channels_per_subject {
            return Err(BrokerError::QuotaExceeded {
                subject: subject.to_string(),
                limit: self.channels_per_subject,
            });
        }

        let id = ChannelId::new();
        let inbox = Arc::new(ChannelInbox::new(ttl));
        state.channels.insert(
            id,
            ChannelEntry {
                subject: subject.to_string(),
                inbox: inbox.clone(),
                keys: HashSet::new(),
            },
        );

        let weak: Weak<Mutex<BrokerState>> = Arc::downgrade(&self.state);
        Ok(NotificationChannel::new(id, inbox, move || {
            if let Some(state) = weak.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove_channel(&id);
            }
        }))
    }

    fn subscribe(&self, channel: ChannelId, key: ProjectionKey) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(BrokerError::ChannelNotFound(channel))?;
        entry.keys.insert(key.clone());
        state.subscribers.entry(key).or_default().insert(channel);
        Ok(())
    }

    fn unsubscribe(&self, channel: ChannelId, key: &ProjectionKey) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let entry = state
            .channels
            .get_mut(&channel)
            .ok_or(BrokerError::ChannelNotFound(channel))?;
        entry.keys.remove(key);
        if let Some(ids) = state.subscribers.get_mut(key) {
            ids.remove(&channel);
            if ids.is_empty() {
                state.subscribers.remove(key);
            }
        }
        Ok(())
    }

    fn update(&self, key: ProjectionKey, offset: Offset) {
        let mut state = self.lock();
        let Some(ids) = state.subscribers.get(&key) else {
            return;
        };

        let mut expired = Vec::new();
        for id in ids {
            match state.channels.get(id) {
                Some(entry) if !entry.inbox.is_expired() => entry.inbox.push(key.clone(), offset),
                _ => expired.push(*id),
            }
        }
        for id in expired {
            tracing::debug!(channel = %id, "dropping expired notification channel");
            state.remove_channel(&id);
        }
    }
}
