//! Event channels and subscriptions.
//!
//! A channel is a named, owner-scoped publish point with a set of remote
//! subscribers. Channels are created lazily on first activation and survive
//! deactivation — the subscriber set is retained so a reactivated channel
//! picks up where it left off, and subscribers are not told about the pause.
//!
//! Subscriber sets are mutated only through the registry's add/remove
//! operations. Each channel guards its own set independently: channel churn
//! is frequent and per-owner independent, so a single registry-wide lock
//! would serialize unrelated publishers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;

use crate::error::EventError;
use crate::transport::PeerTransport;

/// A single publish point.
#[derive(Debug)]
pub struct EventChannel {
    active: AtomicBool,
    subscribers: Mutex<HashSet<String>>,
}

impl EventChannel {
    fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
            subscribers: Mutex::new(HashSet::new()),
        }
    }
}

/// Delivery outcome of one fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// Subscribers the transport accepted the payload for.
    pub sent: usize,
    /// Size of the subscriber set at publish time.
    pub total: usize,
}

/// Directory of event channels, keyed (owner, event id).
#[derive(Debug, Default)]
pub struct EventChannelRegistry {
    channels: DashMap<(String, String), EventChannel>,
}

impl EventChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a channel, creating it with an empty subscriber set if it
    /// does not exist yet. Idempotent.
    pub fn activate(&self, owner_id: &str, event_id: &str) {
        self.channels
            .entry((owner_id.to_string(), event_id.to_string()))
            .or_insert_with(|| EventChannel::new(true))
            .active
            .store(true, Ordering::SeqCst);
    }

    /// Deactivate a channel. The subscriber set is retained and subscribers
    /// are not notified. Returns false when the channel does not exist.
    pub fn deactivate(&self, owner_id: &str, event_id: &str) -> bool {
        match self.channels.get(&key(owner_id, event_id)) {
            Some(channel) => {
                channel.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Whether the channel is active. `None` when it does not exist.
    pub fn status(&self, owner_id: &str, event_id: &str) -> Option<bool> {
        self.channels
            .get(&key(owner_id, event_id))
            .map(|channel| channel.active.load(Ordering::SeqCst))
    }

    /// Add a subscriber. `None` when the channel does not exist; otherwise
    /// whether membership actually changed.
    pub fn add_subscriber(&self, owner_id: &str, event_id: &str, subscriber: &str) -> Option<bool> {
        self.channels.get(&key(owner_id, event_id)).map(|channel| {
            channel
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(subscriber.to_string())
        })
    }

    /// Remove a subscriber. `None` when the channel does not exist;
    /// otherwise whether membership actually changed.
    pub fn remove_subscriber(
        &self,
        owner_id: &str,
        event_id: &str,
        subscriber: &str,
    ) -> Option<bool> {
        self.channels.get(&key(owner_id, event_id)).map(|channel| {
            channel
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(subscriber)
        })
    }

    pub fn is_subscribed(&self, owner_id: &str, event_id: &str, subscriber: &str) -> bool {
        self.channels
            .get(&key(owner_id, event_id))
            .map(|channel| {
                channel
                    .subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .contains(subscriber)
            })
            .unwrap_or(false)
    }

    /// Snapshot of the subscriber set, unordered.
    pub fn subscribers(&self, owner_id: &str, event_id: &str) -> Vec<String> {
        self.channels
            .get(&key(owner_id, event_id))
            .map(|channel| {
                channel
                    .subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Event ids of all channels belonging to `owner_id`.
    pub fn event_ids(&self, owner_id: &str) -> Vec<String> {
        self.channels
            .iter()
            .filter(|entry| entry.key().0 == owner_id)
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    /// Deliver a payload to every subscriber of an active channel.
    ///
    /// A missing channel or an empty subscriber set is `(0, 0)` without
    /// touching the transport. Publishing on a deactivated channel is
    /// declined — deactivation would otherwise be unobservable.
    pub fn fanout(
        &self,
        owner_id: &str,
        event_id: &str,
        payload: &str,
        transport: &dyn PeerTransport,
    ) -> Result<FanoutReport, EventError> {
        let targets = match self.channels.get(&key(owner_id, event_id)) {
            None => return Ok(FanoutReport { sent: 0, total: 0 }),
            Some(channel) => {
                if !channel.active.load(Ordering::SeqCst) {
                    return Err(EventError::InactiveChannel {
                        owner: owner_id.to_string(),
                        event: event_id.to_string(),
                    });
                }
                // snapshot, so a slow transport never holds the channel lock
                channel
                    .subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
            }
        };

        if targets.is_empty() {
            return Ok(FanoutReport { sent: 0, total: 0 });
        }

        let total = targets.len();
        let mut sent = 0;
        for subscriber in &targets {
            if transport.send(subscriber, payload) {
                sent += 1;
            } else {
                tracing::debug!(
                    owner = owner_id,
                    event = event_id,
                    subscriber = subscriber.as_str(),
                    "event delivery failed"
                );
            }
        }

        tracing::debug!(owner = owner_id, event = event_id, sent, total, "event fanned out");
        Ok(FanoutReport { sent, total })
    }
}

fn key(owner_id: &str, event_id: &str) -> (String, String) {
    (owner_id.to_string(), event_id.to_string())
}

// ── Subscription (inverse view) ───────────────────────────────────────────────

/// Qualified channel key used in subscription bookkeeping.
pub fn channel_key(owner_id: &str, event_id: &str) -> String {
    format!("{owner_id}:{event_id}")
}

/// What one local subscriber listens to, as a set of qualified channel keys.
///
/// The inverse of the per-channel subscriber sets: a session consults this
/// to decide whether an arriving event was asked for at all.
#[derive(Debug)]
pub struct Subscription {
    subscriber_id: String,
    subscribed: Mutex<HashSet<String>>,
}

impl Subscription {
    pub fn new(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Record a subscription. Returns false when it already existed.
    pub fn subscribe(&self, channel: &str) -> bool {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string())
    }

    /// Drop a subscription. Returns false when there was none.
    pub fn unsubscribe(&self, channel: &str) -> bool {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel)
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(channel)
    }

    pub fn count(&self) -> usize {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
