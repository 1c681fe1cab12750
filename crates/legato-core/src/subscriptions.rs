//! In-process real-time event fan-out (C2).
//!
//! Three independent planes — guild, action, homeserver — each a concurrent
//! map from a subscription key to the set of live streams registered under
//! it. Each plane owns exactly one lock; there is no finer-grained locking
//! within a plane, so `Broadcast` observes a linearizable view of
//! `Subscribe`/`Unsubscribe` on that plane. Cross-plane operations take no
//! combined lock and carry no ordering guarantee relative to each other.
//!
//! Removal is driven solely by cancellation of the stream's peer context: a
//! background watcher task is the only thing that ever calls `unsubscribe`.
//! `Broadcast` never removes a subscriber itself, even when its outbox is
//! full — it cancels the stream's token and lets the watcher do the one
//! cleanup. This keeps "stop delivering" and "stop tracking" the same event.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::ids::{GuildId, UserId};

/// Outbox depth before a subscriber is considered slow and disconnected.
pub const OUTBOX_CAPACITY: usize = 64;

struct DoneState {
    notify: Notify,
    fired: AtomicBool,
}

/// Returned by `subscribe`; the handler task awaits this to keep the RPC's
/// stream open. It resolves once the subscription has been torn down, by
/// whichever path caused that (peer disconnect, explicit unsubscribe, or a
/// slow-consumer disconnect).
#[derive(Clone)]
pub struct DoneSignal(Arc<DoneState>);

impl DoneSignal {
    pub async fn wait(&self) {
        loop {
            if self.0.fired.load(Ordering::Acquire) {
                return;
            }
            self.0.notify.notified().await;
        }
    }

    pub fn is_done(&self) -> bool {
        self.0.fired.load(Ordering::Acquire)
    }
}

fn fire(done: &DoneState) {
    // Idempotent: a subscription can only be closed once, however many
    // paths race to close it.
    if !done.fired.swap(true, Ordering::AcqRel) {
        done.notify.notify_waiters();
    }
}

struct Subscriber<E> {
    id: u64,
    user_id: UserId,
    outbox: mpsc::Sender<E>,
    cancel: CancellationToken,
    done: Arc<DoneState>,
}

struct Inner<K, E> {
    map: Mutex<HashMap<K, Vec<Subscriber<E>>>>,
    next_id: AtomicU64,
}

/// One fan-out plane, keyed by `K`, carrying events of type `E`. `name`
/// labels every metric this plane reports (e.g. `"guild"`, `"action"`,
/// `"homeserver"`).
pub struct FanoutPlane<K, E> {
    inner: Arc<Inner<K, E>>,
    name: &'static str,
    metrics: legato_metrics::RpcMetrics,
}

impl<K, E> Clone for FanoutPlane<K, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), name: self.name, metrics: self.metrics }
    }
}

impl<K, E> FanoutPlane<K, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    E: Clone + Send + 'static,
{
    pub fn new(name: &'static str, metrics: legato_metrics::RpcMetrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                map: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
            name,
            metrics,
        }
    }

    /// Registers a new subscriber under `key`. `peer_cancel` is the stream's
    /// own context cancellation token; when it fires, the subscription is
    /// torn down automatically by a spawned watcher.
    ///
    /// Returns the receiving half the caller forwards to its transport, and
    /// a `DoneSignal` the caller should await to know when to stop.
    pub fn subscribe(
        &self,
        key: K,
        user_id: UserId,
        peer_cancel: CancellationToken,
    ) -> (mpsc::Receiver<E>, DoneSignal) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let done = Arc::new(DoneState {
            notify: Notify::new(),
            fired: AtomicBool::new(false),
        });

        let subscriber = Subscriber {
            id,
            user_id,
            outbox: tx,
            cancel: peer_cancel.clone(),
            done: done.clone(),
        };

        let count = {
            let mut guard = self.inner.map.lock();
            let subs = guard.entry(key.clone()).or_default();
            subs.push(subscriber);
            subs.len()
        };
        self.metrics.subscribers(self.name, count as f64);

        let plane = self.clone();
        let watch_key = key;
        tokio::spawn(async move {
            peer_cancel.cancelled().await;
            plane.unsubscribe(&watch_key, id, "peer_disconnected");
        });

        (rx, DoneSignal(done))
    }

    /// Idempotent: a second call for the same `(key, id)` is a no-op. Closes
    /// the subscriber's done signal exactly once.
    fn unsubscribe(&self, key: &K, id: u64, reason: &'static str) {
        let count = {
            let mut guard = self.inner.map.lock();
            let Some(subs) = guard.get_mut(key) else { return };
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                let removed = subs.swap_remove(pos);
                fire(&removed.done);
            } else {
                return;
            }
            let count = subs.len();
            if subs.is_empty() {
                guard.remove(key);
            }
            count
        };
        self.metrics.subscriber_disconnected(self.name, reason);
        self.metrics.subscribers(self.name, count as f64);
    }

    /// Removes every subscriber belonging to `user_id` under `key`, firing
    /// their done signals and cancelling their peer tokens. Used by the
    /// guild plane when a member leaves a guild.
    pub fn unsubscribe_user(&self, key: &K, user_id: UserId) {
        let count = {
            let mut guard = self.inner.map.lock();
            let Some(subs) = guard.get_mut(key) else { return };
            let mut removed = Vec::new();
            subs.retain(|s| {
                if s.user_id == user_id {
                    removed.push(s.done.clone());
                    s.cancel.cancel();
                    false
                } else {
                    true
                }
            });
            for done in &removed {
                fire(done);
            }
            let count = subs.len();
            if subs.is_empty() {
                guard.remove(key);
            }
            for _ in &removed {
                self.metrics.subscriber_disconnected(self.name, "member_left");
            }
            count
        };
        self.metrics.subscribers(self.name, count as f64);
    }

    /// Delivers `event` to every live subscriber under `key`. Holds the
    /// plane lock for the duration of the iteration so no subscriber added
    /// or removed mid-broadcast is seen inconsistently, but never blocks: a
    /// full outbox is treated as a slow consumer and its token is cancelled
    /// rather than waited on.
    pub fn broadcast(&self, key: &K, event: E) {
        let guard = self.inner.map.lock();
        let Some(subs) = guard.get(key) else { return };
        for sub in subs {
            if sub.outbox.try_send(event.clone()).is_err() {
                tracing::warn!(subscriber_id = sub.id, "disconnecting slow stream subscriber");
                self.metrics.subscriber_disconnected(self.name, "outbox_overflow");
                sub.cancel.cancel();
            }
        }
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner.map.lock().get(key).map_or(0, Vec::len)
    }
}

use crate::events::{ActionEvent, GuildEvent, HomeserverEvent};

/// The three real-time fan-out planes, built once at server construction and
/// shared by every handler and every live stream.
#[derive(Clone)]
pub struct SubscriptionManager {
    pub guild: FanoutPlane<GuildId, GuildEvent>,
    pub action: FanoutPlane<UserId, ActionEvent>,
    pub homeserver: FanoutPlane<UserId, HomeserverEvent>,
}

impl SubscriptionManager {
    pub fn new(metrics: legato_metrics::RpcMetrics) -> Self {
        Self {
            guild: FanoutPlane::new("guild", metrics),
            action: FanoutPlane::new("action", metrics),
            homeserver: FanoutPlane::new("homeserver", metrics),
        }
    }

    /// Tears down every one of a user's guild-plane subscriptions for
    /// `guild_id` — called when the user leaves or is removed from a guild,
    /// so their stream stops receiving that guild's events immediately
    /// rather than waiting for their own cancellation.
    pub fn unsubscribe_user_from_guild(&self, guild_id: GuildId, user_id: UserId) {
        self.guild.unsubscribe_user(&guild_id, user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HomeserverEvent;
    use crate::ids::InviteId;

    fn user(n: u64) -> UserId {
        UserId::from_raw(n)
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers_under_key() {
        let plane: FanoutPlane<UserId, HomeserverEvent> = FanoutPlane::new("test", legato_metrics::RpcMetrics::new("test"));
        let key = user(1);
        let (mut rx_a, _done_a) = plane.subscribe(key, user(10), CancellationToken::new());
        let (mut rx_b, _done_b) = plane.subscribe(key, user(11), CancellationToken::new());

        plane.broadcast(
            &key,
            HomeserverEvent::InviteRejected { invite_id: InviteId::from("abc".to_string()) },
        );

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_via_cancellation_stops_future_broadcasts() {
        let plane: FanoutPlane<UserId, HomeserverEvent> = FanoutPlane::new("test", legato_metrics::RpcMetrics::new("test"));
        let key = user(1);
        let cancel = CancellationToken::new();
        let (mut rx, done) = plane.subscribe(key, user(10), cancel.clone());

        cancel.cancel();
        done.wait().await;
        // give the watcher task a chance to run the removal
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        plane.broadcast(
            &key,
            HomeserverEvent::InviteRejected { invite_id: InviteId::from("x".to_string()) },
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(plane.subscriber_count(&key), 0);
    }

    #[tokio::test]
    async fn unsubscribe_user_fires_done_and_removes_only_that_user() {
        let plane: FanoutPlane<GuildId, GuildEvent> = FanoutPlane::new("test", legato_metrics::RpcMetrics::new("test"));
        let key = GuildId::from_raw(7);
        let (_rx_a, done_a) = plane.subscribe(key, user(1), CancellationToken::new());
        let (_rx_b, _done_b) = plane.subscribe(key, user(2), CancellationToken::new());

        plane.unsubscribe_user(&key, user(1));
        done_a.wait().await;
        assert_eq!(plane.subscriber_count(&key), 1);
    }

    #[tokio::test]
    async fn overflowing_outbox_cancels_the_slow_subscriber_without_blocking() {
        let plane: FanoutPlane<UserId, HomeserverEvent> = FanoutPlane::new("test", legato_metrics::RpcMetrics::new("test"));
        let key = user(1);
        let cancel = CancellationToken::new();
        let (_rx, done) = plane.subscribe(key, user(10), cancel.clone());

        for _ in 0..OUTBOX_CAPACITY + 1 {
            plane.broadcast(
                &key,
                HomeserverEvent::InviteRejected { invite_id: InviteId::from("x".to_string()) },
            );
        }

        assert!(cancel.is_cancelled());
        done.wait().await;
    }
}
