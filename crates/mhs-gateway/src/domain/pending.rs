//! Replies awaited from the MHS.
//!
//! An outbound request is stamped with a conversation id and the caller parks
//! on a oneshot keyed by that id. The inbound subscriber hands any envelope
//! whose `ConversationId` is parked here straight to the caller instead of
//! dispatching it.
//!
//! ```text
//! MhsClient ──register(id)──▶ store ◀──complete(id, body)── Subscriber
//!     │                         │
//!     └────── await rx ◀────────┘   (or expiry / cancel)
//! ```
//!
//! Ids that expired or were abandoned are remembered for one more expiry
//! period so a late reply can be recognised and dropped.

use crate::domain::correlation::CorrelationId;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Inbound envelope matched to a waiting caller
#[derive(Debug)]
pub struct MhsReply {
    pub correlation_id: CorrelationId,
    /// Envelope as delivered by the broker
    pub body: String,
    /// Time from registration to arrival
    pub elapsed: Duration,
}

struct Waiter {
    reply_to: oneshot::Sender<MhsReply>,
    registered_at: Instant,
    interaction_id: String,
    expires_after: Duration,
}

impl Waiter {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.registered_at) > self.expires_after
    }
}

/// Running counters for the store
#[derive(Debug, Default)]
pub struct PendingStats {
    registered: AtomicU64,
    replied: AtomicU64,
    expired: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub registered: u64,
    pub replied: u64,
    pub expired: u64,
    /// Cancelled by the caller, or the caller stopped listening
    pub abandoned: u64,
}

impl PendingStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Conversation id → caller waiting for the MHS reply.
pub struct PendingRequestStore {
    waiters: DashMap<CorrelationId, Waiter>,
    /// Ids that stopped waiting without a reply, and when
    finished: DashMap<CorrelationId, Instant>,
    default_expiry: Duration,
    stats: PendingStats,
}

impl PendingRequestStore {
    pub fn new(default_expiry: Duration) -> Self {
        Self {
            waiters: DashMap::new(),
            finished: DashMap::new(),
            default_expiry,
            stats: PendingStats::default(),
        }
    }

    /// Park a caller on `correlation_id`.
    ///
    /// Registering an id twice replaces the earlier waiter; its receiver
    /// resolves with an error.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        interaction_id: &str,
        expires_after: Option<Duration>,
    ) -> oneshot::Receiver<MhsReply> {
        let (reply_to, rx) = oneshot::channel();
        let waiter = Waiter {
            reply_to,
            registered_at: Instant::now(),
            interaction_id: interaction_id.to_string(),
            expires_after: expires_after.unwrap_or(self.default_expiry),
        };

        if self.waiters.insert(correlation_id, waiter).is_some() {
            warn!(correlation_id = %correlation_id, "Conversation id registered twice");
        }
        PendingStats::bump(&self.stats.registered);
        debug!(correlation_id = %correlation_id, interaction_id, "Awaiting MHS reply");

        rx
    }

    /// Hand `body` to the caller parked on `correlation_id`.
    ///
    /// Returns false when nobody is waiting: the id is unknown, already
    /// expired, or the caller has gone away.
    pub fn complete(&self, correlation_id: CorrelationId, body: String) -> bool {
        let Some((_, waiter)) = self.waiters.remove(&correlation_id) else {
            warn!(
                correlation_id = %correlation_id,
                "Discarding reply for unknown or expired conversation"
            );
            return false;
        };

        let elapsed = waiter.registered_at.elapsed();
        let reply = MhsReply {
            correlation_id,
            body,
            elapsed,
        };

        if waiter.reply_to.send(reply).is_err() {
            PendingStats::bump(&self.stats.abandoned);
            self.finished.insert(correlation_id, Instant::now());
            debug!(
                correlation_id = %correlation_id,
                interaction_id = %waiter.interaction_id,
                "Caller stopped waiting before the reply arrived"
            );
            return false;
        }

        PendingStats::bump(&self.stats.replied);
        debug!(
            correlation_id = %correlation_id,
            interaction_id = %waiter.interaction_id,
            elapsed_ms = elapsed.as_millis(),
            "MHS reply delivered"
        );
        true
    }

    /// Drop waiters past their expiry. Their receivers resolve with an error.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.waiters.len();

        self.waiters.retain(|id, waiter| {
            if !waiter.is_expired(now) {
                return true;
            }
            warn!(
                correlation_id = %id,
                interaction_id = %waiter.interaction_id,
                expiry_ms = waiter.expires_after.as_millis(),
                "No MHS reply before expiry"
            );
            PendingStats::bump(&self.stats.expired);
            self.finished.insert(*id, now);
            false
        });
        let swept = before.saturating_sub(self.waiters.len());

        self.finished
            .retain(|_, at| now.duration_since(*at) <= self.default_expiry);

        swept
    }

    /// Stop waiting on `correlation_id`.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        let removed = self.waiters.remove(correlation_id).is_some();
        if removed {
            PendingStats::bump(&self.stats.abandoned);
            self.finished.insert(*correlation_id, Instant::now());
        }
        removed
    }

    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.waiters.contains_key(correlation_id)
    }

    /// True when `correlation_id` recently stopped waiting without a reply.
    pub fn was_abandoned(&self, correlation_id: &CorrelationId) -> bool {
        self.finished.contains_key(correlation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Cancel `correlation_id` when the returned guard is dropped, unless a
    /// reply or the sweep removed it first.
    pub fn guard(&self, correlation_id: CorrelationId) -> RegistrationGuard<'_> {
        RegistrationGuard {
            store: self,
            correlation_id,
        }
    }
}

/// Deregisters a waiter when the caller goes away, including when its
/// future is dropped mid-wait.
pub struct RegistrationGuard<'a> {
    store: &'a PendingRequestStore,
    correlation_id: CorrelationId,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        if self.store.cancel(&self.correlation_id) {
            debug!(
                correlation_id = %self.correlation_id,
                "Caller left before the MHS replied"
            );
        }
    }
}

/// Sweep expired waiters every `period`. Runs until aborted.
pub async fn cleanup_task(store: Arc<PendingRequestStore>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let swept = store.sweep_expired();
        if swept > 0 {
            info!(
                swept,
                still_pending = store.pending_count(),
                totals = ?store.stats(),
                "Swept expired MHS waiters"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDS_QUERY: &str = "QUPA_IN000008UK02";

    fn store(expiry_ms: u64) -> PendingRequestStore {
        PendingRequestStore::new(Duration::from_millis(expiry_ms))
    }

    #[tokio::test]
    async fn test_reply_reaches_waiting_caller() {
        let store = store(30_000);
        let id = CorrelationId::new();

        let rx = store.register(id, PDS_QUERY, None);
        assert!(store.is_pending(&id));

        assert!(store.complete(id, "<reply/>".into()));
        let reply = rx.await.unwrap();
        assert_eq!(reply.correlation_id, id);
        assert_eq!(reply.body, "<reply/>");

        assert_eq!(store.pending_count(), 0);
        assert_eq!(
            store.stats(),
            StatsSnapshot {
                registered: 1,
                replied: 1,
                ..StatsSnapshot::default()
            }
        );
    }

    #[tokio::test]
    async fn test_reply_for_unknown_conversation_is_discarded() {
        assert!(!store(30_000).complete(CorrelationId::new(), String::new()));
    }

    #[tokio::test]
    async fn test_reply_after_caller_left() {
        let store = store(30_000);
        let id = CorrelationId::new();

        drop(store.register(id, PDS_QUERY, None));
        assert!(!store.complete(id, String::new()));
        assert_eq!(store.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_and_late_reply_is_discarded() {
        let store = store(10);
        let first = CorrelationId::new();
        let second = CorrelationId::new();
        let rx = store.register(first, PDS_QUERY, None);
        let _rx = store.register(second, "RCMR_IN010000UK05", None);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.sweep_expired(), 2);
        assert_eq!(store.stats().expired, 2);
        assert!(rx.await.is_err());
        assert!(store.was_abandoned(&first));
        assert!(!store.complete(first, "<late/>".into()));
    }

    #[tokio::test]
    async fn test_abandoned_ids_forgotten_after_another_expiry() {
        let store = store(10);
        let id = CorrelationId::new();
        let _rx = store.register(id, PDS_QUERY, None);
        assert!(store.cancel(&id));
        assert!(store.was_abandoned(&id));
        assert!(!store.was_abandoned(&CorrelationId::new()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.sweep_expired();
        assert!(!store.was_abandoned(&id));
    }

    #[tokio::test]
    async fn test_per_request_expiry_overrides_default() {
        let store = store(30_000);
        let _short = store.register(CorrelationId::new(), PDS_QUERY, Some(Duration::from_millis(5)));
        let _long = store.register(CorrelationId::new(), PDS_QUERY, None);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let store = store(30_000);
        let id = CorrelationId::new();

        let _rx = store.register(id, PDS_QUERY, None);
        assert!(store.cancel(&id));
        assert!(!store.cancel(&id));
        assert!(!store.is_pending(&id));
        assert_eq!(store.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn test_guard_cancels_on_drop() {
        let store = store(30_000);
        let id = CorrelationId::new();

        let _rx = store.register(id, PDS_QUERY, None);
        drop(store.guard(id));

        assert!(!store.is_pending(&id));
        assert_eq!(store.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn test_guard_after_reply_is_a_no_op() {
        let store = store(30_000);
        let id = CorrelationId::new();

        let rx = store.register(id, PDS_QUERY, None);
        let guard = store.guard(id);
        assert!(store.complete(id, "<reply/>".into()));
        drop(guard);

        assert!(rx.await.is_ok());
        assert_eq!(store.stats().abandoned, 0);
    }

    #[tokio::test]
    async fn test_cleanup_task_sweeps() {
        let store = Arc::new(store(5));
        let _rx = store.register(CorrelationId::new(), PDS_QUERY, None);

        let task = tokio::spawn(cleanup_task(Arc::clone(&store), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        task.abort();

        assert_eq!(store.pending_count(), 0);
    }
}
