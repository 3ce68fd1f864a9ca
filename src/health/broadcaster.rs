//! Process-wide health broadcast service
//!
//! A shared map of service name to serving status, multiplexed to live
//! watchers. One coarse lock guards both the status map and the subscription
//! registry; the set of service names is small and fixed, so contention is
//! not a concern. Each subscription owns a single-slot latest-value channel:
//! a setter never blocks on a slow watcher, an unconsumed value is simply
//! replaced.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Serving status of one named service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    Unknown,
    Serving,
    NotServing,
}

impl std::fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServingStatus::Unknown => write!(f, "UNKNOWN"),
            ServingStatus::Serving => write!(f, "SERVING"),
            ServingStatus::NotServing => write!(f, "NOT_SERVING"),
        }
    }
}

#[derive(Default)]
struct Inner {
    /// Current status per service; entries live for the process lifetime
    statuses: HashMap<String, ServingStatus>,
    /// Active subscriptions per service, keyed by subscription id
    watchers: HashMap<String, HashMap<u64, watch::Sender<ServingStatus>>>,
    next_id: u64,
}

/// Shared health state with streaming watchers
#[derive(Clone, Default)]
pub struct HealthBroadcaster {
    inner: Arc<RwLock<Inner>>,
}

impl HealthBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of a service; `None` when it was never reported
    pub fn check(&self, service: &str) -> Option<ServingStatus> {
        self.inner.read().statuses.get(service).copied()
    }

    /// Update a service's status and push it to every active watcher.
    ///
    /// Delivery is latest-value: a watcher that has not consumed the previous
    /// value sees only the newest one.
    pub fn set_status(&self, service: &str, status: ServingStatus) {
        let mut inner = self.inner.write();
        inner.statuses.insert(service.to_string(), status);
        if let Some(subscriptions) = inner.watchers.get(service) {
            for slot in subscriptions.values() {
                slot.send_replace(status);
            }
        }
        debug!(service = %service, status = ?status, "health status updated");
    }

    /// Stream status changes for a service into `sink` until the token is
    /// cancelled or the sink is gone.
    ///
    /// The first delivered value is the current status, or `Unknown` when the
    /// service was never reported. Consecutive equal values are delivered
    /// once. The subscription is removed exactly once, on exit.
    pub async fn watch(
        &self,
        service: &str,
        sink: mpsc::Sender<ServingStatus>,
        cancel: CancellationToken,
    ) {
        let (id, mut slot) = self.subscribe(service);
        let mut last_sent: Option<ServingStatus> = None;

        loop {
            let current = *slot.borrow_and_update();
            if last_sent != Some(current) {
                tokio::select! {
                    sent = sink.send(current) => {
                        if sent.is_err() {
                            break;
                        }
                        last_sent = Some(current);
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            tokio::select! {
                changed = slot.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        self.unsubscribe(service, id);
        debug!(service = %service, "health watch ended");
    }

    /// Status changes for a service as a `Stream`, for wiring a subscription
    /// to a streaming response body.
    ///
    /// The stream ends when the token is cancelled; dropping the stream tears
    /// the subscription down on the next delivery attempt.
    pub fn watch_stream(
        &self,
        service: &str,
        cancel: CancellationToken,
    ) -> impl futures::Stream<Item = ServingStatus> {
        let (tx, rx) = mpsc::channel(1);
        let broadcaster = self.clone();
        let service = service.to_string();
        tokio::spawn(async move { broadcaster.watch(&service, tx, cancel).await });
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|status| (status, rx))
        })
    }

    fn subscribe(&self, service: &str) -> (u64, watch::Receiver<ServingStatus>) {
        let mut inner = self.inner.write();
        let initial = inner
            .statuses
            .get(service)
            .copied()
            .unwrap_or(ServingStatus::Unknown);
        let (tx, rx) = watch::channel(initial);
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .watchers
            .entry(service.to_string())
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    fn unsubscribe(&self, service: &str, id: u64) {
        let mut inner = self.inner.write();
        if let Some(subscriptions) = inner.watchers.get_mut(service) {
            subscriptions.remove(&id);
            if subscriptions.is_empty() {
                inner.watchers.remove(service);
            }
        }
    }

    #[cfg(test)]
    fn watcher_count(&self, service: &str) -> usize {
        self.inner
            .read()
            .watchers
            .get(service)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn check_reports_latest_status() {
        let health = HealthBroadcaster::new();
        assert_eq!(health.check("controller"), None);

        health.set_status("controller", ServingStatus::Serving);
        assert_eq!(health.check("controller"), Some(ServingStatus::Serving));

        health.set_status("controller", ServingStatus::NotServing);
        assert_eq!(health.check("controller"), Some(ServingStatus::NotServing));
    }

    #[tokio::test]
    async fn watch_delivers_unknown_for_unreported_service() {
        let health = HealthBroadcaster::new();
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let watcher = {
            let health = health.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { health.watch("controller", tx, cancel).await })
        };

        assert_eq!(rx.recv().await, Some(ServingStatus::Unknown));

        cancel.cancel();
        watcher.await.unwrap();
        assert_eq!(health.watcher_count("controller"), 0);
    }

    #[tokio::test]
    async fn watch_deduplicates_equal_statuses() {
        let health = HealthBroadcaster::new();
        health.set_status("controller", ServingStatus::Serving);

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let watcher = {
            let health = health.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { health.watch("controller", tx, cancel).await })
        };

        assert_eq!(rx.recv().await, Some(ServingStatus::Serving));

        // Two identical updates deliver at most one more message
        health.set_status("controller", ServingStatus::Serving);
        health.set_status("controller", ServingStatus::Serving);
        health.set_status("controller", ServingStatus::NotServing);

        assert_eq!(rx.recv().await, Some(ServingStatus::NotServing));

        cancel.cancel();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn setter_is_never_blocked_by_slow_watcher() {
        let health = HealthBroadcaster::new();
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let watcher = {
            let health = health.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { health.watch("controller", tx, cancel).await })
        };

        assert_eq!(rx.recv().await, Some(ServingStatus::Unknown));

        // The watcher task is not consuming; both sends return immediately
        // and the slot keeps only the latest value.
        health.set_status("controller", ServingStatus::Serving);
        health.set_status("controller", ServingStatus::NotServing);

        let mut last = None;
        while let Ok(Some(status)) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            last = Some(status);
        }
        assert_eq!(last, Some(ServingStatus::NotServing));

        cancel.cancel();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn watch_stream_delivers_updates_and_ends_on_cancel() {
        let health = HealthBroadcaster::new();
        let cancel = CancellationToken::new();
        let mut stream = Box::pin(health.watch_stream("controller", cancel.clone()));

        assert_eq!(stream.next().await, Some(ServingStatus::Unknown));

        health.set_status("controller", ServingStatus::Serving);
        assert_eq!(stream.next().await, Some(ServingStatus::Serving));

        cancel.cancel();
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("stream must end after cancellation"),
            None
        );
        assert_eq!(health.watcher_count("controller"), 0);
    }

    #[tokio::test]
    async fn dropped_watch_stream_deregisters_on_next_update() {
        let health = HealthBroadcaster::new();
        let cancel = CancellationToken::new();
        let mut stream = Box::pin(health.watch_stream("controller", cancel));

        assert_eq!(stream.next().await, Some(ServingStatus::Unknown));
        assert_eq!(health.watcher_count("controller"), 1);

        drop(stream);
        health.set_status("controller", ServingStatus::NotServing);

        for _ in 0..50 {
            if health.watcher_count("controller") == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(health.watcher_count("controller"), 0);
    }

    #[tokio::test]
    async fn dropping_the_sink_deregisters_the_watcher() {
        let health = HealthBroadcaster::new();
        health.set_status("controller", ServingStatus::Serving);

        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let watcher = {
            let health = health.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { health.watch("controller", tx, cancel).await })
        };

        assert_eq!(rx.recv().await, Some(ServingStatus::Serving));
        assert_eq!(health.watcher_count("controller"), 1);

        drop(rx);
        health.set_status("controller", ServingStatus::NotServing);

        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watch must end when the sink is dropped")
            .unwrap();
        assert_eq!(health.watcher_count("controller"), 0);
    }
}
