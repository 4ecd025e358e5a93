//! Connectivity tracking and replay of the offline queue.
//!
//! [`NetworkMonitor`] publishes the current [`NetworkState`] on a watch
//! channel. [`SyncCoordinator::run`] listens to it and, each time the state
//! goes from offline to online, replays queued actions and prunes the cache.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    offline::{OfflineStorage, PendingAction},
    provider::truncate_body,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn is_online(&self) -> bool {
        matches!(self, NetworkState::Online)
    }
}

#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn check(&self) -> NetworkState;
}

/// Considers the network up when `url` answers at all, whatever the status.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    url: String,
    http: Client,
}

impl ConnectivityProbe {
    pub fn new(url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();
        Self { url: url.into(), http }
    }
}

#[async_trait]
impl Connectivity for ConnectivityProbe {
    async fn check(&self) -> NetworkState {
        match self.http.head(&self.url).send().await {
            Ok(_) => NetworkState::Online,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "connectivity probe failed");
                NetworkState::Offline
            }
        }
    }
}

#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkState>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> NetworkState {
        *self.tx.borrow()
    }

    /// Publish `state`. Returns true when it differs from the previous state.
    pub fn set(&self, state: NetworkState) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::info!(?state, "network state changed");
        }
        changed
    }

    /// Poll `probe` every `interval` until `shutdown` resolves.
    pub async fn run<C: Connectivity + ?Sized>(
        &self,
        probe: &C,
        interval: Duration,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        loop {
            let state = probe.check().await;
            self.set(state);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => break,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    /// The network went away; stop replaying and keep the rest for later.
    #[error("network unavailable: {0}")]
    Offline(String),
    /// The endpoint refused this action.
    #[error("action rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn apply(&self, action: &PendingAction) -> Result<(), ReplayError>;
}

/// Posts each queued action as JSON to `{endpoint}/actions`.
#[derive(Debug, Clone)]
pub struct HttpSyncClient {
    endpoint: String,
    http: Client,
}

impl HttpSyncClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), http: crate::provider::http_client() }
    }
}

#[async_trait]
impl ActionHandler for HttpSyncClient {
    async fn apply(&self, action: &PendingAction) -> Result<(), ReplayError> {
        let url = format!("{}/actions", self.endpoint.trim_end_matches('/'));
        let res = self.http.post(&url).json(action).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ReplayError::Offline(e.to_string())
            } else {
                ReplayError::Rejected(e.to_string())
            }
        })?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        let body = res.text().await.unwrap_or_default();
        Err(ReplayError::Rejected(format!("status {}: {}", status, truncate_body(&body))))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub sent: usize,
    pub failed: usize,
    pub dropped: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub replay: ReplaySummary,
    pub pruned: usize,
    pub synced_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SyncCoordinator {
    offline: OfflineStorage,
    handler: Option<Arc<dyn ActionHandler>>,
    max_attempts: u32,
}

impl SyncCoordinator {
    pub fn new(offline: OfflineStorage, handler: Arc<dyn ActionHandler>, max_attempts: u32) -> Self {
        Self { offline, handler: Some(handler), max_attempts: max_attempts.max(1) }
    }

    /// A coordinator with nowhere to send actions: syncing only prunes the
    /// cache and the queue is left untouched.
    pub fn local(offline: OfflineStorage) -> Self {
        Self { offline, handler: None, max_attempts: 1 }
    }

    /// Replay queued actions oldest first.
    pub async fn replay_queue(&self) -> Result<ReplaySummary> {
        let pending = self.offline.pending_actions().await?;
        let mut summary = ReplaySummary::default();
        let Some(handler) = &self.handler else {
            summary.remaining = pending.len();
            return Ok(summary);
        };

        for (idx, action) in pending.iter().enumerate() {
            if action.attempts >= self.max_attempts {
                tracing::warn!(id = %action.id, action = %action.action.describe(), "dropping action after too many attempts");
                self.offline.remove_action(action.id).await?;
                summary.dropped += 1;
                continue;
            }

            match handler.apply(action).await {
                Ok(()) => {
                    self.offline.remove_action(action.id).await?;
                    summary.sent += 1;
                }
                Err(ReplayError::Offline(msg)) => {
                    tracing::info!(error = %msg, "network lost during replay, keeping the rest queued");
                    summary.remaining = pending.len() - idx;
                    return Ok(summary);
                }
                Err(ReplayError::Rejected(msg)) => {
                    let attempts = self.offline.record_failed_attempt(action.id, &msg).await?;
                    if attempts.is_some_and(|a| a >= self.max_attempts) {
                        tracing::warn!(id = %action.id, error = %msg, "dropping action after too many attempts");
                        self.offline.remove_action(action.id).await?;
                        summary.dropped += 1;
                    } else {
                        summary.failed += 1;
                        summary.remaining += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Replay the queue, sweep the cache and stamp the last sync time.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let replay = self.replay_queue().await?;
        let pruned = self.offline.clear_expired().await?;
        let synced_at = Utc::now();
        self.offline.set_last_sync(synced_at).await?;

        tracing::info!(sent = replay.sent, failed = replay.failed, dropped = replay.dropped, pruned, "sync finished");
        Ok(SyncReport { replay, pruned, synced_at })
    }

    /// Sync whenever the network comes back, until `shutdown` resolves.
    pub async fn run(&self, mut network: watch::Receiver<NetworkState>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut previous = *network.borrow_and_update();
        if previous.is_online() {
            self.sync_logged().await;
        }

        loop {
            tokio::select! {
                changed = network.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *network.borrow_and_update();
                    if state.is_online() && !previous.is_online() {
                        self.sync_logged().await;
                    }
                    previous = state;
                }
                _ = &mut shutdown => break,
            }
        }
    }

    async fn sync_logged(&self) {
        if let Err(e) = self.sync_now().await {
            tracing::warn!(error = %e, "sync failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{offline::OfflineAction, store::MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts actions until `fail_from`, then answers with `failure`.
    struct ScriptedHandler {
        calls: AtomicUsize,
        fail_from: usize,
        offline: bool,
    }

    #[async_trait]
    impl ActionHandler for ScriptedHandler {
        async fn apply(&self, _action: &PendingAction) -> Result<(), ReplayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_from {
                Ok(())
            } else if self.offline {
                Err(ReplayError::Offline("down".into()))
            } else {
                Err(ReplayError::Rejected("nope".into()))
            }
        }
    }

    fn handler(fail_from: usize, offline: bool) -> Arc<ScriptedHandler> {
        Arc::new(ScriptedHandler { calls: AtomicUsize::new(0), fail_from, offline })
    }

    async fn queue(offline: &OfflineStorage, n: usize) {
        for i in 0..n {
            offline
                .queue_action(OfflineAction::UpdateSetting {
                    key: format!("k{i}"),
                    value: serde_json::json!(i),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn replay_sends_everything_when_accepted() {
        let offline = OfflineStorage::new(Arc::new(MemoryStore::new()));
        queue(&offline, 3).await;

        let sync = SyncCoordinator::new(offline.clone(), handler(usize::MAX, false), 3);
        let summary = sync.replay_queue().await.unwrap();

        assert_eq!(summary, ReplaySummary { sent: 3, ..Default::default() });
        assert!(offline.pending_actions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_stops_when_network_drops() {
        let offline = OfflineStorage::new(Arc::new(MemoryStore::new()));
        queue(&offline, 4).await;

        let sync = SyncCoordinator::new(offline.clone(), handler(1, true), 3);
        let summary = sync.replay_queue().await.unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.remaining, 3);
        let left = offline.pending_actions().await.unwrap();
        assert_eq!(left.len(), 3);
        assert!(left.iter().all(|a| a.attempts == 0));
    }

    #[tokio::test]
    async fn rejected_actions_are_dropped_after_max_attempts() {
        let offline = OfflineStorage::new(Arc::new(MemoryStore::new()));
        queue(&offline, 1).await;

        let sync = SyncCoordinator::new(offline.clone(), handler(0, false), 2);

        let first = sync.replay_queue().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(offline.pending_actions().await.unwrap()[0].attempts, 1);

        let second = sync.replay_queue().await.unwrap();
        assert_eq!(second.dropped, 1);
        assert!(offline.pending_actions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_now_stamps_last_sync() {
        let offline = OfflineStorage::new(Arc::new(MemoryStore::new()));
        let sync = SyncCoordinator::new(offline.clone(), handler(usize::MAX, false), 3);

        let report = sync.sync_now().await.unwrap();
        assert_eq!(offline.last_sync().await.unwrap(), Some(report.synced_at));
    }

    #[test]
    fn monitor_reports_only_changes() {
        let monitor = NetworkMonitor::new(NetworkState::Online);
        assert!(!monitor.set(NetworkState::Online));
        assert!(monitor.set(NetworkState::Offline));
        assert_eq!(monitor.current(), NetworkState::Offline);
    }

    #[tokio::test]
    async fn coordinator_replays_on_reconnect() {
        let offline = OfflineStorage::new(Arc::new(MemoryStore::new()));
        let monitor = NetworkMonitor::new(NetworkState::Offline);
        let sync = SyncCoordinator::new(offline.clone(), handler(usize::MAX, false), 3);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let rx = monitor.subscribe();
        let task = tokio::spawn(async move {
            sync.run(rx, async {
                let _ = stop_rx.await;
            })
            .await;
        });

        queue(&offline, 2).await;
        monitor.set(NetworkState::Online);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if offline.pending_actions().await.unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "queue should drain after reconnect");

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn local_coordinator_prunes_cache_on_reconnect() {
        let offline = OfflineStorage::new(Arc::new(MemoryStore::new())).with_stale_grace(chrono::Duration::zero());
        offline
            .cache_weather_with_ttl("current:openweather:45.76,4.84", &1, chrono::Duration::seconds(-1))
            .await
            .unwrap();
        queue(&offline, 1).await;

        let monitor = NetworkMonitor::new(NetworkState::Offline);
        let sync = SyncCoordinator::local(offline.clone());
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let rx = monitor.subscribe();
        let task = tokio::spawn(async move {
            sync.run(rx, async {
                let _ = stop_rx.await;
            })
            .await;
        });

        monitor.set(NetworkState::Online);

        let pruned = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if offline.cache_stats().await.unwrap().entries == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(pruned.is_ok(), "expired entries should be pruned after reconnect");
        assert_eq!(offline.pending_actions().await.unwrap().len(), 1);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    struct FixedProbe(NetworkState);

    #[async_trait]
    impl Connectivity for FixedProbe {
        async fn check(&self) -> NetworkState {
            self.0
        }
    }

    #[tokio::test]
    async fn monitor_run_publishes_probe_result() {
        let monitor = NetworkMonitor::new(NetworkState::Online);
        let mut rx = monitor.subscribe();

        monitor
            .run(&FixedProbe(NetworkState::Offline), Duration::from_millis(5), async {})
            .await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), NetworkState::Offline);
    }
}
