//! The polling-mode state machine that keeps the snapshot store fresh.
//!
//! All fetches funnel through [`ServiceInner::fetch_if_older`], which holds a
//! single async mutex: concurrent refresh requests coalesce into one network
//! call, and a caller whose deadline was already satisfied by someone else's
//! fetch skips the network entirely. The same mechanism implements flood
//! control — failures against an empty cache bump the snapshot's timestamp so
//! a persistently failing SDK key cannot trigger a fetch storm.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::{thread_rng, Rng};
use tokio::sync::watch;

use crate::cache::{cache_key_for, ConfigCache, SnapshotStore};
use crate::error::{Error, FetchError};
use crate::fetcher::{ConfigFetcher, FetchResult};
use crate::hooks::Hooks;
use crate::options::PollingMode;
use crate::snapshot::{ConfigSnapshot, Timestamp};

/// Connection state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Fetches are allowed.
    Online,
    /// Fetches are suppressed; reads serve the cache.
    Offline,
    /// Terminal. The client no longer fetches and background work is stopped.
    Disposed,
}

impl ClientStatus {
    fn from_u8(value: u8) -> ClientStatus {
        match value {
            0 => ClientStatus::Online,
            1 => ClientStatus::Offline,
            _ => ClientStatus::Disposed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ClientStatus::Online => 0,
            ClientStatus::Offline => 1,
            ClientStatus::Disposed => 2,
        }
    }
}

/// Drives the configured [`PollingMode`] over a [`SnapshotStore`]: decides
/// when the fetcher runs, synchronizes with the external cache, and emits
/// hooks in cache-write order.
pub struct ConfigService {
    inner: Arc<ServiceInner>,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct ServiceInner {
    fetcher: ConfigFetcher,
    store: SnapshotStore,
    external_cache: Option<Arc<dyn ConfigCache>>,
    cache_key: String,
    hooks: Arc<Hooks>,
    mode: PollingMode,
    status: AtomicU8,
    /// Serializes fetch decisions; the single-flight point.
    fetch_lock: tokio::sync::Mutex<()>,
    ready_tx: watch::Sender<bool>,
    stop_tx: watch::Sender<bool>,
    /// Last external-cache entry we observed, to skip redundant parses and
    /// rewrites.
    last_external_entry: Mutex<String>,
}

impl ConfigService {
    /// Create a service. Call [`ConfigService::start`] afterwards to launch
    /// the mode's background work.
    pub fn new(
        fetcher: ConfigFetcher,
        external_cache: Option<Arc<dyn ConfigCache>>,
        hooks: Arc<Hooks>,
        mode: PollingMode,
        sdk_key: &str,
        offline: bool,
    ) -> ConfigService {
        let status = if offline {
            ClientStatus::Offline
        } else {
            ClientStatus::Online
        };
        ConfigService {
            inner: Arc::new(ServiceInner {
                fetcher,
                store: SnapshotStore::new(),
                external_cache,
                cache_key: cache_key_for(sdk_key),
                hooks,
                mode,
                status: AtomicU8::new(status.as_u8()),
                fetch_lock: tokio::sync::Mutex::new(()),
                ready_tx: watch::channel(false).0,
                stop_tx: watch::channel(false).0,
                last_external_entry: Mutex::new(String::new()),
            }),
            poll_task: Mutex::new(None),
        }
    }

    /// Launch background work on `handle`: the auto-poll loop (plus its init
    /// deadline timer), or the initial cache read for manual/lazy modes.
    ///
    /// The spawned tasks hold only a [`Weak`] reference to the service state,
    /// so dropping the owning client stops them even without an explicit
    /// dispose.
    pub fn start(&self, handle: &tokio::runtime::Handle) {
        match self.inner.mode {
            PollingMode::AutoPoll {
                poll_interval,
                max_init_wait,
            } => {
                // The readiness bound is a wall-clock deadline fixed here, at
                // construction. Repeated wait_for_ready() calls during startup
                // all observe the same deadline.
                let deadline = tokio::time::Instant::now() + max_init_wait;
                let weak = Arc::downgrade(&self.inner);
                handle.spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.signal_ready();
                    }
                });

                let weak = Arc::downgrade(&self.inner);
                let mut stop_rx = self.inner.stop_tx.subscribe();
                let task = handle.spawn(async move {
                    loop {
                        {
                            let Some(inner) = weak.upgrade() else { break };
                            match inner.status() {
                                ClientStatus::Disposed => break,
                                ClientStatus::Offline => {
                                    log::trace!(target: "flagcast", "poll skipped, client is offline");
                                }
                                ClientStatus::Online => {
                                    let threshold = past(Utc::now(), poll_interval);
                                    match inner.fetch_if_older(threshold).await {
                                        Ok(snapshot) if !snapshot.is_empty() => {
                                            inner.signal_ready()
                                        }
                                        Ok(_) => {}
                                        Err(err) => {
                                            // Transient failures keep the loop
                                            // on schedule.
                                            log::warn!(target: "flagcast",
                                                "background poll failed: {err}");
                                        }
                                    }
                                }
                            }
                            // The strong reference must not outlive this scope
                            // or the owning client could never be collected.
                        }
                        tokio::select! {
                            _ = stop_rx.wait_for(|stopped| *stopped) => break,
                            _ = tokio::time::sleep(jitter(poll_interval, poll_interval / 10)) => {}
                        }
                    }
                    log::debug!(target: "flagcast", "config poller stopped");
                });
                *self.poll_task.lock().unwrap() = Some(task);
            }
            PollingMode::LazyLoad { .. } | PollingMode::Manual => {
                // Ready once the initial cache read completes.
                let weak = Arc::downgrade(&self.inner);
                handle.spawn(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.sync_with_external().await;
                        inner.signal_ready();
                    }
                });
            }
        }
    }

    /// Read the current snapshot per the polling-mode policy.
    pub async fn get_config(&self) -> Arc<ConfigSnapshot> {
        self.inner.get_config().await
    }

    /// The locally cached snapshot, without triggering any fetch or external
    /// cache sync.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.inner.store.get()
    }

    /// Fetch-and-cache now, regardless of polling mode. Surfaces the typed
    /// fetch error instead of swallowing it.
    pub async fn refresh(&self) -> Result<(), Error> {
        match self.inner.status() {
            ClientStatus::Disposed => Err(Error::Disposed),
            ClientStatus::Offline => {
                log::warn!(target: "flagcast", "refresh requested while client is offline");
                Err(FetchError::OfflineClient.into())
            }
            ClientStatus::Online => {
                self.inner.fetch_if_older(Utc::now()).await?;
                Ok(())
            }
        }
    }

    /// Allow fetches again. No-op if already online.
    pub fn set_online(&self) {
        match self.inner.transition(ClientStatus::Offline, ClientStatus::Online) {
            Ok(()) => log::info!(target: "flagcast", "switched to online mode"),
            Err(ClientStatus::Online) => {}
            Err(_) => log::warn!(target: "flagcast", "cannot go online, client is disposed"),
        }
    }

    /// Suppress fetches; reads keep serving the cache. No-op if already
    /// offline.
    pub fn set_offline(&self) {
        match self.inner.transition(ClientStatus::Online, ClientStatus::Offline) {
            Ok(()) => log::info!(target: "flagcast", "switched to offline mode"),
            Err(ClientStatus::Offline) => {}
            Err(_) => log::warn!(target: "flagcast", "cannot go offline, client is disposed"),
        }
    }

    /// Current connection state.
    pub fn status(&self) -> ClientStatus {
        self.inner.status()
    }

    /// Block until the polling mode's readiness condition holds (or the
    /// client is disposed). Returns `true` if a non-empty configuration is
    /// available at that point.
    pub async fn wait_for_ready(&self) -> bool {
        let mut ready_rx = self.inner.ready_tx.subscribe();
        let mut stop_rx = self.inner.stop_tx.subscribe();
        if !*ready_rx.borrow() {
            tokio::select! {
                _ = ready_rx.wait_for(|ready| *ready) => {}
                _ = stop_rx.wait_for(|stopped| *stopped) => return false,
            }
        }
        !self.inner.store.get().is_empty()
    }

    /// Irreversibly shut the service down: stops background work, cancels any
    /// in-flight poll, and releases pending ready-waiters.
    pub fn dispose(&self) {
        let previous = ClientStatus::from_u8(
            self.inner
                .status
                .swap(ClientStatus::Disposed.as_u8(), Ordering::AcqRel),
        );
        if previous == ClientStatus::Disposed {
            return;
        }
        let _ = self.inner.stop_tx.send(true);
        if let Some(task) = self.poll_task.lock().unwrap().take() {
            task.abort();
        }
        log::debug!(target: "flagcast", "client disposed");
    }
}

impl Drop for ConfigService {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl ServiceInner {
    fn status(&self) -> ClientStatus {
        ClientStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; on failure returns the state that blocked
    /// the transition.
    fn transition(&self, from: ClientStatus, to: ClientStatus) -> Result<(), ClientStatus> {
        self.status
            .compare_exchange(
                from.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(ClientStatus::from_u8)
    }

    fn signal_ready(&self) {
        let newly_ready = self.ready_tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        if newly_ready {
            log::debug!(target: "flagcast", "client is ready");
            self.hooks.emit_client_ready();
        }
    }

    async fn get_config(&self) -> Arc<ConfigSnapshot> {
        self.sync_with_external().await;
        let snapshot = self.store.get();

        if let PollingMode::LazyLoad { cache_ttl } = self.mode {
            let now = Utc::now();
            if snapshot.is_expired(cache_ttl, now) && self.status() == ClientStatus::Online {
                // Expired: fetch-and-cache synchronously before returning.
                // Errors are already reported via hooks; serve what we have.
                let _ = self.fetch_if_older(past(now, cache_ttl)).await;
                return self.store.get();
            }
        }

        snapshot
    }

    /// Fetch unless the cache already holds a snapshot fresher than
    /// `threshold`. The single-flight point: one lock, one network call,
    /// every waiter reuses the winner's result.
    async fn fetch_if_older(&self, threshold: Timestamp) -> Result<Arc<ConfigSnapshot>, FetchError> {
        let _guard = self.fetch_lock.lock().await;

        self.sync_with_external().await;
        let last = self.store.get();
        if last.fetched_at > threshold {
            // Someone fetched (or an external cache delivered) while we were
            // waiting for the lock.
            return Ok(last);
        }
        if self.status() != ClientStatus::Online {
            return Err(FetchError::OfflineClient);
        }

        let result = self.fetcher.fetch(&last).await;
        self.apply_fetch_result(result, last).await
    }

    async fn apply_fetch_result(
        &self,
        result: FetchResult,
        last: Arc<ConfigSnapshot>,
    ) -> Result<Arc<ConfigSnapshot>, FetchError> {
        let now = Utc::now();
        match result {
            FetchResult::Fetched(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let changed = !snapshot.content_equals(&last);
                let acceptable = snapshot.fetched_at >= last.fetched_at
                    && (!snapshot.is_empty() || last.is_empty());
                if acceptable {
                    self.write_snapshot(snapshot.clone()).await;
                }
                self.hooks.emit_config_fetched(true);
                if changed {
                    if let Some(config) = &snapshot.config {
                        log::info!(target: "flagcast", "configuration changed");
                        self.hooks.emit_config_changed(config);
                    }
                }
                Ok(snapshot)
            }
            FetchResult::NotModified => {
                // Keep the parsed content, reset the staleness clock.
                let refreshed = Arc::new(last.with_fetch_time(now));
                self.write_snapshot(refreshed.clone()).await;
                self.hooks.emit_config_fetched(true);
                Ok(refreshed)
            }
            FetchResult::Failed { error, transient } => {
                if last.is_empty() {
                    // Flood prevention: advance the empty snapshot's clock so
                    // timer-driven policies don't retry on every call.
                    self.store.set(Arc::new(last.with_fetch_time(now)));
                }
                log::debug!(target: "flagcast", transient; "fetch failed: {error}");
                self.hooks.emit_config_fetched(false);
                self.hooks.emit_error(&error.to_string());
                Err(error)
            }
        }
    }

    /// Pull the external cache entry and let it win if it carries different
    /// content (or a fresher timestamp) than the local snapshot. A faulting
    /// external cache degrades to the last local snapshot.
    async fn sync_with_external(&self) {
        let Some(cache) = &self.external_cache else {
            return;
        };
        let entry = match cache.get(&self.cache_key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(err) => {
                log::warn!(target: "flagcast",
                    "external cache read failed, using last local snapshot: {err}");
                return;
            }
        };

        {
            let last_seen = self.last_external_entry.lock().unwrap();
            if *last_seen == entry {
                return;
            }
        }

        match ConfigSnapshot::deserialize(&entry) {
            Ok(snapshot) => {
                let local = self.store.get();
                if snapshot.fetched_at >= local.fetched_at
                    && (!snapshot.content_equals(&local) || snapshot.fetched_at > local.fetched_at)
                {
                    log::debug!(target: "flagcast", "external cache supplied a newer snapshot");
                    self.store.set(Arc::new(snapshot));
                }
                *self.last_external_entry.lock().unwrap() = entry;
            }
            Err(err) => {
                log::warn!(target: "flagcast", "failed to parse external cache entry: {err}");
            }
        }
    }

    async fn write_snapshot(&self, snapshot: Arc<ConfigSnapshot>) {
        self.store.set(snapshot.clone());
        if let Some(cache) = &self.external_cache {
            let entry = snapshot.serialize();
            match cache.set(&self.cache_key, &entry).await {
                Ok(()) => {
                    *self.last_external_entry.lock().unwrap() = entry;
                }
                Err(err) => {
                    log::warn!(target: "flagcast", "external cache write failed: {err}");
                }
            }
        }
    }
}

fn past(now: Timestamp, duration: Duration) -> Timestamp {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|duration| now.checked_sub_signed(duration))
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
}

/// Apply randomized `jitter` to `interval`, avoiding synchronized fetch
/// spikes across many client instances.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod jitter_tests {
    use std::time::Duration;

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(60);
        let result = super::jitter(interval, Duration::from_secs(60));
        assert!(result <= interval, "{result:?} must be <= {interval:?}");
    }

    #[test]
    fn jitter_truncates_to_zero() {
        assert_eq!(
            super::jitter(Duration::ZERO, Duration::from_secs(60)),
            Duration::ZERO
        );
    }

    #[test]
    fn jitter_works_with_zero_jitter() {
        let interval = Duration::from_secs(60);
        assert_eq!(super::jitter(interval, Duration::ZERO), interval);
    }
}
