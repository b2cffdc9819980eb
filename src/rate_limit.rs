//! Per-client fixed-window rate limiting.
//!
//! Each client key owns one [`ClientWindowState`]. A request that arrives
//! at least one window after the client's previous request opens a new
//! window with a count of one; otherwise the count is incremented and the
//! request is rejected once it exceeds the cap. Every request, allowed or
//! not, refreshes `last_seen`, so a client that keeps hammering stays
//! throttled until it backs off for a full window.
//!
//! Entries for clients that went quiet are evicted by a periodic sweep
//! started with [`RateLimiter::start`]. The sweep only bounds memory; it
//! never changes the outcome of [`RateLimiter::check`].

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{ConfigError, RateLimitConfig};

/// Counter state for one client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientWindowState {
    pub request_count: u32,
    pub last_seen: Instant,
}

impl ClientWindowState {
    fn fresh(now: Instant) -> Self {
        Self {
            request_count: 1,
            last_seen: now,
        }
    }
}

/// Outcome of a single limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateDecision::Allowed => None,
            RateDecision::Limited { retry_after_secs } => Some(*retry_after_secs),
        }
    }
}

/// In-process limiter keyed by client identity.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    sweep_interval: Duration,
    clients: DashMap<String, ClientWindowState>,
}

impl RateLimiter {
    /// Build a limiter without a sweep task. Use [`RateLimiter::start`] in
    /// a running service so stale entries get evicted.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: config.window(),
            max_requests: config.max_requests,
            sweep_interval: config.sweep_interval(),
            clients: DashMap::new(),
        }
    }

    /// Validate `config`, build a limiter and spawn its sweep on the
    /// current tokio runtime.
    ///
    /// Must be called from within a runtime.
    pub fn start(config: &RateLimitConfig) -> Result<RateLimiterHandle, ConfigError> {
        config.validate()?;
        let limiter = Arc::new(Self::new(config));
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(sweep_loop(
            Arc::clone(&limiter),
            limiter.sweep_interval,
            stop_rx,
        ));

        tracing::info!(
            window_secs = limiter.window.as_secs(),
            max_requests = limiter.max_requests,
            sweep_interval_secs = limiter.sweep_interval.as_secs(),
            "rate limiter started"
        );

        Ok(RateLimiterHandle {
            limiter,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn check(&self, client_key: &str) -> RateDecision {
        self.check_at(client_key, Instant::now())
    }

    /// Record one request from `client_key` at `now` and decide whether it
    /// may proceed.
    ///
    /// The entry guard holds the key's shard lock for the whole
    /// read-modify-write, so concurrent requests from one client are
    /// counted exactly.
    pub fn check_at(&self, client_key: &str, now: Instant) -> RateDecision {
        let mut state = match self.clients.entry(client_key.to_owned()) {
            Entry::Vacant(vacant) => {
                vacant.insert(ClientWindowState::fresh(now));
                return RateDecision::Allowed;
            }
            Entry::Occupied(occupied) => occupied.into_ref(),
        };

        if now.saturating_duration_since(state.last_seen) >= self.window {
            *state = ClientWindowState::fresh(now);
            return RateDecision::Allowed;
        }

        state.request_count = state.request_count.saturating_add(1);
        state.last_seen = now;

        if state.request_count > self.max_requests {
            let remaining = self
                .window
                .saturating_sub(now.saturating_duration_since(state.last_seen));
            let retry_after_secs = ceil_secs(remaining);
            tracing::debug!(
                client = client_key,
                count = state.request_count,
                retry_after_secs,
                "rate limit exceeded"
            );
            RateDecision::Limited { retry_after_secs }
        } else {
            RateDecision::Allowed
        }
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Remove every entry idle for longer than one window. Returns the
    /// number of entries removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.clients.retain(|_, state| {
            let keep = now.saturating_duration_since(state.last_seen) <= self.window;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Snapshot of one client's state.
    pub fn state(&self, client_key: &str) -> Option<ClientWindowState> {
        self.clients.get(client_key).map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

async fn sweep_loop(limiter: Arc<RateLimiter>, period: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(removed, remaining = limiter.len(), "rate limiter sweep");
                }
            }
        }
    }

    tracing::info!("rate limiter sweep stopped");
}

/// Owns a running limiter and its sweep task.
///
/// Dropping the handle aborts the sweep; [`RateLimiterHandle::shutdown`]
/// stops it cleanly and waits for it to finish.
#[derive(Debug)]
pub struct RateLimiterHandle {
    limiter: Arc<RateLimiter>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RateLimiterHandle {
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "rate limiter sweep task failed");
            }
        }
    }
}

impl Drop for RateLimiterHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(window_secs: u64, max_requests: u32) -> RateLimiter {
        RateLimiter::new(
            &RateLimitConfig::default()
                .with_window_secs(window_secs)
                .with_max_requests(max_requests),
        )
    }

    #[test]
    fn first_n_requests_pass_and_the_next_is_limited() {
        let limiter = limiter(60, 5);
        let start = Instant::now();

        for i in 0..5 {
            let at = start + Duration::from_millis(i * 100);
            assert!(limiter.check_at("10.0.0.1", at).is_allowed(), "request {i}");
        }

        let sixth = limiter.check_at("10.0.0.1", start + Duration::from_millis(600));
        assert_eq!(sixth, RateDecision::Limited { retry_after_secs: 60 });
        assert_eq!(limiter.state("10.0.0.1").unwrap().request_count, 6);
    }

    #[test]
    fn clients_are_counted_independently() {
        let limiter = limiter(60, 1);
        let now = Instant::now();

        assert!(limiter.check_at("a", now).is_allowed());
        assert!(limiter.check_at("b", now).is_allowed());
        assert!(!limiter.check_at("a", now).is_allowed());
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn new_window_resets_count_regardless_of_history() {
        let limiter = limiter(60, 2);
        let start = Instant::now();

        for i in 0..10 {
            limiter.check_at("k", start + Duration::from_secs(i));
        }
        assert!(!limiter.check_at("k", start + Duration::from_secs(10)).is_allowed());

        let later = start + Duration::from_secs(70);
        assert!(limiter.check_at("k", later).is_allowed());
        let state = limiter.state("k").unwrap();
        assert_eq!(state.request_count, 1);
        assert_eq!(state.last_seen, later);
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let limiter = limiter(60, 1);
        let start = Instant::now();

        assert!(limiter.check_at("k", start).is_allowed());
        assert!(!limiter.check_at("k", start + Duration::from_secs(59)).is_allowed());
        // last_seen moved to +59s, so exactly one window later opens a new one
        assert!(limiter.check_at("k", start + Duration::from_secs(119)).is_allowed());
    }

    #[test]
    fn rejected_requests_extend_the_wait() {
        let limiter = limiter(60, 1);
        let start = Instant::now();

        assert!(limiter.check_at("k", start).is_allowed());
        assert!(!limiter.check_at("k", start + Duration::from_secs(30)).is_allowed());
        // only 40s since the last (rejected) request
        assert!(!limiter.check_at("k", start + Duration::from_secs(70)).is_allowed());
    }

    #[test]
    fn sweep_removes_only_entries_idle_longer_than_window() {
        let limiter = limiter(60, 5);
        let start = Instant::now();

        limiter.check_at("stale", start);
        limiter.check_at("boundary", start + Duration::from_secs(10));
        limiter.check_at("fresh", start + Duration::from_secs(50));

        let removed = limiter.sweep_at(start + Duration::from_secs(70));
        assert_eq!(removed, 1);
        assert!(limiter.state("stale").is_none());
        // idle for exactly one window: kept
        assert!(limiter.state("boundary").is_some());
        assert!(limiter.state("fresh").is_some());
    }

    #[test]
    fn concurrent_checks_for_one_key_never_undercount() {
        let limiter = Arc::new(limiter(60, 1_000));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        limiter.check_at("burst", now);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(limiter.state("burst").unwrap().request_count, 800);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_evicts_abandoned_clients() {
        let handle = RateLimiter::start(
            &RateLimitConfig::default()
                .with_window_secs(60)
                .with_sweep_interval_secs(60),
        )
        .unwrap();
        let limiter = Arc::clone(handle.limiter());

        limiter.check("gone");
        assert_eq!(limiter.len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        // first tick at +60s saw an entry idle for exactly one window
        assert_eq!(limiter.len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert!(limiter.is_empty());

        assert!(handle.is_running());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn dropping_handle_stops_sweep() {
        let handle = RateLimiter::start(&RateLimitConfig::default()).unwrap();
        let limiter = Arc::clone(handle.limiter());
        drop(handle);
        // limiter stays usable after its sweep is gone
        assert!(limiter.check("x").is_allowed());
    }

    #[tokio::test]
    async fn start_rejects_invalid_config() {
        let zero_sweep = RateLimitConfig::default().with_sweep_interval_secs(0);
        assert_eq!(
            RateLimiter::start(&zero_sweep).err(),
            Some(ConfigError::ZeroSweepInterval)
        );

        let zero_window = RateLimitConfig::default().with_window_secs(0);
        assert_eq!(
            RateLimiter::start(&zero_window).err(),
            Some(ConfigError::ZeroWindow)
        );
    }
}
