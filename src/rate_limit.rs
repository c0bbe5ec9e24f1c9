use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// A full sweep of idle keys runs once per this many hits.
const SWEEP_EVERY: usize = 1024;

#[derive(Default)]
struct Bucket {
    hits: VecDeque<Instant>,
    window: Duration,
}

impl Bucket {
    fn prune(&mut self, now: Instant) {
        while self.hits.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            self.hits.pop_front();
        }
    }
}

/// Sliding-window limiter keyed by arbitrary strings (process local).
#[derive(Clone, Default)]
pub struct SlidingWindow {
    buckets: Arc<DashMap<String, Bucket>>,
    calls: Arc<AtomicUsize>,
}

impl SlidingWindow {
    pub fn new() -> Self { Self::default() }

    /// Records a hit and returns true, or returns false once `limit` hits fall inside `window`.
    pub fn hit(&self, key: &str, limit: usize, window: Duration) -> bool {
        let now = Instant::now();
        let allowed = {
            let mut bucket = self.buckets.entry(key.to_string()).or_default();
            bucket.window = window;
            bucket.prune(now);
            if bucket.hits.len() >= limit {
                false
            } else {
                bucket.hits.push_back(now);
                true
            }
        };
        if self.calls.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }
        allowed
    }

    /// Drops keys with no hits left inside their window.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.buckets.retain(|_, b| {
            b.prune(now);
            !b.hits.is_empty()
        });
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize { self.buckets.len() }

    pub fn is_empty(&self) -> bool { self.buckets.is_empty() }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// login + register attempts per client address
    pub auth_limit: usize,
    pub auth_window: Duration,
    /// comments per viewer
    pub comment_limit: usize,
    pub comment_window: Duration,
    /// Take the client address from `Forwarded`/`X-Forwarded-For`. Only safe behind a proxy that overwrites them.
    pub trust_forwarded: bool,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        Self {
            auth_limit: usize_env("RL_AUTH_LIMIT", 10),
            auth_window: dur_env("RL_AUTH_WINDOW", 60),
            comment_limit: usize_env("RL_COMMENT_LIMIT", 5),
            comment_window: dur_env("RL_COMMENT_WINDOW", 60),
            trust_forwarded: std::env::var("TRUSTED_PROXY").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false),
        }
    }
}

/// Per-action guard used by handlers.
#[derive(Clone)]
pub struct RateLimiter {
    window: SlidingWindow,
    cfg: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self { Self { window: SlidingWindow::new(), cfg } }
    pub fn trusts_forwarded(&self) -> bool { self.cfg.trust_forwarded }
    pub fn allow_auth(&self, ip: &str) -> bool { self.window.hit(&format!("auth:{ip}"), self.cfg.auth_limit, self.cfg.auth_window) }
    pub fn allow_comment(&self, user_id: i64) -> bool { self.window.hit(&format!("comment:{user_id}"), self.cfg.comment_limit, self.cfg.comment_window) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_fills_then_blocks() {
        let w = SlidingWindow::new();
        let window = Duration::from_secs(60);
        for _ in 0..3 { assert!(w.hit("k", 3, window)); }
        assert!(!w.hit("k", 3, window));
        assert!(w.hit("other", 3, window));
    }

    #[test]
    fn expired_hits_free_capacity() {
        let w = SlidingWindow::new();
        let window = Duration::from_millis(20);
        assert!(w.hit("k", 1, window));
        assert!(!w.hit("k", 1, window));
        std::thread::sleep(Duration::from_millis(30));
        assert!(w.hit("k", 1, window));
    }

    #[test]
    fn idle_keys_are_swept() {
        let w = SlidingWindow::new();
        for i in 0..10 { assert!(w.hit(&format!("ip:{i}"), 5, Duration::from_millis(20))); }
        assert!(w.hit("busy", 5, Duration::from_secs(60)));
        assert_eq!(w.len(), 11);
        std::thread::sleep(Duration::from_millis(30));
        w.sweep();
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn sweep_runs_without_explicit_call() {
        let w = SlidingWindow::new();
        let window = Duration::from_millis(5);
        for i in 0..SWEEP_EVERY - 1 { w.hit(&format!("k{i}"), 1, window); }
        std::thread::sleep(Duration::from_millis(10));
        // this hit completes a sweep cycle; only its own key survives
        w.hit("last", 1, window);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn actions_are_counted_separately() {
        let rl = RateLimiter::new(RateLimitConfig {
            auth_limit: 1,
            auth_window: Duration::from_secs(60),
            comment_limit: 1,
            comment_window: Duration::from_secs(60),
            trust_forwarded: false,
        });
        assert!(rl.allow_auth("1.2.3.4"));
        assert!(!rl.allow_auth("1.2.3.4"));
        assert!(rl.allow_comment(7));
        assert!(!rl.allow_comment(7));
        assert!(rl.allow_comment(8));
    }
}
