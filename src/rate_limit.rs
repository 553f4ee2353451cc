use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// Idle keys are swept once per this many checks.
const PRUNE_EVERY: u64 = 1024;

struct Window {
    span: Duration,
    hits: VecDeque<Instant>,
}

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, Window>>,
    checks: Arc<AtomicU64>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), checks: Arc::new(AtomicU64::new(0)), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        // sweep before taking an entry guard; retain locks every shard
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }
        let now = Instant::now();
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| Window { span: window, hits: VecDeque::new() });
        let w = &mut *entry;
        w.span = window;
        while let Some(front) = w.hits.front() {
            if now.duration_since(*front) >= window { w.hits.pop_front(); } else { break; }
        }
        if w.hits.len() < limit {
            w.hits.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drops keys with no hits left inside their window.
    pub fn prune(&self) {
        let now = Instant::now();
        self.store.retain(|_, w| w.hits.back().is_some_and(|t| now.duration_since(*t) < w.span));
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub upload_limit: usize,
    pub upload_window: Duration,
    pub flag_limit: usize,
    pub flag_window: Duration,
    pub view_limit: usize,
    pub view_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        Self {
            upload_limit: usize_env("RL_UPLOAD_LIMIT", 5),
            upload_window: dur_env("RL_UPLOAD_WINDOW", 600),
            flag_limit: usize_env("RL_FLAG_LIMIT", 10),
            flag_window: dur_env("RL_FLAG_WINDOW", 3600),
            view_limit: usize_env("RL_VIEW_LIMIT", 60),
            view_window: dur_env("RL_VIEW_WINDOW", 60),
        }
    }
}

/// High level guard used by handlers; keys are client addresses.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_upload(&self, ip: &str) -> bool { self.limiter.check(&format!("upload:{ip}"), self.cfg.upload_limit, self.cfg.upload_window) }
    pub fn allow_flag(&self, ip: &str) -> bool { self.limiter.check(&format!("flag:{ip}"), self.cfg.flag_limit, self.cfg.flag_window) }
    pub fn allow_view(&self, ip: &str) -> bool { self.limiter.check(&format!("view:{ip}"), self.cfg.view_limit, self.cfg.view_window) }
}
