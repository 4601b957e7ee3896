//! Per-client sliding-window admission control.
//!
//! Each client key holds the timestamps of its admitted requests inside the
//! current window. Stale timestamps are pruned on access, idle clients are
//! dropped by `sweep`, and the number of tracked clients is capped.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, VecDeque<Instant>>>,
    limit: u32,
    window: Duration,
    max_clients: usize,
}

impl RateLimiter {
    /// `limit` requests per `window` per key; a limit of zero disables limiting.
    pub fn new(limit: u32, window: Duration, max_clients: usize) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            limit,
            window,
            max_clients: max_clients.max(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn allow(&self, key: &str) -> bool {
        if self.limit == 0 {
            return true;
        }

        let now = Instant::now();
        let allowed = {
            let mut queue = self.windows.entry(key.to_string()).or_default();
            prune_queue(&mut queue, now, self.window);
            if queue.len() >= self.limit as usize {
                false
            } else {
                queue.push_back(now);
                true
            }
        };

        if self.windows.len() > self.max_clients {
            self.sweep_at(now);
            self.evict_overflow(key);
        }

        allowed
    }

    /// Drop clients with no requests left in the window.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    fn sweep_at(&self, now: Instant) {
        let window = self.window;
        self.windows.retain(|_, queue| {
            prune_queue(queue, now, window);
            !queue.is_empty()
        });
    }

    /// Still over the cap after a sweep: forget the least recently seen
    /// clients, never the one being served.
    fn evict_overflow(&self, current: &str) {
        let overflow = self.windows.len().saturating_sub(self.max_clients);
        if overflow == 0 {
            return;
        }

        let mut candidates: Vec<(String, Instant)> = self
            .windows
            .iter()
            .filter(|entry| entry.key().as_str() != current)
            .filter_map(|entry| entry.value().back().map(|last| (entry.key().clone(), *last)))
            .collect();
        candidates.sort_by_key(|(_, last)| *last);

        for (key, _) in candidates.into_iter().take(overflow) {
            self.windows.remove(&key);
        }
        debug!("Evicted {} rate limit entries", overflow);
    }
}

fn prune_queue(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = queue.front() {
        if now.duration_since(*front) >= window {
            queue.pop_front();
        } else {
            break;
        }
    }
}
