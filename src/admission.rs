//! Per-client sliding-window admission control.
//!
//! Each client gets `permit_limit` requests per rolling `window`. The window
//! is split into `segments`; requests are counted in the current segment and
//! released again once that segment falls out of the window. There is no
//! queue: a request over quota is rejected immediately.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub permit_limit: u32,
    pub window: Duration,
    pub segments: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            permit_limit: 20,
            window: Duration::from_secs(60),
            segments: 4,
        }
    }
}

impl Config {
    fn segment_len(&self) -> Duration {
        self.window / self.segments.max(1)
    }
}

#[derive(Debug)]
struct Window {
    /// Ring of per-segment counts; `head` is the current segment.
    counts: Box<[u32]>,
    head: usize,
    head_started: Instant,
    total: u32,
}

impl Window {
    fn new(segments: usize, now: Instant) -> Self {
        Self {
            counts: vec![0; segments].into_boxed_slice(),
            head: 0,
            head_started: now,
            total: 0,
        }
    }

    /// Moves the head forward one slot per elapsed segment, releasing the
    /// counts of segments that leave the window.
    fn advance(&mut self, now: Instant, segment_len: Duration) {
        if segment_len.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.head_started);
        let steps = (elapsed.as_nanos() / segment_len.as_nanos()) as u64;
        if steps == 0 {
            return;
        }

        let len = self.counts.len();
        if steps >= len as u64 {
            self.counts.fill(0);
            self.total = 0;
            self.head_started = now;
            return;
        }
        for _ in 0..steps {
            self.head = (self.head + 1) % len;
            self.total -= self.counts[self.head];
            self.counts[self.head] = 0;
        }
        // steps < len, which is a u32 segment count.
        self.head_started += segment_len * steps as u32;
    }

    fn try_acquire(&mut self, limit: u32) -> bool {
        if self.total >= limit {
            return false;
        }
        self.counts[self.head] += 1;
        self.total += 1;
        true
    }
}

#[derive(Debug)]
pub struct AdmissionController {
    cfg: Config,
    clients: DashMap<String, Window>,
}

impl AdmissionController {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            clients: DashMap::new(),
        }
    }

    /// Consumes one permit for `client` if its quota allows.
    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        let segment_len = self.cfg.segment_len();

        if let Some(mut window) = self.clients.get_mut(client) {
            window.advance(now, segment_len);
            return window.try_acquire(self.cfg.permit_limit);
        }

        let mut window = self
            .clients
            .entry(client.to_string())
            .or_insert_with(|| Window::new(self.cfg.segments.max(1) as usize, now));
        window.advance(now, segment_len);
        window.try_acquire(self.cfg.permit_limit)
    }

    /// Permits `client` could still use right now.
    pub fn remaining(&self, client: &str) -> u32 {
        match self.clients.get_mut(client) {
            Some(mut window) => {
                window.advance(Instant::now(), self.cfg.segment_len());
                self.cfg.permit_limit.saturating_sub(window.total)
            }
            None => self.cfg.permit_limit,
        }
    }

    /// Forgets clients whose windows have fully drained. Returns how many
    /// were removed.
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let segment_len = self.cfg.segment_len();
        let before = self.clients.len();
        self.clients.retain(|_, window| {
            window.advance(now, segment_len);
            window.total > 0
        });
        before.saturating_sub(self.clients.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}
