//! Deadman watchdog: if no `RUN` arrives within `watchdog_ms` of the last
//! one, the device is stopped automatically. Grounded on the `Watchdog`
//! class in `mecanum_daemon_node.py` (bump on every RUN, background loop
//! checking elapsed time, "armed" only while at least one RUN has been seen).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Shared handle a connection task bumps on every `RUN` and that a
/// background task polls to decide whether to fire a stop.
pub struct Watchdog {
    interval: Duration,
    armed: AtomicBool,
    last_bump: parking_lot_instant::InstantCell,
    notify: Notify,
}

// A tiny private module so `Watchdog` doesn't need an extra crate dependency
// just to store an `Instant` behind an atomic-friendly cell; a std Mutex is
// plenty for something touched a few times a second.
mod parking_lot_instant {
    use std::sync::Mutex;
    use tokio::time::Instant;

    pub struct InstantCell(Mutex<Instant>);

    impl InstantCell {
        pub fn new(now: Instant) -> Self {
            Self(Mutex::new(now))
        }

        pub fn set(&self, now: Instant) {
            *self.0.lock().unwrap() = now;
        }

        pub fn get(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }
}

impl Watchdog {
    pub fn new(watchdog_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            interval: Duration::from_millis(watchdog_ms),
            armed: AtomicBool::new(false),
            last_bump: parking_lot_instant::InstantCell::new(Instant::now()),
            notify: Notify::new(),
        })
    }

    /// Reset the deadline; called on every successful `RUN`. Arms the
    /// watchdog on its first bump, matching the original's "armed only once
    /// motion has actually started" behavior.
    pub fn bump(&self) {
        self.last_bump.set(Instant::now());
        self.armed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Disarm without stopping (used when the connection itself closes —
    /// the disconnect-triggered stop is handled separately in §4.I item 2).
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Run until the deadline lapses with no intervening bump, or the
    /// watchdog is disarmed. Returns `true` if it fired (i.e. the caller
    /// should issue a safety stop), `false` if it exited because of
    /// `disarm()`.
    pub async fn run(self: Arc<Self>) -> bool {
        loop {
            if !self.is_armed() {
                // Wait for the first RUN to arm us.
                self.notify.notified().await;
                continue;
            }
            let deadline = self.last_bump.get() + self.interval;
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::select! {
                _ = tokio::time::sleep(deadline - now) => {
                    if self.is_armed() && Instant::now() >= self.last_bump.get() + self.interval {
                        return true;
                    }
                }
                _ = self.notify.notified() => {
                    if !self.is_armed() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Per-command token-bucket rate limiter driven by the manifest's
/// `safety.rate_limit_hz` (§3, §4.I item 3). A command arriving before its
/// minimum inter-arrival interval has elapsed is rejected with `RATE_LIMIT`.
pub struct RateLimiter {
    min_interval: Duration,
    has_accepted: AtomicBool,
    last_accept: AtomicU64,
    epoch: Instant,
}

impl RateLimiter {
    pub fn new(rate_limit_hz: f64) -> Self {
        let min_interval = if rate_limit_hz > 0.0 {
            Duration::from_secs_f64(1.0 / rate_limit_hz)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            has_accepted: AtomicBool::new(false),
            last_accept: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Returns `true` if a command arriving now is allowed to proceed.
    /// Mirrors §4.I's `last_cmd_ms == 0` meaning "no command yet": the first
    /// call is always allowed regardless of how recently the limiter itself
    /// was constructed.
    pub fn allow(&self) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        if self.has_accepted.load(Ordering::SeqCst) {
            let last = self.last_accept.load(Ordering::SeqCst);
            if now_ms.saturating_sub(last) < self.min_interval.as_millis() as u64 {
                return false;
            }
        }
        self.last_accept.store(now_ms, Ordering::SeqCst);
        self.has_accepted.store(true, Ordering::SeqCst);
        true
    }
}
