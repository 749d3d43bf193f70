//! Time sources for time-locked handlers.

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Unix time in seconds.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;

    /// Resolve once `now() >= timestamp`.
    async fn wait_until(&self, timestamp: u64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    async fn wait_until(&self, timestamp: u64) {
        loop {
            let now = self.now();
            if now >= timestamp {
                return;
            }
            tokio::time::sleep(Duration::from_secs(timestamp - now)).await;
        }
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: watch::Sender<u64>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        let (now, _) = watch::channel(start);
        Self { now }
    }

    pub fn set(&self, now: u64) {
        self.now.send_replace(now);
    }

    pub fn advance(&self, secs: u64) {
        self.now.send_modify(|now| *now = now.saturating_add(secs));
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> u64 {
        *self.now.borrow()
    }

    async fn wait_until(&self, timestamp: u64) {
        let mut rx = self.now.subscribe();
        // Never closes: the sender is owned by self
        let _ = rx.wait_for(|now| *now >= timestamp).await;
    }
}
