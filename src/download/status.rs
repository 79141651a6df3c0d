use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::download::rate_limit::ArcRateLimiter;

/// 一次下载会话的整体进度，由所有 worker 共享
pub struct DownloadStatus {
    total_size: u64,
    downloaded: AtomicU64,
    window: AtomicU64,
    speed: AtomicU64,
    rate_limit: Option<ArcRateLimiter>,
}

impl DownloadStatus {
    pub fn new(total_size: u64, rate_limit: Option<ArcRateLimiter>) -> Arc<Self> {
        Arc::new(Self {
            total_size,
            downloaded: AtomicU64::new(0),
            window: AtomicU64::new(0),
            speed: AtomicU64::new(0),
            rate_limit,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    /// Restores progress from a checkpoint before workers start.
    pub fn set_downloaded(&self, n: u64) {
        self.downloaded.store(n, Ordering::Release);
    }

    /// Records `n` sink-confirmed bytes.
    pub fn add(&self, n: u64) {
        self.downloaded.fetch_add(n, Ordering::AcqRel);
        self.window.fetch_add(n, Ordering::Relaxed);
    }

    pub fn rate_limit(&self) -> Option<&ArcRateLimiter> {
        self.rate_limit.as_ref()
    }

    /// Drains the byte window accumulated since the previous tick and
    /// refreshes the published speed.
    pub fn tick(&self, interval: Duration) -> u64 {
        let window = self.window.swap(0, Ordering::AcqRel);
        let millis = interval.as_millis().max(1) as u64;
        self.speed.store(window * 1000 / millis, Ordering::Release);
        window
    }

    pub fn speed_per_second(&self) -> u64 {
        self.speed.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            total_size: self.total_size,
            downloaded: self.downloaded(),
            speed_per_second: self.speed_per_second(),
            rate_limit: self.rate_limit.as_ref().map(|l| l.rate()).unwrap_or(0),
        }
    }
}

/// Point-in-time view published with every status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub total_size: u64,
    pub downloaded: u64,
    pub speed_per_second: u64,
    /// 0 when the session is not throttled.
    pub rate_limit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates_and_tick_drains() {
        let status = DownloadStatus::new(1000, None);
        status.add(300);
        status.add(200);
        assert_eq!(status.downloaded(), 500);

        let window = status.tick(Duration::from_secs(1));
        assert_eq!(window, 500);
        assert_eq!(status.speed_per_second(), 500);
        assert_eq!(status.tick(Duration::from_secs(1)), 0);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let status = DownloadStatus::new(4096, None);
        status.set_downloaded(1024);
        let snap = status.snapshot();
        assert_eq!(snap.total_size, 4096);
        assert_eq!(snap.downloaded, 1024);
        assert_eq!(snap.rate_limit, 0);
    }
}
