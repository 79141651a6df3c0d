use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// 半开区间 `[begin, end)`，`current` 指向下一个待写入的字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
    pub current: u64,
}

impl Range {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end, current: begin }
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.begin
    }

    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.current)
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.end
    }

    /// Bytes already secured for this range.
    pub fn downloaded(&self) -> u64 {
        self.current.min(self.end) - self.begin
    }
}

/// Live form of a [`Range`] owned by one worker. `current` advances only on
/// the owning worker's task; `end` may shrink when the monitor steals the
/// tail of a stalled assignment.
#[derive(Debug)]
pub struct RangeCtl {
    begin: u64,
    current: AtomicU64,
    end: AtomicU64,
}

impl RangeCtl {
    pub fn new(range: Range) -> Arc<Self> {
        Arc::new(Self {
            begin: range.begin,
            current: AtomicU64::new(range.current),
            end: AtomicU64::new(range.end),
        })
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn end(&self) -> u64 {
        self.end.load(Ordering::Acquire)
    }

    pub fn advance(&self, n: u64) {
        self.current.fetch_add(n, Ordering::AcqRel);
    }

    pub fn remaining(&self) -> u64 {
        self.end().saturating_sub(self.current())
    }

    pub fn is_complete(&self) -> bool {
        self.current() >= self.end()
    }

    /// Snapshot with `current` clamped into the possibly shrunk interval.
    pub fn snapshot(&self) -> Range {
        let end = self.end();
        Range {
            begin: self.begin,
            end,
            current: self.current().min(end),
        }
    }

    /// Splits off the tail half of the remaining interval, shrinking `end`.
    /// Refused when the remainder is below `min_size`.
    pub fn steal_tail(&self, min_size: u64) -> Option<Range> {
        let end = self.end();
        let current = self.current();
        let remaining = end.saturating_sub(current);
        if remaining < min_size.max(2) {
            return None;
        }
        let mid = end - remaining / 2;
        self.end.store(mid, Ordering::Release);
        Some(Range::new(mid, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_and_snapshot() {
        let ctl = RangeCtl::new(Range::new(0, 100));
        ctl.advance(40);
        let snap = ctl.snapshot();
        assert_eq!(snap, Range { begin: 0, end: 100, current: 40 });
        assert_eq!(snap.downloaded(), 40);
        assert_eq!(ctl.remaining(), 60);
        assert!(!ctl.is_complete());
    }

    #[test]
    fn steal_tail_keeps_ranges_disjoint() {
        let ctl = RangeCtl::new(Range::new(0, 100));
        ctl.advance(20);
        let stolen = ctl.steal_tail(1).unwrap();
        assert_eq!(ctl.end(), 60);
        assert_eq!(stolen, Range { begin: 60, end: 100, current: 60 });
        // the two halves still cover [0, 100) exactly
        assert_eq!(ctl.snapshot().end, stolen.begin);
    }

    #[test]
    fn steal_tail_refuses_small_remainders() {
        let ctl = RangeCtl::new(Range::new(0, 100));
        ctl.advance(95);
        assert!(ctl.steal_tail(10).is_none());

        let done = RangeCtl::new(Range::new(0, 10));
        done.advance(10);
        assert!(done.steal_tail(1).is_none());
    }

    #[test]
    fn snapshot_clamps_current_after_shrink() {
        let ctl = RangeCtl::new(Range::new(0, 100));
        ctl.advance(50);
        // a racing steal may shrink end below an already advanced cursor
        let _ = ctl.steal_tail(1);
        ctl.advance(40);
        let snap = ctl.snapshot();
        assert!(snap.current <= snap.end);
    }
}
