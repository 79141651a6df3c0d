//!
//! Range 规划模块
//! 纯计算：根据文件大小、配置和历史断点推导并发数、块大小和初始 Range 列表
//!

use crate::download::config::{DownloadConfig, RangeGenMode};
use crate::download::range::Range;

/// Planner output: effective parallelism, block size and the initial
/// partition of `[0, total_size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePlan {
    pub parallel: usize,
    /// `None` marks the unbounded single-range download.
    pub block_size: Option<u64>,
    pub ranges: Vec<Range>,
}

pub struct RangePlanner<'a> {
    config: &'a DownloadConfig,
}

impl<'a> RangePlanner<'a> {
    pub fn new(config: &'a DownloadConfig) -> Self {
        Self { config }
    }

    /// Plans one session. A non-empty checkpoint range list is reused
    /// verbatim and pins the parallelism.
    pub fn plan(&self, total_size: u64, checkpoint: Option<&[Range]>) -> RangePlan {
        if let Some(ranges) = checkpoint.filter(|ranges| !ranges.is_empty()) {
            let parallel = ranges.len();
            return RangePlan {
                parallel,
                block_size: self.select_block_size(total_size, parallel),
                ranges: ranges.to_vec(),
            };
        }

        let parallel = self.select_parallel(total_size);
        if parallel == 1 {
            return RangePlan {
                parallel: 1,
                block_size: None,
                ranges: vec![Range::new(0, total_size)],
            };
        }

        let block_size = self.select_block_size(total_size, parallel);
        let ranges = match self.config.mode {
            RangeGenMode::Default => Self::split_equal(total_size, parallel),
            RangeGenMode::BlockSize => {
                // the planner guarantees a block size for parallel > 1
                Self::split_blocks(total_size, block_size.unwrap_or(total_size))
            }
        };

        RangePlan { parallel, block_size, ranges }
    }

    fn select_parallel(&self, total_size: u64) -> usize {
        let parallel = if self.config.slice_parallel > 0 {
            self.config.slice_parallel
        } else {
            let by_size = (total_size / self.config.min_parallel_size.max(1)) as usize + 1;
            self.config.max_parallel.min(by_size)
        };

        parallel
            .max(1)
            .min(usize::try_from(total_size).unwrap_or(usize::MAX).max(1))
    }

    fn select_block_size(&self, total_size: u64, parallel: usize) -> Option<u64> {
        if parallel <= 1 {
            return None;
        }
        let even = total_size / parallel as u64 + 1;
        let block = match self.config.mode {
            RangeGenMode::Default => even,
            // the smaller block wins, for more concurrency
            RangeGenMode::BlockSize => self.config.block_size.min(even),
        };
        Some(block.max(1))
    }

    fn split_equal(total_size: u64, parallel: usize) -> Vec<Range> {
        let width = total_size / parallel as u64;
        let mut ranges = Vec::with_capacity(parallel);
        for i in 0..parallel as u64 {
            let begin = i * width;
            let end = if i == parallel as u64 - 1 { total_size } else { begin + width };
            ranges.push(Range::new(begin, end));
        }
        ranges
    }

    fn split_blocks(total_size: u64, block_size: u64) -> Vec<Range> {
        let mut ranges = Vec::new();
        let mut begin = 0;
        while begin < total_size {
            let end = (begin + block_size).min(total_size);
            ranges.push(Range::new(begin, end));
            begin = end;
        }
        ranges
    }
}

/// 如果 cache size 过高, 则调低到块大小
pub fn select_cache_size(configured: usize, block_size: Option<u64>) -> usize {
    match block_size {
        Some(block) if configured as u64 > block => block as usize,
        _ => configured,
    }
}
