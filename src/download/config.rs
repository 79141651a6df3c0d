//!
//! 配置模块
//!

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::download::error::DownloadError;

/// Range 生成策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeGenMode {
    /// Equal-width ranges, remainder on the last.
    Default,
    /// Sequential blocks of a configured size until the file is exhausted.
    BlockSize,
}

impl FromStr for RangeGenMode {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(RangeGenMode::Default),
            "block-size" => Ok(RangeGenMode::BlockSize),
            other => Err(DownloadError::UnknownRangeGenMode(other.to_string())),
        }
    }
}

/// 断点信息的持久化格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateFormat {
    Json,
    Binary,
}

/// Immutable per-session configuration. Build with
/// [`DownloadConfigBuilder`]; `Downloader` consumes the value whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub mode: RangeGenMode,
    /// Block size hint for [`RangeGenMode::BlockSize`].
    pub block_size: u64,
    /// Preferred parallelism, 0 selects automatically.
    pub slice_parallel: usize,
    pub max_parallel: usize,
    /// Smallest chunk worth its own worker.
    pub min_parallel_size: u64,
    /// Per-worker read buffer ceiling.
    pub cache_size: usize,
    /// Aggregate throttle in bytes per second, 0 means unlimited.
    pub max_rate: u64,
    pub state_format: StateFormat,
    /// Downgrades probed URL schemes to plain http.
    pub try_http: bool,
    pub request_retry_count: u32,
    pub tick_interval: Duration,
    /// Ticks without progress before a worker counts as stalled.
    pub stall_ticks: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            mode: RangeGenMode::Default,
            block_size: 1024 * 1024 * 10,
            slice_parallel: 0,
            max_parallel: 10,
            min_parallel_size: 1024 * 1024,
            cache_size: 64 * 1024,
            max_rate: 0,
            state_format: StateFormat::Json,
            try_http: false,
            request_retry_count: 3,
            tick_interval: Duration::from_secs(1),
            stall_ticks: 5,
        }
    }
}

pub struct DownloadConfigBuilder {
    config: DownloadConfig,
}

impl DownloadConfigBuilder {
    pub fn new() -> Self {
        Self { config: DownloadConfig::default() }
    }

    pub fn mode(mut self, mode: RangeGenMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn block_size(mut self, block_size: u64) -> Self {
        self.config.block_size = block_size;
        self
    }

    pub fn slice_parallel(mut self, parallel: usize) -> Self {
        self.config.slice_parallel = parallel;
        self
    }

    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.config.max_parallel = max_parallel.max(1);
        self
    }

    pub fn min_parallel_size(mut self, size: u64) -> Self {
        self.config.min_parallel_size = size.max(1);
        self
    }

    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.config.cache_size = cache_size.max(1);
        self
    }

    pub fn max_rate(mut self, bytes_per_second: u64) -> Self {
        self.config.max_rate = bytes_per_second;
        self
    }

    pub fn state_format(mut self, format: StateFormat) -> Self {
        self.config.state_format = format;
        self
    }

    pub fn try_http(mut self, try_http: bool) -> Self {
        self.config.try_http = try_http;
        self
    }

    pub fn request_retry_count(mut self, retries: u32) -> Self {
        self.config.request_retry_count = retries;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn stall_ticks(mut self, ticks: u32) -> Self {
        self.config.stall_ticks = ticks.max(1);
        self
    }

    pub fn build(self) -> DownloadConfig {
        self.config
    }
}

impl Default for DownloadConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_known_names() {
        assert_eq!("default".parse::<RangeGenMode>().unwrap(), RangeGenMode::Default);
        assert_eq!("block-size".parse::<RangeGenMode>().unwrap(), RangeGenMode::BlockSize);
    }

    #[test]
    fn unknown_mode_is_fatal() {
        let err = "turbo".parse::<RangeGenMode>().unwrap_err();
        assert!(matches!(err, DownloadError::UnknownRangeGenMode(name) if name == "turbo"));
    }

    #[test]
    fn builder_produces_adjusted_config() {
        let config = DownloadConfigBuilder::new()
            .mode(RangeGenMode::BlockSize)
            .block_size(4096)
            .slice_parallel(4)
            .max_rate(1_000_000)
            .build();
        assert_eq!(config.mode, RangeGenMode::BlockSize);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.slice_parallel, 4);
        assert_eq!(config.max_rate, 1_000_000);
    }
}
