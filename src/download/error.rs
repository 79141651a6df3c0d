use thiserror::Error;
use tokio::io;

use crate::download::provider::ProviderError;

/// 下载中发生的错误
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("unknown range generation mode: {0}")]
    UnknownRangeGenMode(String),

    #[error("file download forbidden")]
    FileDownloadForbidden,

    #[error("no workers left to make progress")]
    NoWorkers,

    #[error("file info not set before execute")]
    FileInfoMissing,

    #[error("IOError: {:?}", .0)]
    IOError(#[from] io::Error),

    #[error("Http request failed: {:?}", .0)]
    HttpRequestFailed(#[from] reqwest::Error),

    #[error("url provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("worker failed: {0}")]
    Worker(#[from] WorkerError),
}

/// 下载结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadEndCause {
    Finished,
    Cancelled,
}

/// 单个 worker 的错误
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Http request failed: {:?}", .0)]
    Http(#[from] reqwest::Error),

    #[error("unexpected status code {0}")]
    Status(reqwest::StatusCode),

    #[error("server ignored the range request")]
    RangeIgnored,

    #[error("response body ended before the range completed")]
    BodyTruncated,

    #[error("IOError: {:?}", .0)]
    IOError(#[from] std::io::Error),
}

impl WorkerError {
    /// Transient failures are retried in place at the worker's cursor.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Http(_) => true,
            WorkerError::BodyTruncated => true,
            WorkerError::Status(code) => {
                matches!(code.as_u16(), 408 | 429) || code.is_server_error()
            }
            WorkerError::RangeIgnored => false,
            WorkerError::IOError(_) => false,
        }
    }

    /// Sink write errors abort the whole session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::IOError(_))
    }
}
