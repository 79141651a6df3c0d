//! rangedl — parallel-ranged file downloader
//!
//! Downloads a single remote file over one or more equivalent HTTP origins
//! concurrently: the file is partitioned into byte ranges, each range is
//! fetched by its own worker through ranged GETs, and completed chunks are
//! written into a shared random-access sink. Sessions can be paused,
//! resumed and cancelled, persist checkpoints for resumption across
//! process restarts, and spread ranges over multiple account-issued URLs
//! for aggregate throughput.

pub mod download;

pub use download::config::{DownloadConfig, DownloadConfigBuilder, RangeGenMode, StateFormat};
pub use download::downloader::{checkpoint_path, Downloader};
pub use download::error::{DownloadEndCause, DownloadError, WorkerError};
pub use download::event::DownloadEvent;
pub use download::instance::{DownloadInstance, InstanceState};
pub use download::provider::{
    AlbumFileUrl, DriveCategory, DriveInfo, FileEntity, FileSource, ProviderError, StreamsUrl,
    UrlProvider,
};
pub use download::range::Range;
pub use download::sink::{DownloadSink, FileSink, MemorySink};
pub use download::status::StatusSnapshot;
