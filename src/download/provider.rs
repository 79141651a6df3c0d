//!
//! 下载链接提供方
//! 每个账号对应一个 [`UrlProvider`]，主账号必须可用，辅助账号尽力而为
//!

use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

/// Rate hint observed after every URL request against a provider.
pub const URL_REQUEST_PAUSE: Duration = Duration::from_millis(200);

/// 要下载的文件来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource {
    File,
    Album,
}

/// Drive namespace the target file lives in, as seen by the main account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCategory {
    File,
    Resource,
}

/// Provider-side description of the file being downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileEntity {
    pub file_id: String,
    pub drive_id: String,
    pub album_id: String,
    pub path: String,
    pub file_name: String,
    pub file_extension: String,
    pub file_size: u64,
}

/// Per-stream URLs an album entry may expose instead of a plain URL.
#[derive(Debug, Clone, Default)]
pub struct StreamsUrl {
    pub mov: String,
    pub heic: String,
    pub jpeg: String,
}

/// Download URL answer for an album entry.
#[derive(Debug, Clone, Default)]
pub struct AlbumFileUrl {
    pub url: String,
    pub streams: Option<StreamsUrl>,
}

impl AlbumFileUrl {
    /// Live photos carry per-stream URLs; pick by the entity's extension,
    /// stills fall back from heic to jpeg.
    pub fn resolve(&self, file_extension: &str) -> Option<String> {
        match &self.streams {
            Some(streams) => {
                let picked = if file_extension.eq_ignore_ascii_case("mov") {
                    streams.mov.as_str()
                } else if !streams.heic.is_empty() {
                    streams.heic.as_str()
                } else {
                    streams.jpeg.as_str()
                };
                (!picked.is_empty()).then(|| picked.to_string())
            }
            None => (!self.url.is_empty()).then(|| self.url.clone()),
        }
    }
}

/// Drive ids of one account.
#[derive(Debug, Clone, Default)]
pub struct DriveInfo {
    pub file_drive_id: String,
    pub resource_drive_id: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("download url unavailable: {0}")]
    UrlUnavailable(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("provider request failed: {0}")]
    Request(String),
}

/// One account able to issue download URLs for the files it can see.
/// Object safe so a session can hold the primary plus any number of
/// auxiliaries behind `dyn`.
pub trait UrlProvider: Send + Sync {
    /// Download URL for a file in one of this account's drives.
    fn file_download_url<'a>(
        &'a self,
        drive_id: &'a str,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<String, ProviderError>>;

    /// Looks a file up by path inside this account's namespace.
    fn file_by_path<'a>(
        &'a self,
        drive_id: &'a str,
        path: &'a str,
    ) -> BoxFuture<'a, Result<FileEntity, ProviderError>>;

    /// Download URL for a shared-album entry. Only consulted for the
    /// primary account.
    fn album_file_download_url<'a>(
        &'a self,
        album_id: &'a str,
        drive_id: &'a str,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<AlbumFileUrl, ProviderError>>;

    fn drive_info<'a>(&'a self) -> BoxFuture<'a, Result<DriveInfo, ProviderError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn album_url_prefers_streams_by_extension() {
        let durl = AlbumFileUrl {
            url: "https://origin/plain".to_string(),
            streams: Some(StreamsUrl {
                mov: "https://origin/live.mov".to_string(),
                heic: "https://origin/live.heic".to_string(),
                jpeg: "https://origin/live.jpg".to_string(),
            }),
        };

        assert_eq!(durl.resolve("MOV").unwrap(), "https://origin/live.mov");
        assert_eq!(durl.resolve("heic").unwrap(), "https://origin/live.heic");
    }

    #[test]
    fn album_url_falls_back_to_jpeg_then_plain() {
        let streams_only_jpeg = AlbumFileUrl {
            url: String::new(),
            streams: Some(StreamsUrl {
                jpeg: "https://origin/live.jpg".to_string(),
                ..StreamsUrl::default()
            }),
        };
        assert_eq!(streams_only_jpeg.resolve("heic").unwrap(), "https://origin/live.jpg");

        let plain = AlbumFileUrl {
            url: "https://origin/plain".to_string(),
            streams: None,
        };
        assert_eq!(plain.resolve("jpg").unwrap(), "https://origin/plain");
    }

    #[test]
    fn empty_streams_do_not_fall_back_to_plain_url() {
        let durl = AlbumFileUrl {
            url: "https://origin/plain".to_string(),
            streams: Some(StreamsUrl::default()),
        };
        assert!(durl.resolve("mov").is_none());
    }
}
