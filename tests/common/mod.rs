#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rangedl::{AlbumFileUrl, DriveInfo, FileEntity, ProviderError, UrlProvider};
use wiremock::{Request, Respond, ResponseTemplate};

pub fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = rangedl::download::logger::setup_logger(None);
    });
}

/// Deterministic fixture content.
pub fn fixture_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31).wrapping_add(7) % 251) as u8)
        .collect()
}

pub fn file_entity(size: u64) -> FileEntity {
    FileEntity {
        file_id: "file-1".to_string(),
        drive_id: "drive-main".to_string(),
        album_id: String::new(),
        path: "/data/fixture.bin".to_string(),
        file_name: "fixture.bin".to_string(),
        file_extension: "bin".to_string(),
        file_size: size,
    }
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

pub fn respond_ranged(data: &[u8], request: &Request) -> ResponseTemplate {
    let range = request
        .headers
        .get("range")
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range);
    match range {
        Some((start, end)) if start < data.len() as u64 => {
            let end = end.min(data.len() as u64 - 1);
            ResponseTemplate::new(206)
                .set_body_bytes(data[start as usize..=end as usize].to_vec())
        }
        Some(_) => ResponseTemplate::new(416),
        None => ResponseTemplate::new(200).set_body_bytes(data.to_vec()),
    }
}

/// Serves `bytes=a-b` slices with 206, or the whole body with 200 when no
/// Range header is present (the shape URL probes see).
pub struct RangedBody {
    data: Vec<u8>,
}

impl RangedBody {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl Respond for RangedBody {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        respond_ranged(&self.data, request)
    }
}

/// Answers the first `failures` requests with 503, then serves slices.
pub struct FlakyRangedBody {
    data: Vec<u8>,
    remaining_failures: AtomicU32,
    hits: Arc<AtomicU32>,
}

impl FlakyRangedBody {
    pub fn new(data: Vec<u8>, failures: u32) -> (Self, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let responder = Self {
            data,
            remaining_failures: AtomicU32::new(failures),
            hits: hits.clone(),
        };
        (responder, hits)
    }
}

impl Respond for FlakyRangedBody {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            ResponseTemplate::new(503)
        } else {
            respond_ranged(&self.data, request)
        }
    }
}

/// Serves ranges instantly for the first range of the file and with a
/// fixed delay for every other range.
pub struct SlowTailRangedBody {
    data: Vec<u8>,
    tail_delay: Duration,
}

impl SlowTailRangedBody {
    pub fn new(data: Vec<u8>, tail_delay: Duration) -> Self {
        Self { data, tail_delay }
    }
}

impl Respond for SlowTailRangedBody {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let starts_at_zero = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("bytes=0-"))
            .unwrap_or(true);
        let template = respond_ranged(&self.data, request);
        if starts_at_zero {
            template
        } else {
            template.set_delay(self.tail_delay)
        }
    }
}

/// Provider that hands out one fixed URL, for tests.
pub struct StaticProvider {
    pub url: String,
    pub drives: DriveInfo,
    pub entity_by_path: Option<FileEntity>,
}

impl StaticProvider {
    pub fn primary(url: String) -> Arc<Self> {
        Arc::new(Self {
            url,
            drives: DriveInfo {
                file_drive_id: "drive-main".to_string(),
                resource_drive_id: "drive-main-res".to_string(),
            },
            entity_by_path: None,
        })
    }

    pub fn auxiliary(url: String, drive_id: &str, size: u64) -> Arc<Self> {
        let mut entity = file_entity(size);
        entity.file_id = format!("file-on-{}", drive_id);
        entity.drive_id = drive_id.to_string();
        Arc::new(Self {
            url,
            drives: DriveInfo {
                file_drive_id: drive_id.to_string(),
                resource_drive_id: format!("{}-res", drive_id),
            },
            entity_by_path: Some(entity),
        })
    }
}

impl UrlProvider for StaticProvider {
    fn file_download_url<'a>(
        &'a self,
        _drive_id: &'a str,
        _file_id: &'a str,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        async move { Ok(self.url.clone()) }.boxed()
    }

    fn file_by_path<'a>(
        &'a self,
        _drive_id: &'a str,
        path: &'a str,
    ) -> BoxFuture<'a, Result<FileEntity, ProviderError>> {
        async move {
            self.entity_by_path
                .clone()
                .ok_or_else(|| ProviderError::NotFound(path.to_string()))
        }
        .boxed()
    }

    fn album_file_download_url<'a>(
        &'a self,
        _album_id: &'a str,
        _drive_id: &'a str,
        _file_id: &'a str,
    ) -> BoxFuture<'a, Result<AlbumFileUrl, ProviderError>> {
        async move {
            Ok(AlbumFileUrl {
                url: self.url.clone(),
                streams: None,
            })
        }
        .boxed()
    }

    fn drive_info<'a>(&'a self) -> BoxFuture<'a, Result<DriveInfo, ProviderError>> {
        async move { Ok(self.drives.clone()) }.boxed()
    }
}
