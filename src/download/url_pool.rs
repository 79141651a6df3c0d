use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use headers::HeaderMapExt;
use log::debug;
use reqwest::Client;
use tokio::sync::Semaphore;
use url::Url;

/// Probe fan-out bound.
const PROBE_FANOUT: usize = 10;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One admitted origin URL and the provider identity it came from.
#[derive(Debug, Clone)]
pub struct UrlEntry {
    pub url: String,
    pub drive_id: String,
    pub file_id: String,
}

/// Equivalent origin URLs for one session, kept in admission order.
pub struct UrlPool {
    entries: Vec<UrlEntry>,
    cursor: AtomicUsize,
}

impl UrlPool {
    /// Builds the pool. The primary entry is admitted unprobed; every
    /// auxiliary must answer 2xx with a Content-Length equal to
    /// `total_size`. Failed probes are dropped silently.
    pub async fn probe(
        primary: UrlEntry,
        auxiliaries: Vec<UrlEntry>,
        total_size: u64,
        try_http: bool,
    ) -> Self {
        let mut primary = primary;
        if try_http {
            downgrade_scheme(&mut primary);
        }

        let client = match Client::builder().timeout(PROBE_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                debug!("probe client unavailable: {}", err);
                return Self::from_entries(vec![primary]);
            }
        };

        let semaphore = Arc::new(Semaphore::new(PROBE_FANOUT));
        let probes = auxiliaries.into_iter().map(|mut entry| {
            let client = client.clone();
            let semaphore = semaphore.clone();
            async move {
                if try_http {
                    downgrade_scheme(&mut entry);
                }
                let _permit = semaphore.acquire().await.ok()?;
                Self::admit(&client, &entry, total_size).await.then_some(entry)
            }
        });

        let mut entries = vec![primary];
        entries.extend(join_all(probes).await.into_iter().flatten());
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<UrlEntry>) -> Self {
        Self { entries, cursor: AtomicUsize::new(0) }
    }

    /// One probe: a GET whose body is dropped right after the headers.
    async fn admit(client: &Client, entry: &UrlEntry, total_size: u64) -> bool {
        let response = match client.get(&entry.url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!("probe failed for {}: {}", entry.url, err);
                return false;
            }
        };

        let status = response.status();
        let content_length = response
            .headers()
            .typed_get::<headers::ContentLength>()
            .map(|value| value.0);
        drop(response);

        if !status.is_success() {
            debug!("probe rejected {}: status {}", entry.url, status);
            return false;
        }
        match content_length {
            Some(length) if length == total_size => true,
            other => {
                debug!(
                    "probe rejected {}: content length {:?}, expected {}",
                    entry.url, other, total_size
                );
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[UrlEntry] {
        &self.entries
    }

    /// URLs in admission order, cycling.
    pub fn sequential_get(&self) -> Option<&UrlEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.entries.len();
        self.entries.get(index)
    }

    /// Initial binding: worker `k` of `range_count` maps onto pool slots in
    /// contiguous blocks. The factor clamps to 1 so a range list shorter
    /// than the pool never divides by zero.
    pub fn slot_get(&self, worker_index: usize, range_count: usize) -> Option<&UrlEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let factor = (range_count / self.entries.len()).max(1);
        let index = (worker_index / factor).min(self.entries.len() - 1);
        self.entries.get(index)
    }
}

fn downgrade_scheme(entry: &mut UrlEntry) {
    if let Ok(mut url) = Url::parse(&entry.url) {
        if url.scheme() == "https" && url.set_scheme("http").is_ok() {
            entry.url = url.to_string();
        }
    }
}
