//!
//! # 持久化模块
//! 用于将下载信息持久化到硬盘，用于断点恢复
//!

use std::fs;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::download::config::StateFormat;
use crate::download::range::Range;

const JSON_FORMAT: &str = "rangedl-instance";
const BINARY_MAGIC: &[u8; 4] = b"RDLI";
const VERSION: u32 = 1;

/// Serialized snapshot of one download, stored alongside the target file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInstance {
    pub total_size: u64,
    pub ranges: Vec<Range>,
}

impl DownloadInstance {
    pub fn downloaded(&self) -> u64 {
        self.ranges.iter().map(|range| range.downloaded()).sum()
    }
}

#[derive(Serialize, Deserialize)]
struct JsonEnvelope {
    format: String,
    version: u32,
    total_size: u64,
    ranges: Vec<Range>,
}

/// Persists and restores checkpoint state for resumption across restarts.
pub struct InstanceState {
    path: PathBuf,
    format: StateFormat,
}

impl InstanceState {
    pub fn new(path: impl Into<PathBuf>, format: StateFormat) -> Self {
        Self { path: path.into(), format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the persisted instance if the file exists and parses.
    pub fn get(&self) -> Option<DownloadInstance> {
        let data = fs::read(&self.path).ok()?;
        let parsed = match self.format {
            StateFormat::Json => Self::decode_json(&data),
            StateFormat::Binary => Self::decode_binary(&data),
        };
        if parsed.is_none() {
            warn!("checkpoint {:?} did not parse, ignoring", self.path);
        }
        parsed
    }

    /// Writes through a temp sibling + rename so readers never observe a
    /// torn file.
    pub fn put(&self, instance: &DownloadInstance) -> std::io::Result<()> {
        let data = match self.format {
            StateFormat::Json => Self::encode_json(instance)?,
            StateFormat::Binary => Self::encode_binary(instance),
        };
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Deletes the checkpoint. Missing file is not an error.
    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("checkpoint removed: {:?}", self.path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove checkpoint {:?}: {}", self.path, err),
        }
    }

    fn encode_json(instance: &DownloadInstance) -> std::io::Result<Vec<u8>> {
        let envelope = JsonEnvelope {
            format: JSON_FORMAT.to_string(),
            version: VERSION,
            total_size: instance.total_size,
            ranges: instance.ranges.clone(),
        };
        serde_json::to_vec_pretty(&envelope).map_err(std::io::Error::other)
    }

    fn decode_json(data: &[u8]) -> Option<DownloadInstance> {
        let envelope: JsonEnvelope = serde_json::from_slice(data).ok()?;
        if envelope.format != JSON_FORMAT || envelope.version != VERSION {
            return None;
        }
        Some(DownloadInstance {
            total_size: envelope.total_size,
            ranges: envelope.ranges,
        })
    }

    fn encode_binary(instance: &DownloadInstance) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20 + instance.ranges.len() * 24);
        buf.put_slice(BINARY_MAGIC);
        buf.put_u32_le(VERSION);
        buf.put_u64_le(instance.total_size);
        buf.put_u32_le(instance.ranges.len() as u32);
        for range in &instance.ranges {
            buf.put_u64_le(range.begin);
            buf.put_u64_le(range.end);
            buf.put_u64_le(range.current);
        }
        buf
    }

    fn decode_binary(mut data: &[u8]) -> Option<DownloadInstance> {
        if data.len() < 20 || &data[..4] != BINARY_MAGIC {
            return None;
        }
        data.advance(4);
        if data.get_u32_le() != VERSION {
            return None;
        }
        let total_size = data.get_u64_le();
        let count = data.get_u32_le() as usize;
        if data.remaining() < count * 24 {
            return None;
        }

        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            let begin = data.get_u64_le();
            let end = data.get_u64_le();
            let current = data.get_u64_le();
            if begin > current || current > end {
                return None;
            }
            ranges.push(Range { begin, end, current });
        }
        Some(DownloadInstance { total_size, ranges })
    }
}
