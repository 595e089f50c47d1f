//! 指纹库元数据目录（catalog.json）

use super::write_atomic;
use crate::core::config::FingerprintParams;
use crate::core::error::{FingerprintError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

pub type VideoId = Uuid;

pub const CATALOG_VERSION: u32 = 1;

/// 一个已入库视频
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: VideoId,
    pub name: String,
    /// 采样帧数 N
    pub frames: usize,
    pub duration_secs: f64,
    /// fingerprints/ 下的文件名
    pub blob: String,
    /// 入库时的原始路径，仅作记录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    version: u32,
    params: FingerprintParams,
    videos: Vec<VideoRecord>,
}

impl Catalog {
    pub fn new(params: FingerprintParams) -> Self {
        Self {
            version: CATALOG_VERSION,
            params,
            videos: Vec::new(),
        }
    }

    /// 读取目录文件，文件不存在时返回 `None`
    pub fn load(path: &Path) -> Result<Option<Catalog>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let catalog: Catalog = serde_json::from_str(&text).map_err(|e| {
            FingerprintError::CorruptLibrary(format!("{}: {}", path.display(), e))
        })?;
        if catalog.version != CATALOG_VERSION {
            return Err(FingerprintError::CorruptLibrary(format!(
                "{}: unsupported catalog version {}",
                path.display(),
                catalog.version
            )));
        }
        Ok(Some(catalog))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)
    }

    pub fn params(&self) -> &FingerprintParams {
        &self.params
    }

    /// 按入库顺序
    pub fn videos(&self) -> &[VideoRecord] {
        &self.videos
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    pub fn get(&self, id: &VideoId) -> Option<&VideoRecord> {
        self.videos.iter().find(|v| &v.id == id)
    }

    pub fn contains_blob(&self, blob: &str) -> bool {
        self.videos.iter().any(|v| v.blob == blob)
    }

    pub fn push(&mut self, record: VideoRecord) {
        self.videos.push(record);
    }

    pub fn remove(&mut self, id: &VideoId) -> Option<(usize, VideoRecord)> {
        let index = self.videos.iter().position(|v| &v.id == id)?;
        Some((index, self.videos.remove(index)))
    }

    pub fn restore(&mut self, index: usize, record: VideoRecord) {
        let index = index.min(self.videos.len());
        self.videos.insert(index, record);
    }
}
