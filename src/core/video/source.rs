//! 视频源抽象
//!
//! 容器解封装和解码不属于指纹引擎，这里只约定一个能按顺序吐出解码帧的接口。
//! `grab` 用于跳过采样点之间的帧，实现方应尽量避免真正解码像素。

use super::frame::{DecodedFrame, GrayFrame, PixelFormat};
use crate::core::error::{FingerprintError, Result};
use std::path::{Path, PathBuf};

pub trait FrameDecoder: Send {
    /// 源帧率（帧/秒）
    fn frame_rate(&self) -> f64;

    /// 解码下一帧，源结束时返回 `None`
    fn read(&mut self) -> Result<Option<DecodedFrame>>;

    /// 前进一帧但不产出像素，源结束时返回 `false`
    fn grab(&mut self) -> Result<bool> {
        Ok(self.read()?.is_some())
    }
}

pub trait VideoSource: Send + Sync {
    /// 打开一个新的解码器；解码器在 drop 时释放资源
    fn open(&self) -> Result<Box<dyn FrameDecoder + '_>>;

    /// 未指定名称时使用的默认显示名
    fn display_name(&self) -> Option<String> {
        None
    }

    /// 原始位置（文件路径等），仅作记录
    fn location(&self) -> Option<String> {
        None
    }
}

/// 内存中的帧序列
pub struct MemorySource {
    frame_rate: f64,
    frames: Vec<DecodedFrame>,
    name: Option<String>,
}

impl MemorySource {
    pub fn new(frame_rate: f64, frames: Vec<DecodedFrame>) -> Self {
        Self {
            frame_rate,
            frames,
            name: None,
        }
    }

    pub fn from_gray_frames(frame_rate: f64, frames: Vec<GrayFrame>) -> Self {
        let decoded = frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| {
                let timestamp_ms = (i as f64 * 1000.0 / frame_rate) as u64;
                DecodedFrame::new(f.width, f.height, PixelFormat::Gray8, f.data, timestamp_ms, i as u64)
            })
            .collect();
        Self::new(frame_rate, decoded)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl VideoSource for MemorySource {
    fn open(&self) -> Result<Box<dyn FrameDecoder + '_>> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(FingerprintError::SourceUnreadable(format!(
                "invalid frame rate {}",
                self.frame_rate
            )));
        }
        Ok(Box::new(MemoryDecoder {
            source: self,
            position: 0,
        }))
    }

    fn display_name(&self) -> Option<String> {
        self.name.clone()
    }
}

struct MemoryDecoder<'a> {
    source: &'a MemorySource,
    position: usize,
}

impl FrameDecoder for MemoryDecoder<'_> {
    fn frame_rate(&self) -> f64 {
        self.source.frame_rate
    }

    fn read(&mut self) -> Result<Option<DecodedFrame>> {
        let frame = self.source.frames.get(self.position).cloned();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }

    fn grab(&mut self) -> Result<bool> {
        if self.position < self.source.frames.len() {
            self.position += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// 图片序列目录（按文件名排序，png/jpeg/bmp）
pub struct ImageSequenceSource {
    dir: PathBuf,
    frame_rate: f64,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>, frame_rate: f64) -> Self {
        Self {
            dir: dir.into(),
            frame_rate,
        }
    }

    fn list_images(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            FingerprintError::SourceUnreadable(format!("{}: {}", self.dir.display(), e))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
        .unwrap_or(false)
}

impl VideoSource for ImageSequenceSource {
    fn open(&self) -> Result<Box<dyn FrameDecoder + '_>> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(FingerprintError::SourceUnreadable(format!(
                "invalid frame rate {}",
                self.frame_rate
            )));
        }
        Ok(Box::new(ImageSequenceDecoder {
            paths: self.list_images()?,
            position: 0,
            frame_rate: self.frame_rate,
        }))
    }

    fn display_name(&self) -> Option<String> {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    fn location(&self) -> Option<String> {
        Some(self.dir.display().to_string())
    }
}

struct ImageSequenceDecoder {
    paths: Vec<PathBuf>,
    position: usize,
    frame_rate: f64,
}

impl FrameDecoder for ImageSequenceDecoder {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn read(&mut self) -> Result<Option<DecodedFrame>> {
        let Some(path) = self.paths.get(self.position) else {
            return Ok(None);
        };
        let img = image::open(path)
            .map_err(|e| FingerprintError::SourceUnreadable(format!("{}: {}", path.display(), e)))?
            .to_luma8();

        let frame_number = self.position as u64;
        let timestamp_ms = (self.position as f64 * 1000.0 / self.frame_rate) as u64;
        self.position += 1;

        let (width, height) = img.dimensions();
        Ok(Some(DecodedFrame::new(
            width,
            height,
            PixelFormat::Gray8,
            img.into_raw(),
            timestamp_ms,
            frame_number,
        )))
    }

    fn grab(&mut self) -> Result<bool> {
        if self.position < self.paths.len() {
            self.position += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
