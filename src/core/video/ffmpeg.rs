//! 基于 ffmpeg/ffprobe 子进程的视频源
//!
//! ffprobe 读取宽高和帧率，ffmpeg 以 gray rawvideo 的形式把每一帧写到 stdout。

use super::frame::{DecodedFrame, PixelFormat};
use super::source::{FrameDecoder, VideoSource};
use crate::core::error::{FingerprintError, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

pub struct FfmpegSource {
    path: PathBuf,
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }

    /// 指定 ffmpeg / ffprobe 可执行文件
    pub fn with_binaries(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn probe(&self) -> Result<StreamInfo> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height,avg_frame_rate,r_frame_rate"])
            .args(["-of", "json"])
            .arg(&self.path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.unreadable(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(self.unreadable(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| self.unreadable(format!("bad ffprobe output: {}", e)))?;
        let stream = probe
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| self.unreadable("no video stream".to_string()))?;

        let frame_rate = [stream.avg_frame_rate.as_deref(), stream.r_frame_rate.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(parse_rate)
            .next()
            .ok_or_else(|| self.unreadable("unknown frame rate".to_string()))?;

        match (stream.width, stream.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Ok(StreamInfo {
                width,
                height,
                frame_rate,
            }),
            _ => Err(self.unreadable("unknown frame size".to_string())),
        }
    }

    fn unreadable(&self, reason: String) -> FingerprintError {
        FingerprintError::SourceUnreadable(format!("{}: {}", self.path.display(), reason))
    }
}

impl VideoSource for FfmpegSource {
    fn open(&self) -> Result<Box<dyn FrameDecoder + '_>> {
        if !self.path.is_file() {
            return Err(self.unreadable("file not found".to_string()));
        }

        let info = self.probe()?;
        info!(
            "🎬 Opening {} ({}x{} @ {:.3}fps)",
            self.path.display(),
            info.width,
            info.height,
            info.frame_rate
        );

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(&self.path)
            .args(["-map", "0:v:0", "-vsync", "0"])
            .args(["-f", "rawvideo", "-pix_fmt", "gray", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.unreadable(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(self.unreadable("failed to open ffmpeg stdout".to_string()));
            }
        };

        // 单独线程读 stderr，避免管道写满卡住 ffmpeg
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let frame_len = PixelFormat::Gray8.frame_len(info.width, info.height);
        Ok(Box::new(FfmpegDecoder {
            path: self.path.clone(),
            child,
            stderr,
            exited: false,
            stdout: BufReader::with_capacity(frame_len.max(8192), stdout),
            info,
            frame_len,
            scratch: vec![0u8; frame_len],
            position: 0,
        }))
    }

    fn display_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    fn location(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }
}

struct FfmpegDecoder {
    path: PathBuf,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    exited: bool,
    stdout: BufReader<ChildStdout>,
    info: StreamInfo,
    frame_len: usize,
    scratch: Vec<u8>,
    position: u64,
}

impl FfmpegDecoder {
    /// 读满一帧；管道在帧边界结束时返回 false
    fn fill(reader: &mut BufReader<ChildStdout>, buf: &mut [u8]) -> Result<bool> {
        match reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// 输出结束后回收进程；非零退出说明解码中途失败，不能当作正常结束
    fn finish(&mut self) -> Result<()> {
        if self.exited {
            return Ok(());
        }
        let status = self.child.wait()?;
        self.exited = true;
        if status.success() {
            return Ok(());
        }

        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        Err(FingerprintError::SourceUnreadable(format!(
            "{}: ffmpeg exited with {} after {} frames: {}",
            self.path.display(),
            status,
            self.position,
            stderr.trim()
        )))
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn frame_rate(&self) -> f64 {
        self.info.frame_rate
    }

    fn read(&mut self) -> Result<Option<DecodedFrame>> {
        let mut data = vec![0u8; self.frame_len];
        if !Self::fill(&mut self.stdout, &mut data)? {
            self.finish()?;
            return Ok(None);
        }
        let timestamp_ms = (self.position as f64 * 1000.0 / self.info.frame_rate) as u64;
        let frame = DecodedFrame::new(
            self.info.width,
            self.info.height,
            PixelFormat::Gray8,
            data,
            timestamp_ms,
            self.position,
        );
        self.position += 1;
        Ok(Some(frame))
    }

    fn grab(&mut self) -> Result<bool> {
        let advanced = Self::fill(&mut self.stdout, &mut self.scratch)?;
        if !advanced {
            self.finish()?;
            return Ok(false);
        }
        self.position += 1;
        Ok(true)
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        if self.exited {
            debug!("🗑️ FfmpegDecoder: released after {} frames", self.position);
            return;
        }
        // 提前停止消费时 ffmpeg 可能仍在写管道
        if let Err(e) = self.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                warn!("⚠️ Failed to stop ffmpeg: {}", e);
            }
        }
        let _ = self.child.wait();
        debug!("🗑️ FfmpegDecoder: released after {} frames", self.position);
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamInfo {
    width: u32,
    height: u32,
    frame_rate: f64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// 解析 "30000/1001" 或 "25" 形式的帧率
fn parse_rate(text: &str) -> Option<f64> {
    let rate = match text.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => text.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}
