use crate::core::error::{FingerprintError, Result};
use image::GrayImage;
use std::time::Duration;

/// 解码器输出的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Rgba8,
    /// YUV420 planar，Y 平面在前
    I420,
}

impl PixelFormat {
    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        let pixels = (width * height) as usize;
        match self {
            PixelFormat::Gray8 => pixels,
            PixelFormat::Rgb24 => pixels * 3,
            PixelFormat::Rgba8 => pixels * 4,
            PixelFormat::I420 => pixels + 2 * ((width as usize / 2) * (height as usize / 2)),
        }
    }
}

/// 解码后的原始帧
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub timestamp: Duration,
    pub frame_number: u64,
}

impl DecodedFrame {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Self {
        Self {
            width,
            height,
            format,
            data,
            timestamp: Duration::from_millis(timestamp_ms),
            frame_number,
        }
    }

    pub fn pixel_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// 转为单通道亮度
    pub fn to_gray(&self) -> Result<GrayFrame> {
        let expected = self.format.frame_len(self.width, self.height);
        if self.data.len() < expected {
            return Err(FingerprintError::dims(
                format!("{} bytes for {:?} {}x{}", expected, self.format, self.width, self.height),
                format!("{} bytes", self.data.len()),
            ));
        }

        let gray = match self.format {
            PixelFormat::Gray8 => self.data[..expected].to_vec(),
            // Y 平面本身就是亮度
            PixelFormat::I420 => self.data[..self.pixel_count()].to_vec(),
            PixelFormat::Rgb24 => self.data[..expected]
                .chunks_exact(3)
                .map(|rgb| luma(rgb[0], rgb[1], rgb[2]))
                .collect(),
            PixelFormat::Rgba8 => self.data[..expected]
                .chunks_exact(4)
                .map(|rgba| luma(rgba[0], rgba[1], rgba[2]))
                .collect(),
        };

        GrayFrame::new(self.width, self.height, gray)
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

/// 单通道灰度帧（只在一次提取内存在，不落盘）
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl GrayFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != (width * height) as usize {
            return Err(FingerprintError::dims(
                format!("{} samples for {}x{}", width * height, width, height),
                format!("{} samples", data.len()),
            ));
        }
        Ok(Self { width, height, data })
    }

    pub fn uniform(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; (width * height) as usize],
        }
    }

    pub fn pixel_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn resize_to(&self, target_width: u32, target_height: u32) -> Result<GrayFrame> {
        if self.width == target_width && self.height == target_height {
            return Ok(self.clone());
        }

        let img = GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            FingerprintError::dims(
                format!("{}x{}", self.width, self.height),
                format!("{} samples", self.data.len()),
            )
        })?;
        let resized = image::imageops::resize(
            &img,
            target_width,
            target_height,
            image::imageops::FilterType::Triangle,
        );

        Ok(GrayFrame {
            width: target_width,
            height: target_height,
            data: resized.into_raw(),
        })
    }

    pub fn from_image(img: GrayImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }

    pub fn to_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
    }
}
