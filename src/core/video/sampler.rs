//! 固定间隔抽帧
//!
//! 第 k 个采样点的时间为 k / sample_rate，取离它最近的源帧（距离相同取较早的一帧），
//! 采样点之间的帧通过 `grab` 跳过。源帧率低于采样率时重复上一帧。

use super::frame::GrayFrame;
use super::source::{FrameDecoder, VideoSource};
use crate::core::config::FingerprintParams;
use crate::core::error::{FingerprintError, Result};
use log::debug;

pub struct FrameSampler {
    params: FingerprintParams,
}

impl FrameSampler {
    pub fn new(params: FingerprintParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FingerprintParams {
        &self.params
    }

    /// 打开视频源并返回惰性的标准化帧序列
    pub fn sample<'a>(&self, source: &'a dyn VideoSource) -> Result<SampledFrames<'a>> {
        let decoder = source.open()?;
        let source_rate = decoder.frame_rate();
        if !source_rate.is_finite() || source_rate <= 0.0 {
            return Err(FingerprintError::SourceUnreadable(format!(
                "invalid source frame rate {}",
                source_rate
            )));
        }

        let step = source_rate / self.params.sample_rate;
        debug!(
            "Sampling 1 out of every {:.2} frames ({:.3}fps -> {}fps)",
            step, source_rate, self.params.sample_rate
        );

        Ok(SampledFrames {
            decoder: Some(decoder),
            step,
            width: self.params.width,
            height: self.params.height,
            next_sample: 0,
            position: 0,
            last: None,
            emitted: 0,
            skipped: 0,
        })
    }
}

/// 标准化帧迭代器；结束、出错或被提前 drop 时释放解码器
pub struct SampledFrames<'a> {
    decoder: Option<Box<dyn FrameDecoder + 'a>>,
    step: f64,
    width: u32,
    height: u32,
    next_sample: usize,
    /// 下一次读取的源帧序号
    position: u64,
    last: Option<(u64, GrayFrame)>,
    emitted: usize,
    skipped: u64,
}

impl SampledFrames<'_> {
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// 通过 grab 跳过的源帧数
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn target_index(&self) -> u64 {
        let exact = self.next_sample as f64 * self.step;
        (exact - 0.5).ceil().max(0.0) as u64
    }

    fn finish(&mut self) -> Option<Result<GrayFrame>> {
        self.decoder = None;
        self.last = None;
        if self.emitted == 0 {
            return Some(Err(FingerprintError::EmptySequence));
        }
        None
    }

    fn advance(&mut self) -> Result<Option<GrayFrame>> {
        let target = self.target_index();

        if let Some((index, frame)) = &self.last {
            if *index == target {
                return Ok(Some(frame.clone()));
            }
        }

        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };

        while self.position < target {
            if !decoder.grab()? {
                return Ok(None);
            }
            self.position += 1;
            self.skipped += 1;
        }

        let Some(decoded) = decoder.read()? else {
            return Ok(None);
        };
        self.position += 1;

        let frame = decoded.to_gray()?.resize_to(self.width, self.height)?;
        self.last = Some((target, frame.clone()));
        Ok(Some(frame))
    }
}

impl Iterator for SampledFrames<'_> {
    type Item = Result<GrayFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.decoder.is_none() {
            return None;
        }

        match self.advance() {
            Ok(Some(frame)) => {
                self.next_sample += 1;
                self.emitted += 1;
                Some(Ok(frame))
            }
            Ok(None) => self.finish(),
            Err(e) => {
                self.decoder = None;
                self.last = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::frame::{DecodedFrame, PixelFormat};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 每帧亮度等于帧号（取模 256），并统计解码/跳过次数
    struct CountingSource {
        frame_rate: f64,
        frames: u64,
        reads: Arc<AtomicUsize>,
        grabs: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    impl CountingSource {
        fn new(frame_rate: f64, frames: u64) -> Self {
            Self {
                frame_rate,
                frames,
                reads: Arc::new(AtomicUsize::new(0)),
                grabs: Arc::new(AtomicUsize::new(0)),
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct CountingDecoder {
        frame_rate: f64,
        frames: u64,
        position: u64,
        reads: Arc<AtomicUsize>,
        grabs: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    impl VideoSource for CountingSource {
        fn open(&self) -> Result<Box<dyn FrameDecoder + '_>> {
            Ok(Box::new(CountingDecoder {
                frame_rate: self.frame_rate,
                frames: self.frames,
                position: 0,
                reads: self.reads.clone(),
                grabs: self.grabs.clone(),
                released: self.released.clone(),
            }))
        }
    }

    impl FrameDecoder for CountingDecoder {
        fn frame_rate(&self) -> f64 {
            self.frame_rate
        }

        fn read(&mut self) -> Result<Option<DecodedFrame>> {
            if self.position >= self.frames {
                return Ok(None);
            }
            self.reads.fetch_add(1, Ordering::SeqCst);
            let value = (self.position % 256) as u8;
            let frame = DecodedFrame::new(8, 4, PixelFormat::Gray8, vec![value; 32], 0, self.position);
            self.position += 1;
            Ok(Some(frame))
        }

        fn grab(&mut self) -> Result<bool> {
            if self.position >= self.frames {
                return Ok(false);
            }
            self.grabs.fetch_add(1, Ordering::SeqCst);
            self.position += 1;
            Ok(true)
        }
    }

    impl Drop for CountingDecoder {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn params() -> FingerprintParams {
        FingerprintParams {
            sample_rate: 10.0,
            width: 8,
            height: 4,
            rows: 2,
            cols: 4,
        }
    }

    fn values(frames: Vec<Result<GrayFrame>>) -> Vec<u8> {
        frames.into_iter().map(|f| f.unwrap().data[0]).collect()
    }

    #[test]
    fn test_downsample_skips_with_grab() {
        let source = CountingSource::new(30.0, 30);
        let sampler = FrameSampler::new(params());
        let frames: Vec<_> = sampler.sample(&source).unwrap().collect();

        assert_eq!(values(frames), vec![0, 3, 6, 9, 12, 15, 18, 21, 24, 27]);
        assert_eq!(source.reads.load(Ordering::SeqCst), 10);
        assert_eq!(source.grabs.load(Ordering::SeqCst), 20);
        assert!(source.released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_nearest_frame_ties_pick_earlier() {
        // 25fps -> 10fps: 采样点落在 0, 2.5, 5, 7.5 ...
        let source = CountingSource::new(25.0, 10);
        let sampler = FrameSampler::new(params());
        let frames: Vec<_> = sampler.sample(&source).unwrap().collect();
        assert_eq!(values(frames), vec![0, 2, 5, 7]);
    }

    #[test]
    fn test_slow_source_repeats_frames() {
        let source = CountingSource::new(5.0, 3);
        let sampler = FrameSampler::new(params());
        let frames: Vec<_> = sampler.sample(&source).unwrap().collect();

        // 0.0s,0.1s -> 0; 0.2s,0.3s -> 1; 0.4s,0.5s -> 2
        assert_eq!(values(frames), vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(source.reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_same_rate_keeps_every_frame() {
        let source = CountingSource::new(10.0, 100);
        let sampler = FrameSampler::new(params());
        let frames: Vec<_> = sampler.sample(&source).unwrap().collect();
        assert_eq!(frames.len(), 100);
        assert_eq!(source.grabs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_source_reports_empty_sequence() {
        let source = CountingSource::new(30.0, 0);
        let sampler = FrameSampler::new(params());
        let mut frames = sampler.sample(&source).unwrap();

        assert!(matches!(frames.next(), Some(Err(FingerprintError::EmptySequence))));
        assert!(frames.next().is_none());
        assert!(source.released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_early_drop_releases_decoder() {
        let source = CountingSource::new(30.0, 300);
        let sampler = FrameSampler::new(params());
        {
            let mut frames = sampler.sample(&source).unwrap();
            assert!(frames.next().is_some());
            assert!(!source.released.load(Ordering::SeqCst));
        }
        assert!(source.released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_frames_are_standardized() {
        let source = CountingSource::new(10.0, 2);
        let sampler = FrameSampler::new(FingerprintParams {
            width: 16,
            height: 8,
            ..params()
        });
        for frame in sampler.sample(&source).unwrap() {
            let frame = frame.unwrap();
            assert_eq!((frame.width, frame.height), (16, 8));
        }
    }

    #[test]
    fn test_sampling_is_restartable() {
        let source = CountingSource::new(30.0, 60);
        let sampler = FrameSampler::new(params());
        let first: Vec<_> = sampler.sample(&source).unwrap().collect();
        let second: Vec<_> = sampler.sample(&source).unwrap().collect();
        assert_eq!(values(first), values(second));
    }
}
